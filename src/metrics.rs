//! Statistics counters, one per spec.md §7 error kind plus the routing
//! gauges spec.md §8's testable properties need to observe from the
//! outside. Adapted from the teacher's `metrics.rs` counters (`QueueMetrics`,
//! `NetworkMetrics`), trimmed of the libp2p-specific cache/latency fields
//! that had no counterpart in the transport-agnostic design here.

use metrics::{counter, gauge};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide statistics, incremented from the event loop only (spec.md
/// §5: no parallelism inside a process).
#[derive(Debug, Default)]
pub struct Stats {
    pub dropped_deadline: AtomicU64,
    pub dropped_malformed: AtomicU64,
    pub dropped_duplicate_pid: AtomicU64,
    pub dropped_stale_pid: AtomicU64,
    pub dropped_queue_full: AtomicU64,
    pub trail_setups_attempted: AtomicU64,
    pub trail_setups_succeeded: AtomicU64,
    pub trail_rejections: AtomicU64,
    pub trail_teardowns: AtomicU64,
    pub trail_compressions: AtomicU64,
    pub congestion_events: AtomicU64,
    pub puts_forwarded: AtomicU64,
    pub puts_stored: AtomicU64,
    pub puts_dropped_ttl: AtomicU64,
    pub gets_forwarded: AtomicU64,
    pub get_results_forwarded: AtomicU64,
    pub get_results_deduped: AtomicU64,
    pub connections_broken: AtomicU64,
    pub fingers_discovered: AtomicU64,
}

macro_rules! record {
    ($self:ident, $field:ident, $metric_name:literal) => {
        pub fn $field(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            counter!($metric_name, 1);
        }
    };
}

impl Stats {
    record!(self, dropped_deadline, "overlay_dropped_deadline_total");
    record!(self, dropped_malformed, "overlay_dropped_malformed_total");
    record!(
        self,
        dropped_duplicate_pid,
        "overlay_dropped_duplicate_pid_total"
    );
    record!(self, dropped_stale_pid, "overlay_dropped_stale_pid_total");
    record!(self, dropped_queue_full, "overlay_dropped_queue_full_total");
    record!(
        self,
        trail_setups_attempted,
        "overlay_trail_setups_attempted_total"
    );
    record!(
        self,
        trail_setups_succeeded,
        "overlay_trail_setups_succeeded_total"
    );
    record!(self, trail_rejections, "overlay_trail_rejections_total");
    record!(self, trail_teardowns, "overlay_trail_teardowns_total");
    record!(
        self,
        trail_compressions,
        "overlay_trail_compressions_total"
    );
    record!(self, congestion_events, "overlay_congestion_events_total");
    record!(self, puts_forwarded, "overlay_puts_forwarded_total");
    record!(self, puts_stored, "overlay_puts_stored_total");
    record!(self, puts_dropped_ttl, "overlay_puts_dropped_ttl_total");
    record!(self, gets_forwarded, "overlay_gets_forwarded_total");
    record!(
        self,
        get_results_forwarded,
        "overlay_get_results_forwarded_total"
    );
    record!(
        self,
        get_results_deduped,
        "overlay_get_results_deduped_total"
    );
    record!(self, connections_broken, "overlay_connections_broken_total");
    record!(self, fingers_discovered, "overlay_fingers_discovered_total");

    /// Publish the current friend/finger/routing-table gauges. Called once
    /// per stabilization tick rather than on every mutation.
    pub fn publish_gauges(&self, friends: usize, fingers: usize, routing_entries: usize) {
        gauge!("overlay_friends", friends as f64);
        gauge!("overlay_fingers", fingers as f64);
        gauge!("overlay_routing_entries", routing_entries as f64);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dropped_deadline: self.dropped_deadline.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_duplicate_pid: self.dropped_duplicate_pid.load(Ordering::Relaxed),
            dropped_stale_pid: self.dropped_stale_pid.load(Ordering::Relaxed),
            dropped_queue_full: self.dropped_queue_full.load(Ordering::Relaxed),
            trail_setups_attempted: self.trail_setups_attempted.load(Ordering::Relaxed),
            trail_setups_succeeded: self.trail_setups_succeeded.load(Ordering::Relaxed),
            trail_rejections: self.trail_rejections.load(Ordering::Relaxed),
            trail_teardowns: self.trail_teardowns.load(Ordering::Relaxed),
            trail_compressions: self.trail_compressions.load(Ordering::Relaxed),
            congestion_events: self.congestion_events.load(Ordering::Relaxed),
            puts_forwarded: self.puts_forwarded.load(Ordering::Relaxed),
            puts_stored: self.puts_stored.load(Ordering::Relaxed),
            gets_forwarded: self.gets_forwarded.load(Ordering::Relaxed),
            get_results_forwarded: self.get_results_forwarded.load(Ordering::Relaxed),
            connections_broken: self.connections_broken.load(Ordering::Relaxed),
            fingers_discovered: self.fingers_discovered.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of the counters, cheap to compare in tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub dropped_deadline: u64,
    pub dropped_malformed: u64,
    pub dropped_duplicate_pid: u64,
    pub dropped_stale_pid: u64,
    pub dropped_queue_full: u64,
    pub trail_setups_attempted: u64,
    pub trail_setups_succeeded: u64,
    pub trail_rejections: u64,
    pub trail_teardowns: u64,
    pub trail_compressions: u64,
    pub congestion_events: u64,
    pub puts_forwarded: u64,
    pub puts_stored: u64,
    pub gets_forwarded: u64,
    pub get_results_forwarded: u64,
    pub connections_broken: u64,
    pub fingers_discovered: u64,
}
