//! Overlay configuration — exactly the knobs named in spec.md §6,
//! following the teacher's `BootstrapConfig`/`ContentRoutingConfig`
//! `Default`-struct convention (`kademlia.rs`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Divisor for per-friend queue sizing.
    pub max_connections: u32,
    /// Total outbound messages in flight across all friends.
    pub max_msgs_queue: u32,
    /// Keepalive / stabilization period for the Connection state machine.
    pub refresh_connection_time: Duration,
    /// Randomized stabilization tick.
    pub find_finger_trail_interval: Duration,
    /// Duration a rejected friend is avoided by default, when a
    /// TRAIL_REJECTION doesn't carry its own `congestion_ns` (SPEC_FULL §4
    /// item 6 has the carried value take precedence when present).
    pub congestion_timeout: Duration,
    /// Congestion trigger: trails through one friend before it's skipped.
    pub trails_through_friend_threshold: u32,
    /// K: max parallel trails per finger.
    pub max_trails_per_finger: usize,
    /// ACK wait before POLL backoff begins.
    pub get_timeout: Duration,
    /// Expiration-time modulus for anti-timing randomization. Left as a
    /// pass-through knob (DESIGN.md open question 1) — the core does not
    /// itself randomize PUT expirations, that's owned by the options/
    /// datastore layer.
    pub max_migration_exp: u64,
    /// Bound on outstanding routing-table entries per peer (spec.md §3:
    /// "Capacity-bounded; when full, new setup requests are rejected").
    pub routing_table_capacity: usize,
    /// SPEC_FULL §4 item 3: bounded find-finger retries per stabilization
    /// tick after a TRAIL_REJECTION.
    pub max_finger_setup_retries: u32,
    /// SPEC_FULL §4 item 4: window for GET_RESULT de-duplication.
    pub get_result_dedup_window: Duration,
    /// Size of the GET_RESULT de-dup LRU (entries, not bytes).
    pub get_result_dedup_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_connections: 256,
            max_msgs_queue: 1024,
            refresh_connection_time: Duration::from_secs(5 * 60),
            find_finger_trail_interval: Duration::from_secs(30),
            congestion_timeout: Duration::from_secs(2 * 60),
            trails_through_friend_threshold: 64,
            max_trails_per_finger: 2,
            get_timeout: Duration::from_secs(2 * 60),
            max_migration_exp: 1 << 20,
            routing_table_capacity: 16_384,
            max_finger_setup_retries: 3,
            get_result_dedup_window: Duration::from_secs(30),
            get_result_dedup_capacity: 4096,
        }
    }
}

impl Config {
    /// Per-friend queue cap, per spec.md §4.2:
    /// `max_msgs_queue / max_connections + 1`.
    pub fn per_friend_queue_max(&self) -> u32 {
        self.max_msgs_queue / self.max_connections + 1
    }

    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_queue_sizing_matches_spec() {
        let cfg = Config::default();
        assert_eq!(cfg.per_friend_queue_max(), 1024 / 256 + 1);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = Config::default();
        let s = cfg.to_toml().unwrap();
        let back = Config::from_toml(&s).unwrap();
        assert_eq!(back.max_trails_per_finger, cfg.max_trails_per_finger);
    }
}
