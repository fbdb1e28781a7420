//! Trail setup, greedy forwarding, teardown and compression (spec.md
//! §4.4). Grounded in `gnunet-service-xdht_neighbours.c`'s
//! `handle_dht_p2p_trail_setup`/`handle_dht_p2p_trail_setup_result`, kept
//! as pure functions over the core tables so the routing decisions are
//! unit-testable without a transport (the same separation `finger.rs`
//! draws for table mutation).

use crate::config::Config;
use crate::error::OverlayError;
use crate::finger::{FingerAddOutcome, FingerArrival, FingerTable};
use crate::friend::FriendTable;
use crate::message::{
    AddTrail, Outbound, OverlayMessage, TrailCompression, TrailRejection, TrailSetup,
    TrailSetupResult, TrailTeardown,
};
use crate::peer_id::{closest_peer, PeerId};
use crate::routing_table::{Direction, InsertOutcome, RoutingEntry, RoutingTable};
use crate::trail::{Trail, TrailId};
use std::time::Instant;

/// Everything a trail-engine call can ask the caller (the overlay) to do:
/// send zero or more messages, and apply at most one finger-table side
/// effect. Mirrors [`FingerAddOutcome`]'s "describe, don't perform" shape.
#[derive(Default)]
pub struct TrailOutcome {
    pub sends: Vec<Outbound>,
    /// Set only by [`handle_trail_setup_result`] when it reaches the
    /// querying source: describes the finger-table insertion the caller
    /// should now perform via `FingerTable::add`.
    pub finger_request: Option<FingerTableAddRequest>,
    /// Set only by [`handle_trail_rejection`] when a rejection has
    /// relayed all the way back to the querying source: describes the
    /// retry the caller may issue (SPEC_FULL §4 item 3), bounded by its
    /// own retry counter — this function doesn't know how many retries
    /// have already happened.
    pub retry_request: Option<RetryRequest>,
    pub error: Option<OverlayError>,
}

impl TrailOutcome {
    fn send(mut self, to: PeerId, message: OverlayMessage) -> Self {
        self.sends.push(Outbound::new(to, message));
        self
    }
}

/// Describes a bounded retry of a rejected trail search, picking a
/// different starting friend than the one that just rejected it
/// (SPEC_FULL §4 item 3).
pub struct RetryRequest {
    pub destination_value: u64,
    pub is_predecessor: bool,
    pub excluded_friend: PeerId,
}

/// Begins a new trail search for finger-table slot `table_index`, per
/// spec.md §4.4 Setup. Picks a uniformly random non-congested friend to
/// start the search (SPEC_FULL §4 item 2's tie-break applies once results
/// come back, not here).
pub fn initiate_trail_setup(
    my_id: PeerId,
    table_index: usize,
    destination_value: u64,
    is_predecessor: bool,
    friends: &FriendTable,
    config: &Config,
    now: Instant,
) -> Option<(TrailId, Outbound)> {
    let starting_friend =
        friends.pick_random_non_congested(config.trails_through_friend_threshold, now)?;
    let trail_id = TrailId::random();
    let setup = TrailSetup {
        is_predecessor,
        destination_value,
        source: my_id,
        best_known_dest: my_id,
        intermediate_trail_id: TrailId::ZERO,
        trail_id,
        hops: vec![],
    };
    let _ = table_index; // recorded by the caller alongside trail_id, not needed here
    Some((
        trail_id,
        Outbound::new(starting_friend, OverlayMessage::TrailSetup(setup)),
    ))
}

/// Retries a rejected trail search, picking a random non-congested friend
/// other than `excluded` (the friend whose rejection triggered the
/// retry; by the time this runs it's normally already marked congested,
/// but excluding it directly keeps the retry correct even if the carried
/// congestion window was zero). SPEC_FULL §4 item 3.
pub fn retry_trail_setup(
    my_id: PeerId,
    destination_value: u64,
    is_predecessor: bool,
    excluded: &PeerId,
    friends: &FriendTable,
    config: &Config,
    now: Instant,
) -> Option<Outbound> {
    let starting_friend = friends.exclude_and_pick_random_non_congested(
        config.trails_through_friend_threshold,
        now,
        excluded,
    )?;
    let setup = TrailSetup {
        is_predecessor,
        destination_value,
        source: my_id,
        best_known_dest: my_id,
        intermediate_trail_id: TrailId::ZERO,
        trail_id: TrailId::random(),
        hops: vec![],
    };
    Some(Outbound::new(starting_friend, OverlayMessage::TrailSetup(setup)))
}

/// A candidate next hop discovered while greedily routing towards a
/// destination value. Shared by trail setup and, via [`crate::forwarding`],
/// PUT/GET content routing — both walk the same finger table the same
/// way (spec.md §4.5: "content routing reuses the finger table").
pub(crate) enum NextHop {
    /// This node is itself the closest known peer to the destination;
    /// the search terminates here.
    Terminal,
    /// Forward directly to a friend.
    Friend(PeerId),
    /// Forward via an existing trail (through `first_hop`), carrying
    /// `via_trail` as the new message's `intermediate_trail_id` so
    /// [`crate::forwarding`] relays it along that trail to its owner.
    ViaTrail { first_hop: PeerId, via_trail: TrailId },
}

/// Consults the finger table for the best next hop towards
/// `destination_value`, excluding any peer already present in `hops`
/// (spec.md §9 self/loop avoidance).
pub(crate) fn pick_next_hop(
    my_id: PeerId,
    destination_value: u64,
    is_predecessor: bool,
    hops: &[PeerId],
    fingers: &FingerTable,
) -> NextHop {
    let mut best: Option<(u64, NextHop)> = None;
    for finger in fingers.iter() {
        if finger.is_self() || hops.contains(&finger.identity) {
            continue;
        }
        let candidate_value = finger.identity.value64();
        let better = match &best {
            None => true,
            Some((cur, _)) => {
                closest_peer(*cur, candidate_value, destination_value, is_predecessor)
                    == candidate_value
                    && candidate_value != *cur
            }
        };
        if !better {
            continue;
        }
        let next = if finger.is_friend() {
            NextHop::Friend(finger.identity)
        } else if let Some(trail) = finger.trails().first() {
            match trail.first_hop() {
                Some(fh) if !hops.contains(&fh) => NextHop::ViaTrail {
                    first_hop: fh,
                    via_trail: trail.id,
                },
                _ => continue,
            }
        } else {
            continue;
        };
        best = Some((candidate_value, next));
    }
    match best {
        Some((value, next)) => {
            let my_value = my_id.value64();
            if closest_peer(my_value, value, destination_value, is_predecessor) == my_value
                && my_value != value
            {
                NextHop::Terminal
            } else {
                next
            }
        }
        None => NextHop::Terminal,
    }
}

/// Handles an inbound TRAIL_SETUP at an intermediate (or destination)
/// hop. `received_from` is the friend that sent it (appended to `hops` on
/// forward so later teardown/compression can walk the path).
pub fn handle_trail_setup(
    msg: TrailSetup,
    my_id: PeerId,
    received_from: PeerId,
    fingers: &FingerTable,
    routing: &mut RoutingTable,
    config: &Config,
) -> TrailOutcome {
    let mut outcome = TrailOutcome::default();

    if msg.source == my_id || msg.hops.contains(&my_id) {
        outcome.error = Some(OverlayError::SelfOnTrail {
            peer: my_id,
            trail_id: msg.trail_id,
        });
        return outcome.send(
            received_from,
            OverlayMessage::TrailRejection(TrailRejection {
                source: msg.source,
                congested: my_id,
                dest_value: msg.destination_value,
                is_predecessor: msg.is_predecessor,
                trail_id: msg.trail_id,
                congestion_ns: 0,
                hops: msg.hops,
            }),
        );
    }

    let mut hops = msg.hops.clone();
    hops.push(my_id);

    let best_value = closest_peer(
        msg.best_known_dest.value64(),
        my_id.value64(),
        msg.destination_value,
        msg.is_predecessor,
    );
    let new_best = if best_value == my_id.value64() {
        my_id
    } else {
        msg.best_known_dest
    };

    match pick_next_hop(
        new_best,
        msg.destination_value,
        msg.is_predecessor,
        &hops,
        fingers,
    ) {
        NextHop::Terminal => {
            let entry = RoutingEntry {
                trail_id: msg.trail_id,
                prev_hop: received_from,
                next_hop: my_id,
            };
            match routing.insert(entry) {
                InsertOutcome::Full => {
                    outcome.error = Some(OverlayError::TrailFull {
                        trail_id: msg.trail_id,
                    });
                    outcome.send(
                        received_from,
                        OverlayMessage::TrailRejection(TrailRejection {
                            source: msg.source,
                            congested: my_id,
                            dest_value: msg.destination_value,
                            is_predecessor: msg.is_predecessor,
                            trail_id: msg.trail_id,
                            congestion_ns: config.congestion_timeout.as_nanos() as u64,
                            hops,
                        }),
                    )
                }
                InsertOutcome::Conflict => {
                    outcome.error = Some(OverlayError::TrailConflict {
                        trail_id: msg.trail_id,
                    });
                    outcome
                }
                InsertOutcome::Inserted => outcome.send(
                    received_from,
                    OverlayMessage::TrailSetupResult(TrailSetupResult {
                        finger: my_id,
                        querying: msg.source,
                        is_predecessor: msg.is_predecessor,
                        destination_value: msg.destination_value,
                        trail_id: msg.trail_id,
                        // `hops` (not `msg.hops`) has `my_id` pushed onto
                        // it — the terminal/finger itself. spec.md §3:
                        // trail hops exclude both endpoints, so the
                        // result carries the path *up to* the finger,
                        // not including it.
                        hops: msg.hops,
                    }),
                ),
            }
        }
        NextHop::Friend(friend) => {
            let entry = RoutingEntry {
                trail_id: msg.trail_id,
                prev_hop: received_from,
                next_hop: friend,
            };
            match routing.insert(entry) {
                InsertOutcome::Full | InsertOutcome::Conflict => {
                    outcome.error = Some(OverlayError::TrailFull {
                        trail_id: msg.trail_id,
                    });
                    outcome.send(
                        received_from,
                        OverlayMessage::TrailRejection(TrailRejection {
                            source: msg.source,
                            congested: my_id,
                            dest_value: msg.destination_value,
                            is_predecessor: msg.is_predecessor,
                            trail_id: msg.trail_id,
                            congestion_ns: config.congestion_timeout.as_nanos() as u64,
                            hops,
                        }),
                    )
                }
                InsertOutcome::Inserted => outcome.send(
                    friend,
                    OverlayMessage::TrailSetup(TrailSetup {
                        is_predecessor: msg.is_predecessor,
                        destination_value: msg.destination_value,
                        source: msg.source,
                        best_known_dest: new_best,
                        intermediate_trail_id: TrailId::ZERO,
                        trail_id: msg.trail_id,
                        hops,
                    }),
                ),
            }
        }
        NextHop::ViaTrail { first_hop, via_trail } => {
            let entry = RoutingEntry {
                trail_id: msg.trail_id,
                prev_hop: received_from,
                next_hop: first_hop,
            };
            match routing.insert(entry) {
                InsertOutcome::Full | InsertOutcome::Conflict => {
                    outcome.error = Some(OverlayError::TrailFull {
                        trail_id: msg.trail_id,
                    });
                    outcome.send(
                        received_from,
                        OverlayMessage::TrailRejection(TrailRejection {
                            source: msg.source,
                            congested: my_id,
                            dest_value: msg.destination_value,
                            is_predecessor: msg.is_predecessor,
                            trail_id: msg.trail_id,
                            congestion_ns: config.congestion_timeout.as_nanos() as u64,
                            hops,
                        }),
                    )
                }
                InsertOutcome::Inserted => outcome.send(
                    first_hop,
                    OverlayMessage::TrailSetup(TrailSetup {
                        is_predecessor: msg.is_predecessor,
                        destination_value: msg.destination_value,
                        source: msg.source,
                        best_known_dest: new_best,
                        intermediate_trail_id: via_trail,
                        trail_id: msg.trail_id,
                        hops,
                    }),
                ),
            }
        }
    }
}

/// Handles a TRAIL_SETUP_RESULT travelling back towards its source, one
/// hop at a time along `hops` in reverse. At the source, installs the
/// finger; everywhere else, just relays.
pub fn handle_trail_setup_result(
    msg: TrailSetupResult,
    my_id: PeerId,
    table_index: usize,
    ultimate_value: u64,
) -> TrailOutcome {
    let mut outcome = TrailOutcome::default();
    match msg.hops.iter().rposition(|p| *p == my_id) {
        Some(pos) if pos > 0 => {
            let prev = msg.hops[pos - 1];
            outcome.send(
                prev,
                OverlayMessage::TrailSetupResult(TrailSetupResult {
                    hops: msg.hops.clone(),
                    ..msg
                }),
            )
        }
        _ => {
            // `pos == Some(0)` or not found: this is the querying source.
            let trail_hops: Vec<PeerId> = msg.hops.iter().copied().filter(|p| *p != my_id).collect();
            let arrival = if msg.finger == my_id {
                FingerArrival::SelfId
            } else if trail_hops.is_empty() {
                FingerArrival::Friend
            } else {
                FingerArrival::Remote(Trail::new(msg.trail_id, trail_hops))
            };
            outcome.finger_request = Some(FingerTableAddRequest {
                identity: msg.finger,
                arrival,
                table_index,
                ultimate_value,
            });
            outcome
        }
    }
}

/// Describes a finger-table insertion for the caller (which owns the
/// `&mut FingerTable`) to apply via `FingerTable::add`.
pub struct FingerTableAddRequest {
    pub identity: PeerId,
    pub arrival: FingerArrival,
    pub table_index: usize,
    pub ultimate_value: u64,
}

impl FingerTableAddRequest {
    pub fn apply(self, fingers: &mut FingerTable, friends: &FriendTable) -> FingerAddOutcome {
        fingers.add(self.identity, self.arrival, self.table_index, self.ultimate_value, friends)
    }
}

/// Handles a TRAIL_REJECTION travelling back towards the source: marks
/// the congested peer, relays one hop back, and at the source reports the
/// result of the congestion, for SPEC_FULL §4 item 6's retry logic.
pub fn handle_trail_rejection(
    msg: TrailRejection,
    my_id: PeerId,
    friends: &mut FriendTable,
    config: &Config,
    now: Instant,
) -> TrailOutcome {
    if msg.congestion_ns > 0 {
        friends.mark_congested(
            &msg.congested,
            now + std::time::Duration::from_nanos(msg.congestion_ns),
        );
    } else {
        friends.mark_congested_default(&msg.congested, now, config.congestion_timeout);
    }
    let mut outcome = TrailOutcome::default();
    match msg.hops.iter().rposition(|p| *p == my_id) {
        Some(pos) if pos > 0 => {
            let prev = msg.hops[pos - 1];
            outcome.send(prev, OverlayMessage::TrailRejection(msg))
        }
        _ => {
            // hops doesn't contain us: we're the querying source.
            // SPEC_FULL §4 item 3: offer the caller a bounded retry,
            // excluding the friend that just rejected us.
            outcome.retry_request = Some(RetryRequest {
                destination_value: msg.dest_value,
                is_predecessor: msg.is_predecessor,
                excluded_friend: msg.congested,
            });
            outcome
        }
    }
}

/// Tears down a trail: every hop removes its routing-table entry and
/// forwards the teardown one step further in `direction` (spec.md §4.4
/// Teardown).
pub fn handle_trail_teardown(
    msg: TrailTeardown,
    routing: &mut RoutingTable,
) -> TrailOutcome {
    let mut outcome = TrailOutcome::default();
    if let Some(entry) = routing.remove(&msg.trail_id) {
        let next = entry.next_for(msg.direction);
        outcome = outcome.send(next, OverlayMessage::TrailTeardown(msg));
    }
    outcome
}

/// Begins teardown of `trail` from its owning end (spec.md §4.3: torn
/// down whenever a finger drops or displaces a trail).
pub fn teardown_trail(trail: &Trail, direction: Direction) -> Option<Outbound> {
    let first = trail.first_hop()?;
    Some(Outbound::new(
        first,
        OverlayMessage::TrailTeardown(TrailTeardown {
            trail_id: trail.id,
            direction,
        }),
    ))
}

/// Shortens a trail once the finger-holder learns (SPEC_FULL §4 item 5's
/// scan-and-compress) that one of its intermediate hops is already a
/// direct friend (spec.md §4.4 Compression): sends TRAIL_COMPRESSION to
/// the trail's original first hop naming the new first hop; every hop
/// between the old and new first hop drops its routing entry.
pub fn initiate_trail_compression(
    source: PeerId,
    old_first_hop: PeerId,
    trail_id: TrailId,
    new_first_friend: PeerId,
) -> Outbound {
    Outbound::new(
        old_first_hop,
        OverlayMessage::TrailCompression(TrailCompression {
            source,
            new_first_friend,
            trail_id,
        }),
    )
}

/// An intermediate hop's reaction to receiving TRAIL_COMPRESSION: drop
/// its own routing entry and, unless it's the new first hop, forward to
/// the next hop towards the old first hop.
pub fn handle_trail_compression(msg: TrailCompression, my_id: PeerId, routing: &mut RoutingTable) -> TrailOutcome {
    let mut outcome = TrailOutcome::default();
    let Some(entry) = routing.remove(&msg.trail_id) else {
        return outcome;
    };
    if entry.next_hop == msg.new_first_friend || my_id == msg.new_first_friend {
        return outcome;
    }
    outcome = outcome.send(entry.next_hop, OverlayMessage::TrailCompression(msg));
    outcome
}

/// ADD_TRAIL: an out-of-band notification used after compression so the
/// new first hop gets a routing-table entry without re-running setup.
pub fn handle_add_trail(msg: AddTrail, routing: &mut RoutingTable) -> InsertOutcome {
    let Some(&next_hop) = msg.trail.first() else {
        return routing.insert(RoutingEntry {
            trail_id: msg.trail_id,
            prev_hop: msg.source,
            next_hop: msg.destination,
        });
    };
    routing.insert(RoutingEntry {
        trail_id: msg.trail_id,
        prev_hop: msg.source,
        next_hop,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(seed: &[u8]) -> PeerId {
        PeerId::derive_for_test(seed)
    }

    #[test]
    fn terminal_setup_installs_routing_entry_and_replies() {
        let me = pid(b"me");
        let source = pid(b"source");
        let from = pid(b"from");
        let fingers = FingerTable::new(me, 2);
        let mut routing = RoutingTable::new(16);
        let cfg = Config::default();
        let msg = TrailSetup {
            is_predecessor: false,
            destination_value: me.value64(),
            source,
            best_known_dest: source,
            intermediate_trail_id: TrailId::ZERO,
            trail_id: TrailId::random(),
            hops: vec![],
        };
        let outcome = handle_trail_setup(msg, me, from, &fingers, &mut routing, &cfg);
        assert_eq!(outcome.sends.len(), 1);
        assert!(matches!(
            outcome.sends[0].message,
            OverlayMessage::TrailSetupResult(_)
        ));
        assert_eq!(routing.len(), 1);
    }

    #[test]
    fn self_on_trail_is_rejected() {
        let me = pid(b"me");
        let from = pid(b"from");
        let fingers = FingerTable::new(me, 2);
        let mut routing = RoutingTable::new(16);
        let cfg = Config::default();
        let msg = TrailSetup {
            is_predecessor: false,
            destination_value: 0xFF,
            source: pid(b"source"),
            best_known_dest: pid(b"source"),
            intermediate_trail_id: TrailId::ZERO,
            trail_id: TrailId::random(),
            hops: vec![me],
        };
        let outcome = handle_trail_setup(msg, me, from, &fingers, &mut routing, &cfg);
        assert!(matches!(outcome.error, Some(OverlayError::SelfOnTrail { .. })));
        assert!(matches!(
            outcome.sends[0].message,
            OverlayMessage::TrailRejection(_)
        ));
    }

    #[test]
    fn setup_result_relays_back_one_hop_at_a_time() {
        let a = pid(b"a");
        let b = pid(b"b");
        let c = pid(b"c");
        let msg = TrailSetupResult {
            finger: pid(b"target"),
            querying: a,
            is_predecessor: false,
            destination_value: 0xFF,
            trail_id: TrailId::random(),
            hops: vec![a, b, c],
        };
        let outcome = handle_trail_setup_result(msg, c, 0, 0xFF);
        assert_eq!(outcome.sends.len(), 1);
        assert_eq!(outcome.sends[0].to, b);
    }

    #[test]
    fn setup_result_installs_finger_at_source() {
        // Per spec.md §3/§8: hops exclude both endpoints, so a trail
        // resolved in zero intermediate hops (the finger is a direct
        // friend of the source) carries an empty `hops`.
        let a = pid(b"a");
        let target = pid(b"target");
        let msg = TrailSetupResult {
            finger: target,
            querying: a,
            is_predecessor: false,
            destination_value: 0xFF,
            trail_id: TrailId::random(),
            hops: vec![],
        };
        let outcome = handle_trail_setup_result(msg, a, 0, 0xFF);
        assert!(outcome.sends.is_empty());
        let req = outcome.finger_request.expect("finger request at source");
        assert_eq!(req.identity, target);
        assert!(matches!(req.arrival, FingerArrival::Friend));
    }

    #[test]
    fn setup_result_installs_remote_finger_with_intermediate_hops() {
        let a = pid(b"a");
        let b = pid(b"b");
        let target = pid(b"target");
        let msg = TrailSetupResult {
            finger: target,
            querying: a,
            is_predecessor: false,
            destination_value: 0xFF,
            trail_id: TrailId::random(),
            hops: vec![b],
        };
        let outcome = handle_trail_setup_result(msg, a, 0, 0xFF);
        assert!(outcome.sends.is_empty());
        let req = outcome.finger_request.expect("finger request at source");
        assert_eq!(req.identity, target);
        match req.arrival {
            FingerArrival::Remote(trail) => assert_eq!(trail.hops, vec![b]),
            other => panic!("expected Remote arrival, got {other:?}"),
        }
    }

    #[test]
    fn trail_rejection_relays_back_before_reaching_source() {
        let a = pid(b"a");
        let b = pid(b"b");
        let c = pid(b"c");
        let mut friends = FriendTable::new();
        let cfg = Config::default();
        let msg = TrailRejection {
            source: a,
            congested: c,
            dest_value: 0xFF,
            is_predecessor: false,
            trail_id: TrailId::random(),
            congestion_ns: cfg.congestion_timeout.as_nanos() as u64,
            hops: vec![a, b, c],
        };
        let outcome = handle_trail_rejection(msg, c, &mut friends, &cfg, std::time::Instant::now());
        assert_eq!(outcome.sends.len(), 1);
        assert_eq!(outcome.sends[0].to, b);
        assert!(outcome.retry_request.is_none());
    }

    #[test]
    fn trail_rejection_at_source_requests_a_retry() {
        let a = pid(b"a");
        let congested = pid(b"congested");
        let mut friends = FriendTable::new();
        let cfg = Config::default();
        let msg = TrailRejection {
            source: a,
            congested,
            dest_value: 0xFF,
            is_predecessor: false,
            trail_id: TrailId::random(),
            congestion_ns: cfg.congestion_timeout.as_nanos() as u64,
            hops: vec![],
        };
        let outcome = handle_trail_rejection(msg, a, &mut friends, &cfg, std::time::Instant::now());
        assert!(outcome.sends.is_empty());
        let retry = outcome.retry_request.expect("retry requested at source");
        assert_eq!(retry.excluded_friend, congested);
        assert_eq!(retry.destination_value, 0xFF);
    }

    #[test]
    fn retry_trail_setup_excludes_the_rejecting_friend() {
        let me = pid(b"me");
        let rejecting = pid(b"rejecting");
        let alternate = pid(b"alternate");
        let mut friends = FriendTable::new();
        friends.on_connect(rejecting);
        friends.on_connect(alternate);
        let cfg = Config::default();
        let now = std::time::Instant::now();
        let out = retry_trail_setup(me, 0xFF, false, &rejecting, &friends, &cfg, now)
            .expect("an alternate friend is available");
        assert_eq!(out.to, alternate);
    }

    #[test]
    fn initiate_trail_compression_targets_the_old_first_hop() {
        let me = pid(b"me");
        let old_first_hop = pid(b"old-first");
        let new_friend = pid(b"new-friend");
        let trail_id = TrailId::random();
        let out = initiate_trail_compression(me, old_first_hop, trail_id, new_friend);
        assert_eq!(out.to, old_first_hop);
        match out.message {
            OverlayMessage::TrailCompression(c) => {
                assert_eq!(c.new_first_friend, new_friend);
                assert_eq!(c.trail_id, trail_id);
            }
            other => panic!("expected TrailCompression, got {other:?}"),
        }
    }

    #[test]
    fn retry_trail_setup_returns_none_with_no_alternate() {
        let me = pid(b"me");
        let only_friend = pid(b"only");
        let mut friends = FriendTable::new();
        friends.on_connect(only_friend);
        let cfg = Config::default();
        let now = std::time::Instant::now();
        assert!(retry_trail_setup(me, 0xFF, false, &only_friend, &friends, &cfg, now).is_none());
    }
}
