//! Periodic stabilization: find-finger ticks and successor verification
//! (spec.md §4.4 Stabilization), grounded in xdht's
//! `send_verify_successor_message`/`handle_dht_p2p_verify_successor`.

use crate::finger::{FingerArrival, FingerTable};
use crate::message::{
    AddTrail, NotifyNewSuccessor, Outbound, OverlayMessage, VerifySuccessor, VerifySuccessorResult,
};
use crate::peer_id::{closest_peer, finger_target, PeerId, PREDECESSOR_INDEX};
use crate::routing_table::Direction;
use crate::trail::{Trail, TrailId};
use crate::trail_engine::{FingerTableAddRequest, TrailOutcome};

/// Advances `current_search_index` and returns the next `(table_index,
/// destination_value, is_predecessor)` to search for, per spec.md §4.4:
/// "one finger searched per tick, wrapping from slot 0 back to the
/// predecessor slot."
pub fn next_search_target(my_id: PeerId, fingers: &FingerTable) -> (usize, u64, bool) {
    let index = fingers.current_search_index;
    let is_predecessor = index == PREDECESSOR_INDEX;
    let target = finger_target(my_id.value64(), index);
    (index, target, is_predecessor)
}

/// Builds the VERIFY_SUCCESSOR message sent down the successor's trail
/// (or directly, if the successor is a friend) once a search settles.
pub fn build_verify_successor(my_id: PeerId, fingers: &FingerTable) -> Option<Outbound> {
    let successor = fingers.successor()?;
    if successor.is_self() {
        return None;
    }
    if successor.is_friend() {
        return Some(Outbound::new(
            successor.identity,
            OverlayMessage::VerifySuccessor(VerifySuccessor {
                source: my_id,
                successor: successor.identity,
                trail_id: crate::trail::TrailId::ZERO,
                trail: vec![],
            }),
        ));
    }
    let trail = successor.trails().first()?;
    let first_hop = trail.first_hop()?;
    Some(Outbound::new(
        first_hop,
        OverlayMessage::VerifySuccessor(VerifySuccessor {
            source: my_id,
            successor: successor.identity,
            trail_id: trail.id,
            trail: trail.hops.clone(),
        }),
    ))
}

/// Forwards a VERIFY_SUCCESSOR towards `successor` along its carried
/// trail, or answers directly if this node *is* the successor. When we are
/// the successor, also checks the querying `source` against our own
/// recorded predecessor (spec.md §4.4: "when `source` is closer than the
/// current predecessor, adopt it") and, if it wins, describes the new
/// trail/finger install and the ADD_TRAIL messages needed to wire up
/// routing entries along the reversed path (SPEC_FULL §4 item 4).
pub fn handle_verify_successor(msg: VerifySuccessor, my_id: PeerId, fingers: &FingerTable) -> TrailOutcome {
    let mut outcome = TrailOutcome::default();
    if my_id == msg.successor {
        let current_predecessor = fingers.predecessor().map(|f| f.identity);
        let reply_predecessor = current_predecessor.unwrap_or(msg.source);
        outcome = outcome.send_result(
            msg.source,
            OverlayMessage::VerifySuccessorResult(VerifySuccessorResult {
                querying: msg.source,
                source_successor: msg.successor,
                current_predecessor: reply_predecessor,
                trail_id: msg.trail_id,
                direction: Direction::DestToSrc,
                trail: msg.trail.clone(),
            }),
        );

        if msg.source != my_id {
            let target = finger_target(my_id.value64(), PREDECESSOR_INDEX);
            let adopts = match current_predecessor {
                None => true,
                Some(current) => {
                    current != msg.source
                        && closest_peer(current.value64(), msg.source.value64(), target, true)
                            == msg.source.value64()
                }
            };
            if adopts {
                outcome = adopt_new_predecessor(outcome, my_id, msg.source, &msg.trail, target);
            }
        }
        return outcome;
    }
    let Some(pos) = msg.trail.iter().position(|p| *p == my_id) else {
        return outcome;
    };
    if let Some(&next) = msg.trail.get(pos + 1) {
        outcome.send_result(next, OverlayMessage::VerifySuccessor(msg))
    } else {
        outcome
    }
}

/// Builds the finger install and ADD_TRAIL fan-out for a newly adopted
/// predecessor. `trail` is the path carried on the inbound VERIFY_SUCCESSOR
/// (source..me, excluding both endpoints); reversed, it becomes the path
/// from us back to the new predecessor.
fn adopt_new_predecessor(
    mut outcome: TrailOutcome,
    my_id: PeerId,
    new_predecessor: PeerId,
    trail: &[PeerId],
    ultimate_value: u64,
) -> TrailOutcome {
    let reversed: Vec<PeerId> = trail.iter().copied().rev().collect();
    if reversed.is_empty() {
        outcome.finger_request = Some(FingerTableAddRequest {
            identity: new_predecessor,
            arrival: FingerArrival::Friend,
            table_index: PREDECESSOR_INDEX,
            ultimate_value,
        });
        return outcome;
    }

    let trail_id = TrailId::random();
    for i in 0..reversed.len() {
        let prev = if i == 0 { my_id } else { reversed[i - 1] };
        let remaining = reversed[i + 1..].to_vec();
        outcome = outcome.send_result(
            reversed[i],
            OverlayMessage::AddTrail(AddTrail {
                source: prev,
                destination: new_predecessor,
                trail_id,
                trail: remaining,
            }),
        );
    }
    outcome = outcome.send_result(
        new_predecessor,
        OverlayMessage::AddTrail(AddTrail {
            source: *reversed.last().unwrap(),
            destination: new_predecessor,
            trail_id,
            trail: vec![],
        }),
    );
    outcome.finger_request = Some(FingerTableAddRequest {
        identity: new_predecessor,
        arrival: FingerArrival::Remote(Trail::new(trail_id, reversed)),
        table_index: PREDECESSOR_INDEX,
        ultimate_value,
    });
    outcome
}

impl TrailOutcome {
    fn send_result(mut self, to: PeerId, message: OverlayMessage) -> Self {
        self.sends.push(Outbound::new(to, message));
        self
    }
}

/// Outcome of processing a VERIFY_SUCCESSOR_RESULT at the original
/// querying node: either nothing needed (our successor agrees), or we
/// must notify it of a better predecessor we know about (spec.md §4.4:
/// "if `current_predecessor` is closer to us than our own record,
/// install it as our new successor and notify the old one").
pub enum VerifyOutcome {
    UpToDate,
    BetterSuccessorFound { candidate: PeerId },
}

pub fn handle_verify_successor_result(
    msg: VerifySuccessorResult,
    my_id: PeerId,
) -> (TrailOutcome, VerifyOutcome) {
    let mut outcome = TrailOutcome::default();
    // Relay back towards the querying node if we're not it.
    if let Some(pos) = msg.trail.iter().position(|p| *p == my_id) {
        if pos > 0 {
            let prev = msg.trail[pos - 1];
            outcome = outcome.send_result(prev, OverlayMessage::VerifySuccessorResult(msg));
            return (outcome, VerifyOutcome::UpToDate);
        }
    }
    if msg.querying != my_id {
        return (outcome, VerifyOutcome::UpToDate);
    }
    if msg.current_predecessor == my_id || msg.current_predecessor == msg.source_successor {
        (outcome, VerifyOutcome::UpToDate)
    } else {
        (
            outcome,
            VerifyOutcome::BetterSuccessorFound {
                candidate: msg.current_predecessor,
            },
        )
    }
}

/// Builds the NOTIFY_NEW_SUCCESSOR sent to a newly adopted successor so
/// it can update its own predecessor slot (spec.md §4.4).
pub fn build_notify_new_successor(my_id: PeerId, new_successor: PeerId, trail: Option<&Trail>) -> Outbound {
    match trail {
        Some(t) => Outbound::new(
            t.first_hop().unwrap_or(new_successor),
            OverlayMessage::NotifyNewSuccessor(NotifyNewSuccessor {
                source: my_id,
                new_successor,
                trail_id: t.id,
                trail: t.hops.clone(),
            }),
        ),
        None => Outbound::new(
            new_successor,
            OverlayMessage::NotifyNewSuccessor(NotifyNewSuccessor {
                source: my_id,
                new_successor,
                trail_id: crate::trail::TrailId::ZERO,
                trail: vec![],
            }),
        ),
    }
}

/// Handles an inbound NOTIFY_NEW_SUCCESSOR: relay along the trail, or at
/// the destination, report the candidate predecessor to install.
pub fn handle_notify_new_successor(msg: NotifyNewSuccessor, my_id: PeerId) -> (TrailOutcome, Option<PeerId>) {
    let mut outcome = TrailOutcome::default();
    if let Some(pos) = msg.trail.iter().position(|p| *p == my_id) {
        if let Some(&next) = msg.trail.get(pos + 1) {
            outcome = outcome.send_result(next, OverlayMessage::NotifyNewSuccessor(msg));
            return (outcome, None);
        }
    }
    (outcome, Some(msg.source))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(seed: &[u8]) -> PeerId {
        PeerId::derive_for_test(seed)
    }

    #[test]
    fn verify_successor_answers_when_we_are_the_successor() {
        let me = pid(b"me");
        let source = pid(b"source");
        let fingers = FingerTable::new(me, 2);
        let msg = VerifySuccessor {
            source,
            successor: me,
            trail_id: crate::trail::TrailId::ZERO,
            trail: vec![],
        };
        let outcome = handle_verify_successor(msg, me, &fingers);
        assert_eq!(outcome.sends.len(), 1);
        assert!(matches!(
            outcome.sends[0].message,
            OverlayMessage::VerifySuccessorResult(_)
        ));
    }

    fn id_with_value(value: u64) -> PeerId {
        let mut b = [0u8; 64];
        b[0..8].copy_from_slice(&value.to_ne_bytes());
        PeerId::from_bytes(b)
    }

    #[test]
    fn empty_predecessor_adopts_direct_friend_source() {
        let me = id_with_value(0x10);
        let source = id_with_value(0x30);
        let fingers = FingerTable::new(me, 2);
        let msg = VerifySuccessor {
            source,
            successor: me,
            trail_id: crate::trail::TrailId::ZERO,
            trail: vec![],
        };
        let outcome = handle_verify_successor(msg, me, &fingers);
        let req = outcome.finger_request.expect("no predecessor yet, should adopt");
        assert_eq!(req.identity, source);
        assert_eq!(req.table_index, PREDECESSOR_INDEX);
        assert!(matches!(req.arrival, FingerArrival::Friend));
        assert_eq!(outcome.sends.len(), 1);
    }

    #[test]
    fn closer_source_with_a_trail_is_adopted_with_add_trail_fanout() {
        use crate::friend::FriendTable;

        let me = id_with_value(0x10);
        let existing_predecessor = id_with_value(0x20);
        let source = id_with_value(0x30);
        let mut fingers = FingerTable::new(me, 2);
        let friends = FriendTable::new();
        fingers.add(existing_predecessor, FingerArrival::Friend, PREDECESSOR_INDEX, 0x0f, &friends);

        let h1 = pid(b"h1");
        let msg = VerifySuccessor {
            source,
            successor: me,
            trail_id: TrailId::random(),
            trail: vec![h1],
        };
        let outcome = handle_verify_successor(msg, me, &fingers);
        // One AddTrail to h1, one AddTrail to the new predecessor itself,
        // plus the VerifySuccessorResult reply.
        assert_eq!(outcome.sends.len(), 3);
        let add_trail_targets: Vec<PeerId> = outcome
            .sends
            .iter()
            .filter(|o| matches!(o.message, OverlayMessage::AddTrail(_)))
            .map(|o| o.to)
            .collect();
        assert_eq!(add_trail_targets, vec![h1, source]);
        let req = outcome.finger_request.expect("source is closer, should adopt");
        assert_eq!(req.identity, source);
        match req.arrival {
            FingerArrival::Remote(trail) => assert_eq!(trail.hops, vec![h1]),
            other => panic!("expected Remote arrival, got {other:?}"),
        }
    }

    #[test]
    fn farther_source_does_not_displace_existing_predecessor() {
        use crate::friend::FriendTable;

        let me = id_with_value(0x10);
        let existing_predecessor = id_with_value(0x30);
        let source = id_with_value(0x20);
        let mut fingers = FingerTable::new(me, 2);
        let friends = FriendTable::new();
        fingers.add(existing_predecessor, FingerArrival::Friend, PREDECESSOR_INDEX, 0x0f, &friends);

        let msg = VerifySuccessor {
            source,
            successor: me,
            trail_id: crate::trail::TrailId::ZERO,
            trail: vec![],
        };
        let outcome = handle_verify_successor(msg, me, &fingers);
        assert!(outcome.finger_request.is_none());
        assert_eq!(outcome.sends.len(), 1);
    }

    #[test]
    fn verify_result_reports_better_candidate() {
        let me = pid(b"me");
        let successor = pid(b"succ");
        let better = pid(b"better");
        let msg = VerifySuccessorResult {
            querying: me,
            source_successor: successor,
            current_predecessor: better,
            trail_id: crate::trail::TrailId::ZERO,
            direction: Direction::DestToSrc,
            trail: vec![],
        };
        let (_, verify) = handle_verify_successor_result(msg, me);
        assert!(matches!(
            verify,
            VerifyOutcome::BetterSuccessorFound { candidate } if candidate == better
        ));
    }

    #[test]
    fn verify_result_up_to_date_when_predecessor_matches_successor() {
        let me = pid(b"me");
        let successor = pid(b"succ");
        let msg = VerifySuccessorResult {
            querying: me,
            source_successor: successor,
            current_predecessor: successor,
            trail_id: crate::trail::TrailId::ZERO,
            direction: Direction::DestToSrc,
            trail: vec![],
        };
        let (_, verify) = handle_verify_successor_result(msg, me);
        assert!(matches!(verify, VerifyOutcome::UpToDate));
    }
}
