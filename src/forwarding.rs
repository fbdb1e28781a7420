//! PUT/GET/GET_RESULT forwarding (spec.md §4.5). Content routing reuses
//! the same greedy finger-table walk as trail setup
//! ([`crate::trail_engine::pick_next_hop`]); the content-plane layer on
//! top decides when to stop and consult the datastore, and de-duplicates
//! GET_RESULTs the way `dht_p2p_handle_get_result` does in
//! `gnunet-service-xdht_neighbours.c` (SPEC_FULL §4 item 5).

use crate::config::Config;
use crate::message::{Get, GetResult, HashKey, Outbound, OverlayMessage, Put};
use crate::peer_id::{closest_peer, PeerId};
use crate::trail_engine::{pick_next_hop, NextHop};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::Instant;

/// What the caller should do with an inbound PUT.
pub enum PutAction {
    /// Store this block locally and stop; we're the closest known peer.
    Store { key: HashKey, expiration_ns: u64, block_type: u32, payload: Vec<u8> },
    /// Store locally (replication still has budget) and also forward on.
    StoreAndForward {
        key: HashKey,
        expiration_ns: u64,
        block_type: u32,
        payload: Vec<u8>,
        forward: Outbound,
    },
    /// Not yet at the closest known peer; just relay.
    Forward(Outbound),
    /// TTL expired before reaching anyone (spec.md §4.5 edge case).
    DropExpired,
}

fn recompute_best(best_known: PeerId, my_id: PeerId, key_value: u64) -> PeerId {
    let winner = closest_peer(best_known.value64(), my_id.value64(), key_value, false);
    if winner == my_id.value64() {
        my_id
    } else {
        best_known
    }
}

/// spec.md §4.5 PUT: "each hop compares itself to `best_known_dest`; the
/// closer one forwards on, carrying an updated `best_known_dest`."
pub fn route_put(
    msg: Put,
    my_id: PeerId,
    now_ns: u64,
    fingers: &crate::finger::FingerTable,
) -> PutAction {
    if msg.expiration_ns <= now_ns {
        return PutAction::DropExpired;
    }
    let key_value = msg.key.value64();
    let new_best = recompute_best(msg.best_known_dest, my_id, key_value);
    let mut put_path = msg.put_path.clone();
    put_path.push(my_id);

    let am_closest = new_best == my_id;
    let next = pick_next_hop(new_best, key_value, false, &put_path, fingers);

    match (am_closest, next) {
        (true, NextHop::Terminal) => PutAction::Store {
            key: msg.key,
            expiration_ns: msg.expiration_ns,
            block_type: msg.block_type,
            payload: msg.payload,
        },
        (true, NextHop::Friend(to)) if msg.replication > 1 => PutAction::StoreAndForward {
            key: msg.key,
            expiration_ns: msg.expiration_ns,
            block_type: msg.block_type,
            payload: msg.payload.clone(),
            forward: Outbound::new(
                to,
                OverlayMessage::Put(Put {
                    best_known_dest: new_best,
                    hop_count: msg.hop_count + 1,
                    replication: msg.replication - 1,
                    put_path,
                    payload: msg.payload,
                    ..msg
                }),
            ),
        },
        (true, _) => PutAction::Store {
            key: msg.key,
            expiration_ns: msg.expiration_ns,
            block_type: msg.block_type,
            payload: msg.payload,
        },
        (false, NextHop::Terminal) => PutAction::Store {
            key: msg.key,
            expiration_ns: msg.expiration_ns,
            block_type: msg.block_type,
            payload: msg.payload,
        },
        (false, NextHop::Friend(to)) => PutAction::Forward(Outbound::new(
            to,
            OverlayMessage::Put(Put {
                best_known_dest: new_best,
                hop_count: msg.hop_count + 1,
                put_path,
                ..msg
            }),
        )),
        (false, NextHop::ViaTrail { first_hop, via_trail }) => PutAction::Forward(Outbound::new(
            first_hop,
            OverlayMessage::Put(Put {
                best_known_dest: new_best,
                intermediate_trail_id: via_trail,
                hop_count: msg.hop_count + 1,
                put_path,
                ..msg
            }),
        )),
    }
}

pub enum GetAction {
    /// Consult the local datastore for `key`; caller replies with
    /// GET_RESULT (possibly empty) along `get_path` reversed.
    QueryLocal { key: HashKey, get_path: Vec<PeerId> },
    Forward(Outbound),
}

/// spec.md §4.5 GET: same greedy walk as PUT, but never stores; stops to
/// query the local datastore once this node is the closest known peer.
pub fn route_get(msg: Get, my_id: PeerId, fingers: &crate::finger::FingerTable) -> GetAction {
    let key_value = msg.key.value64();
    let new_best = recompute_best(msg.best_known_dest, my_id, key_value);
    let mut get_path = msg.get_path.clone();
    get_path.push(my_id);

    if new_best == my_id {
        return GetAction::QueryLocal {
            key: msg.key,
            get_path,
        };
    }

    match pick_next_hop(new_best, key_value, false, &get_path, fingers) {
        NextHop::Terminal => GetAction::QueryLocal {
            key: msg.key,
            get_path,
        },
        NextHop::Friend(to) => GetAction::Forward(Outbound::new(
            to,
            OverlayMessage::Get(Get {
                best_known_dest: new_best,
                hop_count: msg.hop_count + 1,
                get_path,
                ..msg
            }),
        )),
        NextHop::ViaTrail { first_hop, via_trail } => GetAction::Forward(Outbound::new(
            first_hop,
            OverlayMessage::Get(Get {
                best_known_dest: new_best,
                intermediate_trail_id: via_trail,
                hop_count: msg.hop_count + 1,
                get_path,
                ..msg
            }),
        )),
    }
}

/// De-duplicates GET_RESULTs that loop back through more than one path
/// (SPEC_FULL §4 item 5). Keyed on `(key, querying)` since the same
/// querying peer may have issued the same GET along parallel trails.
pub struct GetResultDedup {
    seen: LruCache<(HashKey, PeerId), Instant>,
    window: std::time::Duration,
}

impl GetResultDedup {
    pub fn new(config: &Config) -> Self {
        Self {
            seen: LruCache::new(
                NonZeroUsize::new(config.get_result_dedup_capacity.max(1)).unwrap(),
            ),
            window: config.get_result_dedup_window,
        }
    }

    /// Returns `true` if this GET_RESULT was already forwarded within the
    /// dedup window and should be dropped.
    pub fn is_duplicate(&mut self, key: HashKey, querying: PeerId, now: Instant) -> bool {
        let k = (key, querying);
        if let Some(last) = self.seen.get(&k) {
            if now.duration_since(*last) < self.window {
                return true;
            }
        }
        self.seen.put(k, now);
        false
    }
}

/// GET_RESULT travels back along `get_path` in reverse, one hop at a
/// time, the same shape as TRAIL_SETUP_RESULT.
pub fn route_get_result(msg: GetResult, my_id: PeerId) -> Option<Outbound> {
    let pos = msg.get_path.iter().rposition(|p| *p == my_id)?;
    if pos == 0 {
        return None; // arrived at the querying peer; caller delivers it locally.
    }
    let prev = msg.get_path[pos - 1];
    Some(Outbound::new(prev, OverlayMessage::GetResult(msg)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finger::FingerTable;
    use crate::trail::TrailId;

    fn pid(seed: &[u8]) -> PeerId {
        PeerId::derive_for_test(seed)
    }

    fn key(seed: &[u8]) -> HashKey {
        let mut b = [0u8; 32];
        b[0..seed.len().min(32)].copy_from_slice(&seed[..seed.len().min(32)]);
        HashKey::new(b)
    }

    #[test]
    fn put_stores_when_terminal() {
        let me = pid(b"me");
        let fingers = FingerTable::new(me, 2);
        let msg = Put {
            options: crate::message::PutOptions::NONE,
            block_type: 1,
            hop_count: 0,
            replication: 1,
            best_known_dest: me,
            intermediate_trail_id: TrailId::ZERO,
            expiration_ns: 1_000,
            key: key(b"k"),
            put_path: vec![],
            payload: vec![1, 2, 3],
        };
        let action = route_put(msg, me, 0, &fingers);
        assert!(matches!(action, PutAction::Store { .. }));
    }

    #[test]
    fn put_drops_when_expired() {
        let me = pid(b"me");
        let fingers = FingerTable::new(me, 2);
        let msg = Put {
            options: crate::message::PutOptions::NONE,
            block_type: 1,
            hop_count: 0,
            replication: 1,
            best_known_dest: me,
            intermediate_trail_id: TrailId::ZERO,
            expiration_ns: 5,
            key: key(b"k"),
            put_path: vec![],
            payload: vec![],
        };
        assert!(matches!(route_put(msg, me, 100, &fingers), PutAction::DropExpired));
    }

    #[test]
    fn dedup_suppresses_within_window() {
        let cfg = Config::default();
        let mut dedup = GetResultDedup::new(&cfg);
        let k = key(b"k");
        let q = pid(b"querying");
        let now = Instant::now();
        assert!(!dedup.is_duplicate(k, q, now));
        assert!(dedup.is_duplicate(k, q, now));
    }

    #[test]
    fn get_result_relays_back_and_terminates_at_origin() {
        let a = pid(b"a");
        let b = pid(b"b");
        let msg = GetResult {
            block_type: 1,
            querying: a,
            expiration_ns: 100,
            key: key(b"k"),
            put_path: vec![],
            get_path: vec![a, b],
            payload: vec![],
        };
        let hop = route_get_result(msg.clone(), b);
        assert!(matches!(hop, Some(Outbound { to, .. }) if to == a));
        assert!(route_get_result(msg, a).is_none());
    }
}
