//! End-to-end two-peer scenario (spec.md §8 scenario 2): once both
//! sides register each other as a friend, a single round of trail setup
//! should install each as the other's successor, and a PUT/GET round
//! trip through the datastore should complete.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use xvine_overlay::config::Config;
use xvine_overlay::datastore::{Datastore, StoredBlock};
use xvine_overlay::message::HashKey;
use xvine_overlay::overlay::{Overlay, OverlayHandle};
use xvine_overlay::peer_id::PeerId;
use xvine_overlay::transport::{Transport, TransportError};

/// Routes frames directly into the peer's `OverlayHandle`, standing in
/// for a real link (spec.md §1(b)); wired up after both handles exist
/// since each transport needs the other side's handle.
struct LoopbackTransport {
    my_id: PeerId,
    peers: Mutex<HashMap<PeerId, OverlayHandle>>,
}

impl LoopbackTransport {
    fn new(my_id: PeerId) -> Arc<Self> {
        Arc::new(Self {
            my_id,
            peers: Mutex::new(HashMap::new()),
        })
    }

    fn register(&self, id: PeerId, handle: OverlayHandle) {
        self.peers.lock().unwrap().insert(id, handle);
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, peer: PeerId, frame: Vec<u8>) -> Result<(), TransportError> {
        let handle = self
            .peers
            .lock()
            .unwrap()
            .get(&peer)
            .cloned()
            .ok_or(TransportError::Unreachable)?;
        handle.inbound(self.my_id, frame).await;
        Ok(())
    }

    fn is_connected(&self, peer: PeerId) -> bool {
        self.peers.lock().unwrap().contains_key(&peer)
    }
}

#[derive(Default)]
struct MemoryDatastore {
    blocks: Mutex<HashMap<HashKey, Vec<StoredBlock>>>,
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn put(&self, key: HashKey, block: StoredBlock) {
        self.blocks.lock().unwrap().entry(key).or_default().push(block);
    }

    async fn get(&self, key: HashKey) -> Vec<StoredBlock> {
        self.blocks.lock().unwrap().get(&key).cloned().unwrap_or_default()
    }

    async fn expire(&self, _now_ns: u64) {}
}

fn fast_config() -> Config {
    let mut cfg = Config::default();
    cfg.find_finger_trail_interval = Duration::from_millis(20);
    cfg
}

#[tokio::test]
async fn two_connected_friends_exchange_trail_setup() {
    let a_id = PeerId::derive_for_test(b"node-a");
    let b_id = PeerId::derive_for_test(b"node-b");

    let transport_a = LoopbackTransport::new(a_id);
    let transport_b = LoopbackTransport::new(b_id);

    let (overlay_a, handle_a) = Overlay::new(
        a_id,
        fast_config(),
        transport_a.clone(),
        Arc::new(MemoryDatastore::default()),
    );
    let (overlay_b, handle_b) = Overlay::new(
        b_id,
        fast_config(),
        transport_b.clone(),
        Arc::new(MemoryDatastore::default()),
    );

    // Each side's transport must resolve the *other* peer id to that
    // peer's handle so `send(peer, frame)` reaches it.
    transport_a.register(b_id, handle_b.clone());
    transport_b.register(a_id, handle_a.clone());

    let stats_a = overlay_a.stats();
    let stats_b = overlay_b.stats();

    tokio::spawn(overlay_a.run());
    tokio::spawn(overlay_b.run());

    handle_a.friend_connected(b_id).await;
    handle_b.friend_connected(a_id).await;

    // Give both sides' immediate friend->finger install and first
    // stabilization tick time to run. Both `run()` tasks are abandoned
    // when the test's single-threaded runtime drops at the end of the
    // test; nothing in this test depends on observing their exit, only
    // on them having made progress by now.
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Each side should have discovered at least one finger (the other as
    // a direct-friend successor at slot 0, installed on connect) plus
    // whatever the first stabilization tick resolves.
    assert!(stats_a.snapshot().trail_setups_attempted >= 1);
    assert!(stats_b.snapshot().trail_setups_attempted >= 1);
}

#[tokio::test]
async fn put_then_get_round_trips_through_datastore() {
    let a_id = PeerId::derive_for_test(b"solo-node");
    let transport = LoopbackTransport::new(a_id);
    let datastore = Arc::new(MemoryDatastore::default());
    let (overlay, handle) = Overlay::new(a_id, fast_config(), transport, datastore.clone());

    let task = tokio::spawn(overlay.run());

    let key = HashKey::new(*blake3::hash(b"my-content").as_bytes());
    handle.put(key, 1, u64::MAX, b"hello xvine".to_vec()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stored = datastore.get(key).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].payload, b"hello xvine");

    drop(handle);
    let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
}

/// A single node with no friends should never panic on a stabilization
/// tick (spec.md §8 scenario 1: "Solo").
#[tokio::test]
async fn solo_node_survives_stabilization_with_no_friends() {
    let id = PeerId::derive_for_test(b"solo");
    let transport = LoopbackTransport::new(id);
    let (overlay, handle) = Overlay::new(id, fast_config(), transport, Arc::new(MemoryDatastore::default()));
    let task = tokio::spawn(overlay.run());
    tokio::time::sleep(Duration::from_millis(80)).await;
    drop(handle);
    let _ = tokio::time::timeout(Duration::from_secs(2), task).await;
}
