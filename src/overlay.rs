//! The single-task event loop (spec.md §5: "no parallelism inside a
//! process; one task owns all mutable overlay state, reached only via
//! channel"). [`Overlay`] owns every table; [`OverlayHandle`] is the
//! cheaply-cloneable front door other tasks use to drive it, the same
//! actor shape the teacher's `NetworkManager` uses around its internal
//! command loop (`p2p.rs`).

use crate::config::Config;
use crate::connection::Connection;
use crate::datastore::{Datastore, StoredBlock};
use crate::error::OverlayError;
use crate::finger::{FingerArrival, FingerTable};
use crate::forwarding::{self, GetAction, GetResultDedup, PutAction};
use crate::friend::FriendTable;
use crate::message::{self, HashKey, Outbound, OverlayMessage};
use crate::metrics::Stats;
use crate::peer_id::PeerId;
use crate::routing_table::{Direction, RoutingTable};
use crate::scheduler::{jittered, ScheduledTask};
use crate::stabilization::{self, VerifyOutcome};
use crate::trail_engine::{self, TrailOutcome};
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub enum Command {
    FriendConnected(PeerId),
    FriendDisconnected(PeerId),
    Inbound { from: PeerId, frame: Vec<u8> },
    Put { key: HashKey, block_type: u32, expiration_ns: u64, payload: Vec<u8> },
    Get { key: HashKey, get_path_hint: Option<PeerId> },
    StabilizationTick,
}

/// Cheaply-cloneable handle other tasks use to talk to a running
/// [`Overlay`]. Dropping every handle causes `Overlay::run` to exit.
#[derive(Clone)]
pub struct OverlayHandle {
    tx: mpsc::Sender<Command>,
}

impl OverlayHandle {
    pub async fn friend_connected(&self, peer: PeerId) {
        let _ = self.tx.send(Command::FriendConnected(peer)).await;
    }

    pub async fn friend_disconnected(&self, peer: PeerId) {
        let _ = self.tx.send(Command::FriendDisconnected(peer)).await;
    }

    pub async fn inbound(&self, from: PeerId, frame: Vec<u8>) {
        let _ = self.tx.send(Command::Inbound { from, frame }).await;
    }

    pub async fn put(&self, key: HashKey, block_type: u32, expiration_ns: u64, payload: Vec<u8>) {
        let _ = self
            .tx
            .send(Command::Put {
                key,
                block_type,
                expiration_ns,
                payload,
            })
            .await;
    }

    pub async fn get(&self, key: HashKey) {
        let _ = self
            .tx
            .send(Command::Get {
                key,
                get_path_hint: None,
            })
            .await;
    }
}

pub struct Overlay {
    my_id: PeerId,
    config: Config,
    friends: FriendTable,
    fingers: FingerTable,
    routing: RoutingTable,
    connections: HashMap<PeerId, Connection>,
    dedup: GetResultDedup,
    stats: Arc<Stats>,
    transport: Arc<dyn Transport>,
    datastore: Arc<dyn Datastore>,
    command_rx: mpsc::Receiver<Command>,
    /// Retries spent on the current stabilization round's finger search,
    /// reset whenever a fresh search begins (SPEC_FULL §4 item 3).
    finger_setup_retries: u32,
}

impl Overlay {
    pub fn new(
        my_id: PeerId,
        config: Config,
        transport: Arc<dyn Transport>,
        datastore: Arc<dyn Datastore>,
    ) -> (Self, OverlayHandle) {
        let (tx, rx) = mpsc::channel(1024);
        let dedup = GetResultDedup::new(&config);
        let fingers = FingerTable::new(my_id, config.max_trails_per_finger);
        let overlay = Self {
            my_id,
            routing: RoutingTable::new(config.routing_table_capacity),
            config,
            friends: FriendTable::new(),
            fingers,
            connections: HashMap::new(),
            dedup,
            stats: Arc::new(Stats::default()),
            transport,
            datastore,
            command_rx: rx,
            finger_setup_retries: 0,
        };
        (overlay, OverlayHandle { tx })
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    /// Runs the event loop until every [`OverlayHandle`] is dropped.
    /// Spawns its own stabilization ticker, cancelled on exit.
    pub async fn run(mut self) {
        let (tick_tx, mut tick_rx) = mpsc::channel::<()>(1);
        let interval = jittered(self.config.find_finger_trail_interval);
        let ticker = ScheduledTask::spawn(interval, move || {
            let tick_tx = tick_tx.clone();
            async move {
                let _ = tick_tx.send(()).await;
            }
        });

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                Some(()) = tick_rx.recv() => {
                    self.handle_command(Command::StabilizationTick).await;
                }
            }
        }
        ticker.cancel();
    }

    async fn handle_command(&mut self, cmd: Command) {
        let now = Instant::now();
        match cmd {
            Command::FriendConnected(peer) => self.on_friend_connected(peer, now).await,
            Command::FriendDisconnected(peer) => self.on_friend_disconnected(peer, now).await,
            Command::Inbound { from, frame } => self.on_inbound(from, frame, now).await,
            Command::Put {
                key,
                block_type,
                expiration_ns,
                payload,
            } => self.on_put_request(key, block_type, expiration_ns, payload, now).await,
            Command::Get { key, .. } => self.on_get_request(key, now).await,
            Command::StabilizationTick => self.on_stabilization_tick(now).await,
        }
    }

    async fn on_friend_connected(&mut self, peer: PeerId, now: Instant) {
        let is_first = self.friends.on_connect(peer);
        self.connections
            .insert(peer, Connection::new(peer, self.config.per_friend_queue_max(), now));
        let ultimate_value = crate::peer_id::finger_target(self.my_id.value64(), 0);
        let outcome = self
            .fingers
            .add(peer, FingerArrival::Friend, 0, ultimate_value, &self.friends);
        self.apply_finger_outcome(outcome, now).await;
        if is_first {
            debug!(peer = %peer, "first friend connected, stabilization now useful");
        }
    }

    async fn on_friend_disconnected(&mut self, peer: PeerId, now: Instant) {
        self.connections.remove(&peer);
        self.friends.on_disconnect(&peer);
        self.stats.connections_broken();

        for entry in self.routing.remove_for_peer(&peer) {
            let other = if entry.prev_hop == peer {
                entry.next_hop
            } else {
                entry.prev_hop
            };
            let direction = if entry.prev_hop == peer {
                Direction::SrcToDest
            } else {
                Direction::DestToSrc
            };
            self.send(
                other,
                OverlayMessage::TrailTeardown(message::TrailTeardown {
                    trail_id: entry.trail_id,
                    direction,
                }),
                now,
            )
            .await;
        }

        for dropped in self.fingers.drop_partial_trails_through(&peer) {
            if let Some(out) = trail_engine::teardown_trail(&dropped, Direction::SrcToDest) {
                self.send(out.to, out.message, now).await;
            }
        }
        for outcome in self.fingers.remove_fingers_solely_through(&peer) {
            self.apply_finger_outcome(outcome, now).await;
        }
    }

    async fn on_inbound(&mut self, from: PeerId, frame: Vec<u8>, now: Instant) {
        let msg = match message::codec::decode(&frame) {
            Ok(m) => m,
            Err(e) => {
                self.stats.dropped_malformed();
                warn!(peer = %from, error = %e, "dropped malformed frame");
                return;
            }
        };
        if let Some(conn) = self.connections.get_mut(&from) {
            conn.record_activity(now);
        }
        self.dispatch(from, msg, now).await;
    }

    async fn dispatch(&mut self, from: PeerId, msg: OverlayMessage, now: Instant) {
        match msg {
            OverlayMessage::TrailSetup(m) => {
                self.stats.trail_setups_attempted();
                let outcome =
                    trail_engine::handle_trail_setup(m, self.my_id, from, &self.fingers, &mut self.routing, &self.config);
                self.apply_trail_outcome(outcome, None, now).await;
            }
            OverlayMessage::TrailSetupResult(m) => {
                let table_index = self.fingers.current_search_index;
                let ultimate = crate::peer_id::finger_target(self.my_id.value64(), table_index);
                let outcome = trail_engine::handle_trail_setup_result(m, self.my_id, table_index, ultimate);
                self.stats.trail_setups_succeeded();
                self.apply_trail_outcome(outcome, Some(table_index), now).await;
            }
            OverlayMessage::TrailRejection(m) => {
                self.stats.trail_rejections();
                let outcome =
                    trail_engine::handle_trail_rejection(m, self.my_id, &mut self.friends, &self.config, now);
                self.apply_trail_outcome(outcome, None, now).await;
            }
            OverlayMessage::TrailTeardown(m) => {
                self.stats.trail_teardowns();
                let outcome = trail_engine::handle_trail_teardown(m, &mut self.routing);
                self.apply_trail_outcome(outcome, None, now).await;
            }
            OverlayMessage::TrailCompression(m) => {
                self.stats.trail_compressions();
                let outcome = trail_engine::handle_trail_compression(m, self.my_id, &mut self.routing);
                self.apply_trail_outcome(outcome, None, now).await;
            }
            OverlayMessage::AddTrail(m) => {
                trail_engine::handle_add_trail(m, &mut self.routing);
            }
            OverlayMessage::VerifySuccessor(m) => {
                let outcome = stabilization::handle_verify_successor(m, self.my_id, &self.fingers);
                self.apply_trail_outcome(outcome, None, now).await;
            }
            OverlayMessage::VerifySuccessorResult(m) => {
                let (outcome, verify) = stabilization::handle_verify_successor_result(m, self.my_id);
                self.apply_trail_outcome(outcome, None, now).await;
                if let VerifyOutcome::BetterSuccessorFound { candidate } = verify {
                    let arrival = if candidate == self.my_id {
                        FingerArrival::SelfId
                    } else {
                        FingerArrival::Friend
                    };
                    let add_outcome =
                        self.fingers
                            .add(candidate, arrival, 0, candidate.value64(), &self.friends);
                    self.apply_finger_outcome(add_outcome, now).await;
                    let out = stabilization::build_notify_new_successor(self.my_id, candidate, None);
                    self.send(out.to, out.message, now).await;
                }
            }
            OverlayMessage::NotifyNewSuccessor(m) => {
                let (outcome, install) = stabilization::handle_notify_new_successor(m, self.my_id);
                self.apply_trail_outcome(outcome, None, now).await;
                if let Some(candidate) = install {
                    let add_outcome = self.fingers.add(
                        candidate,
                        FingerArrival::Friend,
                        crate::peer_id::PREDECESSOR_INDEX,
                        candidate.value64(),
                        &self.friends,
                    );
                    self.apply_finger_outcome(add_outcome, now).await;
                }
            }
            OverlayMessage::Put(m) => self.on_put_inbound(m, now).await,
            OverlayMessage::Get(m) => self.on_get_inbound(m, now).await,
            OverlayMessage::GetResult(m) => self.on_get_result_inbound(m, now).await,
            OverlayMessage::ConnectionCreate { .. }
            | OverlayMessage::ConnectionAck { .. }
            | OverlayMessage::ConnectionDestroy
            | OverlayMessage::Keepalive
            | OverlayMessage::Poll { .. } => {
                // Handshake/keepalive bookkeeping lives on `Connection`
                // directly; nothing further to route here.
            }
        }
    }

    async fn apply_trail_outcome(&mut self, outcome: TrailOutcome, table_index: Option<usize>, now: Instant) {
        if let Some(err) = outcome.error {
            self.record_error(err);
        }
        for out in outcome.sends {
            self.send(out.to, out.message, now).await;
        }
        if let Some(req) = outcome.finger_request {
            let index = table_index.unwrap_or(req.table_index);
            let add_outcome =
                self.fingers
                    .add(req.identity, req.arrival, index, req.ultimate_value, &self.friends);
            self.apply_finger_outcome(add_outcome, now).await;
            self.stats.fingers_discovered();
        }
        if let Some(retry) = outcome.retry_request {
            self.maybe_retry_trail_setup(retry, now).await;
        }
    }

    /// SPEC_FULL §4 item 3: retries a rejected trail search against a
    /// different starting friend, up to `max_finger_setup_retries` times
    /// per stabilization round.
    async fn maybe_retry_trail_setup(&mut self, retry: trail_engine::RetryRequest, now: Instant) {
        if self.finger_setup_retries >= self.config.max_finger_setup_retries {
            return;
        }
        if let Some(out) = trail_engine::retry_trail_setup(
            self.my_id,
            retry.destination_value,
            retry.is_predecessor,
            &retry.excluded_friend,
            &self.friends,
            &self.config,
            now,
        ) {
            self.finger_setup_retries += 1;
            self.stats.trail_setups_attempted();
            self.send(out.to, out.message, now).await;
        }
    }

    async fn apply_finger_outcome(&mut self, outcome: crate::finger::FingerAddOutcome, now: Instant) {
        if let Some(peer) = outcome.friend_increment {
            self.friends.increment_trails(&peer);
        }
        if let Some(peer) = outcome.friend_decrement_single {
            self.friends.decrement_trails(&peer);
        }
        for peer in &outcome.friend_decrements {
            self.friends.decrement_trails(peer);
        }
        for trail in &outcome.teardown_trails {
            if let Some(out) = trail_engine::teardown_trail(trail, Direction::SrcToDest) {
                self.send(out.to, out.message, now).await;
            }
        }
        if outcome.verify_successor_needed {
            if let Some(out) = stabilization::build_verify_successor(self.my_id, &self.fingers) {
                self.send(out.to, out.message, now).await;
            }
        }
        if let Some(compression) = outcome.compression {
            // SPEC_FULL §4 item 5: the trail already got shortened inside
            // `FingerTable::add`; this notifies the stale old first hop (and
            // everything up to the new one) to drop their routing entries.
            let out = trail_engine::initiate_trail_compression(
                self.my_id,
                compression.old_first_hop,
                compression.trail_id,
                compression.new_first_friend,
            );
            self.send(out.to, out.message, now).await;
            self.stats.trail_compressions();
        }
    }

    fn record_error(&self, err: OverlayError) {
        match err {
            OverlayError::TrailFull { .. } => {}
            OverlayError::TrailConflict { .. } => {}
            OverlayError::SelfOnTrail { .. } => {}
            _ => {}
        }
        debug!(error = %err, "trail engine reported a routine error");
    }

    async fn on_stabilization_tick(&mut self, now: Instant) {
        self.finger_setup_retries = 0;
        let (index, target, is_predecessor) =
            stabilization::next_search_target(self.my_id, &self.fingers);
        if let Some((_trail_id, out)) = trail_engine::initiate_trail_setup(
            self.my_id,
            index,
            target,
            is_predecessor,
            &self.friends,
            &self.config,
            now,
        ) {
            self.stats.trail_setups_attempted();
            self.send(out.to, out.message, now).await;
        }
        if let Some(out) = stabilization::build_verify_successor(self.my_id, &self.fingers) {
            self.send(out.to, out.message, now).await;
        }
        self.stats.publish_gauges(self.friends.len(), self.fingers.len(), self.routing.len());
    }

    async fn on_put_request(&mut self, key: HashKey, block_type: u32, expiration_ns: u64, payload: Vec<u8>, now: Instant) {
        let msg = message::Put {
            options: message::PutOptions::NONE,
            block_type,
            hop_count: 0,
            replication: 1,
            best_known_dest: self.my_id,
            intermediate_trail_id: crate::trail::TrailId::ZERO,
            expiration_ns,
            key,
            put_path: vec![],
            payload,
        };
        self.on_put_inbound(msg, now).await;
    }

    async fn on_put_inbound(&mut self, msg: message::Put, now: Instant) {
        let now_ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        match forwarding::route_put(msg, self.my_id, now_ns, &self.fingers) {
            PutAction::Store {
                key,
                expiration_ns,
                block_type,
                payload,
            } => {
                self.datastore
                    .put(key, StoredBlock { block_type, payload, expiration_ns })
                    .await;
                self.stats.puts_stored();
            }
            PutAction::StoreAndForward {
                key,
                expiration_ns,
                block_type,
                payload,
                forward,
            } => {
                self.datastore
                    .put(key, StoredBlock { block_type, payload, expiration_ns })
                    .await;
                self.stats.puts_stored();
                self.send(forward.to, forward.message, now).await;
                self.stats.puts_forwarded();
            }
            PutAction::Forward(out) => {
                self.send(out.to, out.message, now).await;
                self.stats.puts_forwarded();
            }
            PutAction::DropExpired => {
                self.stats.puts_dropped_ttl();
            }
        }
    }

    async fn on_get_request(&mut self, key: HashKey, now: Instant) {
        let msg = message::Get {
            options: message::PutOptions::NONE,
            block_type: 0,
            hop_count: 0,
            replication: 1,
            best_known_dest: self.my_id,
            intermediate_trail_id: crate::trail::TrailId::ZERO,
            key,
            get_path: vec![],
        };
        self.on_get_inbound(msg, now).await;
    }

    async fn on_get_inbound(&mut self, msg: message::Get, now: Instant) {
        match forwarding::route_get(msg, self.my_id, &self.fingers) {
            GetAction::QueryLocal { key, get_path } => {
                let blocks = self.datastore.get(key).await;
                for block in blocks {
                    let result = message::GetResult {
                        block_type: block.block_type,
                        querying: get_path.first().copied().unwrap_or(self.my_id),
                        expiration_ns: block.expiration_ns,
                        key,
                        put_path: vec![],
                        get_path: get_path.clone(),
                        payload: block.payload,
                    };
                    if let Some(out) = forwarding::route_get_result(result, self.my_id) {
                        self.send(out.to, out.message, now).await;
                        self.stats.get_results_forwarded();
                    }
                }
            }
            GetAction::Forward(out) => {
                self.send(out.to, out.message, now).await;
                self.stats.gets_forwarded();
            }
        }
    }

    async fn on_get_result_inbound(&mut self, msg: message::GetResult, now: Instant) {
        if self.dedup.is_duplicate(msg.key, msg.querying, now) {
            self.stats.get_results_deduped();
            return;
        }
        if let Some(out) = forwarding::route_get_result(msg, self.my_id) {
            self.send(out.to, out.message, now).await;
            self.stats.get_results_forwarded();
        }
    }

    /// Enqueues `message` for `to` and immediately drains that friend's
    /// send queue in FIFO order (spec.md §4.2). There's no reason to
    /// delay draining: the event loop is single-threaded, so nothing else
    /// can race ahead of this enqueue before the drain runs.
    async fn send(&mut self, to: PeerId, message: OverlayMessage, now: Instant) {
        let importance = message.default_importance();
        let encoded = match message::codec::encode(&message) {
            Ok(bytes) => bytes,
            Err(_) => {
                self.stats.dropped_malformed();
                return;
            }
        };
        let deadline = now + self.config.get_timeout;
        let tag = Some(crate::friend::PendingTag {
            wire_type: message.wire_type(),
            trail_id: None,
        });
        match self
            .friends
            .enqueue(&to, encoded, importance, deadline, tag, &self.config)
        {
            Some(crate::friend::EnqueueOutcome::Accepted) => self.drain_friend_queue(to, now).await,
            Some(crate::friend::EnqueueOutcome::DroppedQueueFull) => {
                self.stats.dropped_queue_full();
            }
            None => {
                warn!(peer = %to, "send requested for unknown friend");
            }
        }
    }

    async fn drain_friend_queue(&mut self, peer: PeerId, now: Instant) {
        let mut disconnected = false;
        loop {
            let Some(friend) = self.friends.get_mut(&peer) else {
                break;
            };
            let (msg, expired) = friend.pop_next(now);
            for _ in 0..expired {
                self.stats.dropped_deadline();
            }
            let Some(pending) = msg else {
                break;
            };
            if self.transport.send(peer, pending.bytes).await.is_err() {
                disconnected = true;
                break;
            }
        }
        if disconnected {
            self.on_friend_disconnected(peer, now).await;
        }
    }
}
