//! The external collaborator boundary for local storage (spec.md §1(d)):
//! "an opaque key -> blob store with expiration." The overlay forwards
//! PUT/GET traffic and, at the peer nearest a key, consults this trait —
//! it never interprets block types or payload contents itself.

use crate::message::HashKey;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StoredBlock {
    pub block_type: u32,
    pub payload: Vec<u8>,
    pub expiration_ns: u64,
}

#[async_trait]
pub trait Datastore: Send + Sync {
    /// Stores (or refreshes) a block under `key`. Implementations decide
    /// their own replacement policy when multiple blocks share a key
    /// (spec.md §4.5 leaves block-type semantics external).
    async fn put(&self, key: HashKey, block: StoredBlock);

    /// Returns every non-expired block stored under `key`.
    async fn get(&self, key: HashKey) -> Vec<StoredBlock>;

    /// Drops blocks past their expiration. Called periodically by the
    /// overlay's scheduler; implementations may also do this lazily.
    async fn expire(&self, now_ns: u64);
}

/// Default sweep interval the overlay uses for [`Datastore::expire`] when
/// no explicit value is configured.
pub const DEFAULT_EXPIRE_SWEEP: Duration = Duration::from_secs(60);
