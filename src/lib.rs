#![allow(missing_docs)]

//! X-Vine structured overlay routing (spec.md).
//!
//! This crate implements the routing core of a Chord-style distributed
//! hash table that never routes over a raw IP link directly: every
//! lookup travels over the friend graph, either one friend-hop at a time
//! or source-routed through a trail. It owns the finger table, routing
//! table, trail lifecycle, and PUT/GET content forwarding; it does not
//! own cryptography, peer-id hashing, transport sockets, or local
//! storage — those are external collaborators reached through the
//! [`transport::Transport`] and [`datastore::Datastore`] traits.

pub mod config;
pub mod connection;
pub mod datastore;
pub mod error;
pub mod finger;
pub mod forwarding;
pub mod friend;
pub mod message;
pub mod metrics;
pub mod overlay;
pub mod peer_id;
pub mod routing_table;
pub mod scheduler;
pub mod stabilization;
pub mod trail;
pub mod trail_engine;
pub mod transport;
mod wire_bytes;

pub use config::Config;
pub use error::{CodecError, OverlayError};
pub use overlay::{Command, Overlay, OverlayHandle};
pub use peer_id::PeerId;
pub use trail::{Trail, TrailId};
