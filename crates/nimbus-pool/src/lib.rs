//! Nimbus Peer Pool
//!
//! Each node keeps a small pool of the peers it has heard about, together
//! with the logical channel every peer announced. From that pool alone a
//! node derives how many nodes take part, where it sits in the ordering and
//! who the coordinator is. No election messages are ever exchanged.
//!
//! # Ordering
//!
//! ```text
//! key = (channel, id)        ascending
//!
//!   channel:  0    2    2    5
//!   id:       9    3    7    1
//!             ▲
//!             master (smallest key)
//!
//!   distinct channels = {0, 2, 5}  → N = 3
//!   rank of a node on channel 5    → 2 (channels 0 and 2 below it)
//! ```
//!
//! Nodes sharing a channel share a slot in the choreography: they do not
//! inflate `N` nor each other's rank.
//!
//! # Stale Peers
//!
//! A peer that drops out of radio range is marked stale instead of being
//! forgotten. Stale peers keep their channel so they slot straight back in
//! when they reappear, but they are left out of the participant count and
//! of the "local" rank and master views used for scheduling and leadership.
//!
//! # Epidemic Merge
//!
//! Pools travel as `id=channel` snapshots. Merging a snapshot is an
//! idempotent union, so partial knowledge spreads transitively across a
//! partially connected mesh no matter how often or in which order snapshots
//! arrive.

mod error;
mod peer;
mod pool;
mod snapshot;

pub use error::{Error, Result};
pub use peer::{Channel, NodeId, Peer};
pub use pool::{PeerPool, PoolStats};
pub use snapshot::Snapshot;

/// Maximum number of peers tracked by a pool (the owner excluded).
pub const PEER_MAX: usize = 16;
