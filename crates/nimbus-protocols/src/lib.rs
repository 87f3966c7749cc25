//! Nimbus Protocols - Lossy Broadcast Gossip
//!
//! Everything a node says on the air and how it reacts to what it hears.
//! There is no request/response and no acknowledgement: every piece of
//! state is re-broadcast periodically, so a lost datagram only delays
//! convergence.
//!
//! # Who Says What
//!
//! ```text
//!   solo node         ──C=ch──────────▶  (every announce period)
//!   local master      ──CL=snapshot───▶  (every snapshot period)
//!                     ──M= / L=───────▶  (every reassert period)
//!   every linked node ──T=now─────────▶  (every time sync period)
//! ```
//!
//! On receipt, snapshots are merged into the local pool, announcements
//! upsert the sender, and time syncs push the virtual clock forward. Mode
//! commands (`M=`, `L=`, `OFF`, `WIFI`) are passed up untouched; the device
//! state machine decides whether they win using [`Stamp::supersedes`].
//!
//! # Example
//!
//! ```rust,ignore
//! let mut gossip = Gossip::new(pool, VirtualClock::new(SystemTimer::new()), GossipConfig::default());
//!
//! for out in gossip.poll(machine.assertion().as_ref()) {
//!     transport.send(out);
//! }
//! match gossip.receive(from, &payload)? {
//!     Delivery::Absorbed(replies) => send_all(replies),
//!     Delivery::Command(msg) => machine.on_remote(msg),
//! }
//! ```

pub mod arbitration;
pub mod error;
pub mod gossip;
pub mod wire;

pub use arbitration::{Mode, Stamp, GENERATION_MAX};
pub use error::{Error, Result};
pub use gossip::{Delivery, Gossip, GossipConfig, Outbound};
pub use wire::Message;
