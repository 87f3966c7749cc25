//! Periodic gossip driver.
//!
//! [`Gossip`] owns the node's pool and virtual clock. Call
//! [`poll()`](Gossip::poll) every tick to collect due emissions and
//! [`receive()`](Gossip::receive) for every inbound datagram. Mode commands
//! are not applied here; they come back as [`Delivery::Command`] for the
//! device state machine to arbitrate.

use std::collections::BTreeSet;

use nimbus_clock::{Millis, Timer, VirtualClock};
use nimbus_pool::{Channel, NodeId, PeerPool, Snapshot};
use rand::Rng;
use tracing::{debug, trace};

use crate::error::Result;
use crate::Message;

/// Emission periods, measured on the local hardware timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GossipConfig {
    /// Channel announcement period while solo.
    pub announce_period: Millis,
    /// Pool snapshot period while local master.
    pub snapshot_period: Millis,
    /// Mode re-assertion period while local master.
    pub reassert_period: Millis,
    /// Time sync period while linked.
    pub time_sync_period: Millis,
    /// Upper bound of the random delay added to every period.
    pub jitter: Millis,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            announce_period: 1_000,
            snapshot_period: 1_000,
            reassert_period: 5_000,
            time_sync_period: 1_000,
            jitter: 100,
        }
    }
}

impl GossipConfig {
    /// Set the solo announcement period.
    #[must_use]
    pub fn with_announce_period(mut self, period: Millis) -> Self {
        self.announce_period = period;
        self
    }

    /// Set the snapshot period.
    #[must_use]
    pub fn with_snapshot_period(mut self, period: Millis) -> Self {
        self.snapshot_period = period;
        self
    }

    /// Set the re-assertion period.
    #[must_use]
    pub fn with_reassert_period(mut self, period: Millis) -> Self {
        self.reassert_period = period;
        self
    }

    /// Set the time sync period.
    #[must_use]
    pub fn with_time_sync_period(mut self, period: Millis) -> Self {
        self.time_sync_period = period;
        self
    }

    /// Set the jitter bound. Zero makes emissions fully deterministic.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Millis) -> Self {
        self.jitter = jitter;
        self
    }
}

/// A message to put on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Broadcast(Message),
    Unicast(NodeId, Message),
}

/// Result of handling one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Handled by the protocol itself; replies to send, possibly none.
    Absorbed(Vec<Outbound>),
    /// A mode command for the state machine.
    Command(Message),
}

#[derive(Debug, Clone, Copy, Default)]
struct Deadlines {
    announce: Millis,
    snapshot: Millis,
    reassert: Millis,
    time_sync: Millis,
}

/// Gossip state of one node.
#[derive(Debug)]
pub struct Gossip<T: Timer> {
    pool: PeerPool,
    clock: VirtualClock<T>,
    config: GossipConfig,
    /// Local timer deadlines; everything is due at start.
    next: Deadlines,
}

impl<T: Timer> Gossip<T> {
    /// Create the driver for a node.
    pub fn new(pool: PeerPool, clock: VirtualClock<T>, config: GossipConfig) -> Self {
        debug!(
            node = %pool.owner_id(),
            channel = ?pool.owner_channel(),
            ?config,
            "Created gossip driver"
        );
        Self {
            pool,
            clock,
            config,
            next: Deadlines::default(),
        }
    }

    /// The node's pool.
    pub const fn pool(&self) -> &PeerPool {
        &self.pool
    }

    /// The node's virtual clock.
    pub const fn clock(&self) -> &VirtualClock<T> {
        &self.clock
    }

    /// Current virtual time.
    pub fn now(&self) -> Millis {
        self.clock.now()
    }

    /// Current local hardware time.
    pub fn local_now(&self) -> Millis {
        self.clock.timer().now_ms()
    }

    /// Emission configuration.
    pub const fn config(&self) -> &GossipConfig {
        &self.config
    }

    /// Align the pool with the transport's reachable set.
    ///
    /// A change makes the next announcement, snapshot and re-assertion due
    /// immediately so the new topology spreads without waiting a period.
    pub fn reconcile(&mut self, reachable: &BTreeSet<NodeId>) -> bool {
        let changed = self.pool.reconcile(reachable);
        if changed {
            let now = self.local_now();
            self.next.announce = now;
            self.next.snapshot = now;
            self.next.reassert = now;
            debug!(
                reachable = reachable.len(),
                peers = self.pool.distinct_channel_count(),
                solo = self.pool.is_solo(),
                "Reachable set changed"
            );
        }
        changed
    }

    /// Collect every emission due now.
    ///
    /// `assertion` is the mode command the node currently stands for,
    /// re-broadcast while local master.
    pub fn poll(&mut self, assertion: Option<&Message>) -> Vec<Outbound> {
        let now = self.local_now();
        let jitter = self.config.jitter;
        let mut out = Vec::new();

        if self.pool.is_solo() {
            if fire(&mut self.next.announce, now, self.config.announce_period, jitter) {
                out.push(Outbound::Broadcast(Message::ChannelAnnounce(
                    self.pool.owner_channel(),
                )));
            }
        } else {
            if self.pool.is_local_master() {
                if fire(&mut self.next.snapshot, now, self.config.snapshot_period, jitter) {
                    out.push(Outbound::Broadcast(Message::PoolSnapshot(self.pool.snapshot())));
                }
                if let Some(assertion) = assertion {
                    if fire(&mut self.next.reassert, now, self.config.reassert_period, jitter) {
                        out.push(Outbound::Broadcast(assertion.clone()));
                    }
                }
            }
            if fire(&mut self.next.time_sync, now, self.config.time_sync_period, jitter) {
                out.push(Outbound::Broadcast(Message::TimeSync(self.clock.now())));
            }
        }

        if !out.is_empty() {
            trace!(count = out.len(), "Gossip due");
        }
        out
    }

    /// Decode and handle a datagram payload from `from`.
    pub fn receive(&mut self, from: NodeId, payload: &[u8]) -> Result<Delivery> {
        let msg = Message::decode(payload)?;
        trace!(from = %from, kind = msg.kind(), "Received gossip");
        Ok(self.handle(from, msg))
    }

    /// Handle an already decoded message from `from`.
    pub fn handle(&mut self, from: NodeId, msg: Message) -> Delivery {
        let replies = match msg {
            Message::PoolSnapshot(snapshot) => self.on_snapshot(from, &snapshot),
            Message::ChannelAnnounce(channel) => self.on_announce(from, channel),
            Message::TimeSync(remote) => {
                self.clock.adjust(remote);
                Vec::new()
            }
            command => return Delivery::Command(command),
        };
        Delivery::Absorbed(replies)
    }

    fn on_snapshot(&mut self, from: NodeId, snapshot: &Snapshot) -> Vec<Outbound> {
        let mut replies = Vec::new();
        let remote = PeerPool::from_snapshot(from, snapshot);

        if remote.channel_of(self.pool.owner_id()) != self.pool.owner_channel() {
            debug!(from = %from, "Snapshot does not know us, announcing");
            replies.push(Outbound::Broadcast(Message::ChannelAnnounce(
                self.pool.owner_channel(),
            )));
        }

        let updated = self.pool.merge(&remote);
        if updated > 0 {
            debug!(
                from = %from,
                updated,
                peers = self.pool.distinct_channel_count(),
                "Merged snapshot"
            );
        }

        if remote.size() < self.pool.size() {
            replies.push(Outbound::Unicast(
                from,
                Message::PoolSnapshot(self.pool.snapshot()),
            ));
        }
        replies
    }

    fn on_announce(&mut self, from: NodeId, channel: Option<Channel>) -> Vec<Outbound> {
        if self.pool.add_peer(from, channel) {
            debug!(from = %from, ?channel, "Peer announced channel");
        }
        match (channel, self.pool.owner_channel()) {
            (Some(theirs), Some(ours)) if theirs < ours => vec![Outbound::Unicast(
                from,
                Message::ChannelAnnounce(Some(ours)),
            )],
            _ => Vec::new(),
        }
    }
}

/// Advance `deadline` and report `true` when it has passed.
fn fire(deadline: &mut Millis, now: Millis, period: Millis, jitter: Millis) -> bool {
    if now < *deadline {
        return false;
    }
    let delay = if jitter == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter)
    };
    *deadline = now + period + delay;
    true
}
