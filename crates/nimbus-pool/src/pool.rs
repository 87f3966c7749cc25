//! The peer pool and its derived statistics.

use std::cell::Cell;
use std::collections::BTreeSet;

use tracing::{trace, warn};

use crate::{Channel, NodeId, Peer, Result, Snapshot, PEER_MAX};

/// Statistics derived from a pool, recomputed lazily after mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolStats {
    /// Peers with a known channel.
    pub size: usize,
    /// Peers with a known channel that are not stale.
    pub size_local: usize,
    /// Distinct channels over self and live peers (`N`, at least 1).
    pub distinct_channels: usize,
    /// Distinct channels over self and every known peer, stale included.
    pub known_channels: usize,
    /// Distinct channels strictly below our own, stale peers included.
    pub rank: usize,
    /// Distinct channels strictly below our own over live peers only.
    pub rank_local: usize,
    /// Peers whose `(channel, id)` sorts before ours, stale included.
    pub precedence: usize,
    /// Live peers whose `(channel, id)` sorts before ours.
    pub precedence_local: usize,
}

/// The set of peers known to one node.
///
/// The owner is never stored as a peer; its channel is kept separately.
/// Peers live in a fixed array of [`PEER_MAX`] slots. Derived statistics are
/// cached and recomputed on the first read after any mutation.
#[derive(Debug, Clone)]
pub struct PeerPool {
    owner_id: NodeId,
    owner_channel: Option<Channel>,
    slots: [Option<Peer>; PEER_MAX],
    /// `None` marks the cache dirty.
    stats: Cell<Option<PoolStats>>,
}

impl PeerPool {
    /// Create the local pool of a node.
    pub fn new(owner_id: NodeId, owner_channel: Channel) -> Self {
        Self {
            owner_id,
            owner_channel: Some(owner_channel),
            slots: [None; PEER_MAX],
            stats: Cell::new(None),
        }
    }

    /// Rebuild a remote pool from the snapshot its owner broadcast.
    ///
    /// The entry matching `owner` sets the owner channel instead of being
    /// inserted as a peer.
    pub fn from_snapshot(owner: NodeId, snapshot: &Snapshot) -> Self {
        let mut pool = Self {
            owner_id: owner,
            owner_channel: None,
            slots: [None; PEER_MAX],
            stats: Cell::new(None),
        };
        for &(id, channel) in snapshot.entries() {
            if id == owner {
                pool.owner_channel = channel;
            } else {
                pool.add_peer(id, channel);
            }
        }
        pool
    }

    /// Parse an `id=channel` list sent by `assumed_owner`.
    pub fn parse(text: &str, assumed_owner: NodeId) -> Result<Self> {
        let snapshot: Snapshot = text.parse()?;
        Ok(Self::from_snapshot(assumed_owner, &snapshot))
    }

    /// Snapshot of this pool: owner first, then every peer with a channel.
    pub fn snapshot(&self) -> Snapshot {
        let owner = self
            .owner_channel
            .map(|channel| (self.owner_id, Some(channel)));
        let peers = self
            .peers()
            .filter(|p| p.channel.is_some())
            .map(|p| (p.id, p.channel));
        Snapshot::new(owner.into_iter().chain(peers).collect())
    }

    /// Wire form of [`snapshot`](Self::snapshot).
    pub fn serialize(&self) -> String {
        self.snapshot().to_string()
    }

    /// Our own node id.
    pub const fn owner_id(&self) -> NodeId {
        self.owner_id
    }

    /// Our own channel, if known.
    pub const fn owner_channel(&self) -> Option<Channel> {
        self.owner_channel
    }

    /// Insert or update a peer.
    ///
    /// An existing peer gets the new channel (an unknown channel never erases
    /// a known one) and is no longer stale. A new peer takes the first free
    /// slot; when all slots are taken the call is a no-op.
    ///
    /// Returns `true` if the pool changed.
    pub fn add_peer(&mut self, id: NodeId, channel: Option<Channel>) -> bool {
        if id == self.owner_id {
            return false;
        }

        if let Some(peer) = self.find_mut(id) {
            let channel = channel.or(peer.channel);
            if peer.channel == channel && !peer.stale {
                return false;
            }
            peer.channel = channel;
            peer.stale = false;
            self.touch();
            return true;
        }

        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(Peer::new(id, channel));
                trace!(peer = %id, ?channel, "Peer added");
                self.touch();
                true
            }
            None => {
                warn!(peer = %id, capacity = PEER_MAX, "Peer pool full, ignoring peer");
                false
            }
        }
    }

    /// Mark a peer unreachable, keeping its channel.
    pub fn mark_stale(&mut self, id: NodeId) -> bool {
        match self.find_mut(id) {
            Some(peer) if !peer.stale => {
                peer.stale = true;
                self.touch();
                true
            }
            _ => false,
        }
    }

    /// Forget a peer entirely, freeing its slot.
    pub fn remove_peer(&mut self, id: NodeId) -> Option<Peer> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.is_some_and(|p| p.id == id))?;
        let removed = slot.take();
        self.touch();
        removed
    }

    /// Align the pool with the set of currently reachable nodes.
    ///
    /// Tracked peers missing from `reachable` become stale; stale peers that
    /// reappear are revived without waiting for a new announcement; unknown
    /// ids are added with an unknown channel.
    ///
    /// Returns `true` if the pool changed.
    pub fn reconcile(&mut self, reachable: &BTreeSet<NodeId>) -> bool {
        let mut changed = false;

        for peer in self.slots.iter_mut().flatten() {
            let present = reachable.contains(&peer.id);
            if peer.stale == present {
                peer.stale = !present;
                changed = true;
            }
        }
        if changed {
            self.touch();
        }

        for &id in reachable {
            if self.find(id).is_none() {
                changed |= self.add_peer(id, None);
            }
        }

        changed
    }

    /// Union a remote pool into ours.
    ///
    /// The remote owner is added with its channel, then every peer it knows
    /// except ourselves. Second-hand entries never revive a stale peer: only
    /// local reachability decides liveness. Merging the same pool again
    /// changes nothing.
    ///
    /// Returns the number of entries that changed.
    pub fn merge(&mut self, remote: &PeerPool) -> usize {
        let mut updated = usize::from(self.add_peer(remote.owner_id, remote.owner_channel));
        for peer in remote.peers() {
            if peer.id != self.owner_id && self.learn(peer.id, peer.channel) {
                updated += 1;
            }
        }
        updated
    }

    /// Record a second-hand channel, leaving staleness alone.
    fn learn(&mut self, id: NodeId, channel: Option<Channel>) -> bool {
        match self.find_mut(id) {
            Some(peer) => {
                if channel.is_none() || peer.channel == channel {
                    return false;
                }
                peer.channel = channel;
                self.touch();
                true
            }
            None => self.add_peer(id, channel),
        }
    }

    /// Look up a peer.
    pub fn get(&self, id: NodeId) -> Option<&Peer> {
        self.find(id)
    }

    /// Channel known for `id`; for the owner, its own channel.
    pub fn channel_of(&self, id: NodeId) -> Option<Channel> {
        if id == self.owner_id {
            return self.owner_channel;
        }
        self.find(id).and_then(|p| p.channel)
    }

    /// All tracked peers, in slot order.
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.slots.iter().flatten()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.peers().count()
    }

    /// Whether no peer is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Derived statistics (recomputed if dirty).
    pub fn stats(&self) -> PoolStats {
        match self.stats.get() {
            Some(stats) => stats,
            None => {
                let stats = self.compute();
                self.stats.set(Some(stats));
                stats
            }
        }
    }

    /// Peers with a known channel.
    pub fn size(&self) -> usize {
        self.stats().size
    }

    /// Live peers with a known channel.
    pub fn size_local(&self) -> usize {
        self.stats().size_local
    }

    /// Participant count `N`: distinct channels over self and live peers.
    pub fn distinct_channel_count(&self) -> usize {
        self.stats().distinct_channels
    }

    /// Distinct channels over self and every known peer.
    pub fn known_channel_count(&self) -> usize {
        self.stats().known_channels
    }

    /// Distinct channels below ours over every known peer.
    pub fn rank(&self) -> usize {
        self.stats().rank
    }

    /// Distinct channels below ours over live peers: the scheduling position.
    pub fn rank_local(&self) -> usize {
        self.stats().rank_local
    }

    /// No live peer with a known channel.
    pub fn is_solo(&self) -> bool {
        self.size_local() == 0
    }

    /// We hold the smallest `(channel, id)` among every known peer.
    pub fn is_master(&self) -> bool {
        !self.is_solo() && self.stats().precedence == 0
    }

    /// We hold the smallest `(channel, id)` among live peers.
    pub fn is_local_master(&self) -> bool {
        !self.is_solo() && self.stats().precedence_local == 0
    }

    /// Id of the live master, ourselves included. `None` when solo.
    pub fn master_id(&self) -> Option<NodeId> {
        if self.is_solo() {
            return None;
        }
        let owner = self.owner_channel.map(|c| (c, self.owner_id));
        self.peers()
            .filter(|p| p.is_live())
            .filter_map(Peer::key)
            .chain(owner)
            .min()
            .map(|(_, id)| id)
    }

    fn find(&self, id: NodeId) -> Option<&Peer> {
        self.peers().find(|p| p.id == id)
    }

    fn find_mut(&mut self, id: NodeId) -> Option<&mut Peer> {
        self.slots.iter_mut().flatten().find(|p| p.id == id)
    }

    fn touch(&mut self) {
        self.stats.set(None);
    }

    fn compute(&self) -> PoolStats {
        let own = self.owner_channel.map(|c| (c, self.owner_id));

        let mut stats = PoolStats::default();
        let mut known = BTreeSet::new();
        let mut live = BTreeSet::new();
        if let Some((channel, _)) = own {
            known.insert(channel);
            live.insert(channel);
        }

        for peer in self.peers() {
            let Some(key) = peer.key() else { continue };
            let precedes = own.map_or(true, |own| key < own);

            stats.size += 1;
            known.insert(key.0);
            stats.precedence += usize::from(precedes);

            if peer.is_live() {
                stats.size_local += 1;
                live.insert(key.0);
                stats.precedence_local += usize::from(precedes);
            }
        }

        if let Some((channel, _)) = own {
            stats.rank = known.range(..channel).count();
            stats.rank_local = live.range(..channel).count();
        }
        stats.known_channels = known.len().max(1);
        stats.distinct_channels = live.len().max(1);
        stats
    }
}
