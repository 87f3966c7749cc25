//! In-memory mesh simulation.
//!
//! [`SimHub`] stands in for the radio: every attached node hears every
//! other node it is linked to, each datagram is dropped with the configured
//! loss probability, and links can be cut to model partitions.
//! [`Simulation`] steps a set of nodes in lockstep on manual timers, which
//! makes whole-mesh runs deterministic for a given seed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nimbus_clock::{ManualTimer, Millis};
use nimbus_pool::{Channel, NodeId};
use nimbus_protocols::GossipConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{default_registry, MachineConfig, NodeConfig};
use crate::error::{Error, Result};
use crate::machine::UiEvent;
use crate::node::Node;
use crate::sink::TracingSink;
use crate::transport::{Datagram, Transport, INBOUND_CAPACITY};

#[derive(Debug)]
struct HubState {
    inboxes: BTreeMap<NodeId, mpsc::Sender<Datagram>>,
    /// Cut links, stored as (low, high).
    cut: BTreeSet<(NodeId, NodeId)>,
    loss: f64,
    rng: StdRng,
    restarts: BTreeMap<NodeId, u32>,
    delivered: u64,
    dropped: u64,
}

impl HubState {
    fn linked(&self, a: NodeId, b: NodeId) -> bool {
        a != b && !self.cut.contains(&ordered(a, b))
    }

    fn deliver(&mut self, from: NodeId, to: NodeId, payload: &[u8]) {
        if self.rng.gen::<f64>() < self.loss {
            self.dropped += 1;
            return;
        }
        if let Some(inbox) = self.inboxes.get(&to) {
            let datagram = Datagram {
                from,
                payload: payload.to_vec(),
            };
            if inbox.try_send(datagram).is_ok() {
                self.delivered += 1;
            } else {
                self.dropped += 1;
            }
        }
    }
}

fn ordered(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Shared in-memory broadcast medium.
#[derive(Debug, Clone)]
pub struct SimHub {
    state: Arc<Mutex<HubState>>,
}

impl SimHub {
    /// Create a hub dropping each datagram with probability `loss`.
    pub fn new(loss: f64, seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                inboxes: BTreeMap::new(),
                cut: BTreeSet::new(),
                loss: loss.clamp(0.0, 1.0),
                rng: StdRng::seed_from_u64(seed),
                restarts: BTreeMap::new(),
                delivered: 0,
                dropped: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a node; returns its transport and inbound queue.
    pub fn attach(&self, id: NodeId) -> (SimTransport, mpsc::Receiver<Datagram>) {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        self.lock().inboxes.insert(id, tx);
        (
            SimTransport {
                id,
                hub: self.clone(),
            },
            rx,
        )
    }

    /// Remove a node from the medium.
    pub fn detach(&self, id: NodeId) {
        self.lock().inboxes.remove(&id);
    }

    /// Cut the link between two nodes.
    pub fn cut(&self, a: NodeId, b: NodeId) {
        self.lock().cut.insert(ordered(a, b));
    }

    /// Restore the link between two nodes.
    pub fn heal(&self, a: NodeId, b: NodeId) {
        self.lock().cut.remove(&ordered(a, b));
    }

    /// Cut every link of `id`.
    pub fn isolate(&self, id: NodeId) {
        let mut state = self.lock();
        let others: Vec<NodeId> = state.inboxes.keys().copied().filter(|&o| o != id).collect();
        for other in others {
            state.cut.insert(ordered(id, other));
        }
    }

    /// Restore every link.
    pub fn heal_all(&self) {
        self.lock().cut.clear();
    }

    pub fn set_loss(&self, loss: f64) {
        self.lock().loss = loss.clamp(0.0, 1.0);
    }

    /// Transport restarts requested by `id`.
    pub fn restarts(&self, id: NodeId) -> u32 {
        self.lock().restarts.get(&id).copied().unwrap_or(0)
    }

    /// Datagrams delivered and dropped so far.
    pub fn traffic(&self) -> (u64, u64) {
        let state = self.lock();
        (state.delivered, state.dropped)
    }
}

/// A node's handle on the [`SimHub`].
#[derive(Debug, Clone)]
pub struct SimTransport {
    id: NodeId,
    hub: SimHub,
}

impl Transport for SimTransport {
    fn broadcast(&self, payload: &[u8]) -> Result<()> {
        let mut state = self.hub.lock();
        if !state.inboxes.contains_key(&self.id) {
            return Err(Error::Detached(self.id));
        }
        let targets: Vec<NodeId> = state
            .inboxes
            .keys()
            .copied()
            .filter(|&to| state.linked(self.id, to))
            .collect();
        for to in targets {
            state.deliver(self.id, to, payload);
        }
        Ok(())
    }

    fn send_to(&self, to: NodeId, payload: &[u8]) -> Result<()> {
        let mut state = self.hub.lock();
        if !state.inboxes.contains_key(&to) || !state.linked(self.id, to) {
            return Err(Error::UnknownPeer(to));
        }
        state.deliver(self.id, to, payload);
        Ok(())
    }

    fn reachable_peers(&self) -> BTreeSet<NodeId> {
        let state = self.hub.lock();
        if !state.inboxes.contains_key(&self.id) {
            return BTreeSet::new();
        }
        state
            .inboxes
            .keys()
            .copied()
            .filter(|&other| state.linked(self.id, other))
            .collect()
    }

    fn restart(&mut self) -> Result<()> {
        *self.hub.lock().restarts.entry(self.id).or_default() += 1;
        debug!(node = %self.id, "Simulated transport restarted");
        Ok(())
    }
}

/// Parameters of a simulated mesh.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub nodes: usize,
    /// Datagram loss probability.
    pub loss: f64,
    pub seed: u64,
    /// Step length.
    pub tick: Millis,
    /// Upper bound of the random boot offset of each node's timer.
    pub max_skew: Millis,
    pub gossip: GossipConfig,
    pub machine: MachineConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            nodes: 5,
            loss: 0.0,
            seed: 42,
            tick: 20,
            max_skew: 10_000,
            gossip: GossipConfig::default(),
            machine: MachineConfig::default(),
        }
    }
}

/// A simulated device.
pub type SimNode = Node<ManualTimer, SimTransport, TracingSink>;

struct Member {
    node: SimNode,
    timer: ManualTimer,
    inbox: mpsc::Receiver<Datagram>,
}

/// A mesh of simulated nodes stepped in lockstep.
pub struct Simulation {
    config: SimulationConfig,
    hub: SimHub,
    members: Vec<Member>,
    elapsed: Millis,
}

impl Simulation {
    /// Build the mesh. Node `i` gets channel `i` and a random id.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        let hub = SimHub::new(config.loss, config.seed);
        let mut rng = StdRng::seed_from_u64(config.seed ^ 0x5eed);
        let mut ids = BTreeSet::new();

        let mut members = Vec::with_capacity(config.nodes);
        for i in 0..config.nodes {
            let id = loop {
                let candidate = NodeId(rng.gen_range(1..=u32::MAX));
                if ids.insert(candidate) {
                    break candidate;
                }
            };
            let timer = ManualTimer::new(rng.gen_range(0..=config.max_skew));
            let node_config = NodeConfig::new(id, Channel(i as u16))
                .with_tick(config.tick)
                .with_gossip(config.gossip)
                .with_machine(config.machine);

            let (transport, inbox) = hub.attach(id);
            let node = Node::new(&node_config, default_registry()?, timer.clone(), transport, TracingSink::new());
            members.push(Member { node, timer, inbox });
        }

        info!(nodes = config.nodes, loss = config.loss, seed = config.seed, "Simulation created");
        Ok(Self {
            config,
            hub,
            members,
            elapsed: 0,
        })
    }

    pub fn hub(&self) -> &SimHub {
        &self.hub
    }

    /// Simulated time since start.
    pub const fn elapsed(&self) -> Millis {
        self.elapsed
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn node(&self, index: usize) -> &SimNode {
        &self.members[index].node
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SimNode> {
        self.members.iter().map(|m| &m.node)
    }

    /// Id of node `index`.
    pub fn id(&self, index: usize) -> NodeId {
        self.members[index].node.pool().owner_id()
    }

    /// Deliver a button event to node `index`.
    pub fn press(&mut self, index: usize, event: UiEvent) {
        self.members[index].node.on_ui(event);
    }

    /// Advance every timer one tick, tick every node, then deliver traffic.
    pub fn step(&mut self) {
        self.elapsed += self.config.tick;
        for member in &mut self.members {
            member.timer.advance(self.config.tick);
            member.node.on_tick();
        }
        for member in &mut self.members {
            while let Ok(datagram) = member.inbox.try_recv() {
                member.node.on_datagram(datagram);
            }
        }
    }

    /// Step for `duration` of simulated time.
    pub fn run_for(&mut self, duration: Millis) {
        let steps = duration.div_ceil(self.config.tick);
        for _ in 0..steps {
            self.step();
        }
    }

    /// Step until `done` holds or `limit` elapses; returns whether it held.
    pub fn run_until(&mut self, limit: Millis, mut done: impl FnMut(&Self) -> bool) -> bool {
        let deadline = self.elapsed + limit;
        while self.elapsed < deadline {
            if done(self) {
                return true;
            }
            self.step();
        }
        done(self)
    }

    /// Whether every playing node agrees on `N`, master and turn, with
    /// distinct positions.
    pub fn converged(&self) -> bool {
        let playing: Vec<&SimNode> = self.nodes().filter(|n| n.machine().is_playing()).collect();
        let Some(first) = playing.first() else {
            return true;
        };

        let n = first.pool().distinct_channel_count();
        let master = first.pool().master_id();
        let turn = first.last_frame().map(|f| (f.turn, f.round, f.macro_index));

        let mut positions = BTreeSet::new();
        playing.iter().all(|node| {
            let pool = node.pool();
            pool.distinct_channel_count() == n
                && pool.master_id() == master
                && node.last_frame().map(|f| (f.turn, f.round, f.macro_index)) == turn
                && positions.insert(pool.rank_local())
        }) && n == playing.len()
    }

    /// One-line summary per node.
    pub fn report(&self) -> Vec<String> {
        self.nodes()
            .map(|node| {
                let pool = node.pool();
                format!(
                    "{} ch={} mode={} N={} pos={} master={} t={}",
                    pool.owner_id(),
                    pool.owner_channel().map_or(-1, |c| i32::from(c.get())),
                    node.machine().mode(),
                    pool.distinct_channel_count(),
                    pool.rank_local(),
                    pool.master_id().map_or_else(|| "-".to_string(), |m| m.to_string()),
                    node.gossip().now(),
                )
            })
            .collect()
    }
}
