//! Broadcast transports.
//!
//! A [`Transport`] sends fire-and-forget datagrams and reports which peers
//! it currently hears. Inbound datagrams are pushed by a receive task onto
//! the `mpsc` channel handed out at construction.
//!
//! The UDP transport frames every datagram as:
//!
//! ```text
//! ┌──────────────────────┬────────────────────────┐
//! │ sender id (u32, BE)  │ textual gossip message │
//! └──────────────────────┴────────────────────────┘
//! ```

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use nimbus_pool::NodeId;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};

/// Inbound queue depth.
pub const INBOUND_CAPACITY: usize = 256;

/// Largest datagram we accept.
const MAX_DATAGRAM: usize = 1_500;

/// A received message and its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub from: NodeId,
    pub payload: Vec<u8>,
}

/// Connectionless, lossy link to the rest of the mesh.
pub trait Transport: Send {
    /// Send to every node in range.
    fn broadcast(&self, payload: &[u8]) -> Result<()>;

    /// Send to one node.
    fn send_to(&self, to: NodeId, payload: &[u8]) -> Result<()>;

    /// Nodes heard recently.
    fn reachable_peers(&self) -> BTreeSet<NodeId>;

    /// Tear the link down and bring it back up.
    fn restart(&mut self) -> Result<()>;
}

/// Prefix `payload` with the sender id.
pub fn encode_frame(from: NodeId, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&from.get().to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Split a frame into sender id and payload.
pub fn decode_frame(frame: &[u8]) -> Option<(NodeId, &[u8])> {
    if frame.len() < 4 {
        return None;
    }
    let (id, payload) = frame.split_at(4);
    let id = u32::from_be_bytes(id.try_into().ok()?);
    Some((NodeId(id), payload))
}

/// Last time and address each peer was heard from.
#[derive(Debug)]
pub struct Reachability {
    window: Duration,
    heard: HashMap<NodeId, (SocketAddr, Instant)>,
}

impl Reachability {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            heard: HashMap::new(),
        }
    }

    /// Record a datagram from `id`.
    pub fn heard(&mut self, id: NodeId, addr: SocketAddr, at: Instant) {
        self.heard.insert(id, (addr, at));
    }

    /// Peers heard within the window before `now`.
    pub fn reachable(&self, now: Instant) -> BTreeSet<NodeId> {
        self.heard
            .iter()
            .filter(|(_, (_, at))| now.saturating_duration_since(*at) <= self.window)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Last known address of `id`.
    pub fn addr_of(&self, id: NodeId) -> Option<SocketAddr> {
        self.heard.get(&id).map(|&(addr, _)| addr)
    }

    /// Forget peers silent for more than ten windows.
    pub fn expire(&mut self, now: Instant) {
        let horizon = self.window * 10;
        self.heard
            .retain(|_, (_, at)| now.saturating_duration_since(*at) <= horizon);
    }
}

/// UDP broadcast transport.
pub struct UdpTransport {
    id: NodeId,
    bind: SocketAddr,
    broadcast: SocketAddr,
    socket: Arc<UdpSocket>,
    reachability: Arc<Mutex<Reachability>>,
    inbound: mpsc::Sender<Datagram>,
    receiver: JoinHandle<()>,
}

impl UdpTransport {
    /// Bind the socket and start the receive task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(config: &NodeConfig) -> Result<(Self, mpsc::Receiver<Datagram>)> {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let reachability = Arc::new(Mutex::new(Reachability::new(Duration::from_millis(
            config.reachability.window,
        ))));

        let socket = open_socket(config.bind)?;
        let receiver = spawn_receiver(config.node_id, Arc::clone(&socket), Arc::clone(&reachability), tx.clone());

        info!(
            node = %config.node_id,
            bind = %config.bind,
            broadcast = %config.broadcast,
            "UDP transport bound"
        );

        Ok((
            Self {
                id: config.node_id,
                bind: config.bind,
                broadcast: config.broadcast,
                socket,
                reachability,
                inbound: tx,
                receiver,
            },
            rx,
        ))
    }

    /// Local address of the socket.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    fn send(&self, addr: SocketAddr, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(self.id, payload);
        self.socket.try_send_to(&frame, addr)?;
        trace!(to = %addr, len = frame.len(), "UDP sent");
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn broadcast(&self, payload: &[u8]) -> Result<()> {
        self.send(self.broadcast, payload)
    }

    fn send_to(&self, to: NodeId, payload: &[u8]) -> Result<()> {
        let addr = lock(&self.reachability)
            .addr_of(to)
            .ok_or(Error::UnknownPeer(to))?;
        self.send(addr, payload)
    }

    fn reachable_peers(&self) -> BTreeSet<NodeId> {
        let now = Instant::now();
        let mut reachability = lock(&self.reachability);
        reachability.expire(now);
        reachability.reachable(now)
    }

    fn restart(&mut self) -> Result<()> {
        self.receiver.abort();
        let socket = open_socket(self.bind)?;
        self.receiver = spawn_receiver(
            self.id,
            Arc::clone(&socket),
            Arc::clone(&self.reachability),
            self.inbound.clone(),
        );
        self.socket = socket;
        info!(bind = %self.bind, "UDP transport restarted");
        Ok(())
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.receiver.abort();
    }
}

fn lock(reachability: &Mutex<Reachability>) -> std::sync::MutexGuard<'_, Reachability> {
    reachability.lock().unwrap_or_else(PoisonError::into_inner)
}

fn open_socket(addr: SocketAddr) -> Result<Arc<UdpSocket>> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(Arc::new(UdpSocket::from_std(std_socket)?))
}

fn spawn_receiver(
    own: NodeId,
    socket: Arc<UdpSocket>,
    reachability: Arc<Mutex<Reachability>>,
    inbound: mpsc::Sender<Datagram>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let (len, addr) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "UDP recv error");
                    continue;
                }
            };

            let Some((from, payload)) = decode_frame(&buf[..len]) else {
                debug!(from = %addr, len, "Runt datagram dropped");
                continue;
            };
            // Our own broadcasts loop back.
            if from == own {
                continue;
            }

            lock(&reachability).heard(from, addr, Instant::now());
            let datagram = Datagram {
                from,
                payload: payload.to_vec(),
            };
            if inbound.try_send(datagram).is_err() {
                if inbound.is_closed() {
                    return;
                }
                warn!(from = %from, "Inbound queue full, datagram dropped");
            }
        }
    })
}
