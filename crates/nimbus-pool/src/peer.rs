//! Peer identity and channel types.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Opaque 32-bit node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u32);

impl NodeId {
    /// Derive a stable id from a node name (hostname, MAC address, ...).
    ///
    /// The id is the first four bytes of the BLAKE3 hash of the name. Zero is
    /// reserved as "no node" on the wire and is never produced.
    pub fn from_name(name: &str) -> Self {
        let hash = blake3::hash(name.as_bytes());
        let bytes = hash.as_bytes();
        let id = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Self(id.max(1))
    }

    /// Raw value.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(NodeId)
            .map_err(|_| Error::InvalidNodeId(s.to_string()))
    }
}

/// Logical ordering slot of a node, distinct from its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Channel(pub u16);

impl Channel {
    /// Decode a wire channel, where any negative value means "unknown".
    pub fn from_wire(s: &str) -> Result<Option<Self>, Error> {
        let raw: i64 = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidChannel(s.to_string()))?;
        if raw < 0 {
            return Ok(None);
        }
        u16::try_from(raw)
            .map(|c| Some(Channel(c)))
            .map_err(|_| Error::InvalidChannel(s.to_string()))
    }

    /// Raw value.
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A peer tracked by a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Peer {
    /// The peer's node id.
    pub id: NodeId,
    /// Announced channel, `None` until the peer tells us.
    pub channel: Option<Channel>,
    /// Not currently reachable, kept for a graceful rejoin.
    pub stale: bool,
}

impl Peer {
    /// A reachable peer.
    pub const fn new(id: NodeId, channel: Option<Channel>) -> Self {
        Self {
            id,
            channel,
            stale: false,
        }
    }

    /// Ordering key used for master selection: `(channel, id)`.
    pub fn key(&self) -> Option<(Channel, NodeId)> {
        self.channel.map(|c| (c, self.id))
    }

    /// Known channel and currently reachable.
    pub fn is_live(&self) -> bool {
        self.channel.is_some() && !self.stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_from_name_is_stable() {
        let a = NodeId::from_name("cloud-07");
        let b = NodeId::from_name("cloud-07");
        assert_eq!(a, b);
        assert_ne!(a, NodeId::from_name("cloud-08"));
        assert_ne!(a, NodeId(0));
    }

    #[test]
    fn node_id_parse() {
        assert_eq!("4021".parse::<NodeId>(), Ok(NodeId(4021)));
        assert_eq!(" 7 ".parse::<NodeId>(), Ok(NodeId(7)));
        assert!("-3".parse::<NodeId>().is_err());
        assert!("abc".parse::<NodeId>().is_err());
    }

    #[test]
    fn channel_wire_decoding() {
        assert_eq!(Channel::from_wire("3"), Ok(Some(Channel(3))));
        assert_eq!(Channel::from_wire("-1"), Ok(None));
        assert!(Channel::from_wire("70000").is_err());
        assert!(Channel::from_wire("x").is_err());
    }

    #[test]
    fn peer_key_orders_channel_first() {
        let a = Peer::new(NodeId(9), Some(Channel(0)));
        let b = Peer::new(NodeId(1), Some(Channel(2)));
        assert!(a.key() < b.key());
        assert_eq!(Peer::new(NodeId(1), None).key(), None);
    }

    #[test]
    fn live_needs_channel_and_reachability() {
        let mut peer = Peer::new(NodeId(4), Some(Channel(1)));
        assert!(peer.is_live());
        peer.stale = true;
        assert!(!peer.is_live());
        assert!(!Peer::new(NodeId(5), None).is_live());
    }
}
