//! `id=channel` pool snapshots.
//!
//! A snapshot is the flat list a pool owner broadcasts so that others can
//! learn about peers they cannot hear directly:
//!
//! ```text
//! 4021=0,118=2,90211=2,77=5
//! └─ owner first, then every peer with a known channel
//! ```

use std::fmt;
use std::str::FromStr;

use crate::{Channel, Error, NodeId};

/// Decoded pool snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Snapshot {
    entries: Vec<(NodeId, Option<Channel>)>,
}

impl Snapshot {
    /// Build a snapshot from entries.
    pub fn new(entries: Vec<(NodeId, Option<Channel>)>) -> Self {
        Self { entries }
    }

    /// The `(id, channel)` entries, in wire order.
    pub fn entries(&self) -> &[(NodeId, Option<Channel>)] {
        &self.entries
    }

    /// Channel listed for `id`, if the snapshot mentions it with one.
    pub fn channel_of(&self, id: NodeId) -> Option<Channel> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == id)
            .and_then(|(_, channel)| *channel)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (id, channel)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            match channel {
                Some(channel) => write!(f, "{id}={channel}")?,
                None => write!(f, "{id}=-1")?,
            }
        }
        Ok(())
    }
}

impl FromStr for Snapshot {
    type Err = Error;

    /// Parse a snapshot. A single malformed entry rejects the whole snapshot.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(Error::EmptySnapshot);
        }

        let entries = s
            .split(',')
            .map(|part| {
                let (id, channel) = part
                    .split_once('=')
                    .ok_or_else(|| Error::MalformedEntry(part.to_string()))?;
                Ok((id.parse::<NodeId>()?, Channel::from_wire(channel)?))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self { entries })
    }
}
