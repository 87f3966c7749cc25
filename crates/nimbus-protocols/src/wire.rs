//! Textual wire format, one message per datagram.
//!
//! ```text
//! CL=id=ch,id=ch,...   pool snapshot (owner first)
//! C=ch                 channel announcement
//! M=index[,gen]        select macro
//! L=[index,]gen        select loop mode
//! L![gen]              legacy loop select
//! OFF[=gen]            power off
//! WIFI                 enter maintenance
//! T=ms                 time sync
//! ```
//!
//! A missing generation decodes as 0.

use std::fmt;
use std::str::FromStr;

use nimbus_clock::Millis;
use nimbus_pool::{Channel, Snapshot};

use crate::{Error, Mode, Result, Stamp, GENERATION_MAX};

/// A gossip message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Sender's full pool view.
    PoolSnapshot(Snapshot),
    /// Sender's own channel.
    ChannelAnnounce(Option<Channel>),
    /// Play one macro.
    MacroSelect { index: usize, generation: u32 },
    /// Play the whole registry as a loop, optionally starting at `index`.
    LoopSelect { index: Option<usize>, generation: u32 },
    /// Go dark.
    PowerOff { generation: u32 },
    /// Leave the mesh for maintenance.
    EnterMaintenance,
    /// Sender's virtual time.
    TimeSync(Millis),
}

impl Message {
    /// Short name for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::PoolSnapshot(_) => "snapshot",
            Self::ChannelAnnounce(_) => "announce",
            Self::MacroSelect { .. } => "macro",
            Self::LoopSelect { .. } => "loop",
            Self::PowerOff { .. } => "off",
            Self::EnterMaintenance => "maintenance",
            Self::TimeSync(_) => "time",
        }
    }

    /// Arbitration stamp of a mode command; `None` for everything else.
    pub const fn stamp(&self) -> Option<Stamp> {
        match *self {
            Self::MacroSelect { generation, .. } => Some(Stamp::new(generation, Mode::Performing)),
            Self::LoopSelect { generation, .. } => Some(Stamp::new(generation, Mode::Looping)),
            Self::PowerOff { generation } => Some(Stamp::new(generation, Mode::Off)),
            _ => None,
        }
    }

    /// Messages handed to the device state machine rather than the pool.
    pub const fn is_command(&self) -> bool {
        matches!(
            self,
            Self::MacroSelect { .. }
                | Self::LoopSelect { .. }
                | Self::PowerOff { .. }
                | Self::EnterMaintenance
        )
    }

    /// Encode for the wire.
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Decode a received datagram payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        std::str::from_utf8(bytes).map_err(|_| Error::NotText)?.parse()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoolSnapshot(snapshot) => write!(f, "CL={snapshot}"),
            Self::ChannelAnnounce(Some(channel)) => write!(f, "C={channel}"),
            Self::ChannelAnnounce(None) => write!(f, "C=-1"),
            Self::MacroSelect { index, generation } => write!(f, "M={index},{generation}"),
            Self::LoopSelect {
                index: Some(index),
                generation,
            } => write!(f, "L={index},{generation}"),
            Self::LoopSelect {
                index: None,
                generation,
            } => write!(f, "L={generation}"),
            Self::PowerOff { generation } => write!(f, "OFF={generation}"),
            Self::EnterMaintenance => write!(f, "WIFI"),
            Self::TimeSync(ms) => write!(f, "T={ms}"),
        }
    }
}

impl FromStr for Message {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();

        // CL= must be tried before C=.
        if let Some(rest) = s.strip_prefix("CL=") {
            return Ok(Self::PoolSnapshot(rest.parse()?));
        }
        if let Some(rest) = s.strip_prefix("C=") {
            let channel = Channel::from_wire(rest).map_err(|_| invalid("announce", rest))?;
            return Ok(Self::ChannelAnnounce(channel));
        }
        if let Some(rest) = s.strip_prefix("M=") {
            let (index, generation) = match rest.split_once(',') {
                Some((index, generation)) => (index, generation_of("macro", generation)?),
                None => (rest, 0),
            };
            let index = number("macro", index)?;
            return Ok(Self::MacroSelect { index, generation });
        }
        if let Some(rest) = s.strip_prefix("L=") {
            return Ok(match rest.split_once(',') {
                Some((index, generation)) => Self::LoopSelect {
                    index: Some(number("loop", index)?),
                    generation: generation_of("loop", generation)?,
                },
                None => Self::LoopSelect {
                    index: None,
                    generation: generation_of("loop", rest)?,
                },
            });
        }
        if let Some(rest) = s.strip_prefix("L!") {
            return Ok(Self::LoopSelect {
                index: None,
                generation: optional_generation("loop", rest)?,
            });
        }
        if let Some(rest) = s.strip_prefix("OFF") {
            let rest = rest.strip_prefix('=').unwrap_or(rest);
            return Ok(Self::PowerOff {
                generation: optional_generation("off", rest)?,
            });
        }
        if s == "WIFI" {
            return Ok(Self::EnterMaintenance);
        }
        if let Some(rest) = s.strip_prefix("T=") {
            return Ok(Self::TimeSync(number("time", rest)?));
        }

        Err(Error::UnknownMessage(s.to_string()))
    }
}

fn invalid(kind: &'static str, payload: &str) -> Error {
    Error::InvalidPayload {
        kind,
        payload: payload.to_string(),
    }
}

fn number<N: FromStr>(kind: &'static str, s: &str) -> Result<N> {
    s.trim().parse().map_err(|_| invalid(kind, s))
}

fn generation_of(kind: &'static str, s: &str) -> Result<u32> {
    let generation: u32 = number(kind, s)?;
    if generation > GENERATION_MAX {
        return Err(invalid(kind, s));
    }
    Ok(generation)
}

fn optional_generation(kind: &'static str, s: &str) -> Result<u32> {
    if s.trim().is_empty() {
        Ok(0)
    } else {
        generation_of(kind, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_pool::NodeId;

    fn decode(s: &str) -> Result<Message> {
        Message::decode(s.as_bytes())
    }

    #[test]
    fn snapshot_before_announce() {
        let msg = decode("CL=1=0,2=3").unwrap();
        let Message::PoolSnapshot(snapshot) = msg else {
            panic!("expected snapshot, got {msg:?}");
        };
        assert_eq!(snapshot.channel_of(NodeId(2)), Some(Channel(3)));
        assert_eq!(decode("C=4"), Ok(Message::ChannelAnnounce(Some(Channel(4)))));
        assert_eq!(decode("C=-1"), Ok(Message::ChannelAnnounce(None)));
    }

    #[test]
    fn missing_generation_is_zero() {
        assert_eq!(
            decode("M=3"),
            Ok(Message::MacroSelect { index: 3, generation: 0 })
        );
        assert_eq!(decode("OFF"), Ok(Message::PowerOff { generation: 0 }));
        assert_eq!(
            decode("L!"),
            Ok(Message::LoopSelect { index: None, generation: 0 })
        );
    }

    #[test]
    fn generations_decode() {
        assert_eq!(
            decode("M=3,7"),
            Ok(Message::MacroSelect { index: 3, generation: 7 })
        );
        assert_eq!(
            decode("L=2,9"),
            Ok(Message::LoopSelect { index: Some(2), generation: 9 })
        );
        assert_eq!(
            decode("L=9"),
            Ok(Message::LoopSelect { index: None, generation: 9 })
        );
        assert_eq!(
            decode("L!4"),
            Ok(Message::LoopSelect { index: None, generation: 4 })
        );
        assert_eq!(decode("OFF=5"), Ok(Message::PowerOff { generation: 5 }));
        assert_eq!(decode("OFF5"), Ok(Message::PowerOff { generation: 5 }));
    }

    #[test]
    fn encoding_is_readable() {
        assert_eq!(Message::MacroSelect { index: 1, generation: 2 }.to_string(), "M=1,2");
        assert_eq!(Message::PowerOff { generation: 3 }.to_string(), "OFF=3");
        assert_eq!(Message::EnterMaintenance.to_string(), "WIFI");
        assert_eq!(Message::TimeSync(12_345).to_string(), "T=12345");
        assert_eq!(
            decode(&Message::LoopSelect { index: None, generation: 6 }.to_string()),
            Ok(Message::LoopSelect { index: None, generation: 6 })
        );
    }

    #[test]
    fn malformed_rejected() {
        assert!(matches!(decode("M=x"), Err(Error::InvalidPayload { kind: "macro", .. })));
        assert!(matches!(decode("T="), Err(Error::InvalidPayload { kind: "time", .. })));
        assert!(matches!(decode("CL=1=0,junk"), Err(Error::Snapshot(_))));
        assert!(matches!(decode("S=OFF"), Err(Error::UnknownMessage(_))));
        assert_eq!(Message::decode(&[0xff, 0xfe]), Err(Error::NotText));
    }

    #[test]
    fn exhausted_generation_rejected() {
        assert_eq!(
            decode("M=0,4294967294"),
            Ok(Message::MacroSelect { index: 0, generation: GENERATION_MAX })
        );
        assert!(matches!(decode("M=0,4294967295"), Err(Error::InvalidPayload { kind: "macro", .. })));
        assert!(matches!(decode("L=4294967295"), Err(Error::InvalidPayload { kind: "loop", .. })));
        assert!(matches!(decode("OFF=4294967295"), Err(Error::InvalidPayload { kind: "off", .. })));
    }

    #[test]
    fn stamps_follow_mode() {
        assert_eq!(
            Message::PowerOff { generation: 5 }.stamp(),
            Some(Stamp::new(5, Mode::Off))
        );
        assert_eq!(Message::EnterMaintenance.stamp(), None);
        assert!(Message::EnterMaintenance.is_command());
        assert!(!Message::TimeSync(0).is_command());
    }
}
