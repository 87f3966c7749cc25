//! Last-writer-wins arbitration of mode commands.
//!
//! Every mode command carries a generation. A node adopts a remote command
//! when its generation is newer, or equal with a higher-ranked mode:
//!
//! ```text
//! Performing < Looping < Maintenance < Off
//! ```

use std::fmt;

/// Highest generation a command may carry on the wire. One local bump
/// above it is always possible.
pub const GENERATION_MAX: u32 = u32::MAX - 1;

/// Device operating mode, ordered by arbitration precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mode {
    /// Playing the selected macro.
    Performing,
    /// Cycling through every macro.
    Looping,
    /// Off the mesh for maintenance.
    Maintenance,
    /// Dark.
    Off,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Performing => write!(f, "Performing"),
            Self::Looping => write!(f, "Looping"),
            Self::Maintenance => write!(f, "Maintenance"),
            Self::Off => write!(f, "Off"),
        }
    }
}

/// Generation and mode of a command or of the local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub generation: u32,
    pub mode: Mode,
}

impl Stamp {
    pub const fn new(generation: u32, mode: Mode) -> Self {
        Self { generation, mode }
    }

    /// Whether a command stamped `self` overrides `local`.
    pub fn supersedes(&self, local: &Stamp) -> bool {
        self.generation > local.generation
            || (self.generation == local.generation && self.mode > local.mode)
    }
}
