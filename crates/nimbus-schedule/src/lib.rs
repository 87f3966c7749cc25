//! Nimbus Choreography Scheduler
//!
//! Turns shared mesh time into a choreography without any turn-taking
//! messages. Given the active macro's slot `duration`, the participant count
//! `N` and our position `p`, every node computes the same answer to "whose
//! turn is it?" as long as clocks and `N` agree.
//!
//! # Round Robin
//!
//! ```text
//! duration = 1000, N = 3
//!
//! now:    0        1000      2000      3000      4000
//!         ├─turn 0─┼─turn 1──┼─turn 2──┼─turn 0──┼─turn 1──▶
//!         └──────── round 0 ──────────┘└──── round 1 ...
//!
//! roundDuration = duration × N
//! turn          = (now mod roundDuration) div duration
//! round         = now div roundDuration
//! localTime     = now mod duration
//! ```
//!
//! # Loop Mode
//!
//! The whole registry becomes one timeline. Each macro occupies
//! `duration × N × repeat` and the timeline wraps, so every node steps
//! through the same macros at the same time with no message at all.

mod error;
mod program;
mod registry;
mod scheduler;

pub use error::{Error, Result};
pub use program::{Breath, PixelBuffer, Program, Rgbw, TurnIndicator};
pub use registry::{Macro, MacroHandle, MacroRegistry};
pub use scheduler::{loop_position, slot, Frame, Participation, RoundRobinScheduler, Slot, Switch, Tick};

/// Maximum number of macros in a registry.
pub const MACRO_MAX: usize = 16;
