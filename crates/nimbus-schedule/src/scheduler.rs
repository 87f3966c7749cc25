//! Round-robin scheduling over shared mesh time.

use nimbus_clock::Millis;
use tracing::debug;

use crate::MacroRegistry;

/// Position of a timestamp inside the round-robin cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Complete sweeps of all ranks since the epoch.
    pub round: u64,
    /// Rank whose slot is active.
    pub turn: usize,
    /// Time elapsed inside the active slot.
    pub local_time: Millis,
}

/// Locate `now` in a cycle of `peer_count` slots of `duration` each.
///
/// `duration` and `peer_count` must be non-zero; the registry and the pool
/// guarantee both.
pub const fn slot(now: Millis, duration: Millis, peer_count: usize) -> Slot {
    let round_duration = duration * peer_count as Millis;
    Slot {
        round: now / round_duration,
        turn: ((now % round_duration) / duration) as usize,
        local_time: now % duration,
    }
}

/// Active macro and offset into it on the loop timeline.
///
/// Returns `None` for an empty registry.
pub fn loop_position(registry: &MacroRegistry, now: Millis, peer_count: usize) -> Option<(usize, Millis)> {
    let total = registry.total_weighted_duration(peer_count);
    if total == 0 {
        return None;
    }

    let mut offset = now % total;
    for (index, m) in registry.iter().enumerate() {
        let segment = m.weighted_duration(peer_count);
        if offset < segment {
            return Some((index, offset));
        }
        offset -= segment;
    }
    None
}

/// How this node currently takes part in the choreography.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participation {
    /// Participant count `N` (at least 1).
    pub peer_count: usize,
    /// Our rank, in `[0, peer_count)`.
    pub position: usize,
    /// No live peer is reachable.
    pub isolated: bool,
}

impl Participation {
    /// A node on its own.
    pub const SOLO: Self = Self {
        peer_count: 1,
        position: 0,
        isolated: true,
    };
}

/// Everything the render sink needs for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Frame {
    /// Active macro index.
    pub macro_index: usize,
    /// Slot length of the active macro.
    pub duration: Millis,
    /// Time elapsed inside the current slot.
    pub local_time: Millis,
    /// Round counter.
    pub round: u64,
    /// Rank whose slot is active.
    pub turn: usize,
    /// Our rank.
    pub position: usize,
    /// Participant count `N`.
    pub peer_count: usize,
    /// No live peer is reachable.
    pub isolated: bool,
}

impl Frame {
    /// The active slot is ours.
    pub const fn is_my_turn(&self) -> bool {
        self.turn == self.position
    }

    /// Progress through the current slot, in `[0, 1)`.
    pub fn progress(&self) -> f32 {
        self.local_time as f32 / self.duration as f32
    }
}

/// The active macro changed between two ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    pub from: usize,
    pub to: usize,
}

/// Output of one scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub frame: Frame,
    /// Set when loop mode moved on to another macro this tick.
    pub switched: Option<Switch>,
}

/// Tracks the active macro and its round bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct RoundRobinScheduler {
    active: usize,
    /// Mesh time at which the active macro began.
    epoch: Millis,
    observed_rounds: u64,
    last_round: Option<u64>,
}

impl RoundRobinScheduler {
    /// Start on macro 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Active macro index.
    pub const fn active(&self) -> usize {
        self.active
    }

    /// Mesh time at which the active macro began.
    pub const fn epoch(&self) -> Millis {
        self.epoch
    }

    /// Round changes observed since the active macro began.
    pub const fn observed_rounds(&self) -> u64 {
        self.observed_rounds
    }

    /// Make `index` the active macro.
    ///
    /// Returns the previous index when this is a change. Selecting the active
    /// macro again keeps its epoch and counters.
    pub fn select(&mut self, index: usize, now: Millis) -> Option<usize> {
        if index == self.active {
            return None;
        }
        let previous = self.active;
        self.active = index;
        self.epoch = now;
        self.observed_rounds = 0;
        self.last_round = None;
        debug!(from = previous, to = index, epoch = now, "Active macro changed");
        Some(previous)
    }

    /// Compute the frame for `now`.
    ///
    /// In loop mode the macro is derived from the loop timeline and may
    /// change; otherwise the selected macro plays. Returns `None` if the
    /// active macro is not registered.
    pub fn tick(
        &mut self,
        registry: &MacroRegistry,
        now: Millis,
        participation: Participation,
        looping: bool,
    ) -> Option<Tick> {
        let peer_count = participation.peer_count.max(1);
        debug_assert!(participation.position < peer_count);

        let (switched, offset) = if looping {
            let (index, offset) = loop_position(registry, now, peer_count)?;
            let switched = self.select(index, now).map(|from| Switch { from, to: index });
            (switched, offset)
        } else {
            (None, now)
        };

        let duration = registry.get(self.active)?.duration();
        let slot = slot(offset, duration, peer_count);

        if self.last_round.is_some_and(|last| last != slot.round) {
            self.observed_rounds += 1;
        }
        self.last_round = Some(slot.round);

        Some(Tick {
            frame: Frame {
                macro_index: self.active,
                duration,
                local_time: slot.local_time,
                round: slot.round,
                turn: slot.turn,
                position: participation.position,
                peer_count,
                isolated: participation.isolated,
            },
            switched,
        })
    }
}
