//! Offset-corrected mesh time.

use tracing::trace;

use crate::{Millis, Timer};

/// Mesh time: a hardware timer plus a non-decreasing offset.
///
/// Invariant: successive calls to [`now`](Self::now) never decrease, since
/// the timer is monotonic and the offset only grows.
#[derive(Debug, Clone)]
pub struct VirtualClock<T> {
    timer: T,
    offset: Millis,
}

impl<T: Timer> VirtualClock<T> {
    /// Create a clock with zero offset.
    pub fn new(timer: T) -> Self {
        Self { timer, offset: 0 }
    }

    /// Current mesh time.
    pub fn now(&self) -> Millis {
        self.timer.now_ms().saturating_add(self.offset)
    }

    /// Pull the clock forward to `remote`.
    ///
    /// Returns `true` if the clock moved. A `remote` at or behind the current
    /// time is ignored.
    pub fn adjust(&mut self, remote: Millis) -> bool {
        let now = self.now();
        if remote <= now {
            return false;
        }
        let delta = remote - now;
        self.offset = self.offset.saturating_add(delta);
        trace!(remote, delta, offset = self.offset, "Virtual clock advanced");
        true
    }

    /// Accumulated correction over the hardware timer.
    pub const fn offset(&self) -> Millis {
        self.offset
    }

    /// The underlying hardware timer.
    pub const fn timer(&self) -> &T {
        &self.timer
    }
}
