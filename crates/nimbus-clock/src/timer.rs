//! Hardware timer abstraction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::Millis;

/// A free-running, monotonic millisecond counter.
///
/// On a device this is the boot-relative millisecond tick. Implementations
/// must never go backwards.
pub trait Timer {
    /// Milliseconds since the timer started.
    fn now_ms(&self) -> Millis;
}

/// Process-relative timer backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemTimer {
    started: Instant,
}

impl SystemTimer {
    /// Start a timer at zero.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for SystemTimer {
    fn now_ms(&self) -> Millis {
        self.started.elapsed().as_millis() as Millis
    }
}

/// A timer driven by hand.
///
/// Clones share the same counter, so a simulation can hold one handle and
/// give another to the node under test.
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    ms: Arc<AtomicU64>,
}

impl ManualTimer {
    /// Create a timer reading `start`.
    pub fn new(start: Millis) -> Self {
        Self {
            ms: Arc::new(AtomicU64::new(start)),
        }
    }

    /// Move the timer forward by `delta` milliseconds.
    pub fn advance(&self, delta: Millis) {
        self.ms.fetch_add(delta, Ordering::SeqCst);
    }

    /// Set the timer to `ms`, if that is not in the past.
    pub fn set(&self, ms: Millis) {
        self.ms.fetch_max(ms, Ordering::SeqCst);
    }
}

impl Timer for ManualTimer {
    fn now_ms(&self) -> Millis {
        self.ms.load(Ordering::SeqCst)
    }
}
