//! Isolation watchdog.

use nimbus_clock::Millis;
use tracing::warn;

/// Restarts the transport once when a previously linked node stays solo.
///
/// The watchdog arms the first time the node sees a peer. Once armed, a
/// solo stretch of `grace` fires exactly one restart and disarms until the
/// node is linked again.
#[derive(Debug, Clone)]
pub struct IsolationWatchdog {
    grace: Millis,
    armed: bool,
    solo_since: Option<Millis>,
}

impl IsolationWatchdog {
    pub fn new(grace: Millis) -> Self {
        Self {
            grace,
            armed: false,
            solo_since: None,
        }
    }

    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Forget the current solo stretch while the node is not playing.
    ///
    /// Stays armed, so isolation is measured afresh once play resumes.
    pub fn pause(&mut self) {
        self.solo_since = None;
    }

    /// Feed the current solo state; returns `true` when a restart is due.
    pub fn observe(&mut self, solo: bool, now: Millis) -> bool {
        if !solo {
            self.armed = true;
            self.solo_since = None;
            return false;
        }
        if !self.armed {
            return false;
        }

        let since = *self.solo_since.get_or_insert(now);
        if now.saturating_sub(since) < self.grace {
            return false;
        }

        warn!(solo_for = now - since, "Isolated too long, restarting transport");
        self.armed = false;
        self.solo_since = None;
        true
    }
}
