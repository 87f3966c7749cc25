//! Nimbus Virtual Clock
//!
//! Every node in the mesh runs its own free-running hardware timer. The
//! choreography only works if all nodes agree on "now", so each node keeps
//! an offset on top of its timer and nudges it whenever a peer reports a
//! later time.
//!
//! # Forward-Only Correction
//!
//! ```text
//! local:  ──────●──────────────▶   now() = timer + offset
//! remote: ───────────●─────────▶   T=remote
//!                    └─ remote > now()  → offset grows, now() == remote
//!                       remote <= now() → ignored
//! ```
//!
//! The offset only ever grows. A peer can never rewind the shared timeline,
//! which would corrupt in-flight round/turn computations; the slowest clocks
//! are dragged toward the fastest one instead.

mod timer;
mod virtual_clock;

pub use timer::{ManualTimer, SystemTimer, Timer};
pub use virtual_clock::VirtualClock;

/// Milliseconds on a node timeline.
pub type Millis = u64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_over_manual_timer() {
        let timer = ManualTimer::new(100);
        let mut clock = VirtualClock::new(timer.clone());
        assert_eq!(clock.now(), 100);

        assert!(clock.adjust(250));
        timer.advance(50);
        assert_eq!(clock.now(), 300);
    }
}
