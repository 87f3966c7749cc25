//! Ordered, bounded list of selectable macros.

use nimbus_clock::Millis;

use crate::{Error, Result, MACRO_MAX};

/// Index of a registered macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacroHandle(pub usize);

/// A registered animation macro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    program: String,
    duration: Millis,
    repeat: u32,
}

impl Macro {
    /// Name of the program the render sink plays for this macro.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Length of one turn slot in milliseconds (never zero).
    pub const fn duration(&self) -> Millis {
        self.duration
    }

    /// Rounds played per pass in loop mode (never zero).
    pub const fn repeat(&self) -> u32 {
        self.repeat
    }

    /// Length of this macro's loop segment for `peer_count` participants.
    pub const fn weighted_duration(&self, peer_count: usize) -> Millis {
        self.duration * peer_count as Millis * self.repeat as Millis
    }
}

/// Macros in registration order. Filled at startup, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct MacroRegistry {
    macros: Vec<Macro>,
}

impl MacroRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a macro.
    ///
    /// Zero durations and repeat counts are rejected: they would make the
    /// round-robin arithmetic divide by zero.
    pub fn register(
        &mut self,
        program: impl Into<String>,
        duration: Millis,
        repeat: u32,
    ) -> Result<MacroHandle> {
        let program = program.into();
        if duration == 0 {
            return Err(Error::ZeroDuration { program });
        }
        if repeat == 0 {
            return Err(Error::ZeroRepeat { program });
        }
        if self.macros.len() >= MACRO_MAX {
            return Err(Error::RegistryFull { capacity: MACRO_MAX });
        }

        self.macros.push(Macro {
            program,
            duration,
            repeat,
        });
        Ok(MacroHandle(self.macros.len() - 1))
    }

    /// Macro at `index`.
    pub fn get(&self, index: usize) -> Option<&Macro> {
        self.macros.get(index)
    }

    /// Number of registered macros.
    pub fn count(&self) -> usize {
        self.macros.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    /// Macros in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Macro> {
        self.macros.iter()
    }

    /// Index following `index`, wrapping around.
    pub fn next_index(&self, index: usize) -> usize {
        if self.macros.is_empty() {
            0
        } else {
            (index + 1) % self.macros.len()
        }
    }

    /// Length of the loop timeline: Σ duration × `peer_count` × repeat.
    pub fn total_weighted_duration(&self, peer_count: usize) -> Millis {
        self.macros
            .iter()
            .map(|m| m.weighted_duration(peer_count))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_in_order() {
        let mut reg = MacroRegistry::new();
        assert_eq!(reg.register("wind", 2000, 1), Ok(MacroHandle(0)));
        assert_eq!(reg.register("crawler", 1500, 5), Ok(MacroHandle(1)));
        assert_eq!(reg.count(), 2);
        assert_eq!(reg.get(1).map(Macro::program), Some("crawler"));
        assert!(reg.get(2).is_none());
    }

    #[test]
    fn zero_duration_rejected() {
        let mut reg = MacroRegistry::new();
        assert_eq!(
            reg.register("broken", 0, 1),
            Err(Error::ZeroDuration { program: "broken".into() })
        );
        assert_eq!(
            reg.register("broken", 10, 0),
            Err(Error::ZeroRepeat { program: "broken".into() })
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn capacity_enforced() {
        let mut reg = MacroRegistry::new();
        for i in 0..MACRO_MAX {
            reg.register(format!("m{i}"), 100, 1).unwrap();
        }
        assert_eq!(
            reg.register("extra", 100, 1),
            Err(Error::RegistryFull { capacity: MACRO_MAX })
        );
    }

    #[test]
    fn weighted_total() {
        let mut reg = MacroRegistry::new();
        reg.register("a", 2000, 1).unwrap();
        reg.register("b", 1500, 5).unwrap();
        // 2000*3*1 + 1500*3*5
        assert_eq!(reg.total_weighted_duration(3), 6_000 + 22_500);
        assert_eq!(reg.total_weighted_duration(1), 2_000 + 7_500);
    }

    #[test]
    fn next_index_wraps() {
        let mut reg = MacroRegistry::new();
        assert_eq!(reg.next_index(0), 0);
        reg.register("a", 1, 1).unwrap();
        reg.register("b", 1, 1).unwrap();
        assert_eq!(reg.next_index(0), 1);
        assert_eq!(reg.next_index(1), 0);
    }
}
