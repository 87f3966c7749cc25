//! Render sinks: where frames go.

use nimbus_schedule::{Breath, Frame, MacroRegistry, PixelBuffer, Program, Rgbw, TurnIndicator};
use tracing::{debug, trace};

/// Consumer of the choreography.
pub trait RenderSink: Send {
    /// Macro `index` became active.
    fn start(&mut self, _index: usize) {}

    /// Macro `index` stopped.
    fn stop(&mut self, _index: usize) {}

    /// Draw one tick.
    fn render(&mut self, frame: &Frame);
}

/// Headless sink: logs turn changes and keeps the last frame.
#[derive(Debug, Default)]
pub struct TracingSink {
    last: Option<Frame>,
    frames: u64,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent frame.
    pub const fn last_frame(&self) -> Option<&Frame> {
        self.last.as_ref()
    }

    /// Frames rendered so far.
    pub const fn frames(&self) -> u64 {
        self.frames
    }
}

impl RenderSink for TracingSink {
    fn start(&mut self, index: usize) {
        debug!(index, "Macro started");
    }

    fn stop(&mut self, index: usize) {
        debug!(index, "Macro stopped");
        self.last = None;
    }

    fn render(&mut self, frame: &Frame) {
        let turn_changed = self
            .last
            .map_or(true, |last| last.turn != frame.turn || last.round != frame.round);
        if turn_changed {
            trace!(
                macro_index = frame.macro_index,
                round = frame.round,
                turn = frame.turn,
                position = frame.position,
                peers = frame.peer_count,
                mine = frame.is_my_turn(),
                "Turn"
            );
        }
        self.last = Some(*frame);
        self.frames += 1;
    }
}

/// Runs one [`Program`] per registered macro and keeps the pixels.
pub struct ProgramSink {
    programs: Vec<Box<dyn Program>>,
    pixels: PixelBuffer,
}

impl ProgramSink {
    pub fn new(programs: Vec<Box<dyn Program>>) -> Self {
        Self {
            programs,
            pixels: PixelBuffer::new(),
        }
    }

    /// Built-in programs for `registry`: `breath` macros breathe, every
    /// other macro shows the turn indicator.
    pub fn for_registry(registry: &MacroRegistry, len: usize) -> Self {
        let programs = registry
            .iter()
            .map(|m| -> Box<dyn Program> {
                match m.program() {
                    "breath" => Box::new(Breath::new(Rgbw::new(0, 0, 255, 40), len)),
                    _ => Box::new(TurnIndicator::new(len)),
                }
            })
            .collect();
        Self::new(programs)
    }

    /// Pixels of the last rendered frame.
    pub fn pixels(&self) -> &[Rgbw] {
        &self.pixels
    }
}

impl RenderSink for ProgramSink {
    fn start(&mut self, index: usize) {
        if let Some(program) = self.programs.get_mut(index) {
            program.init();
        }
    }

    fn stop(&mut self, _index: usize) {
        self.pixels.fill(Rgbw::OFF);
    }

    fn render(&mut self, frame: &Frame) {
        if let Some(program) = self.programs.get_mut(frame.macro_index) {
            self.pixels = program.render(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(macro_index: usize, turn: usize) -> Frame {
        Frame {
            macro_index,
            duration: 1_000,
            local_time: 500,
            round: 0,
            turn,
            position: 0,
            peer_count: 2,
            isolated: false,
        }
    }

    #[test]
    fn tracing_sink_remembers() {
        let mut sink = TracingSink::new();
        sink.render(&frame(0, 1));
        sink.render(&frame(0, 0));
        assert_eq!(sink.frames(), 2);
        assert_eq!(sink.last_frame().map(|f| f.turn), Some(0));
        sink.stop(0);
        assert!(sink.last_frame().is_none());
    }

    #[test]
    fn program_sink_dispatches_by_macro() {
        let mut registry = MacroRegistry::new();
        registry.register("wind", 1_000, 1).unwrap();
        registry.register("breath", 1_000, 1).unwrap();
        let mut sink = ProgramSink::for_registry(&registry, 3);

        sink.render(&frame(0, 0));
        assert_eq!(sink.pixels(), &[Rgbw::WHITE; 3]);

        sink.render(&frame(1, 0));
        assert_eq!(sink.pixels(), &[Rgbw::new(0, 0, 255, 40); 3]);

        sink.stop(1);
        assert_eq!(sink.pixels(), &[Rgbw::OFF; 3]);
    }
}
