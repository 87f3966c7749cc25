//! Animation programs: turn a frame into pixels.

use crate::Frame;

/// One RGBW pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rgbw {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub w: u8,
}

impl Rgbw {
    pub const OFF: Self = Self::new(0, 0, 0, 0);
    pub const WHITE: Self = Self::new(0, 0, 0, 255);
    pub const GREEN: Self = Self::new(0, 255, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, w: u8) -> Self {
        Self { r, g, b, w }
    }

    /// Scale every component by `level` in `[0, 1]`.
    pub fn scaled(self, level: f32) -> Self {
        let level = level.clamp(0.0, 1.0);
        let scale = |c: u8| (c as f32 * level).round() as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b), scale(self.w))
    }
}

/// Pixels of one rendered frame, strip order.
pub type PixelBuffer = Vec<Rgbw>;

/// Something that can draw the choreography.
///
/// Programs are plain data plus a render function; the scheduler decides
/// which one runs and hands it the frame.
pub trait Program: Send {
    /// Called when the program becomes active.
    fn init(&mut self) {}

    /// Draw `frame`.
    fn render(&mut self, frame: &Frame) -> PixelBuffer;
}

/// Lights the strip white on our turn and green otherwise.
#[derive(Debug, Clone)]
pub struct TurnIndicator {
    len: usize,
}

impl TurnIndicator {
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl Program for TurnIndicator {
    fn render(&mut self, frame: &Frame) -> PixelBuffer {
        let color = if frame.is_my_turn() {
            Rgbw::WHITE
        } else {
            Rgbw::GREEN
        };
        vec![color; self.len]
    }
}

/// Slow sine breathing over each slot, dark outside our turn.
#[derive(Debug, Clone)]
pub struct Breath {
    color: Rgbw,
    len: usize,
}

impl Breath {
    pub fn new(color: Rgbw, len: usize) -> Self {
        Self { color, len }
    }

    /// Brightness for `progress` through the slot: 0 at both ends, 1 midway.
    fn level(progress: f32) -> f32 {
        (progress * std::f32::consts::PI).sin()
    }
}

impl Program for Breath {
    fn render(&mut self, frame: &Frame) -> PixelBuffer {
        if !frame.is_my_turn() {
            return vec![Rgbw::OFF; self.len];
        }
        let color = self.color.scaled(Self::level(frame.progress()));
        vec![color; self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(turn: usize, position: usize, local_time: u64) -> Frame {
        Frame {
            macro_index: 0,
            duration: 1000,
            local_time,
            round: 0,
            turn,
            position,
            peer_count: 3,
            isolated: false,
        }
    }

    #[test]
    fn turn_indicator_colors() {
        let mut program = TurnIndicator::new(4);
        assert_eq!(program.render(&frame(1, 1, 0)), vec![Rgbw::WHITE; 4]);
        assert_eq!(program.render(&frame(2, 1, 0)), vec![Rgbw::GREEN; 4]);
    }

    #[test]
    fn breath_peaks_mid_slot() {
        let mut program = Breath::new(Rgbw::new(200, 0, 100, 0), 2);
        assert_eq!(program.render(&frame(0, 0, 0))[0], Rgbw::OFF);
        assert_eq!(program.render(&frame(0, 0, 500))[0], Rgbw::new(200, 0, 100, 0));

        let quarter = program.render(&frame(0, 0, 250))[0];
        assert!(quarter.r > 100 && quarter.r < 200);
    }

    #[test]
    fn breath_dark_off_turn() {
        let mut program = Breath::new(Rgbw::WHITE, 3);
        assert_eq!(program.render(&frame(1, 0, 500)), vec![Rgbw::OFF; 3]);
    }

    #[test]
    fn scaled_clamps() {
        assert_eq!(Rgbw::WHITE.scaled(2.0), Rgbw::WHITE);
        assert_eq!(Rgbw::WHITE.scaled(-1.0), Rgbw::OFF);
    }
}
