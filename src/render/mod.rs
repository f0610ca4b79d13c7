pub mod headless;
pub mod hud;
pub mod terminal;

use crossterm::style::Color;

use crate::camera::Camera;
use crate::particle::StateRecord;
use crate::pipeline::PipelineStats;

pub use headless::HeadlessTarget;
pub use terminal::TerminalTarget;

pub fn rgb_to_ansi256(r: u8, g: u8, b: u8) -> u8 {
    if r == g && g == b {
        if r < 8 {
            return 16;
        }
        if r > 248 {
            return 231;
        }
        return 232 + ((r as f32 - 8.0) / 247.0 * 24.0) as u8;
    }
    let ri = (r as f32 / 255.0 * 5.0 + 0.5) as u8;
    let gi = (g as f32 / 255.0 * 5.0 + 0.5) as u8;
    let bi = (b as f32 / 255.0 * 5.0 + 0.5) as u8;
    16 + 36 * ri + 6 * gi + bi
}

pub fn make_color(r: u8, g: u8, b: u8, use_truecolor: bool) -> Color {
    if use_truecolor {
        Color::Rgb { r, g, b }
    } else {
        Color::AnsiValue(rgb_to_ansi256(r, g, b))
    }
}

pub const HALF_BLOCK: char = '\u{2584}';
pub const FRAME_TARGET: std::time::Duration = std::time::Duration::from_millis(8);

/// Everything a draw call consumes for one frame. `order` may have been
/// sorted against an older snapshot than `positions`.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub order: &'a [u32],
    pub positions: &'a [StateRecord],
    pub colors: &'a [[f32; 4]],
    pub camera: &'a Camera,
    pub stats: &'a PipelineStats,
}

#[derive(Debug)]
pub enum RenderError {
    Io(std::io::Error),
    /// Draw order is not a permutation of the particle ids.
    InvalidOrder { reason: String },
    /// Positions, colors or order disagree on the particle count.
    CountMismatch {
        order: usize,
        positions: usize,
        colors: usize,
    },
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "terminal output failed: {err}"),
            Self::InvalidOrder { reason } => write!(f, "invalid draw order: {reason}"),
            Self::CountMismatch {
                order,
                positions,
                colors,
            } => write!(
                f,
                "frame count mismatch (order={order}, positions={positions}, colors={colors})"
            ),
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// Whatever turns a frame into pixels.
pub trait DrawTarget {
    fn draw(&mut self, frame: &Frame<'_>) -> Result<(), RenderError>;
}

pub(crate) fn check_counts(frame: &Frame<'_>) -> Result<(), RenderError> {
    let n = frame.positions.len();
    if frame.order.len() != n || frame.colors.len() != n {
        return Err(RenderError::CountMismatch {
            order: frame.order.len(),
            positions: n,
            colors: frame.colors.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grayscale_maps_to_gray_ramp() {
        assert_eq!(rgb_to_ansi256(0, 0, 0), 16);
        assert_eq!(rgb_to_ansi256(255, 255, 255), 231);
        let mid = rgb_to_ansi256(128, 128, 128);
        assert!((232..=255).contains(&mid));
    }

    #[test]
    fn truecolor_passes_rgb_through() {
        assert_eq!(make_color(1, 2, 3, true), Color::Rgb { r: 1, g: 2, b: 3 });
        assert!(matches!(make_color(200, 10, 10, false), Color::AnsiValue(_)));
    }
}
