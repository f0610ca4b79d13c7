use std::time::Duration;

use rayon::prelude::*;

use crate::particle::StateRecord;

/// Frame duration the rotation rate is tuned against (one 60 Hz frame).
pub const REFERENCE_FRAME_SECONDS: f32 = 0.016666;
/// Radians of rotation about +Y per reference frame.
pub const ROTATION_PER_FRAME: f32 = 0.001;

/// Converts wall-clock frame time into reference-frame units.
pub fn normalize_delta(delta: Duration) -> f32 {
    delta.as_secs_f32() / REFERENCE_FRAME_SECONDS
}

/// Precomputed rotation for one simulation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpinStep {
    pub cos: f32,
    pub sin: f32,
}

impl SpinStep {
    pub fn from_delta(delta: f32) -> Self {
        let theta = ROTATION_PER_FRAME * delta;
        Self {
            cos: theta.cos(),
            sin: theta.sin(),
        }
    }

    /// Rigid rotation of the horizontal plane. Height and scale pass through.
    #[inline]
    pub fn apply(&self, record: &StateRecord) -> StateRecord {
        let [x, y, z] = record.position;
        StateRecord {
            position: [self.cos * x + self.sin * z, y, -self.sin * x + self.cos * z],
            scale: record.scale,
        }
    }
}

/// One simulation pass: reads `src`, writes `dst`. Slices must be the same
/// length; the caller swaps the buffers afterwards.
pub fn advance(src: &[StateRecord], dst: &mut [StateRecord], delta: f32) {
    debug_assert_eq!(src.len(), dst.len());
    let step = SpinStep::from_delta(delta);
    dst.par_iter_mut()
        .zip(src.par_iter())
        .for_each(|(out, input)| *out = step.apply(input));
}
