mod error;
#[cfg(feature = "metal")]
pub mod metal;
pub mod software;
pub mod sync;
#[cfg(test)]
pub mod testing;

use crate::particle::StateRecord;

pub use error::DeviceError;

/// Zero-timeout fence query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Pending,
    Signaled,
    Failed,
}

/// A compute device that owns the state store.
///
/// Submission calls enqueue work and return immediately; completion is only
/// ever observed through fences. The render thread is the sole caller.
pub trait ComputeDevice {
    type Fence;

    fn name(&self) -> &'static str;

    /// Live particles (N).
    fn particle_count(&self) -> usize;

    /// Square-packed slots in the state store (N').
    fn slot_count(&self) -> usize;

    /// Enqueues one ping-pong simulation pass with a frame-normalized delta.
    fn simulate(&mut self, delta: f32) -> Result<(), DeviceError>;

    /// Enqueues a copy of the current state store into device-owned staging,
    /// followed by a fence, and flushes the queue.
    fn encode_readback(&mut self) -> Result<Self::Fence, DeviceError>;

    fn fence_status(&self, fence: &Self::Fence) -> FenceStatus;

    /// Transfers the staged copy (first N records) into `dst` and releases the
    /// fence. Fails with `FenceNotSignaled` rather than copying early, and
    /// with `CountMismatch` unless `dst` holds exactly N records.
    fn complete_readback(
        &mut self,
        fence: Self::Fence,
        dst: &mut [StateRecord],
    ) -> Result<(), DeviceError>;

    fn shutdown(&mut self) -> Result<(), DeviceError> {
        Ok(())
    }
}
