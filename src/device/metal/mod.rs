mod pipeline;

use std::mem;

use metal::{
    Buffer, CommandBuffer, CommandQueue, ComputePipelineState, MTLCommandBufferStatus, MTLSize,
};
use objc::rc::autoreleasepool;

use crate::particle::{ParticleField, StateRecord};

use super::{ComputeDevice, DeviceError, FenceStatus};
use pipeline::{compile_library, create_pipeline, new_private_buffer, new_shared_buffer, set_bytes};

const THREADS_PER_GROUP_1D: u64 = 256;

/// Command buffer carrying a readback blit; its status is the fence.
pub struct MetalFence {
    command_buffer: CommandBuffer,
}

pub struct MetalDevice {
    command_queue: CommandQueue,
    advance_pipeline: ComputePipelineState,
    state: [Buffer; 2],
    current: usize,
    staging: Buffer,
    readback_in_flight: bool,
    /// Most recent advance pass still to be checked for a device error.
    last_simulate: Option<CommandBuffer>,
    particle_count: usize,
    slot_count: usize,
}

impl std::fmt::Debug for MetalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetalDevice")
            .field("particle_count", &self.particle_count)
            .field("slot_count", &self.slot_count)
            .field("current", &self.current)
            .field("readback_in_flight", &self.readback_in_flight)
            .field("simulate_pending", &self.last_simulate.is_some())
            .finish()
    }
}

impl MetalDevice {
    pub fn new(field: &ParticleField) -> Result<Self, DeviceError> {
        autoreleasepool(|| {
            let device = metal::Device::system_default()
                .ok_or_else(|| DeviceError::Other("No Metal device found".to_string()))?;
            let command_queue = device.new_command_queue();

            let library = compile_library(&device, include_str!("../../../shaders/rotate.metal"))?;
            let advance_pipeline = create_pipeline(&device, &library, "advance_positions")?;

            let slot_count = field.slot_count();
            let state_bytes = slot_count
                .checked_mul(mem::size_of::<StateRecord>())
                .ok_or_else(|| DeviceError::Other("state buffer size overflow".to_string()))?;

            let upload = new_shared_buffer(&device, state_bytes);
            unsafe {
                std::ptr::copy_nonoverlapping(
                    field.initial_state().as_ptr(),
                    upload.contents() as *mut StateRecord,
                    slot_count,
                );
            }
            let state = [
                new_private_buffer(&device, state_bytes),
                new_private_buffer(&device, state_bytes),
            ];
            let staging = new_shared_buffer(&device, state_bytes);

            // Initial upload is the one place allowed to block.
            let command_buffer = command_queue.new_command_buffer();
            let blit = command_buffer.new_blit_command_encoder();
            blit.copy_from_buffer(&upload, 0, &state[0], 0, state_bytes as u64);
            blit.end_encoding();
            command_buffer.commit();
            command_buffer.wait_until_completed();
            if command_buffer.status() == MTLCommandBufferStatus::Error {
                return Err(DeviceError::Fault { stage: "upload" });
            }

            log::info!(
                "metal device started: {} particles in {} slots",
                field.count(),
                slot_count
            );

            Ok(Self {
                command_queue,
                advance_pipeline,
                state,
                current: 0,
                staging,
                readback_in_flight: false,
                last_simulate: None,
                particle_count: field.count(),
                slot_count,
            })
        })
    }

    /// Surfaces a failed advance pass from an earlier frame. Simulation is
    /// never waited on, so its status is read on the next device call.
    fn check_simulate(&mut self) -> Result<(), DeviceError> {
        let Some(command_buffer) = &self.last_simulate else {
            return Ok(());
        };
        if simulate_finished(command_buffer.status())? {
            self.last_simulate = None;
        }
        Ok(())
    }
}

/// Whether an advance pass is done, or the fault it ended in.
fn simulate_finished(status: MTLCommandBufferStatus) -> Result<bool, DeviceError> {
    match status {
        MTLCommandBufferStatus::Completed => Ok(true),
        MTLCommandBufferStatus::Error => Err(DeviceError::Fault { stage: "simulate" }),
        _ => Ok(false),
    }
}

impl ComputeDevice for MetalDevice {
    type Fence = MetalFence;

    fn name(&self) -> &'static str {
        "metal"
    }

    fn particle_count(&self) -> usize {
        self.particle_count
    }

    fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn simulate(&mut self, delta: f32) -> Result<(), DeviceError> {
        self.check_simulate()?;
        let slot_count = u32::try_from(self.slot_count)
            .map_err(|_| DeviceError::Other("slot count exceeds u32".to_string()))?;
        if slot_count == 0 {
            return Ok(());
        }

        let command_buffer = autoreleasepool(|| {
            let (src, dst) = (&self.state[self.current], &self.state[1 - self.current]);
            let command_buffer = self.command_queue.new_command_buffer();
            let encoder = command_buffer.new_compute_command_encoder();
            encoder.set_compute_pipeline_state(&self.advance_pipeline);
            encoder.set_buffer(0, Some(src), 0);
            encoder.set_buffer(1, Some(dst), 0);
            set_bytes(encoder, 2, &delta);
            set_bytes(encoder, 3, &slot_count);
            let groups = u64::from(slot_count).div_ceil(THREADS_PER_GROUP_1D);
            encoder.dispatch_thread_groups(
                MTLSize::new(groups, 1, 1),
                MTLSize::new(THREADS_PER_GROUP_1D, 1, 1),
            );
            encoder.end_encoding();
            command_buffer.commit();
            command_buffer.to_owned()
        });

        self.last_simulate = Some(command_buffer);
        self.current = 1 - self.current;
        Ok(())
    }

    fn encode_readback(&mut self) -> Result<MetalFence, DeviceError> {
        self.check_simulate()?;
        if self.readback_in_flight {
            return Err("metal staging buffer already has a readback in flight".into());
        }

        let bytes = (self.slot_count * mem::size_of::<StateRecord>()) as u64;
        let command_buffer = autoreleasepool(|| {
            let command_buffer = self.command_queue.new_command_buffer();
            let blit = command_buffer.new_blit_command_encoder();
            blit.copy_from_buffer(&self.state[self.current], 0, &self.staging, 0, bytes);
            blit.end_encoding();
            command_buffer.commit();
            command_buffer.to_owned()
        });

        self.readback_in_flight = true;
        Ok(MetalFence { command_buffer })
    }

    fn fence_status(&self, fence: &MetalFence) -> FenceStatus {
        match fence.command_buffer.status() {
            MTLCommandBufferStatus::Completed => FenceStatus::Signaled,
            MTLCommandBufferStatus::Error => FenceStatus::Failed,
            _ => FenceStatus::Pending,
        }
    }

    fn complete_readback(
        &mut self,
        fence: MetalFence,
        dst: &mut [StateRecord],
    ) -> Result<(), DeviceError> {
        match self.fence_status(&fence) {
            FenceStatus::Signaled => {}
            FenceStatus::Pending => return Err(DeviceError::FenceNotSignaled),
            FenceStatus::Failed => {
                self.readback_in_flight = false;
                return Err(DeviceError::Fault { stage: "readback" });
            }
        }

        self.readback_in_flight = false;
        if dst.len() != self.particle_count {
            return Err(DeviceError::CountMismatch {
                device: self.particle_count,
                host: dst.len(),
            });
        }
        let src = self.staging.contents() as *const StateRecord;
        let staged = unsafe { std::slice::from_raw_parts(src, self.particle_count) };
        dst.copy_from_slice(staged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sync::{wait_for_fence, WaitPolicy};
    use crate::simulation;
    use glam::Vec3;

    fn setup_metal_test() -> bool {
        if metal::Device::system_default().is_none() {
            eprintln!("Skipping Metal test: no system-default Metal device.");
            return false;
        }
        true
    }

    #[test]
    fn simulate_error_status_is_a_fault() {
        assert!(matches!(
            simulate_finished(MTLCommandBufferStatus::Error),
            Err(DeviceError::Fault { stage: "simulate" })
        ));
        assert!(matches!(
            simulate_finished(MTLCommandBufferStatus::Completed),
            Ok(true)
        ));
        for status in [
            MTLCommandBufferStatus::NotEnqueued,
            MTLCommandBufferStatus::Enqueued,
            MTLCommandBufferStatus::Committed,
            MTLCommandBufferStatus::Scheduled,
        ] {
            assert!(matches!(simulate_finished(status), Ok(false)));
        }
    }

    #[test]
    fn metal_readback_matches_cpu_simulation() {
        if !setup_metal_test() {
            return;
        }

        let records = (0..300)
            .map(|i| StateRecord::new(Vec3::new(i as f32, 0.5, -(i as f32) * 0.5), 1.0))
            .collect();
        let field = ParticleField::new(records, vec![[1.0; 4]; 300]).expect("field");
        let mut device = MetalDevice::new(&field).expect("metal device");

        let mut expected = field.initial_state().to_vec();
        let mut scratch = expected.clone();
        for _ in 0..4 {
            device.simulate(3.0).expect("simulate");
            simulation::advance(&expected, &mut scratch, 3.0);
            std::mem::swap(&mut expected, &mut scratch);
        }
        assert!(device.last_simulate.is_some());

        let fence = device.encode_readback().expect("encode");
        wait_for_fence(&device, &fence, "readback", WaitPolicy::default()).expect("signal");
        let mut snapshot = vec![StateRecord::default(); field.count()];
        device.complete_readback(fence, &mut snapshot).expect("transfer");
        // The blit was queued behind the last advance pass, so that pass is done too.
        device.simulate(0.0).expect("simulate after readback");

        for (gpu, cpu) in snapshot.iter().zip(&expected) {
            for axis in 0..3 {
                assert!((gpu.position[axis] - cpu.position[axis]).abs() < 1e-2);
            }
            assert_eq!(gpu.scale, cpu.scale);
        }
    }
}
