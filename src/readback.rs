use crate::device::sync::{wait_for_fence, WaitPolicy};
use crate::device::{ComputeDevice, DeviceError, FenceStatus};
use crate::particle::StateRecord;

/// Where the perpetual device→host copy currently stands.
#[derive(Debug)]
pub enum ReadbackState<F> {
    /// Nothing in flight; the next tick arms a copy.
    Idle,
    /// Copy and fence submitted, fence not yet signaled.
    Armed { fence: F },
    /// Fence signaled; staged data is complete and waiting for transfer.
    Ready { fence: F },
}

/// Non-blocking readback of the state store into a host snapshot.
///
/// Driven once per frame by the orchestrator. A transfer only ever happens
/// from a signaled fence, so the destination always holds one complete
/// copy from some past simulation step.
#[derive(Debug)]
pub struct ReadbackChannel<F> {
    state: ReadbackState<F>,
    completed: u64,
}

impl<F> Default for ReadbackChannel<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> ReadbackChannel<F> {
    pub fn new() -> Self {
        Self {
            state: ReadbackState::Idle,
            completed: 0,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &ReadbackState<F> {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, ReadbackState::Idle)
    }

    /// Number of snapshots transferred so far; doubles as the generation of
    /// the newest one.
    #[cfg(test)]
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Idle → Armed. No-op in any other state.
    pub fn arm<D>(&mut self, device: &mut D) -> Result<(), DeviceError>
    where
        D: ComputeDevice<Fence = F>,
    {
        if self.is_idle() {
            let fence = device.encode_readback()?;
            self.state = ReadbackState::Armed { fence };
        }
        Ok(())
    }

    /// Zero-timeout fence check. Armed → Ready once the fence signals.
    /// A failed fence drops back to Idle and surfaces a device fault.
    pub fn poll<D>(&mut self, device: &D) -> Result<bool, DeviceError>
    where
        D: ComputeDevice<Fence = F>,
    {
        let status = match &self.state {
            ReadbackState::Armed { fence } => device.fence_status(fence),
            ReadbackState::Ready { .. } => return Ok(true),
            ReadbackState::Idle => return Ok(false),
        };

        match status {
            FenceStatus::Pending => Ok(false),
            FenceStatus::Signaled => {
                if let ReadbackState::Armed { fence } =
                    std::mem::replace(&mut self.state, ReadbackState::Idle)
                {
                    self.state = ReadbackState::Ready { fence };
                }
                Ok(true)
            }
            FenceStatus::Failed => {
                self.state = ReadbackState::Idle;
                Err(DeviceError::Fault { stage: "readback" })
            }
        }
    }

    /// Ready → Idle, copying the staged records into `dst`. Returns the new
    /// snapshot generation, or `None` when nothing was ready.
    pub fn transfer<D>(
        &mut self,
        device: &mut D,
        dst: &mut [StateRecord],
    ) -> Result<Option<u64>, DeviceError>
    where
        D: ComputeDevice<Fence = F>,
    {
        match std::mem::replace(&mut self.state, ReadbackState::Idle) {
            ReadbackState::Ready { fence } => {
                device.complete_readback(fence, dst)?;
                self.completed += 1;
                Ok(Some(self.completed))
            }
            other => {
                self.state = other;
                Ok(None)
            }
        }
    }

    /// One frame's worth of readback work: poll, transfer if the copy landed,
    /// and re-arm immediately so a copy is always in flight.
    pub fn tick<D>(
        &mut self,
        device: &mut D,
        dst: &mut [StateRecord],
    ) -> Result<Option<u64>, DeviceError>
    where
        D: ComputeDevice<Fence = F>,
    {
        let generation = if self.poll(device)? {
            self.transfer(device, dst)?
        } else {
            None
        };
        self.arm(device)?;
        Ok(generation)
    }

    /// Cooperatively waits out an in-flight copy (used on shutdown). Does not
    /// re-arm.
    pub fn drain<D>(
        &mut self,
        device: &mut D,
        dst: &mut [StateRecord],
        policy: WaitPolicy,
    ) -> Result<Option<u64>, DeviceError>
    where
        D: ComputeDevice<Fence = F>,
    {
        if let ReadbackState::Armed { fence } = &self.state {
            if let Err(err) = wait_for_fence(device, fence, "readback_drain", policy) {
                self.state = ReadbackState::Idle;
                return Err(err);
            }
        }
        self.poll(device)?;
        self.transfer(device, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::software::SoftwareDevice;
    use crate::device::testing::ScriptedDevice;
    use crate::particle::ParticleField;
    use glam::Vec3;
    use std::time::Duration;

    #[test]
    fn first_tick_arms_without_transfer() {
        let mut device = ScriptedDevice::new(4);
        let mut channel = ReadbackChannel::new();
        let mut snapshot = vec![StateRecord::default(); 4];

        assert_eq!(channel.tick(&mut device, &mut snapshot).expect("tick"), None);
        assert!(matches!(channel.state(), ReadbackState::Armed { .. }));
        assert!(snapshot.iter().all(|r| *r == StateRecord::default()));
    }

    #[test]
    fn pending_fence_leaves_snapshot_untouched() {
        let mut device = ScriptedDevice::new(4);
        let mut channel = ReadbackChannel::new();
        let mut snapshot = vec![StateRecord::default(); 4];

        channel.arm(&mut device).expect("arm");
        for _ in 0..5 {
            assert_eq!(channel.tick(&mut device, &mut snapshot).expect("tick"), None);
        }
        assert_eq!(channel.completed(), 0);
        assert!(snapshot.iter().all(|r| *r == StateRecord::default()));
    }

    #[test]
    fn signaled_fence_transfers_and_rearms() {
        let mut device = ScriptedDevice::new(4);
        device.script_fence(&[FenceStatus::Pending, FenceStatus::Signaled]);
        let mut channel = ReadbackChannel::new();
        let mut snapshot = vec![StateRecord::default(); 4];

        assert_eq!(channel.tick(&mut device, &mut snapshot).expect("arm"), None);
        assert_eq!(channel.tick(&mut device, &mut snapshot).expect("pending"), None);
        assert_eq!(
            channel.tick(&mut device, &mut snapshot).expect("complete"),
            Some(1)
        );
        assert_eq!(snapshot, device.state());
        assert!(matches!(channel.state(), ReadbackState::Armed { .. }));
    }

    #[test]
    fn failed_fence_surfaces_fault_without_copy() {
        let mut device = ScriptedDevice::new(4);
        device.script_fence(&[FenceStatus::Failed]);
        let mut channel = ReadbackChannel::new();
        let mut snapshot = vec![StateRecord::default(); 4];

        channel.arm(&mut device).expect("arm");
        let err = channel
            .tick(&mut device, &mut snapshot)
            .expect_err("fault must surface");
        assert!(matches!(err, DeviceError::Fault { stage: "readback" }));
        assert!(channel.is_idle());
        assert!(snapshot.iter().all(|r| *r == StateRecord::default()));
    }

    #[test]
    fn software_channel_converges_to_quiescent_state() {
        let records = (0..9)
            .map(|i| StateRecord::new(Vec3::new(i as f32, 1.0, 2.0), 0.5))
            .collect();
        let field = ParticleField::new(records, vec![[1.0; 4]; 9]).expect("field");
        let mut device = SoftwareDevice::new(&field).expect("device");
        let mut channel = ReadbackChannel::new();
        let mut snapshot = vec![StateRecord::default(); field.count()];

        device.simulate(4.0).expect("simulate");
        channel.arm(&mut device).expect("arm");
        let generation = channel
            .drain(&mut device, &mut snapshot, WaitPolicy::with_timeout(Duration::from_secs(2)))
            .expect("drain");
        assert_eq!(generation, Some(1));

        let mut expected = vec![StateRecord::default(); field.slot_count()];
        crate::simulation::advance(field.initial_state(), &mut expected, 4.0);
        assert_eq!(snapshot, expected[..field.count()]);
    }
}
