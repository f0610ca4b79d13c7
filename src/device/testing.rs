use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::particle::StateRecord;
use crate::simulation;

use super::{ComputeDevice, DeviceError, FenceStatus};

/// Synchronous device whose fence answers follow a script. Once the script
/// runs down to its last entry that entry repeats; an empty script is
/// `Pending` forever.
pub struct ScriptedDevice {
    state: Vec<StateRecord>,
    scratch: Vec<StateRecord>,
    script: RefCell<VecDeque<FenceStatus>>,
    polls: Cell<usize>,
    next_fence: Cell<u64>,
    pub simulate_calls: usize,
    pub fail_simulate: bool,
}

impl ScriptedDevice {
    pub fn new(count: usize) -> Self {
        let state = (0..count)
            .map(|i| StateRecord {
                position: [i as f32, 0.0, 0.0],
                scale: 1.0,
            })
            .collect::<Vec<_>>();
        Self {
            scratch: vec![StateRecord::default(); count],
            state,
            script: RefCell::new(VecDeque::new()),
            polls: Cell::new(0),
            next_fence: Cell::new(0),
            simulate_calls: 0,
            fail_simulate: false,
        }
    }

    pub fn script_fence(&self, statuses: &[FenceStatus]) {
        let mut script = self.script.borrow_mut();
        script.clear();
        script.extend(statuses.iter().copied());
    }

    pub fn next_fence_id(&self) -> u64 {
        let id = self.next_fence.get();
        self.next_fence.set(id + 1);
        id
    }

    pub fn polls(&self) -> usize {
        self.polls.get()
    }

    pub fn state(&self) -> &[StateRecord] {
        &self.state
    }
}

impl ComputeDevice for ScriptedDevice {
    type Fence = u64;

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn particle_count(&self) -> usize {
        self.state.len()
    }

    fn slot_count(&self) -> usize {
        self.state.len()
    }

    fn simulate(&mut self, delta: f32) -> Result<(), DeviceError> {
        if self.fail_simulate {
            return Err(DeviceError::Fault { stage: "simulate" });
        }
        simulation::advance(&self.state, &mut self.scratch, delta);
        std::mem::swap(&mut self.state, &mut self.scratch);
        self.simulate_calls += 1;
        Ok(())
    }

    fn encode_readback(&mut self) -> Result<u64, DeviceError> {
        Ok(self.next_fence_id())
    }

    fn fence_status(&self, _fence: &u64) -> FenceStatus {
        self.polls.set(self.polls.get() + 1);
        let mut script = self.script.borrow_mut();
        match script.len() {
            0 => FenceStatus::Pending,
            1 => script[0],
            _ => script.pop_front().unwrap_or(FenceStatus::Pending),
        }
    }

    fn complete_readback(
        &mut self,
        fence: u64,
        dst: &mut [StateRecord],
    ) -> Result<(), DeviceError> {
        if dst.len() != self.state.len() {
            return Err(DeviceError::CountMismatch {
                device: self.state.len(),
                host: dst.len(),
            });
        }
        if self.fence_status(&fence) != FenceStatus::Signaled {
            return Err(DeviceError::FenceNotSignaled);
        }
        dst.copy_from_slice(&self.state);
        Ok(())
    }
}
