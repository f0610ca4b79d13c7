use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::particle::{ParticleField, StateRecord};
use crate::simulation;

use super::{ComputeDevice, DeviceError, FenceStatus};

const FENCE_PENDING: u8 = 0;
const FENCE_SIGNALED: u8 = 1;
const FENCE_FAILED: u8 = 2;

enum Command {
    Simulate {
        delta: f32,
    },
    Readback {
        id: u64,
        signal: Arc<AtomicU8>,
        staging: Vec<StateRecord>,
    },
    Shutdown,
}

struct Staged {
    id: u64,
    staging: Vec<StateRecord>,
}

#[derive(Debug)]
pub struct SoftwareFence {
    id: u64,
    signal: Arc<AtomicU8>,
}

/// CPU stand-in for a compute device. A dedicated queue thread owns both
/// ping-pong state buffers and executes commands in submission order, so the
/// submitting thread observes completion only through fences.
pub struct SoftwareDevice {
    commands: Sender<Command>,
    staged: Receiver<Staged>,
    queue_thread: Option<JoinHandle<()>>,
    spare_staging: Option<Vec<StateRecord>>,
    next_fence_id: u64,
    particle_count: usize,
    slot_count: usize,
    #[cfg(test)]
    fail_next_fence: Arc<AtomicBool>,
}

impl std::fmt::Debug for SoftwareDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareDevice")
            .field("particle_count", &self.particle_count)
            .field("slot_count", &self.slot_count)
            .field("next_fence_id", &self.next_fence_id)
            .finish()
    }
}

impl SoftwareDevice {
    pub fn new(field: &ParticleField) -> Result<Self, DeviceError> {
        Self::spawn(field, QueueTiming::default())
    }

    /// Device whose readback copies take at least `latency` on the queue.
    #[cfg(test)]
    pub fn with_readback_latency(
        field: &ParticleField,
        latency: Duration,
    ) -> Result<Self, DeviceError> {
        Self::spawn(
            field,
            QueueTiming {
                readback_latency: latency,
            },
        )
    }

    fn spawn(field: &ParticleField, timing: QueueTiming) -> Result<Self, DeviceError> {
        let (command_tx, command_rx) = mpsc::channel();
        let (staged_tx, staged_rx) = mpsc::channel();
        let fail_next_fence = Arc::new(AtomicBool::new(false));

        let initial = field.initial_state().to_vec();
        let fault_flag = Arc::clone(&fail_next_fence);
        let queue_thread = std::thread::Builder::new()
            .name("stardust-device".to_string())
            .spawn(move || run_queue(initial, command_rx, staged_tx, fault_flag, timing))?;

        log::info!(
            "software device started: {} particles in {} slots",
            field.count(),
            field.slot_count()
        );

        Ok(Self {
            commands: command_tx,
            staged: staged_rx,
            queue_thread: Some(queue_thread),
            spare_staging: Some(Vec::with_capacity(field.slot_count())),
            next_fence_id: 0,
            particle_count: field.count(),
            slot_count: field.slot_count(),
            #[cfg(test)]
            fail_next_fence,
        })
    }

    /// Makes the next readback fence report failure.
    #[cfg(test)]
    pub fn inject_fence_fault(&self) {
        self.fail_next_fence.store(true, Ordering::SeqCst);
    }

    fn queue_alive(&self) -> bool {
        self.queue_thread
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn submit(&self, command: Command) -> Result<(), DeviceError> {
        self.commands.send(command).map_err(|_| DeviceError::Lost)
    }
}

impl ComputeDevice for SoftwareDevice {
    type Fence = SoftwareFence;

    fn name(&self) -> &'static str {
        "software"
    }

    fn particle_count(&self) -> usize {
        self.particle_count
    }

    fn slot_count(&self) -> usize {
        self.slot_count
    }

    fn simulate(&mut self, delta: f32) -> Result<(), DeviceError> {
        self.submit(Command::Simulate { delta })
    }

    fn encode_readback(&mut self) -> Result<SoftwareFence, DeviceError> {
        let staging = self
            .spare_staging
            .take()
            .unwrap_or_else(|| Vec::with_capacity(self.slot_count));
        let id = self.next_fence_id;
        self.next_fence_id += 1;

        let signal = Arc::new(AtomicU8::new(FENCE_PENDING));
        self.submit(Command::Readback {
            id,
            signal: Arc::clone(&signal),
            staging,
        })?;
        log::trace!("readback {id} submitted");
        Ok(SoftwareFence { id, signal })
    }

    fn fence_status(&self, fence: &SoftwareFence) -> FenceStatus {
        match fence.signal.load(Ordering::Acquire) {
            FENCE_SIGNALED => FenceStatus::Signaled,
            FENCE_FAILED => FenceStatus::Failed,
            _ if !self.queue_alive() => FenceStatus::Failed,
            _ => FenceStatus::Pending,
        }
    }

    fn complete_readback(
        &mut self,
        fence: SoftwareFence,
        dst: &mut [StateRecord],
    ) -> Result<(), DeviceError> {
        if dst.len() != self.particle_count {
            return Err(DeviceError::CountMismatch {
                device: self.particle_count,
                host: dst.len(),
            });
        }
        match self.fence_status(&fence) {
            FenceStatus::Signaled => {}
            FenceStatus::Pending => return Err(DeviceError::FenceNotSignaled),
            FenceStatus::Failed => return Err(DeviceError::Fault { stage: "readback" }),
        }

        // The queue hands staging back before it signals, so a signaled fence
        // always has its buffer waiting here.
        loop {
            match self.staged.try_recv() {
                Ok(staged) if staged.id == fence.id => {
                    dst.copy_from_slice(&staged.staging[..dst.len()]);
                    self.spare_staging = Some(staged.staging);
                    return Ok(());
                }
                Ok(stale) => {
                    log::debug!("dropping staging for abandoned readback {}", stale.id);
                    self.spare_staging = Some(stale.staging);
                }
                Err(TryRecvError::Empty) => {
                    return Err(DeviceError::Other(format!(
                        "readback {} signaled without staged data",
                        fence.id
                    )));
                }
                Err(TryRecvError::Disconnected) => return Err(DeviceError::Lost),
            }
        }
    }

    fn shutdown(&mut self) -> Result<(), DeviceError> {
        let Some(handle) = self.queue_thread.take() else {
            return Ok(());
        };
        let _ = self.commands.send(Command::Shutdown);
        handle
            .join()
            .map_err(|_| DeviceError::Other("device queue thread panicked".to_string()))?;
        log::info!("software device stopped");
        Ok(())
    }
}

impl Drop for SoftwareDevice {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct QueueTiming {
    /// Extra time each readback copy holds the queue. Zero outside tests.
    readback_latency: Duration,
}

fn run_queue(
    mut current: Vec<StateRecord>,
    commands: Receiver<Command>,
    staged: Sender<Staged>,
    fail_next_fence: Arc<AtomicBool>,
    timing: QueueTiming,
) {
    let mut next = vec![StateRecord::default(); current.len()];

    while let Ok(command) = commands.recv() {
        match command {
            Command::Simulate { delta } => {
                simulation::advance(&current, &mut next, delta);
                std::mem::swap(&mut current, &mut next);
            }
            Command::Readback {
                id,
                signal,
                mut staging,
            } => {
                staging.clear();
                staging.extend_from_slice(&current);

                if !timing.readback_latency.is_zero() {
                    std::thread::sleep(timing.readback_latency);
                }

                if fail_next_fence.swap(false, Ordering::SeqCst) {
                    signal.store(FENCE_FAILED, Ordering::Release);
                    continue;
                }
                if staged.send(Staged { id, staging }).is_err() {
                    break;
                }
                signal.store(FENCE_SIGNALED, Ordering::Release);
            }
            Command::Shutdown => break,
        }
    }
}
