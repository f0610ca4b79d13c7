use std::time::Duration;

use glam::Vec3;

use crate::arena::{ArenaError, BufferArena, Lease};
use crate::camera::Camera;
use crate::device::sync::WaitPolicy;
use crate::device::{ComputeDevice, DeviceError};
use crate::particle::{ParticleField, StateRecord};
use crate::readback::ReadbackChannel;
use crate::render::Frame;
use crate::simulation::normalize_delta;
use crate::sort::worker::DispatchError;
use crate::sort::{SortBuffers, SortJob, SortResponse, SortWorker, WorkerPoll};


/// One buffer set is bound for drawing while the other is with the worker.
const SORT_SLOTS: usize = 2;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Worker restarts allowed before sorting is abandoned for the session.
    pub max_worker_restarts: u32,
    /// Bound on the cooperative readback drain at shutdown.
    pub readback_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_worker_restarts: 3,
            readback_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
pub enum PipelineError {
    /// Unrecoverable compute device failure. The pipeline halts.
    Device(DeviceError),
    /// Buffer bookkeeping went wrong; a lease came back to the wrong slot.
    Arena(ArenaError),
    /// `tick` called after a device fault.
    Halted,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device(err) => write!(f, "device fault: {err}"),
            Self::Arena(err) => write!(f, "sort buffer arena: {err}"),
            Self::Halted => f.write_str("pipeline halted after a device fault"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Device(err) => Some(err),
            Self::Arena(err) => Some(err),
            Self::Halted => None,
        }
    }
}

impl From<DeviceError> for PipelineError {
    fn from(err: DeviceError) -> Self {
        Self::Device(err)
    }
}

impl From<ArenaError> for PipelineError {
    fn from(err: ArenaError) -> Self {
        Self::Arena(err)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    pub particles: usize,
    pub frames: u64,
    pub readbacks_completed: u64,
    pub sorts_dispatched: u64,
    pub sorts_completed: u64,
    pub sorts_rejected: u64,
    pub worker_restarts: u32,
    /// Snapshot generation the bound draw order was sorted from.
    pub order_generation: u64,
    /// Generation of the newest host snapshot.
    pub snapshot_generation: u64,
    pub last_sort_time: Duration,
    pub degraded: bool,
}

impl PipelineStats {
    /// How many snapshots the drawn order trails the newest one by.
    pub fn lag(&self) -> u64 {
        self.snapshot_generation.saturating_sub(self.order_generation)
    }
}

/// What changed during one `tick`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub snapshot_advanced: bool,
    pub order_advanced: bool,
    pub dispatched: bool,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    slot: usize,
    generation: u64,
}

type WorkerFactory = Box<dyn FnMut(usize) -> std::io::Result<SortWorker>>;

/// Per-frame orchestrator: simulation, readback, sort dispatch and order
/// binding. Every call returns without waiting on the device or the worker.
pub struct FramePipeline<D: ComputeDevice> {
    device: D,
    readback: ReadbackChannel<D::Fence>,
    /// Host snapshot written by readback; drawn from and copied into sort
    /// requests.
    display: Vec<StateRecord>,
    colors: Vec<[f32; 4]>,
    arena: BufferArena<SortBuffers>,
    bound: Option<Lease<SortBuffers>>,
    identity: Vec<u32>,
    worker: Option<SortWorker>,
    spawn_worker: WorkerFactory,
    in_flight: Option<InFlight>,
    last_dispatched: u64,
    halted: bool,
    warned_camera: bool,
    config: PipelineConfig,
    stats: PipelineStats,
}

impl<D: ComputeDevice> std::fmt::Debug for FramePipeline<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePipeline")
            .field("device", &self.device.name())
            .field("stats", &self.stats)
            .field("in_flight", &self.in_flight)
            .field("halted", &self.halted)
            .finish()
    }
}

impl<D: ComputeDevice> FramePipeline<D> {
    pub fn new(
        device: D,
        field: &ParticleField,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        Self::with_worker_factory(device, field, config, Box::new(SortWorker::spawn))
    }

    /// Like [`new`](Self::new) but with a custom way to (re)start the sort
    /// worker. Fails if the device was built for a different field.
    pub fn with_worker_factory(
        device: D,
        field: &ParticleField,
        config: PipelineConfig,
        mut spawn_worker: WorkerFactory,
    ) -> Result<Self, PipelineError> {
        let count = field.count();
        if device.particle_count() != count || device.slot_count() < count {
            return Err(PipelineError::Device(DeviceError::CountMismatch {
                device: device.particle_count(),
                host: count,
            }));
        }

        let worker = match spawn_worker(count) {
            Ok(worker) => Some(worker),
            Err(err) => {
                log::warn!("sort worker failed to start: {err}");
                None
            }
        };

        log::info!(
            "pipeline ready: {count} particles on {} device, max {} worker restarts",
            device.name(),
            config.max_worker_restarts
        );

        Ok(Self {
            device,
            readback: ReadbackChannel::new(),
            display: field.initial_state()[..count].to_vec(),
            colors: field.colors().to_vec(),
            arena: BufferArena::new((0..SORT_SLOTS).map(|_| SortBuffers::with_count(count))),
            bound: None,
            identity: field.identity_order(),
            worker,
            spawn_worker,
            in_flight: None,
            last_dispatched: 0,
            halted: false,
            warned_camera: false,
            config,
            stats: PipelineStats {
                particles: count,
                ..PipelineStats::default()
            },
        })
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// The most recently completed draw order, or the identity order before
    /// the first sort lands.
    pub fn order(&self) -> &[u32] {
        match &self.bound {
            Some(lease) => &lease.buffer.ids,
            None => &self.identity,
        }
    }

    #[cfg(test)]
    pub fn positions(&self) -> &[StateRecord] {
        &self.display
    }

    pub fn frame<'a>(&'a self, camera: &'a Camera) -> Frame<'a> {
        Frame {
            order: self.order(),
            positions: &self.display,
            colors: &self.colors,
            camera,
            stats: &self.stats,
        }
    }

    pub fn tick(
        &mut self,
        delta: Duration,
        camera_position: Vec3,
    ) -> Result<FrameReport, PipelineError> {
        if self.halted {
            return Err(PipelineError::Halted);
        }
        let mut report = FrameReport::default();

        if let Err(err) = self.advance_device(delta, &mut report) {
            self.halted = true;
            log::error!("halting pipeline: {err}");
            return Err(PipelineError::Device(err));
        }
        self.service_sort(camera_position, &mut report)?;

        self.stats.frames += 1;
        Ok(report)
    }

    fn advance_device(
        &mut self,
        delta: Duration,
        report: &mut FrameReport,
    ) -> Result<(), DeviceError> {
        self.device.simulate(normalize_delta(delta))?;
        if let Some(generation) = self.readback.tick(&mut self.device, &mut self.display)? {
            self.stats.snapshot_generation = generation;
            self.stats.readbacks_completed += 1;
            report.snapshot_advanced = true;
        }
        Ok(())
    }

    fn service_sort(
        &mut self,
        camera: Vec3,
        report: &mut FrameReport,
    ) -> Result<(), PipelineError> {
        if self.stats.degraded {
            return Ok(());
        }

        let poll = match self.worker.as_mut() {
            Some(worker) => worker.try_collect(),
            None => WorkerPoll::Disconnected,
        };
        match poll {
            WorkerPoll::Done(response) => {
                self.in_flight = None;
                report.order_advanced = self.accept(response)?;
            }
            WorkerPoll::Busy => return Ok(()),
            WorkerPoll::Idle => {}
            WorkerPoll::Disconnected => {
                self.recover_worker()?;
                if self.worker.is_none() {
                    return Ok(());
                }
            }
        }

        report.dispatched = self.dispatch(camera)?;
        Ok(())
    }

    /// Binds a finished order or returns a rejected request's buffers.
    fn accept(&mut self, response: SortResponse) -> Result<bool, PipelineError> {
        match response {
            SortResponse::Sorted {
                generation,
                lease,
                elapsed,
            } => {
                if let Some(previous) = self.bound.replace(lease) {
                    self.arena.checkin(previous)?;
                }
                self.stats.order_generation = generation;
                self.stats.sorts_completed += 1;
                self.stats.last_sort_time = elapsed;
                log::trace!("bound order for snapshot {generation} ({elapsed:?})");
                Ok(true)
            }
            SortResponse::Rejected {
                generation,
                lease,
                reason,
            } => {
                log::warn!("sort request for snapshot {generation} rejected: {reason}");
                self.stats.sorts_rejected += 1;
                self.arena.checkin(lease)?;
                Ok(false)
            }
        }
    }

    fn dispatch(&mut self, camera: Vec3) -> Result<bool, PipelineError> {
        let Some(worker) = self.worker.as_mut() else {
            return Ok(false);
        };
        let generation = self.stats.snapshot_generation;
        if worker.is_busy() || generation == 0 || generation <= self.last_dispatched {
            return Ok(false);
        }
        if !camera.is_finite() {
            if !self.warned_camera {
                log::warn!("camera position {camera} is not finite; keeping previous order");
                self.warned_camera = true;
            }
            return Ok(false);
        }
        self.warned_camera = false;

        let Some(mut lease) = self.arena.checkout() else {
            log::debug!("no free sort buffers; skipping dispatch");
            return Ok(false);
        };
        lease.buffer.positions.copy_from_slice(&self.display);
        let flight = InFlight {
            slot: lease.slot(),
            generation,
        };
        let job = SortJob {
            generation,
            lease,
            camera,
            count: self.display.len(),
        };

        match worker.dispatch(job) {
            Ok(()) => {
                self.in_flight = Some(flight);
                self.last_dispatched = generation;
                self.stats.sorts_dispatched += 1;
                log::trace!("dispatched sort for snapshot {generation}");
                Ok(true)
            }
            Err(DispatchError::Busy(job)) => {
                self.arena.checkin(job.lease)?;
                Ok(false)
            }
            Err(DispatchError::Disconnected(job)) => {
                if let Some(job) = job {
                    self.arena.checkin(job.lease)?;
                }
                self.recover_worker()?;
                Ok(false)
            }
        }
    }

    /// Replaces a dead worker, or degrades once the restart budget is spent.
    fn recover_worker(&mut self) -> Result<(), PipelineError> {
        if self.worker.take().is_some() {
            log::warn!("sort worker became unavailable");
        }
        let count = self.display.len();
        if let Some(flight) = self.in_flight.take() {
            log::debug!(
                "sort buffers for snapshot {} lost with the worker",
                flight.generation
            );
            self.arena.forfeit(flight.slot)?;
            self.arena.replace_lost(|| SortBuffers::with_count(count));
        }

        if self.stats.worker_restarts >= self.config.max_worker_restarts {
            self.stats.degraded = true;
            log::warn!(
                "sort worker restart budget ({}) exhausted; drawing the last bound order from now on",
                self.config.max_worker_restarts
            );
            return Ok(());
        }

        self.stats.worker_restarts += 1;
        match (self.spawn_worker)(count) {
            Ok(worker) => {
                log::warn!(
                    "restarted sort worker (attempt {}/{})",
                    self.stats.worker_restarts,
                    self.config.max_worker_restarts
                );
                self.worker = Some(worker);
                // Re-sort the newest snapshot we hold.
                self.last_dispatched = 0;
            }
            Err(err) => log::warn!("sort worker restart failed: {err}"),
        }
        Ok(())
    }

    /// Stops the worker, drains any armed readback and shuts the device down.
    pub fn shutdown(&mut self) -> Result<(), PipelineError> {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
        self.in_flight = None;

        if !self.halted {
            let policy = WaitPolicy::with_timeout(self.config.readback_timeout);
            match self.readback.drain(&mut self.device, &mut self.display, policy) {
                Ok(Some(generation)) => {
                    self.stats.snapshot_generation = generation;
                    self.stats.readbacks_completed += 1;
                }
                Ok(None) => {}
                Err(err) if err.is_device_fault() => {
                    log::warn!("readback drain at shutdown failed: {err}")
                }
                Err(err) => log::debug!("readback drain skipped: {err}"),
            }
        }

        self.device.shutdown()?;
        log::info!(
            "pipeline stopped after {} frames ({} readbacks, {} sorts)",
            self.stats.frames,
            self.stats.readbacks_completed,
            self.stats.sorts_completed
        );
        Ok(())
    }
}
