use std::sync::mpsc::{self, Receiver, SendError, Sender, TryRecvError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use glam::Vec3;

use crate::arena::Lease;
use crate::particle::StateRecord;

use super::radix::RadixSorter;
use super::SortError;

/// Buffers that travel to the worker and back with every request. `ids` is
/// overwritten in place with the finished order.
#[derive(Debug, Clone, Default)]
pub struct SortBuffers {
    pub ids: Vec<u32>,
    pub positions: Vec<StateRecord>,
}

impl SortBuffers {
    pub fn with_count(count: usize) -> Self {
        Self {
            ids: vec![0; count],
            positions: vec![StateRecord::default(); count],
        }
    }
}

#[derive(Debug)]
pub struct SortJob {
    /// Generation of the host snapshot copied into `lease`.
    pub generation: u64,
    pub lease: Lease<SortBuffers>,
    pub camera: Vec3,
    pub count: usize,
}

#[derive(Debug)]
pub enum SortRequest {
    Sort(SortJob),
    Shutdown,
}

impl SortRequest {
    pub fn into_job(self) -> Option<SortJob> {
        match self {
            Self::Sort(job) => Some(job),
            Self::Shutdown => None,
        }
    }
}

#[derive(Debug)]
pub enum SortResponse {
    Sorted {
        generation: u64,
        lease: Lease<SortBuffers>,
        elapsed: Duration,
    },
    Rejected {
        generation: u64,
        lease: Lease<SortBuffers>,
        reason: SortError,
    },
}

/// The sorting backend a worker runs.
pub trait DepthSort: Send + 'static {
    fn sort_back_to_front(&mut self, ids: &mut [u32], positions: &[StateRecord], camera: Vec3);
}

impl DepthSort for RadixSorter {
    fn sort_back_to_front(&mut self, ids: &mut [u32], positions: &[StateRecord], camera: Vec3) {
        RadixSorter::sort_back_to_front(self, ids, positions, camera);
    }
}

/// Checks a request before the worker touches any of its buffers.
pub fn validate(job: &SortJob) -> Result<(), SortError> {
    let buffers = &job.lease.buffer;
    if buffers.ids.len() != job.count || buffers.positions.len() != job.count {
        return Err(SortError::LengthMismatch {
            count: job.count,
            ids: buffers.ids.len(),
            positions: buffers.positions.len(),
        });
    }
    if !job.camera.is_finite() {
        return Err(SortError::NonFiniteCamera(job.camera.to_array()));
    }
    Ok(())
}

#[derive(Debug)]
pub enum WorkerPoll {
    /// Nothing dispatched.
    Idle,
    /// A request is in flight and has not been answered yet.
    Busy,
    Done(SortResponse),
    /// The worker thread is gone; any in-flight buffers went with it.
    Disconnected,
}

#[derive(Debug)]
pub enum DispatchError {
    Busy(Box<SortJob>),
    /// Carries the job back when the channel returned it.
    Disconnected(Option<Box<SortJob>>),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Busy(job) => write!(
                f,
                "sort worker busy; request for generation {} not sent",
                job.generation
            ),
            Self::Disconnected(_) => f.write_str("sort worker disconnected"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Handle to the sort worker thread. At most one request is in flight: the
/// handle refuses to dispatch again until the previous response is
/// collected.
#[derive(Debug)]
pub struct SortWorker {
    requests: Sender<SortRequest>,
    responses: Receiver<SortResponse>,
    handle: Option<JoinHandle<()>>,
    busy: bool,
}

impl SortWorker {
    /// Spawns a worker running the radix sorter, presized for `count`.
    pub fn spawn(count: usize) -> std::io::Result<Self> {
        Self::spawn_with(RadixSorter::with_capacity(count))
    }

    pub fn spawn_with<S: DepthSort>(sorter: S) -> std::io::Result<Self> {
        let (request_tx, request_rx) = mpsc::channel();
        let (response_tx, response_rx) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("stardust-sort".to_string())
            .spawn(move || run_worker(sorter, request_rx, response_tx))?;

        Ok(Self {
            requests: request_tx,
            responses: response_rx,
            handle: Some(handle),
            busy: false,
        })
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    #[cfg(test)]
    pub fn is_alive(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn dispatch(&mut self, job: SortJob) -> Result<(), DispatchError> {
        if self.busy {
            return Err(DispatchError::Busy(Box::new(job)));
        }
        match self.requests.send(SortRequest::Sort(job)) {
            Ok(()) => {
                self.busy = true;
                Ok(())
            }
            Err(SendError(request)) => Err(DispatchError::Disconnected(
                request.into_job().map(Box::new),
            )),
        }
    }

    /// Zero-wait check for the in-flight response.
    pub fn try_collect(&mut self) -> WorkerPoll {
        match self.responses.try_recv() {
            Ok(response) => {
                self.busy = false;
                WorkerPoll::Done(response)
            }
            Err(TryRecvError::Empty) if self.busy => WorkerPoll::Busy,
            Err(TryRecvError::Empty) => WorkerPoll::Idle,
            Err(TryRecvError::Disconnected) => {
                self.busy = false;
                WorkerPoll::Disconnected
            }
        }
    }

    /// Blocks until the in-flight response arrives or the worker dies.
    #[cfg(test)]
    pub fn collect_blocking(&mut self, timeout: Duration) -> WorkerPoll {
        if !self.busy {
            return WorkerPoll::Idle;
        }
        match self.responses.recv_timeout(timeout) {
            Ok(response) => {
                self.busy = false;
                WorkerPoll::Done(response)
            }
            Err(mpsc::RecvTimeoutError::Timeout) => WorkerPoll::Busy,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                self.busy = false;
                WorkerPoll::Disconnected
            }
        }
    }

    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.requests.send(SortRequest::Shutdown);
        if handle.join().is_err() {
            log::warn!("sort worker panicked before shutdown");
        } else {
            log::debug!("sort worker stopped");
        }
        self.busy = false;
    }
}

impl Drop for SortWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<S: DepthSort>(
    mut sorter: S,
    requests: Receiver<SortRequest>,
    responses: Sender<SortResponse>,
) {
    while let Ok(request) = requests.recv() {
        let job = match request {
            SortRequest::Sort(job) => job,
            SortRequest::Shutdown => break,
        };
        let response = run_job(&mut sorter, job);
        if responses.send(response).is_err() {
            break;
        }
    }
}

fn run_job<S: DepthSort>(sorter: &mut S, job: SortJob) -> SortResponse {
    if let Err(reason) = validate(&job) {
        return SortResponse::Rejected {
            generation: job.generation,
            lease: job.lease,
            reason,
        };
    }

    let SortJob {
        generation,
        mut lease,
        camera,
        count,
    } = job;
    let start = Instant::now();
    let buffers = &mut lease.buffer;
    sorter.sort_back_to_front(&mut buffers.ids, &buffers.positions, camera);
    let elapsed = start.elapsed();
    log::trace!("sorted {count} particles for generation {generation} in {elapsed:?}");

    SortResponse::Sorted {
        generation,
        lease,
        elapsed,
    }
}
