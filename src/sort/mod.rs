pub mod radix;
pub mod worker;

pub use radix::RadixSorter;
pub use worker::{SortBuffers, SortJob, SortResponse, SortWorker, WorkerPoll};

/// Why the sort worker refused a request. The request's buffers come back
/// untouched alongside the reason.
#[derive(Debug, Clone, PartialEq)]
pub enum SortError {
    LengthMismatch {
        count: usize,
        ids: usize,
        positions: usize,
    },
    NonFiniteCamera([f32; 3]),
}

impl std::fmt::Display for SortError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LengthMismatch {
                count,
                ids,
                positions,
            } => write!(
                f,
                "malformed sort request: count={count}, ids={ids}, positions={positions}"
            ),
            Self::NonFiniteCamera([x, y, z]) => {
                write!(f, "malformed sort request: camera ({x}, {y}, {z}) is not finite")
            }
        }
    }
}

impl std::error::Error for SortError {}
