use std::time::{Duration, Instant};

use super::error::DeviceError;
use super::{ComputeDevice, FenceStatus};

/// Bounds for a cooperative fence wait. Polls back off from
/// `initial_interval` to `max_interval`, sleeping between polls.
#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(10),
            timeout: Duration::from_millis(500),
        }
    }
}

impl WaitPolicy {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// Waits for `fence` without spinning. Never called from the frame loop,
/// which only ever queries fence status with a zero timeout.
pub fn wait_for_fence<D: ComputeDevice>(
    device: &D,
    fence: &D::Fence,
    stage: &'static str,
    policy: WaitPolicy,
) -> Result<(), DeviceError> {
    let start = Instant::now();
    let mut interval = policy.initial_interval.max(Duration::from_micros(50));

    loop {
        match device.fence_status(fence) {
            FenceStatus::Signaled => return Ok(()),
            FenceStatus::Failed => return Err(DeviceError::Fault { stage }),
            FenceStatus::Pending => {
                let elapsed = start.elapsed();
                if elapsed >= policy.timeout {
                    return Err(DeviceError::Timeout {
                        stage,
                        timeout_ms: policy.timeout.as_millis() as u64,
                    });
                }
                let remaining = policy.timeout - elapsed;
                std::thread::sleep(interval.min(remaining));
                interval = (interval * 2).min(policy.max_interval.max(interval));
            }
        }
    }
}
