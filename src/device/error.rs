#[derive(Debug)]
pub enum DeviceError {
    /// The device reported failure for submitted work.
    Fault {
        stage: &'static str,
    },
    /// The device queue is gone; nothing submitted afterwards will run.
    Lost,
    Timeout {
        stage: &'static str,
        timeout_ms: u64,
    },
    FenceNotSignaled,
    /// Host and device disagree on how many particles a snapshot holds.
    CountMismatch {
        device: usize,
        host: usize,
    },
    Other(String),
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fault { stage } => write!(f, "device fault at {stage}"),
            Self::Lost => f.write_str("compute device queue was lost"),
            Self::Timeout { stage, timeout_ms } => {
                write!(f, "device fence timeout at {stage} after {timeout_ms}ms")
            }
            Self::FenceNotSignaled => {
                f.write_str("readback completed before its fence signaled")
            }
            Self::CountMismatch { device, host } => write!(
                f,
                "device holds {device} particles but the host snapshot has {host}"
            ),
            Self::Other(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for DeviceError {}

impl DeviceError {
    /// Faults that leave the state store in an unknown condition.
    pub fn is_device_fault(&self) -> bool {
        matches!(
            self,
            Self::Fault { .. } | Self::Lost | Self::Timeout { .. }
        )
    }
}

impl From<&str> for DeviceError {
    fn from(value: &str) -> Self {
        Self::Other(value.to_string())
    }
}

impl From<String> for DeviceError {
    fn from(value: String) -> Self {
        Self::Other(value)
    }
}

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        Self::Other(err.to_string())
    }
}
