use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeviceError {
    /// An expected response did not arrive within the bounded window
    #[error("Timeout waiting for device")]
    Timeout,

    /// The operation was aborted by the user or the system. Not an error
    /// that should be shown to the user.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Operation not supported by driver: {0}")]
    Unsupported(&'static str),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Device is busy")]
    Busy,
}

impl DeviceError {
    /// Cancellation is a silent outcome, everything else is reportable
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeviceError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            DeviceError::Timeout => true,
            DeviceError::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_timeout_counts_as_timeout() {
        let e: DeviceError = std::io::Error::from(std::io::ErrorKind::TimedOut).into();
        assert!(e.is_timeout());
        assert!(!e.is_cancelled());
        assert!(DeviceError::Cancelled.is_cancelled());
    }
}
