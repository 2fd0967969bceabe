use thiserror::Error;

/// Location fusion error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Location permission not granted")]
    PermissionDenied,

    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Invalid fix: {0}")]
    InvalidFix(String),

    #[error("Prediction window exceeded ({dt_ms:.0} ms since base fix)")]
    StaleClock { dt_ms: f64 },

    #[error("Session already open")]
    AlreadyOpen,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tracker channel closed")]
    ChannelClosed,

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Replay error: {0}")]
    Replay(String),
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;

impl TrackerError {
    /// Local degradations are logged and absorbed; they never end a session.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, TrackerError::ChannelClosed | TrackerError::Worker(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            TrackerError::PermissionDenied.to_string(),
            "Location permission not granted"
        );
        let stale = TrackerError::StaleClock { dt_ms: 2500.0 };
        assert!(stale.to_string().contains("2500 ms"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(TrackerError::PermissionDenied.is_recoverable());
        assert!(TrackerError::InvalidFix("nan".to_string()).is_recoverable());
        assert!(!TrackerError::ChannelClosed.is_recoverable());
    }
}
