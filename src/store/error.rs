//! Store client error types

use thiserror::Error;

/// Errors surfaced by the backing store client
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store asked us to slow down and retry the failed RPC later.
    /// Carries the row key of the failed RPC when the store can recover it,
    /// so the caller may re-schedule that row.
    #[error("store requested throttling")]
    Throttle {
        /// Row key of the RPC that was throttled, if recoverable
        key: Option<Vec<u8>>,
    },

    /// The store is unreachable or rejected the RPC
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Transport-level I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True when this error is the store's backpressure signal
    pub fn is_throttle(&self) -> bool {
        matches!(self, StoreError::Throttle { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::Throttle { key: None };
        assert_eq!(err.to_string(), "store requested throttling");
        assert!(err.is_throttle());

        let err = StoreError::Unavailable("region offline".to_string());
        assert_eq!(err.to_string(), "store unavailable: region offline");
        assert!(!err.is_throttle());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: StoreError = io_err.into();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
