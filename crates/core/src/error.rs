//! Error types shared outside the RHI.

use thiserror::Error;

/// Error type for configuration, file watching and other non-GPU failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or inconsistent settings
    #[error("Config error: {0}")]
    Config(String),

    /// Filesystem watcher failures
    #[error("Watch error: {0}")]
    Watch(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the shared [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("frames_in_flight must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "Config error: frames_in_flight must be at least 1"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
