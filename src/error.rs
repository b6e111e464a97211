//! Error type shared by every module in the crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FingerprintError>;

#[derive(Debug, Error)]
pub enum FingerprintError {
    /// Raised before any computation starts. Never retryable.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A serialized record failed validation.
    #[error("invalid fingerprint encoding: {0}")]
    InvalidFormat(String),

    #[error("audio decode failed: {0}")]
    Decode(String),

    #[error("extraction worker failed: {0}")]
    Worker(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FingerprintError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        FingerprintError::InvalidParameter(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = FingerprintError::invalid("n_fft must be a power of two");
        assert_eq!(
            err.to_string(),
            "invalid parameter: n_fft must be a power of two"
        );

        let err = FingerprintError::InvalidFormat("bad magic".to_string());
        assert_eq!(err.to_string(), "invalid fingerprint encoding: bad magic");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: FingerprintError = io.into();
        assert!(matches!(err, FingerprintError::Io(_)));
    }
}
