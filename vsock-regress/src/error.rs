use std::io;

use thiserror::Error;

/// Failure kinds of a regression run. Every kind is terminal for the process
/// that hits it and maps to its own exit code.
#[derive(Error, Debug)]
pub enum RegressError {
    /// Plain I/O failure on an established stream
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bad flag or environment value
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listening endpoint could not be set up
    #[error("Bind failed on {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// Connection attempts exhausted
    #[error("Failed to connect to {endpoint} after {attempts} attempts: {source}")]
    Connect {
        endpoint: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// Accept, read or write did not complete in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Peer closed the stream before a frame was complete
    #[error("Short read: expected {expected} bytes, got {received}")]
    ShortRead { expected: u64, received: u64 },

    /// Received bytes differ from the expected payload
    #[error("Data mismatch at offset {offset}: expected {expected_len} bytes, got {actual_len}")]
    DataMismatch {
        offset: usize,
        expected_len: usize,
        actual_len: usize,
    },

    /// Frame header announced a length above the allowed limit
    #[error("Invalid frame: length {len} exceeds limit {limit}")]
    InvalidFrame { len: u64, limit: u64 },

    /// A harness step exited unsuccessfully
    #[error("Step '{step}' failed: {detail}")]
    StepFailed {
        step: String,
        code: Option<i32>,
        detail: String,
    },
}

pub type Result<T> = std::result::Result<T, RegressError>;

impl RegressError {
    /// Process exit code for this failure kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            RegressError::Io(_) => 1,
            RegressError::Config(_) => 2,
            RegressError::Bind { .. } => 3,
            RegressError::Connect { .. } => 4,
            RegressError::Timeout(_) => 5,
            RegressError::ShortRead { .. } => 6,
            RegressError::DataMismatch { .. } => 7,
            RegressError::InvalidFrame { .. } => 8,
            RegressError::StepFailed { code, .. } => match code {
                Some(c) if *c != 0 => *c,
                _ => 1,
            },
        }
    }

    /// Short name of the failure kind, used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            RegressError::Io(_) => "io-error",
            RegressError::Config(_) => "config-error",
            RegressError::Bind { .. } => "bind-error",
            RegressError::Connect { .. } => "connect-error",
            RegressError::Timeout(_) => "timeout",
            RegressError::ShortRead { .. } => "short-read",
            RegressError::DataMismatch { .. } => "data-mismatch",
            RegressError::InvalidFrame { .. } => "invalid-frame",
            RegressError::StepFailed { .. } => "step-failed",
        }
    }

    /// Classify a stream I/O error, folding the timeout kinds into `Timeout`.
    pub fn from_stream_io(err: io::Error, what: &str) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                RegressError::Timeout(format!("{} timed out", what))
            }
            _ => RegressError::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let errors = vec![
            RegressError::Io(io::Error::new(io::ErrorKind::Other, "boom")),
            RegressError::Config("bad".to_string()),
            RegressError::Bind {
                endpoint: "vsock://4294967295:5005".to_string(),
                source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
            },
            RegressError::Connect {
                endpoint: "vsock://1:5005".to_string(),
                attempts: 5,
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
            },
            RegressError::Timeout("accept".to_string()),
            RegressError::ShortRead {
                expected: 8,
                received: 3,
            },
            RegressError::DataMismatch {
                offset: 0,
                expected_len: 1,
                actual_len: 1,
            },
            RegressError::InvalidFrame { len: 10, limit: 5 },
        ];

        let mut codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn step_failure_propagates_child_code() {
        let err = RegressError::StepFailed {
            step: "server".to_string(),
            code: Some(3),
            detail: "exit status: 3".to_string(),
        };
        assert_eq!(err.exit_code(), 3);

        let killed = RegressError::StepFailed {
            step: "server".to_string(),
            code: None,
            detail: "killed by signal".to_string(),
        };
        assert_eq!(killed.exit_code(), 1);
    }

    #[test]
    fn stream_timeouts_are_classified() {
        let err = RegressError::from_stream_io(
            io::Error::new(io::ErrorKind::WouldBlock, "again"),
            "read",
        );
        assert_eq!(err.kind(), "timeout");

        let err = RegressError::from_stream_io(
            io::Error::new(io::ErrorKind::BrokenPipe, "pipe"),
            "write",
        );
        assert_eq!(err.kind(), "io-error");
    }
}
