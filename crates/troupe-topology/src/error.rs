//! Error types for troupe-topology.

use std::path::{Path, PathBuf};

use troupe_tls::IssuanceError;

/// Result type alias for topology operations.
pub type Result<T> = std::result::Result<T, TopologyError>;

/// Inputs outside the allocator's domain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    /// Service offset must be below 100.
    #[error("service offset {0} out of range (max 99)")]
    OffsetOutOfRange(u16),

    /// Replica index must be below 10.
    #[error("replica {0} out of range (max 9)")]
    ReplicaOutOfRange(u16),

    /// The computed port falls outside `1024..32768`.
    #[error("port {port} for worker {worker} falls outside 1024..32768")]
    PortOutOfRange {
        /// Computed port.
        port: u32,
        /// Worker index that produced it.
        worker: u16,
    },

    /// The worker index environment variable is not a number.
    #[error("invalid worker index {0:?}")]
    InvalidWorkerIndex(String),
}

/// Error type for topology operations.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// Address allocation failed.
    #[error("address allocation failed: {0}")]
    Allocation(#[from] AllocationError),

    /// Certificate issuance failed.
    #[error("certificate issuance failed: {0}")]
    Issuance(#[from] IssuanceError),

    /// No executable is configured for a service.
    #[error("no executable configured for {0}")]
    MissingExecutable(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Encoding a service config payload failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// File system error.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },
}

impl TopologyError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a serialization error.
    #[must_use]
    pub fn serialization(reason: impl std::fmt::Display) -> Self {
        Self::Serialization(reason.to_string())
    }

    /// Creates an I/O error for `path`.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_error_display() {
        let err = AllocationError::PortOutOfRange {
            port: 40_000,
            worker: 30,
        };
        assert!(err.to_string().contains("40000"));
        let err: TopologyError = AllocationError::OffsetOutOfRange(120).into();
        assert!(err.to_string().contains("offset 120"));
    }
}
