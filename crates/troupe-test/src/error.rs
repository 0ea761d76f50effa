//! Test error types.

use std::time::Duration;

use troupe_core::{ExitErrors, SupervisorError};
use troupe_tls::IssuanceError;
use troupe_topology::TopologyError;

/// Result type alias for test operations.
pub type Result<T> = std::result::Result<T, TestError>;

/// A poll that did not converge.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// The predicate never held before the deadline.
    #[error("condition not met within {waited:?}; last observed: {last}")]
    Timeout {
        /// How long the poll ran.
        waited: Duration,
        /// Debug rendering of the last probed value.
        last: String,
    },

    /// A sample violated a predicate that should have held throughout.
    #[error("condition violated after {after:?}; observed: {observed}")]
    Violated {
        /// Time from the first sample to the violating one.
        after: Duration,
        /// Debug rendering of the violating value.
        observed: String,
    },
}

impl PollError {
    /// Returns true for timeouts.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Testing errors.
#[derive(Debug, thiserror::Error)]
pub enum TestError {
    /// Harness setup error.
    #[error("harness error: {0}")]
    Harness(String),

    /// Poll failure.
    #[error("poll failed: {0}")]
    Poll(#[from] PollError),

    /// Supervisor error.
    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// Exit errors collected on wait or teardown.
    #[error("{0}")]
    Exit(#[from] ExitErrors),

    /// Topology error.
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    /// Certificate error.
    #[error("certificate error: {0}")]
    Issuance(#[from] IssuanceError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TestError {
    /// Creates a harness error.
    #[must_use]
    pub fn harness(msg: impl Into<String>) -> Self {
        Self::Harness(msg.into())
    }
}
