//! Error types for troupe-core.
//!
//! Every failure mode is an explicit variant; the supervisor never panics and
//! never retries internally.

use std::fmt;
use std::time::Duration;

use crate::types::{ExitStatus, HandleId};

/// Result type alias for supervisor operations.
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Error type for supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The executable could not be spawned.
    #[error("{name}: spawn failed: {reason}")]
    Spawn {
        /// Process name.
        name: String,
        /// Underlying cause.
        reason: String,
    },

    /// The readiness marker was not observed in time.
    #[error("{name}: readiness marker {marker:?} not observed within {timeout:?}")]
    ReadinessTimeout {
        /// Process name.
        name: String,
        /// Expected marker.
        marker: String,
        /// Configured timeout.
        timeout: Duration,
    },

    /// The process exited before it was asked to stop.
    #[error("{name}: exited unexpectedly ({status})")]
    UnexpectedExit {
        /// Process name.
        name: String,
        /// How it exited.
        status: ExitStatus,
    },

    /// The process failed to terminate cleanly after a stop request.
    #[error("{name}: shutdown failed ({status})")]
    Shutdown {
        /// Process name.
        name: String,
        /// How it exited, or `Unreaped`.
        status: ExitStatus,
    },

    /// A signal could not be delivered.
    #[error("{name}: signal delivery failed: {reason}")]
    Signal {
        /// Process name.
        name: String,
        /// Underlying cause.
        reason: String,
    },

    /// Unknown handle.
    #[error("handle not found: {0}")]
    NotFound(HandleId),

    /// The handle refers to a group where a single process was expected.
    #[error("handle {0} is a group, not a process")]
    NotAProcess(HandleId),

    /// Descriptor or group failed validation.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    /// Creates a spawn error.
    #[must_use]
    pub fn spawn(name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Spawn {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a signal delivery error.
    #[must_use]
    pub fn signal(name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Signal {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an invalid descriptor error.
    #[must_use]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidDescriptor(msg.into())
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns the process name this error is about, if any.
    #[must_use]
    pub fn process_name(&self) -> Option<&str> {
        match self {
            Self::Spawn { name, .. }
            | Self::ReadinessTimeout { name, .. }
            | Self::UnexpectedExit { name, .. }
            | Self::Shutdown { name, .. }
            | Self::Signal { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Returns true for readiness timeouts.
    #[must_use]
    pub const fn is_readiness_timeout(&self) -> bool {
        matches!(self, Self::ReadinessTimeout { .. })
    }

    /// Returns true for crashes of processes nobody asked to stop.
    #[must_use]
    pub const fn is_unexpected_exit(&self) -> bool {
        matches!(self, Self::UnexpectedExit { .. })
    }
}

/// Every exit error collected while waiting on or stopping a handle.
///
/// Teardown visits every member, so one failing member never hides another.
#[derive(Debug, Default)]
pub struct ExitErrors(Vec<SupervisorError>);

impl ExitErrors {
    /// Creates an empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds an error.
    pub fn push(&mut self, err: SupervisorError) {
        self.0.push(err);
    }

    /// Moves every error of `other` into `self`.
    pub fn extend(&mut self, other: Self) {
        self.0.extend(other.0);
    }

    /// Returns true if nothing failed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns the collected errors.
    #[must_use]
    pub fn errors(&self) -> &[SupervisorError] {
        &self.0
    }

    /// Consumes the collection.
    #[must_use]
    pub fn into_inner(self) -> Vec<SupervisorError> {
        self.0
    }

    /// Returns `Ok(())` when empty, `Err(self)` otherwise.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl From<SupervisorError> for ExitErrors {
    fn from(err: SupervisorError) -> Self {
        Self(vec![err])
    }
}

impl fmt::Display for ExitErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} process error(s)", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n  - {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ExitErrors {}
