//! Error types for troupe-tls.
//!
//! Issuance failures are always fatal: no partially written pair is ever
//! handed back to a caller.

use std::path::{Path, PathBuf};

/// Result type alias for certificate operations.
pub type Result<T> = std::result::Result<T, IssuanceError>;

/// Error type for certificate authority operations.
#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    /// Key generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Certificate construction or signing failed.
    #[error("certificate construction failed: {0}")]
    Certificate(String),

    /// Reading or writing a key or certificate file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying cause.
        #[source]
        source: std::io::Error,
    },

    /// A PEM file could not be decoded.
    #[error("malformed PEM in {path}: {reason}")]
    Pem {
        /// File involved.
        path: PathBuf,
        /// Parser message.
        reason: String,
    },

    /// A leaf failed verification against its root.
    #[error("verification failed: {0}")]
    Verification(String),
}

impl IssuanceError {
    /// Creates a key generation error.
    #[must_use]
    pub fn key(reason: impl std::fmt::Display) -> Self {
        Self::KeyGeneration(reason.to_string())
    }

    /// Creates a certificate construction error.
    #[must_use]
    pub fn certificate(reason: impl std::fmt::Display) -> Self {
        Self::Certificate(reason.to_string())
    }

    /// Creates an I/O error for `path`.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Creates a PEM decoding error for `path`.
    #[must_use]
    pub fn pem(path: impl AsRef<Path>, reason: impl std::fmt::Display) -> Self {
        Self::Pem {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Creates a verification error.
    #[must_use]
    pub fn verification(reason: impl std::fmt::Display) -> Self {
        Self::Verification(reason.to_string())
    }

    /// Returns true for verification failures.
    #[must_use]
    pub const fn is_verification(&self) -> bool {
        matches!(self, Self::Verification(_))
    }
}
