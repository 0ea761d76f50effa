// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # troupe-tls
//!
//! A throwaway certificate authority for one topology run.
//!
//! - [`CertAuthority`] creates a root pair in a depot directory and issues
//!   leaf pairs signed by it
//! - [`TlsMaterial`] bundles the server and client pairs one service needs
//! - [`verify_leaf`] checks a leaf against its root
//!
//! ```rust,ignore
//! use troupe_tls::{CertAuthority, TlsMaterial};
//!
//! let ca = CertAuthority::create(depot.path(), "troupe-ca")?;
//! let bbs = TlsMaterial::issue(&ca, "bbs", &["bbs.service.cf.internal"])?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod authority;
pub mod error;
pub mod material;
pub mod verify;

pub use authority::{CertAuthority, IssuedPair, KeyStrength};
pub use error::{IssuanceError, Result};
pub use material::TlsMaterial;
pub use verify::verify_leaf;
