// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # troupe-test
//!
//! Test-side tooling for topologies run under troupe.
//!
//! - [`TopologyHarness`] owns one worker's supervisor, certificate authority
//!   and descriptor factory, and tears all of them down in one call
//! - [`eventually`] and [`consistently`] poll a system that converges over time
//! - [`init_tracing`] installs a subscriber for test binaries
//!
//! ## Example
//!
//! ```rust,ignore
//! use troupe_test::{TopologyHarness, eventually};
//!
//! let harness = TopologyHarness::new(topology, SupervisorConfig::default())?;
//! let nats = harness.maker().nats(&[])?;
//! let bbs = harness.maker().bbs(&[])?;
//! harness.invoke(Group::ordered("control-plane").members([nats, bbs])).await?;
//! harness.teardown().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod harness;
pub mod poller;

pub use error::{PollError, Result, TestError};
pub use harness::TopologyHarness;
pub use poller::{consistently, eventually, Consistently, Eventually};

use tracing_subscriber::EnvFilter;

/// Installs a compact fmt subscriber filtered by `RUST_LOG` (default `info`)
/// writing through the test writer. Safe to call from every test.
pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .from_env_lossy();
    // Only the first call in a process installs the subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .compact()
        .try_init();
}
