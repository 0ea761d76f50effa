// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # troupe-core
//!
//! Process lifecycle primitives for standing up a multi-process topology on
//! one host and tearing it down again.
//!
//! - [`ProcessDescriptor`] describes one child: command, readiness marker,
//!   output color and cleanup callback
//! - [`Group`] composes descriptors into ordered or parallel sets
//! - [`Supervisor`] launches members, waits for readiness, delivers signals
//!   and collects every exit error on teardown
//! - [`ReadinessDetector`] is the single-fire marker scanner each worker runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use troupe_core::{Group, ProcessDescriptor, Signal, Supervisor, SupervisorConfig};
//!
//! let sup = Supervisor::new(SupervisorConfig::default())?;
//! let nats = ProcessDescriptor::new("nats", "/usr/bin/gnatsd")
//!     .args(["-a", "127.0.0.1", "-p", "4222"])
//!     .ready_within("gnatsd is ready", Duration::from_secs(10));
//! let bbs = ProcessDescriptor::new("bbs", "/usr/bin/bbs").ready_when("bbs.started");
//!
//! let cluster = sup.invoke(Group::ordered("cluster").members([nats, bbs])).await?;
//! // ... exercise the cluster ...
//! sup.stop(cluster, Signal::Term).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

pub mod config;
pub mod descriptor;
pub mod error;
pub mod group;
pub mod output;
pub mod readiness;
pub mod supervisor;
pub mod types;
mod worker;

pub use config::{OutputMode, SupervisorConfig};
pub use descriptor::{AnsiColor, Cleanup, LaunchCommand, ProcessDescriptor, ReadinessCheck};
pub use error::{ExitErrors, Result, SupervisorError};
pub use group::{Group, GroupMode, Member};
pub use output::{OutputSink, OutputTail, Stream};
pub use readiness::ReadinessDetector;
pub use supervisor::Supervisor;
pub use types::{ExitStatus, FailureReason, HandleId, ProcessSnapshot, ProcessState, Signal};
