//! Troupe: stand up a multi-process service topology on one host, wait for
//! every member to announce readiness, and tear it all down again.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use troupe::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let sup = Supervisor::new(SupervisorConfig::default())?;
//! let bus = ProcessDescriptor::new("bus", "/usr/local/bin/gnatsd")
//!     .ready_within("gnatsd is ready", Duration::from_secs(10));
//! let id = sup.invoke(Group::ordered("cluster").member(bus)).await?;
//! sup.stop(id, Signal::Term).await?;
//! # Ok(())
//! # }
//! ```

pub use troupe_core as core;
pub use troupe_test as test;
pub use troupe_tls as tls;
pub use troupe_topology as topology;

/// Prelude module for common imports.
pub mod prelude {
    pub use troupe_core::{
        ExitErrors, ExitStatus, Group, GroupMode, HandleId, ProcessDescriptor, ProcessSnapshot,
        ProcessState, Signal, Supervisor, SupervisorConfig, SupervisorError,
    };
    pub use troupe_test::{consistently, eventually, TopologyHarness};
    pub use troupe_tls::{CertAuthority, KeyStrength, TlsMaterial};
    pub use troupe_topology::{
        ComponentAddresses, ComponentMaker, ServiceKind, TopologyConfig, WorkerIndex,
    };
}
