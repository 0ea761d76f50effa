// Allow unwrap/expect in tests for clear failure messages
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

//! # troupe-topology
//!
//! Everything needed to describe one worker's copy of the service topology.
//!
//! - [`allocate`] and [`ComponentAddresses`] hand out ports that never
//!   collide between concurrently running workers
//! - [`ComponentMaker`] builds a [`troupe_core::ProcessDescriptor`] per
//!   service kind
//! - [`TopologyConfig`] loads the executable map and address settings from
//!   TOML

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod config;
pub mod error;
pub mod factory;

pub use address::{
    allocate, allocate_replica, ComponentAddresses, Slot, WorkerIndex, WORKER_INDEX_ENV,
};
pub use config::TopologyConfig;
pub use error::{AllocationError, Result, TopologyError};
pub use factory::{
    CellAgentConfig, ComponentMaker, ConsulConfig, ConsulPorts, DatabaseConfig, GardenAssets,
    NatsEndpoint, RouterConfig, RouterLogging, ServiceKind, ServiceTls, SshProxyConfig,
};
