//! Collision-free port allocation across concurrent test workers.
//!
//! Every worker owns a 1000-port block above the base port; inside it every
//! service owns a 10-port slot, and replicas of one service take consecutive
//! ports inside their slot:
//!
//! ```text
//! port = base + 1000 * worker + 10 * offset + replica
//! ```
//!
//! With `offset < 100` and `replica < 10` the mapping is injective, and every
//! result is checked to stay inside `1024..32768`, below the Linux default
//! ephemeral range.

use std::env;
use std::fmt;

use crate::error::AllocationError;

/// Environment variable holding the worker index.
pub const WORKER_INDEX_ENV: &str = "TROUPE_WORKER_INDEX";

/// Lowest port handed out.
pub const MIN_PORT: u32 = 1024;

/// One past the highest port handed out.
pub const MAX_PORT: u32 = 32768;

/// Ports per worker block.
pub const WORKER_STRIDE: u32 = 1000;

/// Ports per service slot.
pub const SERVICE_STRIDE: u32 = 10;

/// Index of one concurrently running topology on this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct WorkerIndex(pub u16);

impl WorkerIndex {
    /// Reads `TROUPE_WORKER_INDEX`, defaulting to 0 when unset.
    ///
    /// # Errors
    /// Returns `InvalidWorkerIndex` if the variable is set but not a number.
    pub fn from_env() -> Result<Self, AllocationError> {
        match env::var(WORKER_INDEX_ENV) {
            Ok(value) => Self::parse(&value),
            Err(_) => Ok(Self(0)),
        }
    }

    /// Parses a worker index.
    ///
    /// # Errors
    /// Returns `InvalidWorkerIndex` if `value` is not a number.
    pub fn parse(value: &str) -> Result<Self, AllocationError> {
        value
            .trim()
            .parse()
            .map(Self)
            .map_err(|_| AllocationError::InvalidWorkerIndex(value.to_string()))
    }
}

impl fmt::Display for WorkerIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Returns the port for `offset` in `worker`'s block.
///
/// # Errors
/// Returns an error if `offset >= 100` or the port leaves `1024..32768`.
pub fn allocate(base_port: u16, worker: WorkerIndex, offset: u16) -> Result<u16, AllocationError> {
    allocate_replica(base_port, worker, offset, 0)
}

/// Returns the port of replica `replica` of the service at `offset`.
///
/// # Errors
/// Returns an error if `offset >= 100`, `replica >= 10`, or the port leaves
/// `1024..32768`.
pub fn allocate_replica(
    base_port: u16,
    worker: WorkerIndex,
    offset: u16,
    replica: u16,
) -> Result<u16, AllocationError> {
    if u32::from(offset) * SERVICE_STRIDE >= WORKER_STRIDE {
        return Err(AllocationError::OffsetOutOfRange(offset));
    }
    if u32::from(replica) >= SERVICE_STRIDE {
        return Err(AllocationError::ReplicaOutOfRange(replica));
    }
    let port = u32::from(base_port)
        + WORKER_STRIDE * u32::from(worker.0)
        + SERVICE_STRIDE * u32::from(offset)
        + u32::from(replica);
    if !(MIN_PORT..MAX_PORT).contains(&port) {
        return Err(AllocationError::PortOutOfRange {
            port,
            worker: worker.0,
        });
    }
    u16::try_from(port).map_err(|_| AllocationError::PortOutOfRange {
        port,
        worker: worker.0,
    })
}

/// Fixed slot of every service kind inside a worker block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Message bus.
    MessageBus,
    /// State store API.
    StateStore,
    /// State store health endpoint.
    StateStoreHealth,
    /// Cell agent API (one port per replica).
    CellAgent,
    /// Cell agent mutual-TLS API (one port per replica).
    CellAgentSecure,
    /// Placement auctioneer.
    Auctioneer,
    /// Converger.
    Converger,
    /// Route emitter.
    RouteEmitter,
    /// File server.
    FileServer,
    /// Routing tier.
    Router,
    /// SSH proxy.
    SshProxy,
    /// SSH proxy health endpoint.
    SshProxyHealth,
    /// Service registry (one port per agent listener).
    Consul,
    /// Container backend.
    Garden,
    /// Volume driver.
    VolumeDriver,
    /// Volume driver debug endpoint.
    VolumeDriverDebug,
}

impl Slot {
    /// Every slot, in offset order.
    pub const ALL: [Self; 16] = [
        Self::MessageBus,
        Self::StateStore,
        Self::StateStoreHealth,
        Self::CellAgent,
        Self::CellAgentSecure,
        Self::Auctioneer,
        Self::Converger,
        Self::RouteEmitter,
        Self::FileServer,
        Self::Router,
        Self::SshProxy,
        Self::SshProxyHealth,
        Self::Consul,
        Self::Garden,
        Self::VolumeDriver,
        Self::VolumeDriverDebug,
    ];

    /// Returns the service offset of this slot.
    #[must_use]
    pub const fn offset(self) -> u16 {
        self as u16
    }
}

/// Rendered `host:port` addresses for every service of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentAddresses {
    host: String,
    base_port: u16,
    worker: WorkerIndex,
    /// Message bus.
    pub message_bus: String,
    /// State store API.
    pub state_store: String,
    /// State store health endpoint.
    pub state_store_health: String,
    /// Placement auctioneer.
    pub auctioneer: String,
    /// Converger.
    pub converger: String,
    /// Route emitter.
    pub route_emitter: String,
    /// File server.
    pub file_server: String,
    /// Routing tier.
    pub router: String,
    /// SSH proxy.
    pub ssh_proxy: String,
    /// SSH proxy health endpoint.
    pub ssh_proxy_health: String,
    /// Service registry HTTP API.
    pub consul: String,
    /// Container backend.
    pub garden: String,
    /// Volume driver.
    pub volume_driver: String,
    /// Volume driver debug endpoint.
    pub volume_driver_debug: String,
}

impl ComponentAddresses {
    /// Allocates every slot for `worker`.
    ///
    /// # Errors
    /// Returns an error if any slot's port leaves `1024..32768`.
    pub fn for_worker(
        host: &str,
        base_port: u16,
        worker: WorkerIndex,
    ) -> Result<Self, AllocationError> {
        let addr = |slot: Slot| -> Result<String, AllocationError> {
            Ok(format!("{host}:{}", allocate(base_port, worker, slot.offset())?))
        };
        Ok(Self {
            host: host.to_string(),
            base_port,
            worker,
            message_bus: addr(Slot::MessageBus)?,
            state_store: addr(Slot::StateStore)?,
            state_store_health: addr(Slot::StateStoreHealth)?,
            auctioneer: addr(Slot::Auctioneer)?,
            converger: addr(Slot::Converger)?,
            route_emitter: addr(Slot::RouteEmitter)?,
            file_server: addr(Slot::FileServer)?,
            router: addr(Slot::Router)?,
            ssh_proxy: addr(Slot::SshProxy)?,
            ssh_proxy_health: addr(Slot::SshProxyHealth)?,
            consul: addr(Slot::Consul)?,
            garden: addr(Slot::Garden)?,
            volume_driver: addr(Slot::VolumeDriver)?,
            volume_driver_debug: addr(Slot::VolumeDriverDebug)?,
        })
    }

    /// Returns the host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the worker index.
    #[must_use]
    pub const fn worker(&self) -> WorkerIndex {
        self.worker
    }

    /// Returns the port of any slot.
    ///
    /// # Errors
    /// Never fails for addresses built by [`Self::for_worker`].
    pub fn port(&self, slot: Slot) -> Result<u16, AllocationError> {
        allocate(self.base_port, self.worker, slot.offset())
    }

    /// Returns the `host:port` of cell agent replica `replica`.
    ///
    /// # Errors
    /// Returns an error if `replica >= 10`.
    pub fn cell_agent(&self, replica: u16) -> Result<String, AllocationError> {
        let port =
            allocate_replica(self.base_port, self.worker, Slot::CellAgent.offset(), replica)?;
        Ok(format!("{}:{port}", self.host))
    }

    /// Returns port `n` of the registry block; port 0 is the HTTP API.
    ///
    /// # Errors
    /// Returns an error if `n >= 10`.
    pub fn consul_port(&self, n: u16) -> Result<u16, AllocationError> {
        allocate_replica(self.base_port, self.worker, Slot::Consul.offset(), n)
    }

    /// Returns the `host:port` of cell agent replica `replica`'s TLS listener.
    ///
    /// # Errors
    /// Returns an error if `replica >= 10`.
    pub fn cell_agent_secure(&self, replica: u16) -> Result<String, AllocationError> {
        let port = allocate_replica(
            self.base_port,
            self.worker,
            Slot::CellAgentSecure.offset(),
            replica,
        )?;
        Ok(format!("{}:{port}", self.host))
    }
}
