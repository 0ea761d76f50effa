//! Process descriptors for every service kind of the topology.
//!
//! [`ComponentMaker`] turns the executable map, the worker's address table
//! and the run's TLS material into ready-to-invoke [`ProcessDescriptor`]s.
//! Each kind carries a fixed readiness marker, color and startup timeout.
//! Kinds configured through a structured file get their payload written to
//! the scratch directory, and the descriptor's cleanup removes whatever the
//! kind created on disk.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use troupe_core::{AnsiColor, ProcessDescriptor};
use troupe_tls::{CertAuthority, TlsMaterial};

use crate::address::{ComponentAddresses, Slot, WorkerIndex};
use crate::error::{Result, TopologyError};

// ============================================================================
// Service kinds
// ============================================================================

/// One kind of service in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Service registry agent.
    Consul,
    /// Message bus.
    MessageBus,
    /// Container backend.
    Garden,
    /// State store API.
    StateStore,
    /// Cell agent.
    CellAgent,
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
    /// Volume driver.
    VolumeDriver,
}

impl ServiceKind {
    /// Every kind, in start order.
    pub const ALL: [Self; 12] = [
        Self::Consul,
        Self::MessageBus,
        Self::Garden,
        Self::StateStore,
        Self::CellAgent,
        Self::Auctioneer,
        Self::Converger,
        Self::RouteEmitter,
        Self::FileServer,
        Self::Router,
        Self::SshProxy,
        Self::VolumeDriver,
    ];

    /// Returns the key under which the kind's executable is configured.
    #[must_use]
    pub const fn executable_key(self) -> &'static str {
        match self {
            Self::Consul => "consul",
            Self::MessageBus => "gnatsd",
            Self::Garden => "garden",
            Self::StateStore => "bbs",
            Self::CellAgent => "rep",
            Self::Auctioneer => "auctioneer",
            Self::Converger => "converger",
            Self::RouteEmitter => "route-emitter",
            Self::FileServer => "file-server",
            Self::Router => "router",
            Self::SshProxy => "ssh-proxy",
            Self::VolumeDriver => "local-driver",
        }
    }

    /// Returns the readiness marker a process of this kind named `name`
    /// prints once initialized.
    #[must_use]
    pub fn marker_for(self, name: &str) -> String {
        match self {
            Self::Consul => "Consul agent running!".to_string(),
            Self::MessageBus => "gnatsd is ready".to_string(),
            Self::Garden => "guardian.started".to_string(),
            Self::VolumeDriver => "local-driver-server.started".to_string(),
            Self::StateStore | Self::Router | Self::SshProxy => format!("{name}.started"),
            // JSON loggers; the quotes pin the match to the message field.
            Self::CellAgent | Self::Auctioneer | Self::Converger | Self::RouteEmitter => {
                format!("\"{name}.started\"")
            }
            Self::FileServer => format!("\"{name}.ready\""),
        }
    }

    /// Returns the ANSI color code for the kind's output prefix.
    #[must_use]
    pub const fn color_code(self) -> &'static str {
        match self {
            Self::Consul => "37m",
            Self::MessageBus => "30m",
            Self::Garden => "31m",
            Self::StateStore => "32m",
            Self::CellAgent => "33m",
            Self::Converger => "34m",
            Self::Auctioneer => "35m",
            Self::RouteEmitter => "36m",
            Self::FileServer => "92m",
            Self::Router => "93m",
            Self::SshProxy => "96m",
            Self::VolumeDriver => "95m",
        }
    }

    /// Returns how long a process of this kind may take to become ready.
    #[must_use]
    pub const fn startup_timeout(self) -> Duration {
        match self {
            // Waits for a healthcheck container before announcing itself.
            Self::CellAgent => Duration::from_secs(120),
            Self::Garden => Duration::from_secs(30),
            _ => Duration::from_secs(10),
        }
    }

    /// Returns the kind's primary address slot.
    #[must_use]
    pub const fn slot(self) -> Slot {
        match self {
            Self::Consul => Slot::Consul,
            Self::MessageBus => Slot::MessageBus,
            Self::Garden => Slot::Garden,
            Self::StateStore => Slot::StateStore,
            Self::CellAgent => Slot::CellAgent,
            Self::Auctioneer => Slot::Auctioneer,
            Self::Converger => Slot::Converger,
            Self::RouteEmitter => Slot::RouteEmitter,
            Self::FileServer => Slot::FileServer,
            Self::Router => Slot::Router,
            Self::SshProxy => Slot::SshProxy,
            Self::VolumeDriver => Slot::VolumeDriver,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.executable_key())
    }
}

// ============================================================================
// TLS material
// ============================================================================

/// TLS bundles for the services that speak mutual TLS.
#[derive(Debug, Clone)]
pub struct ServiceTls {
    /// State store server and client pairs.
    pub state_store: TlsMaterial,
    /// Cell agent server and client pairs.
    pub cell_agent: TlsMaterial,
    /// Auctioneer server and client pairs.
    pub auctioneer: TlsMaterial,
}

impl ServiceTls {
    /// Issues all bundles from `ca`.
    ///
    /// # Errors
    /// Returns an error if any issuance fails.
    pub fn issue(ca: &CertAuthority) -> Result<Self> {
        Ok(Self {
            state_store: TlsMaterial::issue(ca, "bbs", &["bbs.service.cf.internal"])?,
            cell_agent: TlsMaterial::issue(ca, "rep", &["cell.service.cf.internal"])?,
            auctioneer: TlsMaterial::issue(ca, "auctioneer", &["auctioneer.service.cf.internal"])?,
        })
    }
}

// ============================================================================
// Structured configs
// ============================================================================

/// JSON configuration handed to a cell agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellAgentConfig {
    /// Session and process name.
    pub session_name: String,
    /// Cell identifier.
    pub cell_id: String,
    /// State store URL.
    pub bbs_address: String,
    /// Plain listener.
    pub listen_addr: String,
    /// Mutual-TLS listener.
    pub listen_addr_securable: String,
    /// Poll interval, humantime syntax.
    pub polling_interval: String,
    /// Evacuation timeout, humantime syntax.
    pub evacuation_timeout: String,
    /// Lock TTL, humantime syntax.
    pub lock_ttl: String,
    /// Cache directory.
    pub cache_path: PathBuf,
    /// Scratch directory removed on cleanup.
    pub temp_dir: PathBuf,
    /// Whether the TLS listener is mandatory.
    pub require_tls: bool,
    /// Client certificate for the state store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbs_client_cert_file: Option<PathBuf>,
    /// Client key for the state store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbs_client_key_file: Option<PathBuf>,
    /// CA certificate for the state store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbs_ca_cert_file: Option<PathBuf>,
    /// Server certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_cert_file: Option<PathBuf>,
    /// Server key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_key_file: Option<PathBuf>,
    /// CA certificate clients are checked against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_file: Option<PathBuf>,
    /// Log level.
    pub log_level: String,
}

/// One message bus endpoint in the router config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatsEndpoint {
    /// Host.
    pub host: String,
    /// Port.
    pub port: u16,
}

/// Router logging section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterLogging {
    /// Log destination.
    pub file: PathBuf,
    /// Log level.
    pub level: String,
}

/// YAML configuration handed to the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Listen port.
    pub port: u16,
    /// Message bus endpoints.
    pub nats: Vec<NatsEndpoint>,
    /// Logging section.
    pub logging: RouterLogging,
    /// How often stale routes are pruned.
    pub prune_stale_droplets_interval: String,
    /// Age after which a route is stale.
    pub droplet_stale_threshold: String,
    /// Delay before the router accepts connections.
    pub start_response_delay_interval: String,
}

/// JSON configuration handed to the SSH proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshProxyConfig {
    /// Listen address.
    pub address: String,
    /// Health listener.
    pub health_check_address: String,
    /// State store URL.
    pub bbs_address: String,
    /// CA certificate for the state store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbs_ca_cert: Option<PathBuf>,
    /// Client certificate for the state store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbs_client_cert: Option<PathBuf>,
    /// Client key for the state store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbs_client_key: Option<PathBuf>,
    /// Whether platform authentication is enabled.
    pub enable_diego_auth: bool,
    /// Log level.
    pub log_level: String,
}

/// Port block of a registry agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsulPorts {
    /// HTTP API.
    pub http: u16,
    /// DNS interface.
    pub dns: u16,
    /// LAN gossip.
    pub serf_lan: u16,
    /// WAN gossip.
    pub serf_wan: u16,
    /// Server RPC.
    pub server: u16,
}

/// JSON configuration handed to a single-node registry agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsulConfig {
    /// Node name.
    pub node_name: String,
    /// Data directory removed on cleanup.
    pub data_dir: PathBuf,
    /// Run as a server.
    pub server: bool,
    /// Servers to wait for before electing a leader.
    pub bootstrap_expect: u8,
    /// Gossip bind address.
    pub bind_addr: String,
    /// Client interfaces bind address.
    pub client_addr: String,
    /// Listener ports.
    pub ports: ConsulPorts,
    /// Never phone home.
    pub disable_update_check: bool,
    /// Log level.
    pub log_level: String,
}

/// Database the state store persists to.
///
/// The server is external to the topology; each worker gets its own
/// database named after the worker index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Driver name passed to the state store, e.g. `postgres` or `mysql`.
    pub driver: String,
    /// Connection string the database name is appended to.
    pub base_connection_string: String,
}

/// Host-side assets the container backend needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GardenAssets {
    /// Directory holding `runc`, `init`, `nstar`, `dadoo`, `grootfs` and `tar`.
    pub bin_dir: PathBuf,
    /// Root filesystem of the default stack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_rootfs: Option<PathBuf>,
}

#[derive(Clone, Copy)]
enum Encoding {
    Json,
    Yaml,
}

/// Writes `payload` to a fresh file in `dir` and keeps it on disk.
fn write_config<T: Serialize>(
    dir: &Path,
    prefix: &str,
    encoding: Encoding,
    payload: &T,
) -> Result<PathBuf> {
    let suffix = match encoding {
        Encoding::Json => ".json",
        Encoding::Yaml => ".yml",
    };
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(|e| TopologyError::io(dir, e))?;
    let body = match encoding {
        Encoding::Json => serde_json::to_vec_pretty(payload).map_err(TopologyError::serialization)?,
        Encoding::Yaml => serde_yaml::to_string(payload)
            .map_err(TopologyError::serialization)?
            .into_bytes(),
    };
    file.write_all(&body)
        .map_err(|e| TopologyError::io(file.path(), e))?;
    let (_, path) = file.keep().map_err(|e| TopologyError::io(dir, e.error))?;
    tracing::debug!(path = %path.display(), "wrote service config");
    Ok(path)
}

fn scratch_dir(dir: &Path, prefix: &str) -> Result<PathBuf> {
    let tmp = tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in(dir)
        .map_err(|e| TopologyError::io(dir, e))?;
    Ok(tmp.keep())
}

fn remove_all(paths: &[PathBuf]) {
    for path in paths {
        let result = if path.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        };
        match result {
            Ok(()) => tracing::debug!(path = %path.display(), "removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "cleanup failed"),
        }
    }
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| TopologyError::config(format!("address {addr} has no port")))?;
    let port = port
        .parse()
        .map_err(|_| TopologyError::config(format!("address {addr} has an invalid port")))?;
    Ok((host.to_string(), port))
}

// ============================================================================
// ComponentMaker
// ============================================================================

/// Builds descriptors for one worker's topology.
#[derive(Debug, Clone)]
pub struct ComponentMaker {
    executables: HashMap<String, PathBuf>,
    addresses: ComponentAddresses,
    tls: Option<ServiceTls>,
    log_level: String,
    scratch_dir: PathBuf,
    database: Option<DatabaseConfig>,
    garden_assets: Option<GardenAssets>,
}

impl ComponentMaker {
    /// Creates a maker with no TLS, debug logging and the system temp dir
    /// as scratch space.
    #[must_use]
    pub fn new(executables: HashMap<String, PathBuf>, addresses: ComponentAddresses) -> Self {
        Self {
            executables,
            addresses,
            tls: None,
            log_level: "debug".to_string(),
            scratch_dir: std::env::temp_dir(),
            database: None,
            garden_assets: None,
        }
    }

    /// Enables mutual TLS with the given bundles.
    #[must_use]
    pub fn with_tls(mut self, tls: ServiceTls) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Sets the log level passed to every service.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Sets the directory config files and service scratch dirs are created in.
    #[must_use]
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Points the state store at a per-worker database.
    #[must_use]
    pub fn with_database(mut self, database: DatabaseConfig) -> Self {
        self.database = Some(database);
        self
    }

    /// Sets the container backend's host assets.
    #[must_use]
    pub fn with_garden_assets(mut self, assets: GardenAssets) -> Self {
        self.garden_assets = Some(assets);
        self
    }

    /// Returns the name of this worker's database.
    #[must_use]
    pub fn database_name(&self) -> String {
        format!("diego_{}", self.worker())
    }

    /// Returns the registry URL clients dial.
    #[must_use]
    pub fn consul_cluster(&self) -> String {
        format!("http://{}", self.addresses.consul)
    }

    /// Returns the address table.
    #[must_use]
    pub const fn addresses(&self) -> &ComponentAddresses {
        &self.addresses
    }

    /// Returns the TLS bundles, if enabled.
    #[must_use]
    pub const fn tls(&self) -> Option<&ServiceTls> {
        self.tls.as_ref()
    }

    /// Returns the worker index the addresses belong to.
    #[must_use]
    pub const fn worker(&self) -> WorkerIndex {
        self.addresses.worker()
    }

    /// Returns the state store URL clients dial.
    #[must_use]
    pub fn bbs_url(&self) -> String {
        let scheme = if self.tls.is_some() { "https" } else { "http" };
        format!("{scheme}://{}", self.addresses.state_store)
    }

    /// Returns the configured executable for `kind`.
    ///
    /// # Errors
    /// Returns `MissingExecutable` if none is configured.
    pub fn executable(&self, kind: ServiceKind) -> Result<&Path> {
        self.executables
            .get(kind.executable_key())
            .map(PathBuf::as_path)
            .ok_or_else(|| TopologyError::MissingExecutable(kind.executable_key().to_string()))
    }

    fn descriptor(&self, kind: ServiceKind, name: &str) -> Result<ProcessDescriptor> {
        Ok(ProcessDescriptor::new(name, self.executable(kind)?)
            .ready_within(kind.marker_for(name), kind.startup_timeout())
            .color(AnsiColor::new(kind.color_code())))
    }

    fn bbs_client_args(&self, prefix: &str) -> Vec<OsString> {
        let Some(tls) = &self.tls else {
            return Vec::new();
        };
        let m = &tls.state_store;
        vec![
            format!("-{prefix}ClientCert").into(),
            m.client.cert_path.clone().into(),
            format!("-{prefix}ClientKey").into(),
            m.client.key_path.clone().into(),
            format!("-{prefix}CACert").into(),
            m.ca_cert.clone().into(),
        ]
    }

    /// Message bus listening on its slot.
    ///
    /// # Errors
    /// Returns an error if no executable is configured.
    pub fn nats(&self, extra: &[&str]) -> Result<ProcessDescriptor> {
        let (host, port) = split_host_port(&self.addresses.message_bus)?;
        Ok(self
            .descriptor(ServiceKind::MessageBus, "gnatsd")?
            .args(["--addr", host.as_str(), "--port", port.to_string().as_str()])
            .args(extra))
    }

    /// State store API.
    ///
    /// # Errors
    /// Returns an error if no executable is configured.
    pub fn bbs(&self, extra: &[&str]) -> Result<ProcessDescriptor> {
        let mut desc = self
            .descriptor(ServiceKind::StateStore, "bbs")?
            .arg("-listenAddress")
            .arg(&self.addresses.state_store)
            .arg("-healthAddress")
            .arg(&self.addresses.state_store_health)
            .arg("-advertiseURL")
            .arg(&self.bbs_url())
            .arg("-logLevel")
            .arg(&self.log_level);
        if let Some(tls) = &self.tls {
            desc = desc
                .arg("-auctioneerAddress")
                .arg(&format!("https://{}", self.addresses.auctioneer))
                .arg("-requireSSL")
                .arg("-certFile")
                .arg(&tls.state_store.server.cert_path)
                .arg("-keyFile")
                .arg(&tls.state_store.server.key_path)
                .arg("-caFile")
                .arg(&tls.state_store.ca_cert)
                .arg("-repClientCert")
                .arg(&tls.cell_agent.client.cert_path)
                .arg("-repClientKey")
                .arg(&tls.cell_agent.client.key_path)
                .arg("-repCACert")
                .arg(&tls.cell_agent.ca_cert)
                .arg("-auctioneerClientCert")
                .arg(&tls.auctioneer.client.cert_path)
                .arg("-auctioneerClientKey")
                .arg(&tls.auctioneer.client.key_path)
                .arg("-auctioneerCACert")
                .arg(&tls.auctioneer.ca_cert)
                .arg("-auctioneerRequireTLS=true");
        } else {
            desc = desc
                .arg("-auctioneerAddress")
                .arg(format!("http://{}", self.addresses.auctioneer));
        }
        if let Some(db) = &self.database {
            desc = desc
                .arg("-databaseDriver")
                .arg(&db.driver)
                .arg("-databaseConnectionString")
                .arg(format!("{}{}", db.base_connection_string, self.database_name()));
        }
        Ok(desc.args(extra))
    }

    /// Cell agent replica `n`, configured through a JSON file that `modify`
    /// may adjust before it is written.
    ///
    /// The replica owns a scratch directory; cleanup removes it together
    /// with the config file.
    ///
    /// # Errors
    /// Returns an error if no executable is configured, `n` is out of range,
    /// or the config cannot be written.
    pub fn cell_agent<F>(&self, n: u16, modify: F) -> Result<ProcessDescriptor>
    where
        F: FnOnce(&mut CellAgentConfig),
    {
        let name = format!("rep-{n}");
        let listen_addr = self.addresses.cell_agent(n)?;
        let listen_addr_securable = self.addresses.cell_agent_secure(n)?;
        let desc = self.descriptor(ServiceKind::CellAgent, &name)?;

        let temp_dir = scratch_dir(&self.scratch_dir, "executor")?;
        let tls = self.tls.as_ref();
        let mut config = CellAgentConfig {
            session_name: name.clone(),
            cell_id: format!("troupe-cell-{}-{n}", self.worker()),
            bbs_address: self.bbs_url(),
            listen_addr,
            listen_addr_securable,
            polling_interval: "1s".to_string(),
            evacuation_timeout: "1s".to_string(),
            lock_ttl: "10s".to_string(),
            cache_path: temp_dir.join("cache"),
            temp_dir: temp_dir.clone(),
            require_tls: tls.is_some(),
            bbs_client_cert_file: tls.map(|t| t.state_store.client.cert_path.clone()),
            bbs_client_key_file: tls.map(|t| t.state_store.client.key_path.clone()),
            bbs_ca_cert_file: tls.map(|t| t.state_store.ca_cert.clone()),
            server_cert_file: tls.map(|t| t.cell_agent.server.cert_path.clone()),
            server_key_file: tls.map(|t| t.cell_agent.server.key_path.clone()),
            ca_cert_file: tls.map(|t| t.cell_agent.ca_cert.clone()),
            log_level: self.log_level.clone(),
        };
        modify(&mut config);

        let written = write_config(&self.scratch_dir, "rep-config", Encoding::Json, &config);
        let config_path = match written {
            Ok(path) => path,
            Err(e) => {
                remove_all(&[temp_dir]);
                return Err(e);
            }
        };
        let owned = vec![temp_dir, config_path.clone()];
        Ok(desc
            .arg("-config")
            .arg(config_path)
            .on_cleanup(move || remove_all(&owned)))
    }

    /// Placement auctioneer.
    ///
    /// # Errors
    /// Returns an error if no executable is configured.
    pub fn auctioneer(&self, extra: &[&str]) -> Result<ProcessDescriptor> {
        let mut desc = self
            .descriptor(ServiceKind::Auctioneer, "auctioneer")?
            .arg("-bbsAddress")
            .arg(&self.bbs_url())
            .arg("-listenAddr")
            .arg(&self.addresses.auctioneer)
            .args(["-lockRetryInterval", "1s", "-startingContainerWeight", "0.33"])
            .arg("-logLevel")
            .arg(&self.log_level)
            .args(self.bbs_client_args("bbs"));
        if let Some(tls) = &self.tls {
            desc = desc
                .arg("-repClientCert")
                .arg(&tls.cell_agent.client.cert_path)
                .arg("-repClientKey")
                .arg(&tls.cell_agent.client.key_path)
                .arg("-repCACert")
                .arg(&tls.cell_agent.ca_cert)
                .arg("-serverCertFile")
                .arg(&tls.auctioneer.server.cert_path)
                .arg("-serverKeyFile")
                .arg(&tls.auctioneer.server.key_path)
                .arg("-caCertFile")
                .arg(&tls.auctioneer.ca_cert);
        }
        Ok(desc.args(extra))
    }

    /// Converger.
    ///
    /// # Errors
    /// Returns an error if no executable is configured.
    pub fn converger(&self, extra: &[&str]) -> Result<ProcessDescriptor> {
        Ok(self
            .descriptor(ServiceKind::Converger, "converger")?
            .arg("-bbsAddress")
            .arg(&self.bbs_url())
            .arg("-listenAddress")
            .arg(&self.addresses.converger)
            .args(["-convergeRepeatInterval", "1s", "-lockRetryInterval", "1s"])
            .arg("-logLevel")
            .arg(&self.log_level)
            .args(self.bbs_client_args("bbs"))
            .args(extra))
    }

    /// Route emitter.
    ///
    /// # Errors
    /// Returns an error if no executable is configured.
    pub fn route_emitter(&self, extra: &[&str]) -> Result<ProcessDescriptor> {
        Ok(self
            .descriptor(ServiceKind::RouteEmitter, "route-emitter")?
            .arg("-natsAddresses")
            .arg(&self.addresses.message_bus)
            .arg("-bbsAddress")
            .arg(&self.bbs_url())
            .args(["-lockRetryInterval", "1s"])
            .arg("-logLevel")
            .arg(&self.log_level)
            .args(self.bbs_client_args("bbs"))
            .args(extra))
    }

    /// File server, returned with the directory it serves.
    ///
    /// Cleanup removes the served directory.
    ///
    /// # Errors
    /// Returns an error if no executable is configured or the directory
    /// cannot be created.
    pub fn file_server(&self, extra: &[&str]) -> Result<(ProcessDescriptor, PathBuf)> {
        let desc = self.descriptor(ServiceKind::FileServer, "file-server")?;
        let served = scratch_dir(&self.scratch_dir, "file-server-files")?;
        let owned = vec![served.clone()];
        let desc = desc
            .arg("-address")
            .arg(&self.addresses.file_server)
            .arg("-logLevel")
            .arg(&self.log_level)
            .arg("-staticDirectory")
            .arg(&served)
            .args(extra)
            .on_cleanup(move || remove_all(&owned));
        Ok((desc, served))
    }

    /// Router, configured through a YAML file removed on cleanup.
    ///
    /// # Errors
    /// Returns an error if no executable is configured or the config cannot
    /// be written.
    pub fn router(&self) -> Result<ProcessDescriptor> {
        let desc = self.descriptor(ServiceKind::Router, "router")?;
        let (_, port) = split_host_port(&self.addresses.router)?;
        let (nats_host, nats_port) = split_host_port(&self.addresses.message_bus)?;
        let config = RouterConfig {
            port,
            nats: vec![NatsEndpoint {
                host: nats_host,
                port: nats_port,
            }],
            logging: RouterLogging {
                file: PathBuf::from("/dev/stdout"),
                level: self.log_level.clone(),
            },
            prune_stale_droplets_interval: "5s".to_string(),
            droplet_stale_threshold: "10s".to_string(),
            start_response_delay_interval: "1s".to_string(),
        };
        let path = write_config(&self.scratch_dir, "router-config", Encoding::Yaml, &config)?;
        let owned = vec![path.clone()];
        Ok(desc
            .arg("-c")
            .arg(path)
            .on_cleanup(move || remove_all(&owned)))
    }

    /// SSH proxy, configured through a JSON file removed on cleanup.
    ///
    /// # Errors
    /// Returns an error if no executable is configured or the config cannot
    /// be written.
    pub fn ssh_proxy(&self, extra: &[&str]) -> Result<ProcessDescriptor> {
        let desc = self.descriptor(ServiceKind::SshProxy, "ssh-proxy")?;
        let tls = self.tls.as_ref().map(|t| &t.state_store);
        let config = SshProxyConfig {
            address: self.addresses.ssh_proxy.clone(),
            health_check_address: self.addresses.ssh_proxy_health.clone(),
            bbs_address: self.bbs_url(),
            bbs_ca_cert: tls.map(|m| m.ca_cert.clone()),
            bbs_client_cert: tls.map(|m| m.client.cert_path.clone()),
            bbs_client_key: tls.map(|m| m.client.key_path.clone()),
            enable_diego_auth: true,
            log_level: self.log_level.clone(),
        };
        let path = write_config(&self.scratch_dir, "ssh-proxy-config", Encoding::Json, &config)?;
        let owned = vec![path.clone()];
        Ok(desc
            .arg("-config")
            .arg(path)
            .args(extra)
            .on_cleanup(move || remove_all(&owned)))
    }

    /// Single-node registry agent, configured through a JSON file. Cleanup
    /// removes the file and the agent's data directory.
    ///
    /// # Errors
    /// Returns an error if no executable is configured, a port cannot be
    /// allocated, or the config cannot be written.
    pub fn consul(&self, extra: &[&str]) -> Result<ProcessDescriptor> {
        let desc = self.descriptor(ServiceKind::Consul, "consul")?;
        let host = self.addresses.host().to_string();
        let ports = ConsulPorts {
            http: self.addresses.consul_port(0)?,
            dns: self.addresses.consul_port(1)?,
            serf_lan: self.addresses.consul_port(2)?,
            serf_wan: self.addresses.consul_port(3)?,
            server: self.addresses.consul_port(4)?,
        };
        let data_dir = scratch_dir(&self.scratch_dir, "consul-data")?;
        let config = ConsulConfig {
            node_name: format!("troupe-consul-{}", self.worker()),
            data_dir: data_dir.clone(),
            server: true,
            bootstrap_expect: 1,
            bind_addr: host.clone(),
            client_addr: host,
            ports,
            disable_update_check: true,
            log_level: self.log_level.clone(),
        };
        let path = match write_config(&self.scratch_dir, "consul-config", Encoding::Json, &config)
        {
            Ok(path) => path,
            Err(e) => {
                remove_all(&[data_dir]);
                return Err(e);
            }
        };
        let owned = vec![data_dir, path.clone()];
        Ok(desc
            .arg("agent")
            .arg("-config-file")
            .arg(path)
            .args(extra)
            .on_cleanup(move || remove_all(&owned)))
    }

    /// Container backend with the default stack's root filesystem.
    ///
    /// # Errors
    /// Returns an error if no executable or assets are configured, the
    /// assets carry no default root filesystem, or the depot cannot be
    /// created.
    pub fn garden(&self) -> Result<ProcessDescriptor> {
        self.garden_with(true)
    }

    /// Container backend without a default root filesystem.
    ///
    /// # Errors
    /// Returns an error if no executable or assets are configured, or the
    /// depot cannot be created.
    pub fn garden_without_default_stack(&self) -> Result<ProcessDescriptor> {
        self.garden_with(false)
    }

    fn garden_with(&self, default_stack: bool) -> Result<ProcessDescriptor> {
        let desc = self.descriptor(ServiceKind::Garden, "garden")?;
        let assets = self
            .garden_assets
            .as_ref()
            .ok_or_else(|| TopologyError::config("garden assets are not configured"))?;
        let rootfs = if default_stack {
            let rootfs = assets
                .default_rootfs
                .as_ref()
                .ok_or_else(|| TopologyError::config("garden has no default rootfs"))?;
            Some(rootfs.clone())
        } else {
            None
        };
        let (host, port) = split_host_port(&self.addresses.garden)?;
        let bin = |name: &str| assets.bin_dir.join(name);

        let depot = scratch_dir(&self.scratch_dir, "garden-depot")?;
        let mut desc = desc
            .arg("server")
            .args(["--bind-ip", host.as_str(), "--bind-port", port.to_string().as_str()])
            .arg("--depot")
            .arg(&depot)
            .arg("--runc-bin")
            .arg(bin("runc"))
            .arg("--init-bin")
            .arg(bin("init"))
            .arg("--nstar-bin")
            .arg(bin("nstar"))
            .arg("--dadoo-bin")
            .arg(bin("dadoo"))
            .arg("--tar-bin")
            .arg(bin("tar"))
            .arg("--image-plugin")
            .arg(bin("grootfs"))
            .args(["--port-pool-size", "1000", "--allow-host-access"])
            .args(["--deny-network", "0.0.0.0/0"])
            .arg("--log-level")
            .arg(&self.log_level);
        if let Some(rootfs) = rootfs {
            desc = desc.arg("--default-rootfs").arg(rootfs);
        }
        let owned = vec![depot];
        Ok(desc.on_cleanup(move || remove_all(&owned)))
    }

    /// Volume driver, returned with the directory it registers its spec
    /// file in. Cleanup removes the driver's mount and spec directories.
    ///
    /// # Errors
    /// Returns an error if no executable is configured or the directories
    /// cannot be created.
    pub fn volume_driver(&self, extra: &[&str]) -> Result<(ProcessDescriptor, PathBuf)> {
        let desc = self.descriptor(ServiceKind::VolumeDriver, "local-driver")?;
        let config_dir = scratch_dir(&self.scratch_dir, "volman-driver")?;
        let drivers_path = config_dir.join(format!("node-{}", self.worker()));
        if let Err(e) = std::fs::create_dir_all(&drivers_path) {
            remove_all(&[config_dir]);
            return Err(TopologyError::io(&drivers_path, e));
        }
        let owned = vec![config_dir.clone()];
        let desc = desc
            .arg("-listenAddr")
            .arg(&self.addresses.volume_driver)
            .arg("-debugAddr")
            .arg(&self.addresses.volume_driver_debug)
            .arg("-mountDir")
            .arg(&config_dir)
            .arg("-driversPath")
            .arg(&drivers_path)
            .args(extra)
            .on_cleanup(move || remove_all(&owned));
        Ok((desc, drivers_path))
    }
}
