//! Per-worker topology harness.

use std::path::Path;

use tempfile::TempDir;
use troupe_core::{ExitErrors, HandleId, Member, Supervisor, SupervisorConfig};
use troupe_tls::CertAuthority;
use troupe_topology::{ComponentMaker, TopologyConfig, WorkerIndex};

use crate::error::{Result, TestError};

/// One test worker's supervisor, certificate authority and descriptor
/// factory, sharing a run directory that is removed on drop.
pub struct TopologyHarness {
    supervisor: Supervisor,
    ca: CertAuthority,
    maker: ComponentMaker,
    topology: TopologyConfig,
    // Declared last so it outlives everything written into it.
    run_dir: TempDir,
}

impl TopologyHarness {
    /// Creates the run directory and CA, issues TLS material and builds the
    /// supervisor.
    ///
    /// # Errors
    /// Returns an error if either configuration is invalid, the run
    /// directory cannot be created, or issuance fails.
    pub fn new(topology: TopologyConfig, supervisor: SupervisorConfig) -> Result<Self> {
        topology.validate()?;
        let supervisor = Supervisor::new(supervisor)?;
        let worker = topology.resolved_worker_index()?;
        let run_dir = tempfile::Builder::new()
            .prefix(&format!("troupe-run-{worker}-"))
            .tempdir()?;
        let ca = CertAuthority::create_with(
            run_dir.path(),
            &topology.ca_common_name,
            topology.key_strength,
        )?;
        let maker =
            ComponentMaker::from_config(&topology, Some(&ca))?.with_scratch_dir(run_dir.path());
        tracing::info!(
            worker = %worker,
            run_dir = %run_dir.path().display(),
            strength = %topology.key_strength,
            "harness ready"
        );
        Ok(Self {
            supervisor,
            ca,
            maker,
            topology,
            run_dir,
        })
    }

    /// Returns the supervisor.
    #[must_use]
    pub const fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Returns the run's certificate authority.
    #[must_use]
    pub const fn ca(&self) -> &CertAuthority {
        &self.ca
    }

    /// Returns the descriptor factory.
    #[must_use]
    pub const fn maker(&self) -> &ComponentMaker {
        &self.maker
    }

    /// Returns the topology configuration.
    #[must_use]
    pub const fn topology(&self) -> &TopologyConfig {
        &self.topology
    }

    /// Returns the run directory.
    #[must_use]
    pub fn run_dir(&self) -> &Path {
        self.run_dir.path()
    }

    /// Returns this harness's worker index.
    #[must_use]
    pub const fn worker(&self) -> WorkerIndex {
        self.maker.worker()
    }

    /// Invokes `member` on the harness's supervisor.
    ///
    /// # Errors
    /// Returns the supervisor's invoke error.
    pub async fn invoke(&self, member: impl Into<Member>) -> Result<HandleId> {
        Ok(self.supervisor.invoke(member).await?)
    }

    /// Stops every invoked handle and removes the run directory.
    ///
    /// # Errors
    /// Returns every exit error collected while stopping, plus a failure to
    /// remove the run directory.
    pub async fn teardown(self) -> std::result::Result<(), ExitErrors> {
        let mut errors = match self.supervisor.shutdown_all().await {
            Ok(()) => ExitErrors::new(),
            Err(errors) => errors,
        };
        let path = self.run_dir.path().to_path_buf();
        if let Err(e) = self.run_dir.close() {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove run dir");
            errors.push(e.into());
        }
        tracing::info!(errors = errors.len(), "harness torn down");
        errors.into_result()
    }
}

impl std::fmt::Debug for TopologyHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyHarness")
            .field("worker", &self.worker())
            .field("run_dir", &self.run_dir.path())
            .finish_non_exhaustive()
    }
}

impl TryFrom<TopologyConfig> for TopologyHarness {
    type Error = TestError;

    fn try_from(topology: TopologyConfig) -> Result<Self> {
        Self::new(topology, SupervisorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use troupe_core::{OutputMode, ProcessDescriptor, ProcessState};
    use troupe_tls::KeyStrength;

    use super::*;

    fn harness(worker: u16) -> TopologyHarness {
        TopologyHarness::new(
            TopologyConfig::default()
                .with_worker_index(worker)
                .with_key_strength(KeyStrength::EcdsaP256),
            SupervisorConfig::default().with_output(OutputMode::Silent),
        )
        .unwrap()
    }

    #[test]
    fn test_new_issues_tls_into_run_dir() {
        let h = harness(3);
        assert_eq!(h.worker(), WorkerIndex(3));
        assert!(h.ca().ca_cert().starts_with(h.run_dir()));
        let tls = h.maker().tls().unwrap();
        h.ca().verify(&tls.state_store.server).unwrap();
        assert!(h.maker().bbs_url().ends_with(":13010"));
    }

    #[test]
    fn test_invalid_topology_rejected() {
        let err =
            TopologyHarness::try_from(TopologyConfig::default().with_worker_index(50)).unwrap_err();
        assert!(matches!(err, TestError::Topology(_)));
    }

    #[tokio::test]
    async fn test_teardown_stops_everything_and_removes_run_dir() {
        let h = harness(0);
        let desc = ProcessDescriptor::new("sleeper", "/bin/sh")
            .args(["-c", "echo sleeper.started; exec sleep 30"])
            .ready_within("sleeper.started", Duration::from_secs(5));
        let id = h.invoke(desc).await.unwrap();
        let sup = h.supervisor().clone();
        let run_dir = h.run_dir().to_path_buf();

        h.teardown().await.unwrap();
        assert_eq!(sup.snapshot(id).unwrap().state, ProcessState::Exited);
        assert!(!run_dir.exists());
    }
}
