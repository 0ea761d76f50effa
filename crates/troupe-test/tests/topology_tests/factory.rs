//! Factory-built descriptors driven through the harness with stand-in
//! executables that print each kind's readiness marker.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use troupe_core::{Group, OutputMode, ProcessState, SupervisorConfig};
use troupe_tls::KeyStrength;
use troupe_test::TopologyHarness;
use troupe_topology::{ServiceKind, TopologyConfig};

/// Writes an executable script that prints `marker` and sleeps.
fn stand_in(dir: &Path, kind: ServiceKind, marker: &str) -> PathBuf {
    let path = dir.join(kind.executable_key());
    let quoted = marker.replace('\'', r"'\''");
    std::fs::write(&path, format!("#!/bin/sh\necho '{quoted}'\nexec sleep 30\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn topology(bin: &Path, worker: u16) -> TopologyConfig {
    let mut config = TopologyConfig::default()
        .with_worker_index(worker)
        .with_key_strength(KeyStrength::EcdsaP256);
    let names = [
        (ServiceKind::MessageBus, "gnatsd"),
        (ServiceKind::StateStore, "bbs"),
        (ServiceKind::CellAgent, "rep-0"),
        (ServiceKind::Auctioneer, "auctioneer"),
        (ServiceKind::Router, "router"),
    ];
    for (kind, name) in names {
        let path = stand_in(bin, kind, &kind.marker_for(name));
        config = config.with_executable(kind.executable_key(), path);
    }
    config
}

#[tokio::test]
async fn control_plane_comes_up_and_tears_down() {
    let bin = tempfile::tempdir().unwrap();
    let harness = TopologyHarness::new(
        topology(bin.path(), 4),
        SupervisorConfig::default().with_output(OutputMode::Silent),
    )
    .unwrap();
    let maker = harness.maker();

    let rep = maker.cell_agent(0, |_| {}).unwrap();
    let router = maker.router().unwrap();
    let plane = Group::ordered("control-plane")
        .member(maker.nats(&[]).unwrap())
        .member(maker.bbs(&[]).unwrap())
        .member(Group::parallel("workers").members([rep, maker.auctioneer(&[]).unwrap(), router]));

    let id = harness.invoke(plane).await.unwrap();
    let snaps = harness.supervisor().snapshots(id).unwrap();
    assert_eq!(snaps.len(), 5);
    assert!(snaps.iter().all(|s| s.state == ProcessState::Ready));

    let run_dir = harness.run_dir().to_path_buf();
    let sup = harness.supervisor().clone();
    harness.teardown().await.unwrap();
    assert!(sup.processes().iter().all(|s| s.state == ProcessState::Exited));
    assert!(!run_dir.exists());
}

#[tokio::test]
async fn missing_executable_fails_before_launch() {
    let bin = tempfile::tempdir().unwrap();
    let harness = TopologyHarness::new(
        topology(bin.path(), 5),
        SupervisorConfig::default().with_output(OutputMode::Silent),
    )
    .unwrap();
    assert!(harness.maker().ssh_proxy(&[]).is_err());
    assert!(harness.supervisor().processes().is_empty());
    harness.teardown().await.unwrap();
}
