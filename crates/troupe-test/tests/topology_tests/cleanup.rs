//! Cleanup callbacks run exactly once on every exit path.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use troupe_core::{ProcessDescriptor, ProcessState, Signal};

use super::{mute, server, sh, supervisor};

fn counted(desc: ProcessDescriptor) -> (ProcessDescriptor, Arc<AtomicU32>) {
    let runs = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&runs);
    let desc = desc.on_cleanup(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (desc, runs)
}

#[tokio::test]
async fn cleanup_runs_once_after_graceful_stop() {
    let sup = supervisor();
    let (desc, runs) = counted(server("graceful"));
    let id = sup.invoke(desc).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    assert_ok!(sup.stop(id, Signal::Term).await);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // A second teardown finds nothing left to clean.
    assert_ok!(sup.stop(id, Signal::Term).await);
    assert_ok!(sup.shutdown_all().await);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cleanup_runs_once_after_forced_kill() {
    let sup = supervisor();
    let (desc, runs) = counted(
        sh(
            "stubborn",
            "trap '' TERM; echo stubborn.started; while true; do sleep 0.1; done",
        )
        .ready_when("stubborn.started"),
    );
    let id = sup.invoke(desc).await.unwrap();

    assert_ok!(sup.stop(id, Signal::Term).await);
    let snap = sup.snapshot(id).unwrap();
    assert_eq!(snap.signals, vec![Signal::Term, Signal::Kill]);
    assert_eq!(snap.state, ProcessState::Exited);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cleanup_runs_once_after_readiness_timeout() {
    let sup = supervisor();
    let (desc, runs) = counted(mute("late", Duration::from_millis(300)));
    assert_err!(sup.invoke(desc).await);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    assert_ok!(sup.shutdown_all().await);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cleanup_runs_once_after_spawn_failure() {
    let sup = supervisor();
    let (desc, runs) = counted(ProcessDescriptor::new("absent", "/nonexistent/troupe/absent"));
    assert_err!(sup.invoke(desc).await);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cleanup_runs_once_after_crash() {
    let sup = supervisor();
    let (desc, runs) = counted(
        sh("crashy", "echo crashy.started; sleep 0.1; exit 1").ready_when("crashy.started"),
    );
    let id = sup.invoke(desc).await.unwrap();
    assert_err!(sup.wait(id).await);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
