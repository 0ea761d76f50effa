//! Readiness, exit classification and signal delivery.

use std::time::{Duration, Instant};

use troupe_core::{ExitStatus, FailureReason, ProcessState, Signal, SupervisorError};
use troupe_test::{consistently, eventually};

use super::{mute, server, sh, supervisor};

#[tokio::test]
async fn readiness_timeout_fails_within_window() {
    let sup = supervisor();
    let desc = mute("A", Duration::from_secs(2));

    let started = Instant::now();
    let err = sup.invoke(desc).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_readiness_timeout(), "{err}");
    assert!(err.to_string().contains("A.started"));
    assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");

    let snap = sup.snapshot(sup.lookup("A").unwrap()).unwrap();
    assert_eq!(snap.state, ProcessState::Failed);
    assert!(!snap.was_ready);
    assert!(matches!(snap.failure, Some(FailureReason::ReadinessTimeout { .. })));
}

#[tokio::test]
async fn external_kill_surfaces_as_unexpected_exit() {
    let sup = supervisor();
    let id = sup.invoke(server("victim")).await.unwrap();
    let pid = sup.snapshot(id).unwrap().pid.unwrap();

    let status = std::process::Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .status()
        .unwrap();
    assert!(status.success());

    let errors = sup.wait(id).await.unwrap_err();
    assert_eq!(errors.len(), 1);
    let err = &errors.errors()[0];
    assert!(err.is_unexpected_exit(), "{err}");
    assert!(matches!(
        err,
        SupervisorError::UnexpectedExit { status: ExitStatus::Signaled(9), .. }
    ));
    assert!(sup.snapshot(id).unwrap().signals.is_empty());
}

#[tokio::test]
async fn early_exit_before_readiness_fails_invoke() {
    let sup = supervisor();
    let desc = sh("flaky", "exit 4").ready_within("flaky.started", Duration::from_secs(5));
    let err = sup.invoke(desc).await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::UnexpectedExit { status: ExitStatus::Code(4), .. }
    ));
}

#[tokio::test]
async fn missing_executable_is_spawn_error() {
    let sup = supervisor();
    let desc = troupe_core::ProcessDescriptor::new("ghost", "/nonexistent/troupe/ghost");
    let err = sup.invoke(desc).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Spawn { ref name, .. } if name == "ghost"));
}

#[tokio::test]
async fn signals_are_recorded_in_delivery_order() {
    let sup = supervisor();
    let desc = sh(
        "trapper",
        "trap 'echo got-hup' HUP; trap 'echo got-usr1' USR1; \
         echo trapper.started; while true; do sleep 0.1; done",
    )
    .ready_within("trapper.started", Duration::from_secs(5));
    let id = sup.invoke(desc).await.unwrap();

    sup.signal(id, Signal::Hup).await.unwrap();
    let sup_ref = &sup;
    eventually(move || sup_ref.output(id))
        .within(Duration::from_secs(5))
        .every(Duration::from_millis(50))
        .until(|out| out.as_ref().is_ok_and(|lines| lines.iter().any(|l| l == "got-hup")))
        .await
        .unwrap();
    sup.signal(id, Signal::Usr1).await.unwrap();
    assert_eq!(sup.snapshot(id).unwrap().state, ProcessState::Ready);

    sup.stop(id, Signal::Term).await.unwrap();
    let snap = sup.snapshot(id).unwrap();
    assert_eq!(snap.signals, vec![Signal::Hup, Signal::Usr1, Signal::Term]);
    assert_eq!(snap.state, ProcessState::Exited);
}

#[tokio::test]
async fn ready_process_stays_ready() {
    let sup = supervisor();
    let id = sup.invoke(server("steady")).await.unwrap();
    let sup_ref = &sup;
    consistently(move || async move { sup_ref.snapshot(id).map(|s| s.state).ok() })
        .for_duration(Duration::from_millis(300))
        .every(Duration::from_millis(50))
        .holds(|state| *state == Some(ProcessState::Ready))
        .await
        .unwrap();
    sup.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn clean_exit_after_readiness_is_not_an_error() {
    let sup = supervisor();
    let desc = sh("oneshot", "echo oneshot.started; sleep 0.2").ready_when("oneshot.started");
    let id = sup.invoke(desc).await.unwrap();
    sup.wait(id).await.unwrap();
    let snap = sup.snapshot(id).unwrap();
    assert_eq!(snap.state, ProcessState::Exited);
    assert_eq!(sup.exit_code(id).unwrap(), Some(0));
}
