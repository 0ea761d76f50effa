//! Group start failures and teardown order.

use std::time::Duration;

use troupe_core::{ExitStatus, FailureReason, Group, ProcessState, Signal, SupervisorError};

use super::{mute, server, sh, supervisor};

#[tokio::test]
async fn ordered_group_unwinds_started_members() {
    let sup = supervisor();
    let group = Group::ordered("chain").members([
        server("first"),
        mute("second", Duration::from_millis(500)),
        server("third"),
    ]);

    let err = sup.invoke(group).await.unwrap_err();
    assert!(err.is_readiness_timeout(), "{err}");
    assert_eq!(err.process_name(), Some("second"));

    assert!(sup.lookup("third").is_none(), "third must never be launched");
    let first = sup.snapshot(sup.lookup("first").unwrap()).unwrap();
    assert_eq!(first.signals, vec![Signal::Term]);
    assert_eq!(first.state, ProcessState::Exited);
    assert!(sup.handles().is_empty());
}

#[tokio::test]
async fn parallel_group_stops_each_sibling_once() {
    let sup = supervisor();
    let crasher =
        sh("crasher", "sleep 0.2; exit 3").ready_within("crasher.started", Duration::from_secs(5));
    let group = Group::parallel("fanout").members([server("left"), crasher, server("right")]);

    let err = sup.invoke(group).await.unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::UnexpectedExit {
            ref name,
            status: ExitStatus::Code(3),
        } if name == "crasher"
    ));

    for name in ["left", "right"] {
        let snap = sup.snapshot(sup.lookup(name).unwrap()).unwrap();
        assert_eq!(snap.signals, vec![Signal::Term], "{name}");
        assert!(snap.state.is_terminal(), "{name}");
    }
    assert!(sup.snapshot(sup.lookup("crasher").unwrap()).unwrap().signals.is_empty());
}

#[tokio::test]
async fn starting_sibling_stopped_during_unwind_is_not_a_readiness_timeout() {
    let sup = supervisor();
    let crasher =
        sh("crasher", "sleep 0.2; exit 3").ready_within("crasher.started", Duration::from_secs(5));
    let slow = sh(
        "slow",
        "trap 'sleep 0.8; exit 0' TERM; while true; do sleep 0.05; done",
    )
    .ready_within("slow.started", Duration::from_millis(600));
    let group = Group::parallel("fanout").members([crasher, slow]);

    let err = sup.invoke(group).await.unwrap_err();
    assert!(err.is_unexpected_exit(), "{err}");

    let snap = sup.snapshot(sup.lookup("slow").unwrap()).unwrap();
    assert!(
        snap.signals == vec![Signal::Term] || snap.signals == vec![Signal::Term, Signal::Kill],
        "{:?}",
        snap.signals
    );
    assert!(
        !matches!(snap.failure, Some(FailureReason::ReadinessTimeout { .. })),
        "{:?}",
        snap.failure
    );
    assert!(snap.state.is_terminal());
}

#[tokio::test]
async fn group_unwind_signal_overrides_default() {
    let sup = supervisor();
    let group = Group::ordered("interrupted")
        .members([server("a"), mute("b", Duration::from_millis(300))])
        .with_unwind_signal(Signal::Int);

    sup.invoke(group).await.unwrap_err();
    let a = sup.snapshot(sup.lookup("a").unwrap()).unwrap();
    assert_eq!(a.signals, vec![Signal::Int]);
}

#[tokio::test]
async fn nested_groups_start_in_order_and_stop_in_reverse() {
    let sup = supervisor();
    let edge = Group::parallel("edge").members([server("router"), server("proxy")]);
    let topology = Group::ordered("topology")
        .member(server("bus"))
        .member(server("store"))
        .member(edge);

    let id = sup.invoke(topology).await.unwrap();
    let names: Vec<_> = sup.snapshots(id).unwrap().into_iter().map(|s| s.name).collect();
    assert_eq!(names[..2], ["bus", "store"]);
    assert_eq!(names.len(), 4);

    sup.stop(id, Signal::Term).await.unwrap();
    let snaps = sup.processes();
    assert!(snaps.iter().all(|s| s.state == ProcessState::Exited));
    assert!(snaps.iter().all(|s| s.signals == vec![Signal::Term]));
}

#[tokio::test]
async fn shutdown_all_reports_every_failure() {
    let sup = supervisor();
    let healthy = sup.invoke(server("healthy")).await.unwrap();
    let doomed = sup
        .invoke(sh("doomed", "echo doomed.started; sleep 0.2; exit 7").ready_when("doomed.started"))
        .await
        .unwrap();
    let also_doomed = sup
        .invoke(
            sh("also-doomed", "echo also-doomed.started; sleep 0.2; exit 8")
                .ready_when("also-doomed.started"),
        )
        .await
        .unwrap();

    // Both crash on their own; only the healthy process is stopped.
    let _ = sup.wait(doomed).await;
    let _ = sup.wait(also_doomed).await;

    let errors = sup.shutdown_all().await.unwrap_err();
    assert_eq!(errors.len(), 2);
    assert!(errors.errors().iter().all(SupervisorError::is_unexpected_exit));
    assert_eq!(sup.snapshot(healthy).unwrap().state, ProcessState::Exited);
}
