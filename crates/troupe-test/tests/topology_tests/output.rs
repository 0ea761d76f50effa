//! Output capture around readiness.

use std::time::Duration;

use troupe_core::ProcessState;
use troupe_test::eventually;

use super::{sh, supervisor};

#[tokio::test]
async fn output_is_captured_after_readiness() {
    let sup = supervisor();
    let desc = sh(
        "chatty",
        "echo booting; echo chatty.started; sleep 0.3; \
         echo late-line; echo oops >&2; exec sleep 30",
    )
    .ready_when("chatty.started");
    let id = sup.invoke(desc).await.unwrap();
    assert_eq!(sup.snapshot(id).unwrap().state, ProcessState::Ready);

    let sup_ref = &sup;
    let lines = eventually(move || sup_ref.output(id))
        .within(Duration::from_secs(5))
        .every(Duration::from_millis(50))
        .until(|out| out.as_ref().is_ok_and(|lines| lines.iter().any(|l| l == "oops")))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(lines[..2], ["booting", "chatty.started"]);
    assert!(lines.iter().any(|l| l == "late-line"));
    sup.shutdown_all().await.unwrap();
}

#[tokio::test]
async fn output_survives_exit() {
    let sup = supervisor();
    let desc =
        sh("brief", "echo brief.started; echo last-words; exit 0").ready_when("brief.started");
    let id = sup.invoke(desc).await.unwrap();
    sup.wait(id).await.unwrap();

    let tail = sup.snapshot(id).unwrap().output_tail;
    assert!(tail.iter().any(|l| l == "last-words"), "{tail:?}");
    assert_eq!(sup.output(id).await.unwrap(), tail);
}

#[tokio::test]
async fn marker_on_stderr_counts() {
    let sup = supervisor();
    let desc = sh("stderr-only", "echo stderr-only.started >&2; exec sleep 30")
        .ready_when("stderr-only.started");
    let id = sup.invoke(desc).await.unwrap();
    assert!(sup.snapshot(id).unwrap().was_ready);
    sup.shutdown_all().await.unwrap();
}
