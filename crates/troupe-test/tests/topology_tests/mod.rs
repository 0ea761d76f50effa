//! End-to-end topology scenarios.

// Allow test-specific patterns that are denied in production code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod cleanup;
mod factory;
mod lifecycle;
mod output;
mod unwind;

use std::time::Duration;

use troupe_core::{OutputMode, ProcessDescriptor, Supervisor, SupervisorConfig};

/// Supervisor with silent output and a short stop timeout.
pub fn supervisor() -> Supervisor {
    troupe_test::init_tracing();
    Supervisor::new(
        SupervisorConfig::default()
            .with_output(OutputMode::Silent)
            .with_stop_timeout(Duration::from_secs(1)),
    )
    .unwrap()
}

/// Shell child running `script`.
pub fn sh(name: &str, script: &str) -> ProcessDescriptor {
    ProcessDescriptor::new(name, "/bin/sh").args(["-c", script])
}

/// Long-running child that announces `<name>.started`.
pub fn server(name: &str) -> ProcessDescriptor {
    sh(name, &format!("echo {name}.started; exec sleep 30"))
        .ready_within(format!("{name}.started"), Duration::from_secs(5))
}

/// Long-running child that never announces readiness.
pub fn mute(name: &str, timeout: Duration) -> ProcessDescriptor {
    sh(name, "exec sleep 30").ready_within(format!("{name}.started"), timeout)
}
