//! Per-process worker tasks.
//!
//! Each launched process is owned by exactly one worker task. The worker owns
//! the `Child`, the output tail and the lifecycle state; everyone else sees the
//! process through [`WorkerHandle`]: snapshots over a `watch` channel and
//! commands over an unbounded `mpsc` channel.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::config::SupervisorConfig;
use crate::descriptor::{Cleanup, ProcessDescriptor};
use crate::error::{Result, SupervisorError};
use crate::output::{OutputSink, OutputTail, Stream};
use crate::readiness::ReadinessDetector;
use crate::types::{ExitStatus, FailureReason, HandleId, ProcessSnapshot, ProcessState, Signal};

// =============================================================================
// Commands and handle
// =============================================================================

enum Command {
    Signal {
        signal: Signal,
        reply: oneshot::Sender<Result<bool>>,
    },
    Output {
        reply: oneshot::Sender<Vec<String>>,
    },
}

/// Caller-side view of one worker.
#[derive(Debug, Clone)]
pub(crate) struct WorkerHandle {
    name: String,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ProcessSnapshot>,
}

impl WorkerHandle {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Returns the latest published snapshot.
    pub(crate) fn snapshot(&self) -> ProcessSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Waits until the process is ready or has failed.
    pub(crate) async fn wait_ready(&self) -> Result<()> {
        let snap = self
            .wait_until(|s| s.was_ready || s.failure.is_some() || s.state.is_terminal())
            .await;
        if let Some(err) = failure_error(&snap) {
            return Err(err);
        }
        if snap.was_ready {
            Ok(())
        } else {
            Err(SupervisorError::UnexpectedExit {
                name: snap.name,
                status: snap.exit.unwrap_or(ExitStatus::Unreaped),
            })
        }
    }

    /// Waits until the process is terminal and returns its final snapshot.
    pub(crate) async fn wait_exit(&self) -> ProcessSnapshot {
        self.wait_until(|s| s.state.is_terminal()).await
    }

    async fn wait_until(&self, pred: impl FnMut(&ProcessSnapshot) -> bool) -> ProcessSnapshot {
        let mut rx = self.snapshot.clone();
        let result = rx.wait_for(pred).await.map(|snap| snap.clone());
        // The worker publishes its final snapshot before it drops the sender.
        result.unwrap_or_else(|_| rx.borrow().clone())
    }

    /// Delivers a signal. Returns false if the process had already exited.
    pub(crate) async fn signal(&self, signal: Signal) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Signal { signal, reply }).is_err() {
            return Ok(false);
        }
        rx.await.unwrap_or(Ok(false))
    }

    /// Returns the current output tail.
    pub(crate) async fn output(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Output { reply }).is_ok() {
            if let Ok(lines) = rx.await {
                return lines;
            }
        }
        self.snapshot.borrow().output_tail.clone()
    }
}

/// Maps a snapshot's failure classification to the error callers see.
pub(crate) fn failure_error(snap: &ProcessSnapshot) -> Option<SupervisorError> {
    let name = snap.name.clone();
    let err = match snap.failure.as_ref()? {
        FailureReason::Spawn(reason) => SupervisorError::Spawn {
            name,
            reason: reason.clone(),
        },
        FailureReason::ReadinessTimeout { marker, timeout_ms } => {
            SupervisorError::ReadinessTimeout {
                name,
                marker: marker.clone(),
                timeout: Duration::from_millis(*timeout_ms),
            }
        }
        FailureReason::UnexpectedExit(status) => SupervisorError::UnexpectedExit {
            name,
            status: *status,
        },
        FailureReason::Shutdown(status) => SupervisorError::Shutdown {
            name,
            status: *status,
        },
    };
    Some(err)
}

/// Spawns the worker task for `desc` and returns its handle.
pub(crate) fn spawn(
    id: HandleId,
    desc: ProcessDescriptor,
    config: &SupervisorConfig,
) -> WorkerHandle {
    let name = desc.name().to_string();
    let snapshot = ProcessSnapshot::pending(id, name.clone());
    let (snap_tx, snap_rx) = watch::channel(snapshot.clone());
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

    let detector = match desc.readiness() {
        Some(check) => ReadinessDetector::new(
            check.marker_str(),
            check.timeout().unwrap_or(config.readiness_timeout),
        ),
        None => ReadinessDetector::immediate(),
    };

    let worker = Worker {
        name: name.clone(),
        sink: OutputSink::new(config.output, &name, desc.ansi_color()),
        tail: OutputTail::new(config.output_tail_lines),
        cleanup: desc.cleanup().cloned(),
        snapshot,
        tx: snap_tx,
        detector,
        reap_timeout: config.reap_timeout,
        drain_timeout: config.drain_timeout,
    };
    tokio::spawn(worker.run(desc, cmd_rx));

    WorkerHandle {
        name,
        commands: cmd_tx,
        snapshot: snap_rx,
    }
}

// =============================================================================
// Worker
// =============================================================================

type Line = (Stream, String);

struct Worker {
    name: String,
    snapshot: ProcessSnapshot,
    tx: watch::Sender<ProcessSnapshot>,
    tail: OutputTail,
    sink: OutputSink,
    detector: ReadinessDetector,
    cleanup: Option<Cleanup>,
    reap_timeout: Duration,
    drain_timeout: Duration,
}

impl Worker {
    async fn run(
        mut self,
        desc: ProcessDescriptor,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut child = match desc.command().to_command().spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(
                    process = %self.name,
                    command = %desc.command(),
                    error = %e,
                    "spawn failed"
                );
                self.snapshot.state = ProcessState::Failed;
                self.snapshot.failure = Some(FailureReason::Spawn(e.to_string()));
                self.finish();
                return;
            }
        };
        drop(desc);

        let pid = child.id();
        self.snapshot.pid = pid;
        self.snapshot.state = ProcessState::Starting;
        self.detector.arm();
        tracing::info!(process = %self.name, pid = ?pid, "spawned");

        let (line_tx, mut lines) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_lines(stdout, Stream::Stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_lines(stderr, Stream::Stderr, line_tx));
        }

        if self.detector.is_immediate() && self.detector.fire() {
            self.mark_ready();
        }
        self.publish();

        let mut lines_open = true;
        let mut commands_open = true;
        let mut readiness_armed = true;
        let mut reap_deadline: Option<Instant> = None;

        let status = loop {
            let readiness_deadline = if readiness_armed {
                self.detector.deadline()
            } else {
                None
            };

            tokio::select! {
                line = lines.recv(), if lines_open => match line {
                    Some((stream, line)) => self.on_line(stream, line),
                    None => lines_open = false,
                },
                cmd = commands.recv(), if commands_open => match cmd {
                    Some(cmd) => self.on_command(cmd, pid, &mut reap_deadline),
                    None => commands_open = false,
                },
                status = child.wait() => {
                    break match status {
                        Ok(status) => ExitStatus::from_std(status),
                        Err(e) => {
                            tracing::warn!(process = %self.name, error = %e, "wait failed");
                            ExitStatus::Unreaped
                        }
                    };
                }
                () = sleep_until(readiness_deadline) => {
                    readiness_armed = false;
                    self.on_readiness_timeout(pid, &mut reap_deadline);
                }
                () = sleep_until(reap_deadline) => {
                    tracing::warn!(
                        process = %self.name,
                        pid = ?pid,
                        "process not reaped after kill"
                    );
                    break ExitStatus::Unreaped;
                }
            }
        };

        // The exit can win the race against lines still queued in the side
        // channel, including the one carrying the marker.
        let deadline = Instant::now() + self.drain_timeout;
        while let Ok(Some((stream, line))) = tokio::time::timeout_at(deadline, lines.recv()).await {
            self.absorb_line(stream, line);
        }

        self.classify_exit(status);
        self.finish();
    }

    fn on_line(&mut self, stream: Stream, line: String) {
        if self.absorb_line(stream, line) {
            self.publish();
        }
    }

    /// Forwards, scans and buffers one line. Returns true if it made the
    /// process ready.
    fn absorb_line(&mut self, stream: Stream, line: String) -> bool {
        self.record_line(stream, &line);
        let fired = self.detector.scan(&line);
        self.tail.push(line);
        if fired && self.snapshot.state == ProcessState::Starting {
            self.mark_ready();
            return true;
        }
        false
    }

    fn record_line(&self, stream: Stream, line: &str) {
        self.sink.forward(&self.name, stream, line);
    }

    fn mark_ready(&mut self) {
        self.snapshot.state = ProcessState::Ready;
        self.snapshot.was_ready = true;
        tracing::info!(process = %self.name, pid = ?self.snapshot.pid, "ready");
    }

    fn on_command(&mut self, cmd: Command, pid: Option<u32>, reap_deadline: &mut Option<Instant>) {
        match cmd {
            Command::Signal { signal, reply } => {
                let result = self.deliver(pid, signal, reap_deadline);
                if matches!(result, Ok(true)) {
                    if signal.is_termination() {
                        // A stopped process can no longer miss its marker.
                        self.detector.disarm();
                        if matches!(
                            self.snapshot.state,
                            ProcessState::Starting | ProcessState::Ready
                        ) {
                            self.snapshot.state = ProcessState::Stopping;
                        }
                    }
                    self.publish();
                }
                let _ = reply.send(result);
            }
            Command::Output { reply } => {
                let _ = reply.send(self.tail.to_vec());
            }
        }
    }

    fn on_readiness_timeout(&mut self, pid: Option<u32>, reap_deadline: &mut Option<Instant>) {
        let marker = self.detector.marker().unwrap_or_default().to_string();
        let timeout = self.detector.timeout();
        tracing::warn!(
            process = %self.name,
            marker = %marker,
            timeout = ?timeout,
            "readiness marker not observed, killing"
        );
        self.snapshot.failure = Some(FailureReason::ReadinessTimeout {
            marker,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        });
        if let Err(e) = self.deliver(pid, Signal::Kill, reap_deadline) {
            tracing::warn!(process = %self.name, error = %e, "kill after readiness timeout failed");
        }
        self.publish();
    }

    /// Sends `signal` to the child and records it. Returns false if the
    /// process is already gone.
    fn deliver(
        &mut self,
        pid: Option<u32>,
        signal: Signal,
        reap_deadline: &mut Option<Instant>,
    ) -> Result<bool> {
        let Some(pid) = pid else {
            return Ok(false);
        };
        let delivered =
            send_signal(pid, signal).map_err(|e| SupervisorError::signal(&self.name, e))?;
        if delivered {
            tracing::debug!(process = %self.name, pid = pid, signal = ?signal, "delivered signal");
            self.snapshot.signals.push(signal);
            if signal == Signal::Kill && reap_deadline.is_none() {
                *reap_deadline = Some(Instant::now() + self.reap_timeout);
            }
        }
        Ok(delivered)
    }

    fn classify_exit(&mut self, status: ExitStatus) {
        self.snapshot.exit = Some(status);
        if self.snapshot.failure.is_some() {
            self.snapshot.state = ProcessState::Failed;
        } else if self.snapshot.stop_requested() {
            match status {
                ExitStatus::Code(0) | ExitStatus::Signaled(_) => {
                    self.snapshot.state = ProcessState::Exited;
                }
                ExitStatus::Code(_) | ExitStatus::Unreaped => {
                    self.snapshot.state = ProcessState::Failed;
                    self.snapshot.failure = Some(FailureReason::Shutdown(status));
                }
            }
        } else if self.snapshot.was_ready && status.success() {
            self.snapshot.state = ProcessState::Exited;
        } else {
            tracing::warn!(process = %self.name, status = %status, "exited unexpectedly");
            self.snapshot.state = ProcessState::Failed;
            self.snapshot.failure = Some(FailureReason::UnexpectedExit(status));
        }
        tracing::info!(
            process = %self.name,
            status = %status,
            state = %self.snapshot.state,
            "exited"
        );
    }

    /// Runs cleanup, then publishes the terminal snapshot.
    fn finish(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            if cleanup.run_once() {
                tracing::debug!(process = %self.name, "cleanup ran");
            }
        }
        self.publish();
    }

    fn publish(&mut self) {
        self.snapshot.output_tail = self.tail.to_vec();
        self.tx.send_replace(self.snapshot.clone());
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn read_lines<R>(reader: R, stream: Stream, tx: mpsc::UnboundedSender<Line>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if tx.send((stream, line)).is_err() {
                    break;
                }
            }
        }
    }
}

/// Sends a signal to `pid`. Returns `Ok(false)` if no such process exists.
#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> std::result::Result<bool, String> {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal as NixSignal};
    use nix::unistd::Pid;

    let nix_sig = match signal {
        Signal::Hup => NixSignal::SIGHUP,
        Signal::Int => NixSignal::SIGINT,
        Signal::Quit => NixSignal::SIGQUIT,
        Signal::Term => NixSignal::SIGTERM,
        Signal::Kill => NixSignal::SIGKILL,
        Signal::Usr1 => NixSignal::SIGUSR1,
        Signal::Usr2 => NixSignal::SIGUSR2,
        Signal::Stop => NixSignal::SIGSTOP,
        Signal::Cont => NixSignal::SIGCONT,
    };

    #[allow(clippy::cast_possible_wrap)] // PID always fits in i32 on Unix
    match signal::kill(Pid::from_raw(pid as i32), nix_sig) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(format!("kill failed: {e}")),
    }
}

#[cfg(not(unix))]
fn send_signal(_pid: u32, signal: Signal) -> std::result::Result<bool, String> {
    Err(format!("{signal} not supported on this platform"))
}
