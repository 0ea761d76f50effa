//! Core types for process lifecycle management.
//!
//! Handles are opaque UUIDs rather than indices so a handle never aliases a
//! different process after the arena changes. State transitions are explicit.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier for a launched process or group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(uuid::Uuid);

impl HandleId {
    /// Creates a new random handle ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for HandleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process lifecycle state.
///
/// ```text
/// Pending → Starting → Ready → Stopping → Exited
///              ↓         ↓
///            Failed ←────┘
/// ```
///
/// `Starting → Failed` happens when the readiness marker is not seen in time
/// or the process dies first. `Ready → Failed` happens when the process dies
/// before anyone asked it to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    /// Registered with the supervisor, not yet spawned.
    Pending,
    /// Spawned, readiness marker not yet observed.
    Starting,
    /// Readiness marker observed.
    Ready,
    /// A terminating signal was delivered.
    Stopping,
    /// Exited after a stop request (or completed on its own with status 0).
    Exited,
    /// Failed to start, missed its readiness deadline, or crashed.
    Failed,
}

impl ProcessState {
    /// Returns true once the process has been reaped (or given up on).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited | Self::Failed)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Exited => "exited",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    /// Exited with a status code.
    Code(i32),
    /// Terminated by a signal number.
    Signaled(i32),
    /// Never reaped: the process outlived a forceful kill and the reap timeout.
    Unreaped,
}

impl ExitStatus {
    /// Returns true if the process exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self, Self::Code(0))
    }

    /// Returns the exit code, if the process exited normally.
    #[must_use]
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::Code(code) => Some(*code),
            _ => None,
        }
    }

    /// Converts a std exit status.
    #[must_use]
    pub fn from_std(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return Self::Signaled(sig);
            }
        }
        Self::Code(status.code().unwrap_or(-1))
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "exit status {code}"),
            Self::Signaled(sig) => match Signal::from_i32(*sig) {
                Some(signal) => write!(f, "terminated by {signal}"),
                None => write!(f, "terminated by signal {sig}"),
            },
            Self::Unreaped => f.write_str("not reaped after kill"),
        }
    }
}

/// Why a process ended up in [`ProcessState::Failed`] or exited badly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// The executable could not be spawned.
    Spawn(String),
    /// The readiness marker was not observed before the deadline.
    ReadinessTimeout {
        /// Marker that was expected.
        marker: String,
        /// Timeout in milliseconds.
        timeout_ms: u64,
    },
    /// The process exited before it was asked to stop.
    UnexpectedExit(ExitStatus),
    /// The process exited badly after it was asked to stop.
    Shutdown(ExitStatus),
}

/// Unix-style signals for process control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    /// Hangup (reload configuration).
    Hup,
    /// Interrupt (graceful shutdown).
    Int,
    /// Quit (graceful shutdown with core dump).
    Quit,
    /// Terminate (graceful shutdown).
    Term,
    /// Kill (immediate termination).
    Kill,
    /// User signal 1.
    Usr1,
    /// User signal 2.
    Usr2,
    /// Stop (pause).
    Stop,
    /// Continue (resume).
    Cont,
}

impl Signal {
    /// Returns the Unix signal number.
    #[must_use]
    pub const fn as_i32(&self) -> i32 {
        match self {
            Self::Hup => 1,
            Self::Int => 2,
            Self::Quit => 3,
            Self::Term => 15,
            Self::Kill => 9,
            Self::Usr1 => 10,
            Self::Usr2 => 12,
            Self::Stop => 19,
            Self::Cont => 18,
        }
    }

    /// Creates a signal from a Unix signal number.
    #[must_use]
    pub const fn from_i32(sig: i32) -> Option<Self> {
        match sig {
            1 => Some(Self::Hup),
            2 => Some(Self::Int),
            3 => Some(Self::Quit),
            15 => Some(Self::Term),
            9 => Some(Self::Kill),
            10 => Some(Self::Usr1),
            12 => Some(Self::Usr2),
            19 => Some(Self::Stop),
            18 => Some(Self::Cont),
            _ => None,
        }
    }

    /// Returns true if delivering this signal counts as a stop request.
    #[must_use]
    pub const fn is_termination(&self) -> bool {
        matches!(self, Self::Int | Self::Quit | Self::Term | Self::Kill)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hup => "SIGHUP",
            Self::Int => "SIGINT",
            Self::Quit => "SIGQUIT",
            Self::Term => "SIGTERM",
            Self::Kill => "SIGKILL",
            Self::Usr1 => "SIGUSR1",
            Self::Usr2 => "SIGUSR2",
            Self::Stop => "SIGSTOP",
            Self::Cont => "SIGCONT",
        };
        f.write_str(s)
    }
}

/// Immutable view of a process, published by its worker on every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    /// Handle of the process.
    pub id: HandleId,
    /// Logical name from the descriptor.
    pub name: String,
    /// OS process identifier once spawned.
    pub pid: Option<u32>,
    /// Current lifecycle state.
    pub state: ProcessState,
    /// True once the readiness predicate held.
    pub was_ready: bool,
    /// Exit result once reaped.
    pub exit: Option<ExitStatus>,
    /// Signals delivered by the supervisor, in delivery order.
    pub signals: Vec<Signal>,
    /// Failure classification, if any.
    pub failure: Option<FailureReason>,
    /// Output tail captured at the time of the last transition.
    pub output_tail: Vec<String>,
}

impl ProcessSnapshot {
    /// Creates the initial snapshot for a registered process.
    #[must_use]
    pub fn pending(id: HandleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            pid: None,
            state: ProcessState::Pending,
            was_ready: false,
            exit: None,
            signals: Vec::new(),
            failure: None,
            output_tail: Vec::new(),
        }
    }

    /// Returns true if any terminating signal was delivered.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.signals.iter().any(Signal::is_termination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_id_unique() {
        assert_ne!(HandleId::new(), HandleId::new());
    }

    #[test]
    fn test_state_terminal() {
        assert!(ProcessState::Exited.is_terminal());
        assert!(ProcessState::Failed.is_terminal());
        assert!(!ProcessState::Ready.is_terminal());
        assert!(!ProcessState::Stopping.is_terminal());
    }

    #[test]
    fn test_signal_roundtrip_numbers() {
        for sig in [
            Signal::Hup,
            Signal::Int,
            Signal::Quit,
            Signal::Term,
            Signal::Kill,
            Signal::Usr1,
            Signal::Usr2,
            Signal::Stop,
            Signal::Cont,
        ] {
            assert_eq!(Signal::from_i32(sig.as_i32()), Some(sig));
        }
        assert_eq!(Signal::from_i32(64), None);
    }

    #[test]
    fn test_signal_termination() {
        assert!(Signal::Term.is_termination());
        assert!(Signal::Kill.is_termination());
        assert!(!Signal::Hup.is_termination());
        assert!(!Signal::Usr1.is_termination());
    }

    #[test]
    fn test_exit_status_display() {
        assert_eq!(ExitStatus::Code(3).to_string(), "exit status 3");
        assert_eq!(ExitStatus::Signaled(9).to_string(), "terminated by SIGKILL");
        assert!(ExitStatus::Code(0).success());
        assert!(!ExitStatus::Signaled(15).success());
        assert_eq!(ExitStatus::Signaled(15).code(), None);
    }

    #[test]
    fn test_snapshot_stop_requested() {
        let mut snap = ProcessSnapshot::pending(HandleId::new(), "a");
        assert!(!snap.stop_requested());
        snap.signals.push(Signal::Hup);
        assert!(!snap.stop_requested());
        snap.signals.push(Signal::Term);
        assert!(snap.stop_requested());
    }
}
