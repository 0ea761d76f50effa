//! Process descriptors: immutable launch specifications.
//!
//! A descriptor says what to run, how to tell that it is ready, how to label
//! its output and what to clean up once it is gone. The supervisor takes
//! ownership of a descriptor when it is invoked.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Result, SupervisorError};

/// Executable plus arguments, environment and working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    program: PathBuf,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
    working_dir: Option<PathBuf>,
}

impl LaunchCommand {
    /// Creates a command for the given executable.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
        }
    }

    /// Returns the executable path.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Returns the argument list.
    #[must_use]
    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Returns the extra environment.
    #[must_use]
    pub fn env(&self) -> &[(OsString, OsString)] {
        &self.env
    }

    /// Returns the working directory, if set.
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Builds a tokio command with piped output and a null stdin.
    #[must_use]
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str())))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Readiness predicate: a literal marker and an optional timeout.
///
/// Without a timeout the supervisor's configured default applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessCheck {
    marker: String,
    timeout: Option<Duration>,
}

impl ReadinessCheck {
    /// Creates a check for `marker` using the supervisor's default timeout.
    #[must_use]
    pub fn marker(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            timeout: None,
        }
    }

    /// Sets an explicit timeout.
    #[must_use]
    pub const fn within(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the marker string.
    #[must_use]
    pub fn marker_str(&self) -> &str {
        &self.marker
    }

    /// Returns the explicit timeout, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// ANSI SGR color code used to tag a process's output, e.g. `"32m"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnsiColor(String);

impl AnsiColor {
    /// Creates a color from an SGR suffix such as `"32m"` or `"92m"`.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Returns the raw code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Wraps `text` in this color.
    #[must_use]
    pub fn paint(&self, text: &str) -> String {
        format!("\x1b[{}{}\x1b[0m", self.0, text)
    }
}

type CleanupFn = Box<dyn FnOnce() + Send + 'static>;

/// Callback run exactly once after a process reaches a terminal state.
///
/// Clones share the same cell, so the callback fires once no matter how many
/// paths race to run it.
#[derive(Clone)]
pub struct Cleanup(Arc<Mutex<Option<CleanupFn>>>);

impl Cleanup {
    /// Wraps a callback.
    #[must_use]
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Some(Box::new(f)))))
    }

    /// Runs the callback if it has not run yet. Returns true if it ran now.
    pub fn run_once(&self) -> bool {
        let f = self.0.lock().take();
        match f {
            Some(f) => {
                f();
                true
            }
            None => false,
        }
    }

    /// Returns true once the callback has run.
    #[must_use]
    pub fn has_run(&self) -> bool {
        self.0.lock().is_none()
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cleanup")
            .field("has_run", &self.has_run())
            .finish()
    }
}

/// Immutable specification of one launchable child process.
#[derive(Debug, Clone)]
pub struct ProcessDescriptor {
    name: String,
    command: LaunchCommand,
    readiness: Option<ReadinessCheck>,
    color: Option<AnsiColor>,
    cleanup: Option<Cleanup>,
}

impl ProcessDescriptor {
    /// Creates a descriptor running `program` under the logical `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            command: LaunchCommand::new(program),
            readiness: None,
            color: None,
            cleanup: None,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.command.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command
            .args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.command
            .env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.command.working_dir = Some(dir.into());
        self
    }

    /// Declares the process ready once `marker` appears in its output.
    #[must_use]
    pub fn ready_when(mut self, marker: impl Into<String>) -> Self {
        self.readiness = Some(ReadinessCheck::marker(marker));
        self
    }

    /// Declares the process ready once `marker` appears within `timeout`.
    #[must_use]
    pub fn ready_within(mut self, marker: impl Into<String>, timeout: Duration) -> Self {
        self.readiness = Some(ReadinessCheck::marker(marker).within(timeout));
        self
    }

    /// Sets the output color.
    #[must_use]
    pub fn color(mut self, color: AnsiColor) -> Self {
        self.color = Some(color);
        self
    }

    /// Registers a cleanup callback.
    #[must_use]
    pub fn on_cleanup(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.cleanup = Some(Cleanup::new(f));
        self
    }

    /// Returns the logical name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the launch command.
    #[must_use]
    pub const fn command(&self) -> &LaunchCommand {
        &self.command
    }

    /// Returns the readiness check, if any.
    #[must_use]
    pub const fn readiness(&self) -> Option<&ReadinessCheck> {
        self.readiness.as_ref()
    }

    /// Returns the output color, if any.
    #[must_use]
    pub const fn ansi_color(&self) -> Option<&AnsiColor> {
        self.color.as_ref()
    }

    /// Returns the cleanup callback, if any.
    #[must_use]
    pub const fn cleanup(&self) -> Option<&Cleanup> {
        self.cleanup.as_ref()
    }

    /// Validates the descriptor.
    ///
    /// # Errors
    /// Returns an error if the name, program or readiness marker is empty.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SupervisorError::invalid("process name cannot be empty"));
        }
        if self.command.program.as_os_str().is_empty() {
            return Err(SupervisorError::invalid(format!(
                "{}: program cannot be empty",
                self.name
            )));
        }
        if let Some(check) = &self.readiness {
            if check.marker.is_empty() {
                return Err(SupervisorError::invalid(format!(
                    "{}: readiness marker cannot be empty",
                    self.name
                )));
            }
            if check.timeout.is_some_and(|t| t.is_zero()) {
                return Err(SupervisorError::invalid(format!(
                    "{}: readiness timeout must be positive",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_builder() {
        let desc = ProcessDescriptor::new("bbs", "/usr/bin/bbs")
            .args(["-listenAddress", "127.0.0.1:8889"])
            .arg("-requireSSL")
            .env("LOG_LEVEL", "debug")
            .ready_within("bbs.started", Duration::from_secs(10))
            .color(AnsiColor::new("32m"));

        assert_eq!(desc.name(), "bbs");
        assert_eq!(desc.command().args().len(), 3);
        assert_eq!(desc.command().env().len(), 1);
        let check = desc.readiness().unwrap();
        assert_eq!(check.marker_str(), "bbs.started");
        assert_eq!(check.timeout(), Some(Duration::from_secs(10)));
        assert_eq!(desc.ansi_color().unwrap().code(), "32m");
        assert!(desc.validate().is_ok());
        assert_eq!(
            desc.command().to_string(),
            "/usr/bin/bbs -listenAddress 127.0.0.1:8889 -requireSSL"
        );
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        assert!(ProcessDescriptor::new("", "/bin/true").validate().is_err());
        assert!(ProcessDescriptor::new("a", "").validate().is_err());
        assert!(
            ProcessDescriptor::new("a", "/bin/true")
                .ready_when("")
                .validate()
                .is_err()
        );
        assert!(
            ProcessDescriptor::new("a", "/bin/true")
                .ready_within("x", Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_cleanup_runs_once_across_clones() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let desc = ProcessDescriptor::new("a", "/bin/true").on_cleanup(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let copy = desc.clone();

        assert!(desc.cleanup().unwrap().run_once());
        assert!(!copy.cleanup().unwrap().run_once());
        assert!(!desc.cleanup().unwrap().run_once());
        assert!(copy.cleanup().unwrap().has_run());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ansi_paint() {
        let color = AnsiColor::new("33m");
        assert_eq!(color.paint("[rep]"), "\x1b[33m[rep]\x1b[0m");
    }
}
