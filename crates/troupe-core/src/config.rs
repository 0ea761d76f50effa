//! Supervisor configuration.
//!
//! Configuration is validated at load time, with defaults tuned for a
//! single-host test topology. Durations are written in humantime syntax
//! (`"10s"`, `"2m"`, `"250ms"`).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SupervisorError};
use crate::types::Signal;

/// Where child output goes besides the capture buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Emit each line as a tracing event on target `troupe::output`.
    #[default]
    Tracing,
    /// Write each line to stderr with a colored `[name]` prefix.
    Terminal,
    /// Only capture.
    Silent,
}

/// Supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Readiness timeout for descriptors that do not set their own.
    #[serde(default = "default_readiness_timeout", with = "humantime_duration")]
    pub readiness_timeout: Duration,

    /// How long `stop` waits after the stop signal before escalating to SIGKILL.
    #[serde(default = "default_stop_timeout", with = "humantime_duration")]
    pub stop_timeout: Duration,

    /// How long a worker waits for a killed process to be reaped.
    #[serde(default = "default_reap_timeout", with = "humantime_duration")]
    pub reap_timeout: Duration,

    /// How long to keep draining output after a process exits.
    #[serde(default = "default_drain_timeout", with = "humantime_duration")]
    pub drain_timeout: Duration,

    /// Number of output lines retained per process.
    #[serde(default = "default_tail_lines")]
    pub output_tail_lines: usize,

    /// Output forwarding mode.
    #[serde(default)]
    pub output: OutputMode,

    /// Signal a group sends to started members when its own start fails.
    #[serde(default = "default_unwind_signal")]
    pub unwind_signal: Signal,
}

fn default_readiness_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_reap_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_drain_timeout() -> Duration {
    Duration::from_millis(250)
}

fn default_tail_lines() -> usize {
    200
}

fn default_unwind_signal() -> Signal {
    Signal::Term
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: default_readiness_timeout(),
            stop_timeout: default_stop_timeout(),
            reap_timeout: default_reap_timeout(),
            drain_timeout: default_drain_timeout(),
            output_tail_lines: default_tail_lines(),
            output: OutputMode::default(),
            unwind_signal: default_unwind_signal(),
        }
    }
}

impl SupervisorConfig {
    /// Sets the default readiness timeout.
    #[must_use]
    pub const fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    /// Sets the stop timeout.
    #[must_use]
    pub const fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Sets the reap timeout.
    #[must_use]
    pub const fn with_reap_timeout(mut self, timeout: Duration) -> Self {
        self.reap_timeout = timeout;
        self
    }

    /// Sets the output mode.
    #[must_use]
    pub const fn with_output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    /// Sets the default unwind signal.
    #[must_use]
    pub const fn with_unwind_signal(mut self, signal: Signal) -> Self {
        self.unwind_signal = signal;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an error if a timeout is zero or the unwind signal does not
    /// terminate.
    pub fn validate(&self) -> Result<()> {
        if self.readiness_timeout.is_zero() {
            return Err(SupervisorError::config("readiness_timeout must be positive"));
        }
        if self.stop_timeout.is_zero() {
            return Err(SupervisorError::config("stop_timeout must be positive"));
        }
        if self.reap_timeout.is_zero() {
            return Err(SupervisorError::config("reap_timeout must be positive"));
        }
        if self.output_tail_lines == 0 {
            return Err(SupervisorError::config(
                "output_tail_lines must be greater than 0",
            ));
        }
        if !self.unwind_signal.is_termination() {
            return Err(SupervisorError::config(format!(
                "unwind_signal {} does not terminate a process",
                self.unwind_signal
            )));
        }
        Ok(())
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    /// Returns an error if the text cannot be parsed or fails validation.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| SupervisorError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SupervisorError::config(format!("failed to read config: {e}")))?;
        Self::from_toml(&content)
    }
}

/// Serde adapter for `Duration` fields written in humantime syntax.
pub mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes a duration as a humantime string.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    /// Deserializes a humantime string into a duration.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SupervisorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.readiness_timeout, Duration::from_secs(10));
        assert_eq!(config.unwind_signal, Signal::Term);
        assert_eq!(config.output, OutputMode::Tracing);
    }

    #[test]
    fn test_from_toml_humantime() {
        let config = SupervisorConfig::from_toml(
            r#"
            readiness_timeout = "2m"
            stop_timeout = "500ms"
            output = "silent"
            unwind_signal = "int"
            "#,
        )
        .unwrap();
        assert_eq!(config.readiness_timeout, Duration::from_secs(120));
        assert_eq!(config.stop_timeout, Duration::from_millis(500));
        assert_eq!(config.reap_timeout, Duration::from_secs(5));
        assert_eq!(config.output, OutputMode::Silent);
        assert_eq!(config.unwind_signal, Signal::Int);
    }

    #[test]
    fn test_from_toml_rejects_bad_duration() {
        let err = SupervisorConfig::from_toml(r#"stop_timeout = "soon""#).unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_validate_rejects_non_terminating_unwind() {
        let config = SupervisorConfig::default().with_unwind_signal(Signal::Hup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let config = SupervisorConfig::default().with_stop_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
        let config = SupervisorConfig::default().with_readiness_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serialize_roundtrips_through_toml() {
        let config = SupervisorConfig::default().with_stop_timeout(Duration::from_secs(3));
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("stop_timeout = \"3s\""));
        let back = SupervisorConfig::from_toml(&text).unwrap();
        assert_eq!(back.stop_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("supervisor.toml");
        std::fs::write(&path, "reap_timeout = \"1s\"\n").unwrap();
        let config = SupervisorConfig::load(&path).unwrap();
        assert_eq!(config.reap_timeout, Duration::from_secs(1));
    }
}
