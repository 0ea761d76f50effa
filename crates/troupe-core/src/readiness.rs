//! Readiness detection.
//!
//! A detector is a single-fire streaming scanner: the worker feeds it every
//! output line and it reports the first one containing the marker. It never
//! fires twice, and a detector without a marker is ready from the start.

use std::time::Duration;

use tokio::time::Instant;

/// Single-fire marker scanner with an armed deadline.
#[derive(Debug)]
pub struct ReadinessDetector {
    marker: Option<String>,
    timeout: Duration,
    deadline: Option<Instant>,
    fired: bool,
}

impl ReadinessDetector {
    /// Creates a detector for `marker` that must fire within `timeout` of
    /// being armed.
    #[must_use]
    pub fn new(marker: impl Into<String>, timeout: Duration) -> Self {
        Self {
            marker: Some(marker.into()),
            timeout,
            deadline: None,
            fired: false,
        }
    }

    /// Creates a detector that is ready as soon as it is armed.
    #[must_use]
    pub const fn immediate() -> Self {
        Self {
            marker: None,
            timeout: Duration::ZERO,
            deadline: None,
            fired: false,
        }
    }

    /// Starts the readiness clock. Called right after the child is spawned.
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    /// Clears the deadline. The detector still fires on a later marker.
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Returns the marker, if any.
    #[must_use]
    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    /// Returns the timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the deadline once armed, while the detector is still waiting.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        if self.fired || self.marker.is_none() {
            None
        } else {
            self.deadline
        }
    }

    /// Returns true once the detector has fired.
    #[must_use]
    pub const fn has_fired(&self) -> bool {
        self.fired
    }

    /// Returns true if the process needs no marker.
    #[must_use]
    pub const fn is_immediate(&self) -> bool {
        self.marker.is_none()
    }

    /// Fires without a marker match. Returns true only the first time.
    pub fn fire(&mut self) -> bool {
        if self.fired {
            return false;
        }
        self.fired = true;
        true
    }

    /// Scans one line. Returns true exactly once, on the first line that
    /// contains the marker.
    pub fn scan(&mut self, line: &str) -> bool {
        if self.fired {
            return false;
        }
        match &self.marker {
            Some(marker) if line.contains(marker.as_str()) => {
                self.fired = true;
                true
            }
            _ => false,
        }
    }
}
