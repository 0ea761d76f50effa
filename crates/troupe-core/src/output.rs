//! Output capture and forwarding.

use std::collections::VecDeque;
use std::fmt;
use std::io::Write;

use crate::config::OutputMode;
use crate::descriptor::AnsiColor;

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Bounded ring of the most recent output lines.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputTail {
    /// Creates a ring holding at most `capacity` lines.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Appends a line, dropping the oldest when full.
    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Returns the number of retained lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns true if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Copies the retained lines, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// Returns true if any retained line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }
}

/// Forwards child output lines according to the configured mode.
#[derive(Debug, Clone)]
pub struct OutputSink {
    mode: OutputMode,
    prefix: String,
}

impl OutputSink {
    /// Creates a sink for the process `name`.
    #[must_use]
    pub fn new(mode: OutputMode, name: &str, color: Option<&AnsiColor>) -> Self {
        let label = format!("[{name}]");
        let prefix = match color {
            Some(color) => color.paint(&label),
            None => label,
        };
        Self { mode, prefix }
    }

    /// Returns the rendered prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Forwards one line.
    pub fn forward(&self, name: &str, stream: Stream, line: &str) {
        match self.mode {
            OutputMode::Tracing => {
                tracing::info!(
                    target: "troupe::output",
                    process = %name,
                    stream = %stream,
                    "{line}"
                );
            }
            OutputMode::Terminal => {
                let mut err = std::io::stderr().lock();
                // A closed stderr is not a reason to stop supervising.
                let _ = writeln!(err, "{} {line}", self.prefix);
            }
            OutputMode::Silent => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_bounded() {
        let mut tail = OutputTail::new(3);
        for i in 0..5 {
            tail.push(format!("line {i}"));
        }
        assert_eq!(tail.len(), 3);
        assert_eq!(tail.to_vec(), vec!["line 2", "line 3", "line 4"]);
        assert!(tail.contains("line 4"));
        assert!(!tail.contains("line 0"));
    }

    #[test]
    fn test_tail_zero_capacity_keeps_one() {
        let mut tail = OutputTail::new(0);
        tail.push("a".into());
        tail.push("b".into());
        assert_eq!(tail.to_vec(), vec!["b"]);
    }

    #[test]
    fn test_sink_prefix_colored() {
        let sink = OutputSink::new(OutputMode::Silent, "rep-0", Some(&AnsiColor::new("33m")));
        assert_eq!(sink.prefix(), "\x1b[33m[rep-0]\x1b[0m");
        let plain = OutputSink::new(OutputMode::Silent, "nats", None);
        assert_eq!(plain.prefix(), "[nats]");
        plain.forward("nats", Stream::Stdout, "ignored");
    }
}
