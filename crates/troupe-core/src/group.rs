//! Composable process groups.
//!
//! A group is an ordered or parallel collection of members, each either a
//! [`ProcessDescriptor`] or a nested [`Group`]. Groups are plain values: they
//! hold no runtime state until the supervisor invokes them.

use std::collections::HashSet;
use std::fmt;

use crate::descriptor::ProcessDescriptor;
use crate::error::{Result, SupervisorError};
use crate::types::Signal;

/// How a group starts and stops its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMode {
    /// Member N+1 starts after member N is ready; stop in reverse order.
    Ordered,
    /// All members start concurrently and stop concurrently.
    Parallel,
}

impl fmt::Display for GroupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ordered => f.write_str("ordered"),
            Self::Parallel => f.write_str("parallel"),
        }
    }
}

/// A group member.
#[derive(Debug, Clone)]
pub enum Member {
    /// A single process.
    Process(ProcessDescriptor),
    /// A nested group.
    Group(Group),
}

impl Member {
    /// Returns the member's name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Process(desc) => desc.name(),
            Self::Group(group) => group.name(),
        }
    }

    /// Validates the member and everything beneath it.
    ///
    /// # Errors
    /// Returns `InvalidDescriptor` for the first problem found.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Process(desc) => desc.validate(),
            Self::Group(group) => group.validate(),
        }
    }

    /// Number of processes in the member's transitive membership.
    #[must_use]
    pub fn process_count(&self) -> usize {
        match self {
            Self::Process(_) => 1,
            Self::Group(group) => group.members.iter().map(Self::process_count).sum(),
        }
    }
}

impl From<ProcessDescriptor> for Member {
    fn from(desc: ProcessDescriptor) -> Self {
        Self::Process(desc)
    }
}

impl From<Group> for Member {
    fn from(group: Group) -> Self {
        Self::Group(group)
    }
}

/// Ordered or parallel collection of members.
#[derive(Debug, Clone)]
pub struct Group {
    name: String,
    mode: GroupMode,
    members: Vec<Member>,
    unwind_signal: Option<Signal>,
}

impl Group {
    /// Creates an empty ordered group.
    #[must_use]
    pub fn ordered(name: impl Into<String>) -> Self {
        Self::new(name, GroupMode::Ordered)
    }

    /// Creates an empty parallel group.
    #[must_use]
    pub fn parallel(name: impl Into<String>) -> Self {
        Self::new(name, GroupMode::Parallel)
    }

    /// Creates an empty group with the given mode.
    #[must_use]
    pub fn new(name: impl Into<String>, mode: GroupMode) -> Self {
        Self {
            name: name.into(),
            mode,
            members: Vec::new(),
            unwind_signal: None,
        }
    }

    /// Appends a member.
    #[must_use]
    pub fn member(mut self, member: impl Into<Member>) -> Self {
        self.members.push(member.into());
        self
    }

    /// Appends several members.
    #[must_use]
    pub fn members<I, M>(mut self, members: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<Member>,
    {
        self.members.extend(members.into_iter().map(Into::into));
        self
    }

    /// Overrides the signal sent to started members when the group's start
    /// fails. Defaults to the supervisor's configured unwind signal.
    #[must_use]
    pub const fn with_unwind_signal(mut self, signal: Signal) -> Self {
        self.unwind_signal = Some(signal);
        self
    }

    /// Returns the group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the mode.
    #[must_use]
    pub const fn mode(&self) -> GroupMode {
        self.mode
    }

    /// Returns the members in declaration order.
    #[must_use]
    pub fn member_list(&self) -> &[Member] {
        &self.members
    }

    /// Returns the unwind signal override.
    #[must_use]
    pub const fn unwind_signal(&self) -> Option<Signal> {
        self.unwind_signal
    }

    pub(crate) fn into_parts(self) -> (String, GroupMode, Vec<Member>, Option<Signal>) {
        (self.name, self.mode, self.members, self.unwind_signal)
    }

    /// Validates the group recursively.
    ///
    /// # Errors
    /// Returns `InvalidDescriptor` if the group is unnamed, a member is
    /// invalid, two members share a name, or the unwind signal does not
    /// terminate.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SupervisorError::invalid("group name cannot be empty"));
        }
        if let Some(sig) = self.unwind_signal {
            if !sig.is_termination() {
                return Err(SupervisorError::invalid(format!(
                    "{}: unwind signal {sig} does not terminate a process",
                    self.name
                )));
            }
        }
        let mut seen = HashSet::with_capacity(self.members.len());
        for member in &self.members {
            if !seen.insert(member.name()) {
                return Err(SupervisorError::invalid(format!(
                    "{}: duplicate member name {:?}",
                    self.name,
                    member.name()
                )));
            }
            member.validate()?;
        }
        Ok(())
    }
}
