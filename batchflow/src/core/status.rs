//! Batch status and exit status.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The lifecycle status of a job or step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Finished successfully.
    Completed,
    /// Created but not yet running.
    #[default]
    Starting,
    /// Running.
    Started,
    /// A stop was requested and will be honored at the next chunk boundary.
    Stopping,
    /// Stopped at a chunk boundary. Restartable.
    Stopped,
    /// Failed. Restartable.
    Failed,
    /// Given up on. Never restarted.
    Abandoned,
    /// State could not be determined.
    Unknown,
}

impl BatchStatus {
    fn severity(self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::Starting => 1,
            Self::Started => 2,
            Self::Stopping => 3,
            Self::Stopped => 4,
            Self::Failed => 5,
            Self::Abandoned => 6,
            Self::Unknown => 7,
        }
    }

    /// Returns the more severe of two statuses.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if self.severity() >= other.severity() {
            self
        } else {
            other
        }
    }

    /// Combines two statuses when aggregating executions.
    ///
    /// Once either side is past `Started` the more severe wins. Otherwise a
    /// completed side wins, so a finished branch is not dragged back to running.
    #[must_use]
    pub fn upgrade_to(self, other: Self) -> Self {
        if self.severity() > Self::Started.severity() || other.severity() > Self::Started.severity() {
            return self.max(other);
        }
        if self == Self::Completed || other == Self::Completed {
            return Self::Completed;
        }
        self.max(other)
    }

    /// Returns true while the execution is in flight.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Stopping)
    }

    /// Returns true if the status is worse than a clean completion.
    #[must_use]
    pub fn is_unsuccessful(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped | Self::Abandoned | Self::Unknown)
    }

    /// Returns true if a later execution may resume from this one.
    #[must_use]
    pub fn is_restartable(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }

    /// Returns true if no further transitions happen without a restart.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed | Self::Abandoned)
    }

    /// Returns true if the state machine allows moving to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if next == Self::Unknown {
            return true;
        }
        match self {
            Self::Starting => matches!(
                next,
                Self::Started | Self::Failed | Self::Stopped | Self::Abandoned
            ),
            Self::Started => matches!(next, Self::Completed | Self::Failed | Self::Stopping),
            Self::Stopping => matches!(next, Self::Stopped | Self::Failed),
            Self::Stopped | Self::Failed => next == Self::Abandoned,
            Self::Completed | Self::Abandoned | Self::Unknown => false,
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Completed => "COMPLETED",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
            Self::Abandoned => "ABANDONED",
            Self::Unknown => "UNKNOWN",
        };
        write!(f, "{name}")
    }
}

/// Exit code plus description reported by a finished execution.
///
/// Exit codes drive conditional transitions between steps; custom codes are
/// allowed and rank as the most severe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// The exit code.
    pub exit_code: String,
    /// Free-form description, usually the failure message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub exit_description: String,
}

impl ExitStatus {
    /// Code for a still-running execution.
    pub const EXECUTING: &'static str = "EXECUTING";
    /// Code for a successful execution.
    pub const COMPLETED: &'static str = "COMPLETED";
    /// Code for an execution that had nothing to do.
    pub const NOOP: &'static str = "NOOP";
    /// Code for a stopped execution.
    pub const STOPPED: &'static str = "STOPPED";
    /// Code for a failed execution.
    pub const FAILED: &'static str = "FAILED";
    /// Code for an execution in an unknown state.
    pub const UNKNOWN: &'static str = "UNKNOWN";

    /// Creates an exit status with the given code.
    #[must_use]
    pub fn new(exit_code: impl Into<String>) -> Self {
        Self {
            exit_code: exit_code.into(),
            exit_description: String::new(),
        }
    }

    /// `EXECUTING`.
    #[must_use]
    pub fn executing() -> Self {
        Self::new(Self::EXECUTING)
    }

    /// `COMPLETED`.
    #[must_use]
    pub fn completed() -> Self {
        Self::new(Self::COMPLETED)
    }

    /// `NOOP`.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Self::NOOP)
    }

    /// `STOPPED`.
    #[must_use]
    pub fn stopped() -> Self {
        Self::new(Self::STOPPED)
    }

    /// `FAILED`.
    #[must_use]
    pub fn failed() -> Self {
        Self::new(Self::FAILED)
    }

    /// `UNKNOWN`.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN)
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.exit_description = description.into();
        self
    }

    /// Appends to the description, separating entries with "; ".
    #[must_use]
    pub fn add_description(mut self, description: &str) -> Self {
        if description.is_empty() || self.exit_description.contains(description) {
            return self;
        }
        if !self.exit_description.is_empty() {
            self.exit_description.push_str("; ");
        }
        self.exit_description.push_str(description);
        self
    }

    fn severity(&self) -> u8 {
        match self.exit_code.as_str() {
            Self::EXECUTING => 1,
            Self::COMPLETED => 2,
            Self::NOOP => 3,
            Self::STOPPED => 4,
            Self::FAILED => 5,
            Self::UNKNOWN => 6,
            _ => 7,
        }
    }

    /// Combines two exit statuses, keeping the more severe code and both
    /// descriptions.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        let description = other.exit_description.clone();
        let combined = if self.cmp(&other) == Ordering::Less {
            Self {
                exit_code: other.exit_code,
                exit_description: self.exit_description,
            }
        } else {
            self
        };
        combined.add_description(&description)
    }

    /// Returns true while the execution is in flight.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.exit_code == Self::EXECUTING || self.exit_code == Self::UNKNOWN
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::executing()
    }
}

impl PartialOrd for ExitStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExitStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.severity()
            .cmp(&other.severity())
            .then_with(|| self.exit_code.cmp(&other.exit_code))
    }
}

impl From<BatchStatus> for ExitStatus {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Completed => Self::completed(),
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping => {
                Self::executing()
            }
            BatchStatus::Stopped => Self::stopped(),
            BatchStatus::Failed => Self::failed(),
            BatchStatus::Abandoned => Self::new("ABANDONED"),
            BatchStatus::Unknown => Self::unknown(),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exit_description.is_empty() {
            write!(f, "{}", self.exit_code)
        } else {
            write!(f, "{} ({})", self.exit_code, self.exit_description)
        }
    }
}
