/// Task stage definitions for tracking a page through the worker pipeline
///
/// Every dispatched page moves forward through these stages; any non-terminal
/// stage may drop to `Failed`.
use crate::HarvestError;
use std::fmt;

/// Represents where a task currently is in the worker pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStage {
    /// Handed out by the task source, not yet picked up
    Pending,

    /// Network retrieval in progress (including retries)
    Fetching,

    /// Turning raw content into review records
    Parsing,

    /// Writing records to the repository
    Persisting,

    /// Recording the page as visited
    Marking,

    /// Page fully processed
    Done,

    /// Page abandoned for this run
    Failed,
}

impl TaskStage {
    /// Returns true if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// The stage that follows on success, if any
    pub fn successor(&self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Fetching),
            Self::Fetching => Some(Self::Parsing),
            Self::Parsing => Some(Self::Persisting),
            Self::Persisting => Some(Self::Marking),
            Self::Marking => Some(Self::Done),
            Self::Done | Self::Failed => None,
        }
    }

    /// Returns true if moving from `self` to `to` is allowed
    pub fn can_transition(&self, to: TaskStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == Self::Failed || self.successor() == Some(to)
    }

    /// Moves to `to`, rejecting anything the pipeline does not allow
    pub fn advance(self, to: TaskStage) -> Result<TaskStage, HarvestError> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(HarvestError::InvalidTransition { from: self, to })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Parsing => "parsing",
            Self::Persisting => "persisting",
            Self::Marking => "marking",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
