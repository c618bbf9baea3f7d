//! Pure job lifecycle state machine
//!
//! ```text
//! Idle -> Planning -> Dispatching -> Reducing -> Done
//!            |             |             |
//!            +-------------+-------------+--> Aborted
//! ```
//!
//! `Done` and `Aborted` are terminal. Every other pairing of state and
//! transition returns [`StateError::InvalidTransition`].

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Invalid transition from {from} with {transition}")]
    InvalidTransition { from: String, transition: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Planning,
    Dispatching,
    Reducing,
    Done,
    Aborted,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Aborted)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Idle => "idle",
            JobState::Planning => "planning",
            JobState::Dispatching => "dispatching",
            JobState::Reducing => "reducing",
            JobState::Done => "done",
            JobState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTransition {
    /// Job submitted
    Submit,
    /// Chunk list is ready
    Planned,
    /// Every chunk has completed
    Dispatched,
    /// Final accumulator produced
    Reduced,
    /// Cancellation, budget exhaustion or planning failure
    Abort,
}

impl fmt::Display for JobTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Apply `transition` to `state`, rejecting anything outside the lifecycle
pub fn apply_transition(state: JobState, transition: JobTransition) -> Result<JobState, StateError> {
    use JobState::*;
    use JobTransition::*;

    match (state, transition) {
        (Idle, Submit) => Ok(Planning),
        (Planning, Planned) => Ok(Dispatching),
        (Dispatching, Dispatched) => Ok(Reducing),
        (Reducing, Reduced) => Ok(Done),
        (Planning | Dispatching | Reducing, Abort) => Ok(Aborted),
        (from, transition) => Err(StateError::InvalidTransition {
            from: from.to_string(),
            transition: transition.to_string(),
        }),
    }
}
