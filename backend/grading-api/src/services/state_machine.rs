//! Table-driven lifecycle validation.
//!
//! A [`StateMachine`] knows nothing about the entity it guards: it is built from a
//! transition table mapping each state to the states directly reachable from it. States
//! without an entry (or with an empty entry) are terminal.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::error::GradingError;
use crate::models::SubmissionStatus;

#[derive(Debug, Clone)]
pub struct StateMachine<S> {
    transitions: HashMap<S, Vec<S>>,
}

impl<S> StateMachine<S>
where
    S: Copy + Eq + Hash + fmt::Display,
{
    pub fn new(table: &[(S, &[S])]) -> Self {
        let transitions = table
            .iter()
            .map(|(from, next)| (*from, next.to_vec()))
            .collect();
        Self { transitions }
    }

    pub fn can_transition(&self, from: S, to: S) -> bool {
        self.transitions
            .get(&from)
            .is_some_and(|next| next.contains(&to))
    }

    pub fn assert_transition(&self, from: S, to: S) -> Result<(), GradingError> {
        if self.can_transition(from, to) {
            return Ok(());
        }
        Err(GradingError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    /// Allowed next states in table order; empty for terminal or unknown states.
    pub fn valid_next_states(&self, from: S) -> &[S] {
        self.transitions
            .get(&from)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_terminal(&self, state: S) -> bool {
        self.valid_next_states(state).is_empty()
    }
}

/// Lifecycle of an exam session; shares the machine with submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamSessionStatus {
    InProgress,
    Submitted,
    Completed,
    Abandoned,
}

impl fmt::Display for ExamSessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExamSessionStatus::InProgress => "in_progress",
            ExamSessionStatus::Submitted => "submitted",
            ExamSessionStatus::Completed => "completed",
            ExamSessionStatus::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

lazy_static! {
    pub static ref SUBMISSION_MACHINE: StateMachine<SubmissionStatus> = {
        use SubmissionStatus::{Completed, Failed, Pending, Processing, ReviewPending};
        StateMachine::<SubmissionStatus>::new(&[
            (Pending, &[Processing, Completed, Failed]),
            (Processing, &[Completed, Failed, ReviewPending]),
            (ReviewPending, &[Completed, Failed]),
            (Completed, &[]),
            (Failed, &[]),
        ])
    };

    pub static ref EXAM_SESSION_MACHINE: StateMachine<ExamSessionStatus> = {
        use ExamSessionStatus::{Abandoned, Completed, InProgress, Submitted};
        StateMachine::<ExamSessionStatus>::new(&[
            (InProgress, &[Submitted, Completed, Abandoned]),
            (Submitted, &[Completed]),
        ])
    };
}
