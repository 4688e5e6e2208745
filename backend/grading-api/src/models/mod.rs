use serde::{Deserialize, Serialize};
use std::fmt;

pub mod answer;
pub mod grading;
pub mod progress;
pub mod question;
pub mod submission;

pub use answer::{AnswerKey, SubmissionAnswer};
pub use grading::{GradingResultPayload, GradingTask};
pub use progress::{StreakDirection, TrendLabel, UserProgress};
pub use question::Question;
pub use submission::{Submission, SubmissionDetail, SubmissionRecord, SubmissionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Skill {
    Listening,
    Reading,
    Writing,
    Speaking,
}

impl Skill {
    pub const ALL: [Skill; 4] = [
        Skill::Listening,
        Skill::Reading,
        Skill::Writing,
        Skill::Speaking,
    ];

    /// Listening and reading are graded by exact match against an answer key.
    pub fn is_objective(self) -> bool {
        matches!(self, Skill::Listening | Skill::Reading)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Skill::Listening => "listening",
            Skill::Reading => "reading",
            Skill::Writing => "writing",
            Skill::Speaking => "speaking",
        }
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// VSTEP certification band. Scores below B1 carry no band at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Band {
    B1,
    B2,
    C1,
}

impl Band {
    pub fn as_str(self) -> &'static str {
        match self {
            Band::B1 => "B1",
            Band::B2 => "B2",
            Band::C1 => "C1",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Five-tier level used for question difficulty placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DifficultyLevel {
    A1,
    A2,
    B1,
    B2,
    C1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingMode {
    Auto,
    Human,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewPriority {
    Low,
    Medium,
    High,
    Critical,
}
