use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{
    answer::SubmissionAnswer, grading::GradingResultPayload, Band, GradingMode, ReviewPriority,
    Skill,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Processing,
    ReviewPending,
    Completed,
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Processing => "processing",
            SubmissionStatus::ReviewPending => "review_pending",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionStatus::Completed | SubmissionStatus::Failed)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A graded attempt at one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub question_id: String,
    pub skill: Skill,
    pub status: SubmissionStatus,
    pub score: Option<f64>,
    pub band: Option<Band>,
    pub attempt: u32,
    pub request_id: Option<String>,
    pub review_priority: Option<ReviewPriority>,
    pub reviewer_id: Option<String>,
    pub grading_mode: Option<GradingMode>,
    pub audit_flag: bool,
    /// Set in the same write that completes the submission; cleared once the score has
    /// reached the progress tracker.
    #[serde(default)]
    pub progress_pending: bool,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Submission {
    /// Fresh submission as persisted by the intake collaborator.
    pub fn new_pending(user_id: &str, question_id: &str, skill: Skill) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            question_id: question_id.to_string(),
            skill,
            status: SubmissionStatus::Pending,
            score: None,
            band: None,
            attempt: 1,
            request_id: None,
            review_priority: None,
            reviewer_id: None,
            grading_mode: None,
            audit_flag: false,
            progress_pending: false,
            claimed_by: None,
            claimed_at: None,
            deadline: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// A claim can be taken over once it is older than `timeout`.
    pub fn claim_is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match self.claimed_at {
            Some(claimed_at) => claimed_at < now - timeout,
            None => true,
        }
    }

    pub fn clear_claim(&mut self) {
        self.claimed_by = None;
        self.claimed_at = None;
    }

    /// Record-level invariants: a score exists only once completed, and a claim always
    /// carries both its holder and its timestamp.
    pub fn is_consistent(&self) -> bool {
        let score_ok = self.score.is_some() == (self.status == SubmissionStatus::Completed);
        let claim_ok = self.claimed_by.is_some() == self.claimed_at.is_some();
        score_ok && claim_ok
    }
}

/// 1:1 child of a submission holding the raw answer and the grading result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionDetail {
    #[serde(rename = "_id")]
    pub submission_id: String,
    pub answer: SubmissionAnswer,
    pub result: Option<GradingResultPayload>,
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubmissionDetail {
    pub fn new(submission_id: &str, answer: SubmissionAnswer) -> Self {
        let now = Utc::now();
        Self {
            submission_id: submission_id.to_string(),
            answer,
            result: None,
            feedback: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Submission together with its detail, the unit every grading write operates on.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRecord {
    pub submission: Submission,
    pub detail: SubmissionDetail,
}
