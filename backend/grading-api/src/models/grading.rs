use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use super::{
    answer::SubmissionAnswer, Band, GradingMode, ReviewPriority, Skill, SubmissionStatus,
};

/// Message pushed onto the grading queue for the external worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingTask {
    pub submission_id: String,
    pub question_id: String,
    pub skill: Skill,
    pub answer: SubmissionAnswer,
    pub dispatched_at: DateTime<Utc>,
}

/// Result payload stored on the submission detail, tagged by grading method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GradingResultPayload {
    Auto(AutoResult),
    Ai(AiResult),
    Human(HumanResult),
}

impl GradingResultPayload {
    pub fn method(&self) -> &'static str {
        match self {
            GradingResultPayload::Auto(_) => "auto",
            GradingResultPayload::Ai(_) => "ai",
            GradingResultPayload::Human(_) => "human",
        }
    }

    /// Machine score carried by the payload, if any.
    pub fn machine_score(&self) -> Option<(f64, Option<Band>)> {
        match self {
            GradingResultPayload::Auto(r) => Some((r.score, r.band)),
            GradingResultPayload::Ai(r) => Some((r.overall_score, r.band)),
            GradingResultPayload::Human(r) => r.machine.as_ref().map(|m| (m.score, m.band)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoResult {
    pub correct_count: u32,
    pub total_count: u32,
    pub score: f64,
    pub band: Option<Band>,
    pub graded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Where a worker result lands: confident results complete, the rest queue for review.
    pub fn review_priority(self) -> Option<ReviewPriority> {
        match self {
            Confidence::High => None,
            Confidence::Medium => Some(ReviewPriority::Medium),
            Confidence::Low => Some(ReviewPriority::High),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiResult {
    pub overall_score: f64,
    #[serde(default)]
    pub band: Option<Band>,
    #[serde(default)]
    pub criteria_scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub feedback: String,
    pub confidence: Confidence,
    pub graded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineScore {
    pub score: f64,
    pub band: Option<Band>,
}

/// Reviewer verdict merged with the machine score that preceded it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanResult {
    pub overall_score: f64,
    pub band: Option<Band>,
    pub criteria_scores: Option<BTreeMap<String, f64>>,
    pub feedback: Option<String>,
    pub review_comment: Option<String>,
    pub reviewer_id: String,
    pub reviewed_at: DateTime<Utc>,
    pub machine: Option<MachineScore>,
    pub final_score: f64,
    pub grading_mode: GradingMode,
    pub audit_flag: bool,
}

/// What the external worker reports back for a dispatched submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerCallback {
    pub submission_id: String,
    pub status: SubmissionStatus,
    pub result: Option<AiResult>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    #[validate(range(min = 0.0, max = 10.0, message = "Score must be between 0 and 10"))]
    pub overall_score: f64,
    pub band: Option<Band>,
    pub criteria_scores: Option<BTreeMap<String, f64>>,
    #[validate(length(max = 10000, message = "Feedback must be at most 10000 characters"))]
    pub feedback: Option<String>,
    pub review_comment: Option<String>,
}

/// Who is acting on a review. The internal surface trusts the caller to fill this in.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReviewerAction {
    #[validate(length(min = 1, message = "reviewerId is required"))]
    pub reviewer_id: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// Body of a review verdict: the acting reviewer plus the verdict itself.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSubmission {
    #[validate(length(min = 1, message = "reviewerId is required"))]
    pub reviewer_id: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(flatten)]
    #[validate(nested)]
    pub review: ReviewRequest,
}

/// Admin hand-off of a queued submission to a named reviewer.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    #[validate(length(min = 1, message = "reviewerId is required"))]
    pub reviewer_id: String,
}
