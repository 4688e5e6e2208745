//! Worker callbacks and the manual review workflow.
//!
//! The worker reports either a confident result (the submission completes) or a result
//! that needs a human (the submission waits in `review_pending`). Reviewers claim a
//! waiting submission, then submit a verdict that is merged with the machine score.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{GradingError, GradingResult};
use crate::metrics::{record_transition, GRADINGS_TOTAL, REVIEW_ACTIONS_TOTAL};
use crate::models::grading::{HumanResult, MachineScore, ReviewRequest, WorkerCallback};
use crate::models::{
    Band, GradingMode, GradingResultPayload, Submission, SubmissionRecord, SubmissionStatus,
};
use crate::repository::{SubmissionStore, SubmissionUnit};
use crate::services::progress_recorder::ProgressRecorder;
use crate::services::scoring::{band_index, round_half, score_to_band};
use crate::services::state_machine::SUBMISSION_MACHINE;

/// Largest machine/human disagreement that still blends the two scores.
const MAX_BLEND_SCORE_GAP: f64 = 0.5;
const MAX_BLEND_BAND_STEPS: u8 = 1;
const MACHINE_WEIGHT: f64 = 0.4;
const HUMAN_WEIGHT: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeDecision {
    pub final_score: f64,
    pub grading_mode: GradingMode,
    pub audit_flag: bool,
}

/// Combines a reviewer score with the machine score that preceded it.
///
/// Close agreement blends 40/60 machine/human; anything else keeps the human score and
/// flags the submission for audit. The result is rounded to the nearest 0.5.
pub fn merge_scores(
    machine: Option<(f64, Option<Band>)>,
    human_score: f64,
    human_band: Option<Band>,
) -> MergeDecision {
    let Some((machine_score, machine_band)) = machine else {
        return MergeDecision {
            final_score: round_half(human_score),
            grading_mode: GradingMode::Human,
            audit_flag: false,
        };
    };

    let machine_band = machine_band.or_else(|| score_to_band(machine_score));
    let reviewer_band = human_band.or_else(|| score_to_band(human_score));
    let score_gap = (machine_score - human_score).abs();
    let band_steps = band_index(machine_band).abs_diff(band_index(reviewer_band));

    if score_gap <= MAX_BLEND_SCORE_GAP && band_steps <= MAX_BLEND_BAND_STEPS {
        MergeDecision {
            final_score: round_half(machine_score * MACHINE_WEIGHT + human_score * HUMAN_WEIGHT),
            grading_mode: GradingMode::Hybrid,
            audit_flag: false,
        }
    } else {
        MergeDecision {
            final_score: round_half(human_score),
            grading_mode: GradingMode::Human,
            audit_flag: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub submission: Submission,
    pub decision: MergeDecision,
    pub band: Option<Band>,
}

pub struct ReviewService {
    submissions: Arc<dyn SubmissionStore>,
    progress: Arc<ProgressRecorder>,
    claim_timeout: Duration,
}

impl ReviewService {
    pub fn new(
        submissions: Arc<dyn SubmissionStore>,
        progress: Arc<ProgressRecorder>,
        claim_timeout_secs: i64,
    ) -> Self {
        Self {
            submissions,
            progress,
            claim_timeout: Duration::seconds(claim_timeout_secs),
        }
    }

    /// Finalizes a dispatched submission with what the grading worker reported.
    pub async fn apply_worker_result(&self, callback: WorkerCallback) -> GradingResult<Submission> {
        let target = callback.status;
        if !matches!(
            target,
            SubmissionStatus::Completed | SubmissionStatus::ReviewPending | SubmissionStatus::Failed
        ) {
            return Err(GradingError::bad_request(format!(
                "Worker cannot report status {}",
                target
            )));
        }

        let mut unit = self.submissions.begin(&callback.submission_id).await?;
        let record = match live_record(unit.as_ref()) {
            Ok(record) => record,
            Err(err) => return abort(unit, err).await,
        };
        let from = record.submission.status;

        let next = match Self::finalize(record, &callback) {
            Ok(next) => next,
            Err(err) => return abort(unit, err).await,
        };
        let mut submission = next.submission.clone();
        unit.stage(next);
        unit.commit().await?;

        record_transition(from.as_str(), target.as_str());
        GRADINGS_TOTAL
            .with_label_values(&["ai", submission.skill.as_str(), target.as_str()])
            .inc();
        tracing::info!(
            submission_id = %submission.id,
            status = %target,
            score = ?submission.score,
            "Worker result applied"
        );

        if submission.progress_pending {
            submission.progress_pending = !self.progress.deliver(&submission).await;
        }
        Ok(submission)
    }

    fn finalize(
        record: SubmissionRecord,
        callback: &WorkerCallback,
    ) -> GradingResult<SubmissionRecord> {
        let target = callback.status;
        let current = record.submission.status;
        // Pending means the dispatch has not committed yet.
        if current != SubmissionStatus::Processing {
            return Err(GradingError::conflict(format!(
                "Submission is {} and not awaiting a worker result",
                current
            )));
        }
        SUBMISSION_MACHINE.assert_transition(current, target)?;

        let now = Utc::now();
        let mut next = record;
        next.submission.status = target;
        next.submission.updated_at = now;
        next.detail.updated_at = now;

        if target == SubmissionStatus::Failed {
            return Ok(next);
        }

        let result = callback.result.clone().ok_or_else(|| {
            GradingError::bad_request(format!("A {} result must carry a score", target))
        })?;
        if !(0.0..=10.0).contains(&result.overall_score) {
            return Err(GradingError::bad_request("Score must be between 0 and 10"));
        }
        if target == SubmissionStatus::Completed {
            let score = round_half(result.overall_score);
            next.submission.score = Some(score);
            next.submission.band = score_to_band(score);
            next.submission.grading_mode = Some(GradingMode::Auto);
            next.submission.progress_pending = true;
            next.submission.completed_at = Some(now);
        } else {
            next.submission.review_priority = result.confidence.review_priority();
        }
        if !result.feedback.is_empty() {
            next.detail.feedback = Some(result.feedback.clone());
        }
        next.detail.result = Some(GradingResultPayload::Ai(result));
        Ok(next)
    }

    /// Takes exclusive ownership of a waiting submission.
    ///
    /// Succeeds when nobody holds it, when the current claim has gone stale, or when the
    /// caller already holds it.
    pub async fn claim(&self, submission_id: &str, reviewer_id: &str) -> GradingResult<Submission> {
        let mut unit = self.submissions.begin(submission_id).await?;
        let record = match review_pending_record(unit.as_ref()) {
            Ok(record) => record,
            Err(err) => return abort(unit, err).await,
        };

        let now = Utc::now();
        let submission = &record.submission;
        let available = submission.claimed_by.is_none()
            || submission.claimed_by.as_deref() == Some(reviewer_id)
            || submission.claim_is_stale(now, self.claim_timeout);
        if !available {
            REVIEW_ACTIONS_TOTAL
                .with_label_values(&["claim", "conflict"])
                .inc();
            return abort(
                unit,
                GradingError::conflict("Submission is already claimed by another reviewer"),
            )
            .await;
        }

        let mut next = record;
        next.submission.claimed_by = Some(reviewer_id.to_string());
        next.submission.claimed_at = Some(now);
        next.submission.updated_at = now;
        let claimed = next.submission.clone();
        unit.stage(next);
        unit.commit().await?;

        REVIEW_ACTIONS_TOTAL
            .with_label_values(&["claim", "ok"])
            .inc();
        tracing::info!(submission_id, reviewer_id, "Submission claimed");
        Ok(claimed)
    }

    /// Gives a claim back. Only its holder or an admin may do so.
    pub async fn release(
        &self,
        submission_id: &str,
        reviewer_id: &str,
        is_admin: bool,
    ) -> GradingResult<Submission> {
        let mut unit = self.submissions.begin(submission_id).await?;
        let record = match review_pending_record(unit.as_ref()) {
            Ok(record) => record,
            Err(err) => return abort(unit, err).await,
        };

        match record.submission.claimed_by.as_deref() {
            None => {
                return abort(
                    unit,
                    GradingError::bad_request("Submission is not currently claimed"),
                )
                .await
            }
            Some(holder) if holder != reviewer_id && !is_admin => {
                return abort(
                    unit,
                    GradingError::forbidden("You can only release submissions you have claimed"),
                )
                .await
            }
            Some(_) => {}
        }

        let mut next = record;
        next.submission.clear_claim();
        next.submission.updated_at = Utc::now();
        let released = next.submission.clone();
        unit.stage(next);
        unit.commit().await?;

        REVIEW_ACTIONS_TOTAL
            .with_label_values(&["release", "ok"])
            .inc();
        tracing::info!(submission_id, reviewer_id, is_admin, "Submission released");
        Ok(released)
    }

    /// Admin hand-off: places the claim on `reviewer_id` regardless of the current holder.
    pub async fn assign(&self, submission_id: &str, reviewer_id: &str) -> GradingResult<Submission> {
        let mut unit = self.submissions.begin(submission_id).await?;
        let record = match review_pending_record(unit.as_ref()) {
            Ok(record) => record,
            Err(err) => return abort(unit, err).await,
        };

        let now = Utc::now();
        let mut next = record;
        next.submission.claimed_by = Some(reviewer_id.to_string());
        next.submission.claimed_at = Some(now);
        next.submission.updated_at = now;
        let assigned = next.submission.clone();
        unit.stage(next);
        unit.commit().await?;

        REVIEW_ACTIONS_TOTAL
            .with_label_values(&["assign", "ok"])
            .inc();
        tracing::info!(submission_id, reviewer_id, "Submission assigned");
        Ok(assigned)
    }

    /// Completes a waiting submission with a reviewer verdict.
    pub async fn submit_review(
        &self,
        submission_id: &str,
        review: ReviewRequest,
        reviewer_id: &str,
        is_admin: bool,
    ) -> GradingResult<ReviewOutcome> {
        let mut unit = self.submissions.begin(submission_id).await?;
        let record = match live_record(unit.as_ref()) {
            Ok(record) => record,
            Err(err) => return abort(unit, err).await,
        };

        if record.submission.status != SubmissionStatus::ReviewPending {
            let err = GradingError::conflict(format!(
                "Cannot review a submission with status \"{}\"",
                record.submission.status
            ));
            return abort(unit, err).await;
        }
        if record.submission.claimed_by.as_deref() != Some(reviewer_id) && !is_admin {
            REVIEW_ACTIONS_TOTAL
                .with_label_values(&["review", "forbidden"])
                .inc();
            return abort(
                unit,
                GradingError::forbidden("You must claim this submission first"),
            )
            .await;
        }
        if let Err(err) =
            SUBMISSION_MACHINE.assert_transition(record.submission.status, SubmissionStatus::Completed)
        {
            return abort(unit, err).await;
        }

        let machine = record
            .detail
            .result
            .as_ref()
            .and_then(GradingResultPayload::machine_score);
        let decision = merge_scores(machine, review.overall_score, review.band);
        let band = review.band.or_else(|| score_to_band(decision.final_score));
        let now = Utc::now();

        let mut next = record;
        next.submission.status = SubmissionStatus::Completed;
        next.submission.score = Some(decision.final_score);
        next.submission.band = band;
        next.submission.grading_mode = Some(decision.grading_mode);
        next.submission.audit_flag = decision.audit_flag;
        next.submission.reviewer_id = Some(reviewer_id.to_string());
        next.submission.progress_pending = true;
        next.submission.completed_at = Some(now);
        next.submission.updated_at = now;
        next.submission.clear_claim();

        if review.feedback.is_some() {
            next.detail.feedback = review.feedback.clone();
        }
        next.detail.result = Some(GradingResultPayload::Human(HumanResult {
            overall_score: review.overall_score,
            band: review.band,
            criteria_scores: review.criteria_scores,
            feedback: review.feedback,
            review_comment: review.review_comment,
            reviewer_id: reviewer_id.to_string(),
            reviewed_at: now,
            machine: machine.map(|(score, band)| MachineScore { score, band }),
            final_score: decision.final_score,
            grading_mode: decision.grading_mode,
            audit_flag: decision.audit_flag,
        }));
        next.detail.updated_at = now;

        let mut submission = next.submission.clone();
        unit.stage(next);
        unit.commit().await?;

        record_transition(
            SubmissionStatus::ReviewPending.as_str(),
            SubmissionStatus::Completed.as_str(),
        );
        let mode = match decision.grading_mode {
            GradingMode::Hybrid => "hybrid",
            _ => "human",
        };
        GRADINGS_TOTAL
            .with_label_values(&[mode, submission.skill.as_str(), "completed"])
            .inc();
        REVIEW_ACTIONS_TOTAL
            .with_label_values(&["review", "ok"])
            .inc();
        tracing::info!(
            submission_id,
            reviewer_id,
            final_score = decision.final_score,
            audit_flag = decision.audit_flag,
            mode,
            "Review submitted"
        );

        submission.progress_pending = !self.progress.deliver(&submission).await;

        Ok(ReviewOutcome {
            submission,
            decision,
            band,
        })
    }

}

fn live_record(unit: &dyn SubmissionUnit) -> GradingResult<SubmissionRecord> {
    match unit.record() {
        Some(record) if record.submission.deleted_at.is_none() => Ok(record.clone()),
        _ => Err(GradingError::not_found("Submission")),
    }
}

/// Claims and releases only see submissions waiting for review.
fn review_pending_record(unit: &dyn SubmissionUnit) -> GradingResult<SubmissionRecord> {
    let record = live_record(unit)?;
    if record.submission.status != SubmissionStatus::ReviewPending {
        return Err(GradingError::not_found("Submission"));
    }
    Ok(record)
}

async fn abort<T>(unit: Box<dyn SubmissionUnit>, err: GradingError) -> GradingResult<T> {
    if let Err(rollback_err) = unit.rollback().await {
        tracing::warn!(error = %rollback_err, "Rollback failed");
    }
    Err(err)
}
