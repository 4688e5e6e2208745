//! Synchronous grading of listening and reading submissions against their answer key.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{GradingError, GradingResult};
use crate::metrics::{record_transition, GRADINGS_TOTAL};
use crate::models::grading::AutoResult;
use crate::models::{
    GradingMode, GradingResultPayload, SubmissionAnswer, SubmissionRecord, SubmissionStatus,
};
use crate::repository::{QuestionLookup, SubmissionStore};
use crate::services::progress_recorder::ProgressRecorder;
use crate::services::scoring;
use crate::services::state_machine::SUBMISSION_MACHINE;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoGradeOutcome {
    pub score: f64,
    pub result: AutoResult,
}

pub struct AutoGrader {
    submissions: Arc<dyn SubmissionStore>,
    questions: Arc<dyn QuestionLookup>,
    progress: Arc<ProgressRecorder>,
}

impl AutoGrader {
    pub fn new(
        submissions: Arc<dyn SubmissionStore>,
        questions: Arc<dyn QuestionLookup>,
        progress: Arc<ProgressRecorder>,
    ) -> Self {
        Self {
            submissions,
            questions,
            progress,
        }
    }

    /// Grades a pending objective submission and completes it.
    ///
    /// The status change, the detail result and the `progress_pending` flag are committed
    /// together. Progress is delivered afterwards; a failed delivery does not undo the
    /// grade and is replayed later.
    pub async fn auto_grade(&self, submission_id: &str) -> GradingResult<AutoGradeOutcome> {
        let mut unit = self.submissions.begin(submission_id).await?;

        let prepared = match unit.record().cloned() {
            Some(record) if record.submission.deleted_at.is_none() => self.grade(&record).await,
            _ => Err(GradingError::not_found("Submission")),
        };
        let (next, outcome) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                if let Err(rollback_err) = unit.rollback().await {
                    tracing::warn!(submission_id, error = %rollback_err, "Rollback failed");
                }
                return Err(err);
            }
        };

        let completed = next.submission.clone();
        let skill = completed.skill;

        unit.stage(next);
        unit.commit().await?;

        record_transition(
            SubmissionStatus::Pending.as_str(),
            SubmissionStatus::Completed.as_str(),
        );
        GRADINGS_TOTAL
            .with_label_values(&["auto", skill.as_str(), "completed"])
            .inc();
        tracing::info!(
            submission_id,
            %skill,
            correct = outcome.result.correct_count,
            total = outcome.result.total_count,
            score = outcome.score,
            "Submission auto-graded"
        );

        self.progress.deliver(&completed).await;

        Ok(outcome)
    }

    /// Checks every precondition and builds the graded record without touching storage.
    async fn grade(
        &self,
        record: &SubmissionRecord,
    ) -> GradingResult<(SubmissionRecord, AutoGradeOutcome)> {
        let submission = &record.submission;

        match submission.status {
            SubmissionStatus::Pending => {}
            status => {
                return Err(GradingError::conflict(format!(
                    "Submission is already {} and cannot be auto-graded",
                    status
                )))
            }
        }
        SUBMISSION_MACHINE.assert_transition(submission.status, SubmissionStatus::Completed)?;

        if !submission.skill.is_objective() {
            return Err(GradingError::bad_request(format!(
                "Skill {} cannot be auto-graded",
                submission.skill
            )));
        }

        let question = self
            .questions
            .find_question(&submission.question_id)
            .await?
            .ok_or_else(|| GradingError::not_found("Question"))?;
        let key = question
            .objective_key()
            .ok_or_else(|| GradingError::bad_request("Question has no answer key"))?;

        let SubmissionAnswer::Objective { answers } = &record.detail.answer else {
            return Err(GradingError::bad_request(format!(
                "Answer format {} is incompatible with objective grading",
                record.detail.answer.kind()
            )));
        };

        if key.is_empty() {
            return Err(GradingError::bad_request("Answer key is empty, nothing to grade"));
        }

        let total = key.len() as u32;
        let correct = key
            .correct_answers
            .iter()
            .filter(|(item, expected)| {
                let given = answers.get(*item).map(String::as_str).unwrap_or("");
                scoring::normalize(given) == scoring::normalize(expected)
            })
            .count() as u32;
        let score = scoring::score(correct, total)
            .ok_or_else(|| GradingError::bad_request("Answer key is empty, nothing to grade"))?;
        let band = scoring::score_to_band(score);
        let now = Utc::now();

        let result = AutoResult {
            correct_count: correct,
            total_count: total,
            score,
            band,
            graded_at: now,
        };

        let mut next = record.clone();
        next.submission.status = SubmissionStatus::Completed;
        next.submission.score = Some(score);
        next.submission.band = band;
        next.submission.grading_mode = Some(GradingMode::Auto);
        next.submission.progress_pending = true;
        next.submission.completed_at = Some(now);
        next.submission.updated_at = now;
        next.detail.result = Some(GradingResultPayload::Auto(result.clone()));
        next.detail.updated_at = now;

        Ok((next, AutoGradeOutcome { score, result }))
    }
}
