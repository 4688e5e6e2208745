//! Hands writing and speaking submissions to the external grading worker.

use chrono::Utc;
use std::sync::Arc;

use crate::error::{GradingError, GradingResult};
use crate::metrics::{record_transition, DISPATCHES_TOTAL};
use crate::models::{GradingTask, SubmissionRecord, SubmissionStatus};
use crate::repository::SubmissionStore;
use crate::services::grading_queue::GradingQueue;
use crate::services::state_machine::SUBMISSION_MACHINE;

pub struct GradingDispatcher {
    submissions: Arc<dyn SubmissionStore>,
    queue: Arc<dyn GradingQueue>,
}

impl GradingDispatcher {
    pub fn new(submissions: Arc<dyn SubmissionStore>, queue: Arc<dyn GradingQueue>) -> Self {
        Self { submissions, queue }
    }

    /// Moves a pending subjective submission to `processing` and enqueues it.
    ///
    /// The task is published before the status change commits; a failed publish rolls
    /// the unit back and the submission stays `pending`. A commit that fails after a
    /// successful publish leaves a duplicate task, which the worker drops by submission id.
    ///
    /// A worker result can arrive before the commit lands. It then finds the submission
    /// still `pending` and is refused with 409 `CONFLICT`; the worker retries it with
    /// backoff until the submission reads `processing`.
    pub async fn dispatch(&self, submission_id: &str) -> GradingResult<GradingTask> {
        let mut unit = self.submissions.begin(submission_id).await?;

        let prepared = match unit.record().cloned() {
            Some(record) if record.submission.deleted_at.is_none() => Self::prepare(record),
            _ => Err(GradingError::not_found("Submission")),
        };
        let (next, task) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                if let Err(rollback_err) = unit.rollback().await {
                    tracing::warn!(submission_id, error = %rollback_err, "Rollback failed");
                }
                return Err(err);
            }
        };
        let skill = task.skill;
        unit.stage(next);

        if let Err(err) = self.queue.publish(&task).await {
            DISPATCHES_TOTAL
                .with_label_values(&[skill.as_str(), "publish_failed"])
                .inc();
            if let Err(rollback_err) = unit.rollback().await {
                tracing::warn!(submission_id, error = %rollback_err, "Rollback failed");
            }
            return Err(GradingError::Internal(err.context("Failed to enqueue grading task")));
        }

        if let Err(err) = unit.commit().await {
            DISPATCHES_TOTAL
                .with_label_values(&[skill.as_str(), "commit_failed"])
                .inc();
            tracing::warn!(
                submission_id,
                error = %err,
                "Task published but status change not committed"
            );
            return Err(err.into());
        }

        record_transition(
            SubmissionStatus::Pending.as_str(),
            SubmissionStatus::Processing.as_str(),
        );
        DISPATCHES_TOTAL
            .with_label_values(&[skill.as_str(), "dispatched"])
            .inc();
        tracing::info!(submission_id, %skill, "Submission dispatched for grading");

        Ok(task)
    }

    fn prepare(record: SubmissionRecord) -> GradingResult<(SubmissionRecord, GradingTask)> {
        let submission = &record.submission;
        if submission.skill.is_objective() {
            return Err(GradingError::bad_request(format!(
                "Skill {} is graded automatically and cannot be dispatched",
                submission.skill
            )));
        }
        SUBMISSION_MACHINE.assert_transition(submission.status, SubmissionStatus::Processing)?;

        let now = Utc::now();
        let task = GradingTask {
            submission_id: submission.id.clone(),
            question_id: submission.question_id.clone(),
            skill: submission.skill,
            answer: record.detail.answer.clone(),
            dispatched_at: now,
        };

        let mut next = record;
        next.submission.status = SubmissionStatus::Processing;
        next.submission.updated_at = now;
        Ok((next, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Skill, Submission, SubmissionAnswer, SubmissionDetail};
    use crate::repository::InMemorySubmissionStore;
    use crate::services::grading_queue::InMemoryGradingQueue;
    use std::collections::BTreeMap;

    struct Fixture {
        dispatcher: GradingDispatcher,
        submissions: Arc<InMemorySubmissionStore>,
        queue: Arc<InMemoryGradingQueue>,
    }

    fn fixture() -> Fixture {
        let submissions = Arc::new(InMemorySubmissionStore::new());
        let queue = Arc::new(InMemoryGradingQueue::new());
        Fixture {
            dispatcher: GradingDispatcher::new(submissions.clone(), queue.clone()),
            submissions,
            queue,
        }
    }

    async fn seed(f: &Fixture, skill: Skill, answer: SubmissionAnswer) -> String {
        let submission = Submission::new_pending("u1", "q1", skill);
        let id = submission.id.clone();
        let detail = SubmissionDetail::new(&id, answer);
        f.submissions
            .insert(SubmissionRecord { submission, detail })
            .await
            .unwrap();
        id
    }

    fn essay() -> SubmissionAnswer {
        SubmissionAnswer::Writing {
            text: "Dear Sir or Madam, ...".into(),
        }
    }

    #[tokio::test]
    async fn dispatch_publishes_once_and_moves_to_processing() {
        let f = fixture();
        let id = seed(&f, Skill::Writing, essay()).await;

        let task = f.dispatcher.dispatch(&id).await.unwrap();
        assert_eq!(task.submission_id, id);
        assert_eq!(task.skill, Skill::Writing);

        let stored = f.submissions.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.submission.status, SubmissionStatus::Processing);
        assert_eq!(f.queue.tasks().await.len(), 1);

        let err = f.dispatcher.dispatch(&id).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(f.queue.tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn failed_publish_keeps_submission_pending() {
        let f = fixture();
        let id = seed(&f, Skill::Speaking, SubmissionAnswer::Speaking {
            audio_url: "https://cdn.example/answer.webm".into(),
            duration_seconds: 95.0,
            transcript: None,
        })
        .await;
        f.queue.fail_publishes(true);

        let err = f.dispatcher.dispatch(&id).await.unwrap_err();
        assert!(matches!(err, GradingError::Internal(_)));

        let stored = f.submissions.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.submission.status, SubmissionStatus::Pending);

        f.queue.fail_publishes(false);
        f.dispatcher.dispatch(&id).await.unwrap();
        assert_eq!(f.queue.tasks().await.len(), 1);
    }

    #[tokio::test]
    async fn objective_skill_cannot_be_dispatched() {
        let f = fixture();
        let id = seed(
            &f,
            Skill::Reading,
            SubmissionAnswer::Objective {
                answers: BTreeMap::new(),
            },
        )
        .await;
        let err = f.dispatcher.dispatch(&id).await.unwrap_err();
        assert!(matches!(err, GradingError::BadRequest(_)));
        assert!(f.queue.tasks().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_submission_is_not_found() {
        let f = fixture();
        let err = f.dispatcher.dispatch("nope").await.unwrap_err();
        assert!(matches!(err, GradingError::NotFound(_)));
    }
}
