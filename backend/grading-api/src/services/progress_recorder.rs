//! Delivers committed grades to progress at least once.
//!
//! Every unit of work that completes a submission also sets `progress_pending`. The
//! recorder folds the score into progress right after the commit and clears the flag; if
//! either step fails the flag stays set, and a later [`ProgressRecorder::reconcile`] or
//! background sweep replays it. Replays are safe because progress recording is idempotent
//! per submission id.

use anyhow::anyhow;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::{GradingError, GradingResult};
use crate::metrics::{PROGRESS_DELIVERIES_TOTAL, PROGRESS_SWEEP_TICKS_TOTAL};
use crate::models::{Submission, SubmissionStatus};
use crate::repository::SubmissionStore;
use crate::services::progress_tracker::ProgressTracker;

/// Upper bound on submissions replayed by one sweep pass.
pub const SWEEP_BATCH: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub scanned: usize,
    pub settled: usize,
    pub failed: usize,
}

pub struct ProgressRecorder {
    submissions: Arc<dyn SubmissionStore>,
    tracker: Arc<ProgressTracker>,
}

impl ProgressRecorder {
    pub fn new(submissions: Arc<dyn SubmissionStore>, tracker: Arc<ProgressTracker>) -> Self {
        Self {
            submissions,
            tracker,
        }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Called right after a completing commit. Never fails the caller; an undelivered
    /// grade keeps its flag and is picked up by the sweep. Returns whether it was delivered.
    pub async fn deliver(&self, submission: &Submission) -> bool {
        let delivered = match self.settle(submission).await {
            Ok(_) => true,
            Err(err) => {
                warn!(
                    submission_id = %submission.id,
                    error = %err,
                    "Progress delivery failed, left for reconciliation"
                );
                false
            }
        };
        PROGRESS_DELIVERIES_TOTAL
            .with_label_values(&["inline", if delivered { "delivered" } else { "failed" }])
            .inc();
        delivered
    }

    /// Replays the progress delivery of one completed submission. Returns true when a
    /// pending grade was delivered, false when there was nothing left to deliver.
    pub async fn reconcile(&self, submission_id: &str) -> GradingResult<bool> {
        let submission = match self.submissions.get(submission_id).await? {
            Some(record) if record.submission.deleted_at.is_none() => record.submission,
            _ => return Err(GradingError::not_found("Submission")),
        };
        if submission.status != SubmissionStatus::Completed {
            return Err(GradingError::conflict(format!(
                "Submission is {} and has no grade to record",
                submission.status
            )));
        }
        if !submission.progress_pending {
            return Ok(false);
        }

        let settled = self.settle(&submission).await;
        PROGRESS_DELIVERIES_TOTAL
            .with_label_values(&["reconcile", if settled.is_ok() { "delivered" } else { "failed" }])
            .inc();
        settled?;
        Ok(true)
    }

    /// Replays up to `limit` undelivered grades, oldest first.
    pub async fn sweep(&self, limit: usize) -> GradingResult<SweepReport> {
        let pending = self.submissions.list_progress_pending(limit).await?;
        let mut report = SweepReport {
            scanned: pending.len(),
            ..SweepReport::default()
        };

        for submission in &pending {
            match self.settle(submission).await {
                Ok(_) => {
                    report.settled += 1;
                    PROGRESS_DELIVERIES_TOTAL
                        .with_label_values(&["sweep", "delivered"])
                        .inc();
                }
                Err(err) => {
                    report.failed += 1;
                    PROGRESS_DELIVERIES_TOTAL
                        .with_label_values(&["sweep", "failed"])
                        .inc();
                    warn!(submission_id = %submission.id, error = %err, "Progress replay failed");
                }
            }
        }
        Ok(report)
    }

    pub async fn run(&self, interval: Duration) {
        info!(
            "Starting progress sweep loop (interval {}s)",
            interval.as_secs()
        );

        loop {
            match self.sweep(SWEEP_BATCH).await {
                Ok(report) => {
                    PROGRESS_SWEEP_TICKS_TOTAL
                        .with_label_values(&["success"])
                        .inc();
                    if report.scanned > 0 {
                        info!(
                            scanned = report.scanned,
                            settled = report.settled,
                            failed = report.failed,
                            "Progress sweep tick completed"
                        );
                    }
                }
                Err(err) => {
                    PROGRESS_SWEEP_TICKS_TOTAL
                        .with_label_values(&["error"])
                        .inc();
                    warn!(error = %err, "Progress sweep tick failed");
                }
            }

            sleep(interval).await;
        }
    }

    async fn settle(&self, submission: &Submission) -> GradingResult<bool> {
        let score = submission.score.ok_or_else(|| {
            GradingError::Internal(anyhow!(
                "completed submission {} has no score",
                submission.id
            ))
        })?;
        let applied = self
            .tracker
            .record_progress(&submission.user_id, submission.skill, &submission.id, score)
            .await?;
        self.clear_pending(&submission.id).await?;
        Ok(applied)
    }

    async fn clear_pending(&self, submission_id: &str) -> GradingResult<()> {
        let mut unit = self.submissions.begin(submission_id).await?;
        let next = unit
            .record()
            .filter(|r| r.submission.progress_pending)
            .cloned();
        match next {
            Some(mut next) => {
                next.submission.progress_pending = false;
                unit.stage(next);
                unit.commit().await?;
            }
            None => unit.rollback().await?,
        }
        Ok(())
    }
}
