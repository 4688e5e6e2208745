//! Rolling per-skill progress.
//!
//! Every graded score lands here once per submission. Rows are updated with an optimistic
//! read-modify-write that retries on version conflicts, so concurrent recordings for the
//! same (user, skill) never lose a sample.

use chrono::Utc;
use std::sync::Arc;

use crate::error::{GradingResult, StoreError};
use crate::metrics::PROGRESS_RECORDS_TOTAL;
use crate::models::progress::{ProgressOverview, ScoreSample, SkillSummary};
use crate::models::{Skill, StreakDirection, TrendLabel, UserProgress};
use crate::repository::ProgressStore;
use crate::services::scoring::{overall_score, score_to_band, score_to_level};
use crate::utils::retry::{retry_async_when, RetryConfig};

const INCONSISTENT_STD_DEV: f64 = 1.5;
const IMPROVING_DELTA: f64 = 0.5;
const DECLINING_DELTA: f64 = -0.5;
const FULL_ANALYSIS_MIN_SCORES: usize = 6;
const BASIC_ANALYSIS_MIN_SCORES: usize = 3;

/// Mean and sample standard deviation of a score window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
}

pub fn compute_stats(scores: &[f64]) -> WindowStats {
    if scores.is_empty() {
        return WindowStats {
            mean: None,
            std_dev: None,
        };
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let std_dev = if scores.len() > 1 {
        let ss: f64 = scores.iter().map(|s| (s - mean).powi(2)).sum();
        Some((ss / (n - 1.0)).sqrt())
    } else {
        None
    };
    WindowStats {
        mean: Some(mean),
        std_dev,
    }
}

/// Classifies a newest-first score window.
///
/// With six or more scores and a known deviation the newest three are compared against
/// the three before them; otherwise only volatility is judged.
pub fn trend(scores: &[f64], std_dev: Option<f64>) -> TrendLabel {
    if scores.len() >= FULL_ANALYSIS_MIN_SCORES {
        if let Some(sd) = std_dev {
            if sd >= INCONSISTENT_STD_DEV {
                return TrendLabel::Inconsistent;
            }
            let recent = scores[..3].iter().sum::<f64>() / 3.0;
            let previous = scores[3..6].iter().sum::<f64>() / 3.0;
            let delta = recent - previous;
            if delta >= IMPROVING_DELTA {
                return TrendLabel::Improving;
            }
            if delta <= DECLINING_DELTA {
                return TrendLabel::Declining;
            }
            return TrendLabel::Stable;
        }
    }
    if scores.len() >= BASIC_ANALYSIS_MIN_SCORES {
        return match std_dev {
            Some(sd) if sd >= INCONSISTENT_STD_DEV => TrendLabel::Inconsistent,
            _ => TrendLabel::Stable,
        };
    }
    TrendLabel::InsufficientData
}

/// Folds one score into a progress row. Returns false if the submission was already counted.
fn apply_sample(
    progress: &mut UserProgress,
    submission_id: &str,
    score: f64,
    window: usize,
) -> bool {
    if progress.has_recorded(submission_id) {
        return false;
    }
    let now = Utc::now();

    let direction = match progress.recent.first() {
        Some(last) if score > last.score => StreakDirection::Up,
        Some(last) if score < last.score => StreakDirection::Down,
        _ => StreakDirection::Neutral,
    };
    progress.streak_count = match direction {
        StreakDirection::Neutral => 0,
        d if d == progress.streak_direction => progress.streak_count + 1,
        _ => 1,
    };
    progress.streak_direction = direction;

    progress.sample_count += 1;
    let delta = score - progress.mean;
    progress.mean += delta / progress.sample_count as f64;
    progress.m2 += delta * (score - progress.mean);

    progress.recent.insert(
        0,
        ScoreSample {
            submission_id: submission_id.to_string(),
            score,
            recorded_at: now,
        },
    );
    progress.recent.truncate(window);

    let stats = compute_stats(&progress.recent_scores());
    progress.current_level = score_to_level(stats.mean.unwrap_or(score));
    progress.remember(submission_id);
    progress.updated_at = now;
    true
}

fn refresh_trend(progress: &mut UserProgress) -> bool {
    let scores = progress.recent_scores();
    let label = trend(&scores, compute_stats(&scores).std_dev);
    if label == progress.trend {
        return false;
    }
    progress.trend = label;
    progress.updated_at = Utc::now();
    true
}

pub struct ProgressTracker {
    store: Arc<dyn ProgressStore>,
    window: usize,
    retry: RetryConfig,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn ProgressStore>, window: usize) -> Self {
        Self {
            store,
            window,
            retry: RetryConfig::contention(),
        }
    }

    /// Adds a score to the (user, skill) window. Returns whether it was applied; a
    /// submission that was already recorded is a no-op.
    pub async fn record(
        &self,
        user_id: &str,
        skill: Skill,
        submission_id: &str,
        score: f64,
    ) -> GradingResult<bool> {
        let window = self.window;
        let updated = self
            .update(user_id, skill, |progress| {
                apply_sample(progress, submission_id, score, window)
            })
            .await?;

        let outcome = if updated.is_some() {
            "recorded"
        } else {
            "duplicate"
        };
        PROGRESS_RECORDS_TOTAL
            .with_label_values(&[skill.as_str(), outcome])
            .inc();
        if updated.is_none() {
            tracing::debug!(user_id, %skill, submission_id, "Score already recorded");
        }
        Ok(updated.is_some())
    }

    /// Recomputes and persists the trend label from the current window.
    pub async fn sync(&self, user_id: &str, skill: Skill) -> GradingResult<TrendLabel> {
        match self.update(user_id, skill, refresh_trend).await? {
            Some(progress) => Ok(progress.trend),
            None => Ok(self
                .store
                .get(user_id, skill)
                .await?
                .map_or(TrendLabel::InsufficientData, |p| p.trend)),
        }
    }

    pub async fn record_progress(
        &self,
        user_id: &str,
        skill: Skill,
        submission_id: &str,
        score: f64,
    ) -> GradingResult<bool> {
        let applied = self.record(user_id, skill, submission_id, score).await?;
        let trend = self.sync(user_id, skill).await?;
        tracing::info!(user_id, %skill, submission_id, score, applied, ?trend, "Progress recorded");
        Ok(applied)
    }

    pub async fn overview(&self, user_id: &str) -> GradingResult<ProgressOverview> {
        let rows = self.store.list_for_user(user_id).await?;

        let skills: Vec<SkillSummary> = rows
            .iter()
            .map(|p| {
                let recent_scores = p.recent_scores();
                let stats = compute_stats(&recent_scores);
                SkillSummary {
                    skill: p.skill,
                    sample_count: p.sample_count,
                    mean: stats.mean,
                    std_dev: stats.std_dev,
                    all_time_mean: p.all_time_mean(),
                    all_time_std_dev: p.std_dev(),
                    recent_scores,
                    trend: p.trend,
                    streak_direction: p.streak_direction,
                    streak_count: p.streak_count,
                    current_level: p.current_level,
                }
            })
            .collect();

        let per_skill: Vec<Option<f64>> = Skill::ALL
            .iter()
            .map(|skill| {
                skills
                    .iter()
                    .find(|s| s.skill == *skill)
                    .and_then(|s| s.mean)
            })
            .collect();
        let overall = overall_score(&per_skill);

        Ok(ProgressOverview {
            user_id: user_id.to_string(),
            skills,
            overall_score: overall,
            overall_band: overall.and_then(score_to_band),
        })
    }

    /// Read-modify-write of one row with optimistic retry. `apply` returns false to skip
    /// the write; the stored row is then left untouched and `None` is returned.
    async fn update<F>(
        &self,
        user_id: &str,
        skill: Skill,
        apply: F,
    ) -> Result<Option<UserProgress>, StoreError>
    where
        F: Fn(&mut UserProgress) -> bool + Send + Sync,
    {
        let apply = &apply;
        let store = &self.store;
        retry_async_when(
            self.retry.clone(),
            |e: &StoreError| matches!(e, StoreError::Conflict(_)),
            || async move {
                let current = store.get(user_id, skill).await?;
                let expected = current.as_ref().map(|p| p.version);
                let mut progress = current.unwrap_or_else(|| UserProgress::new(user_id, skill));
                if !apply(&mut progress) {
                    return Ok(None);
                }
                progress.version = expected.unwrap_or(0) + 1;
                store.save(&progress, expected).await?;
                Ok(Some(progress))
            },
        )
        .await
    }
}
