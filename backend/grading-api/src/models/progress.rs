use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Band, DifficultyLevel, Skill};

/// How many counted submission ids a progress row keeps for de-duplication. Replays only
/// come from grades whose `progress_pending` flag is still set, which is far inside this.
pub const RECORDED_HORIZON: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendLabel {
    Improving,
    Stable,
    Declining,
    Inconsistent,
    InsufficientData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakDirection {
    Up,
    Down,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSample {
    pub submission_id: String,
    pub score: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Rolling statistics for one (user, skill) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProgress {
    /// `{user_id}:{skill}`
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub skill: Skill,
    pub sample_count: u64,
    pub mean: f64,
    /// Sum of squared deviations from the running mean (Welford).
    pub m2: f64,
    /// Newest first, bounded by the configured window.
    pub recent: Vec<ScoreSample>,
    pub trend: TrendLabel,
    pub streak_direction: StreakDirection,
    pub streak_count: u32,
    pub current_level: DifficultyLevel,
    /// Ids of the latest counted submissions, oldest first, capped at
    /// [`RECORDED_HORIZON`] so the row stays bounded.
    pub recorded_submissions: Vec<String>,
    /// Optimistic concurrency token, bumped on every write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserProgress {
    pub fn key(user_id: &str, skill: Skill) -> String {
        format!("{}:{}", user_id, skill)
    }

    pub fn new(user_id: &str, skill: Skill) -> Self {
        let now = Utc::now();
        Self {
            id: Self::key(user_id, skill),
            user_id: user_id.to_string(),
            skill,
            sample_count: 0,
            mean: 0.0,
            m2: 0.0,
            recent: Vec::new(),
            trend: TrendLabel::InsufficientData,
            streak_direction: StreakDirection::Neutral,
            streak_count: 0,
            current_level: DifficultyLevel::A1,
            recorded_submissions: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// All-time sample standard deviation; `None` below two samples.
    pub fn std_dev(&self) -> Option<f64> {
        if self.sample_count < 2 {
            return None;
        }
        Some((self.m2 / (self.sample_count - 1) as f64).sqrt())
    }

    pub fn recent_scores(&self) -> Vec<f64> {
        self.recent.iter().map(|s| s.score).collect()
    }

    /// All-time mean; `None` before the first sample.
    pub fn all_time_mean(&self) -> Option<f64> {
        (self.sample_count > 0).then_some(self.mean)
    }

    pub fn has_recorded(&self, submission_id: &str) -> bool {
        self.recorded_submissions.iter().any(|id| id == submission_id)
    }

    pub fn remember(&mut self, submission_id: &str) {
        self.recorded_submissions.push(submission_id.to_string());
        if self.recorded_submissions.len() > RECORDED_HORIZON {
            let excess = self.recorded_submissions.len() - RECORDED_HORIZON;
            self.recorded_submissions.drain(..excess);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillSummary {
    pub skill: Skill,
    pub sample_count: u64,
    /// Window statistics.
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    pub all_time_mean: Option<f64>,
    pub all_time_std_dev: Option<f64>,
    pub recent_scores: Vec<f64>,
    pub trend: TrendLabel,
    pub streak_direction: StreakDirection,
    pub streak_count: u32,
    pub current_level: DifficultyLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressOverview {
    pub user_id: String,
    pub skills: Vec<SkillSummary>,
    pub overall_score: Option<f64>,
    pub overall_band: Option<Band>,
}
