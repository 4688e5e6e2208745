//! Score, band and level mapping for the VSTEP 0-10 scale.
//!
//! Everything here is pure; the grading services and the progress tracker are the only
//! callers and never re-derive these rules themselves.

use crate::models::{Band, DifficultyLevel};

/// Band thresholds on the 0-10 scale.
pub const C1_THRESHOLD: f64 = 8.5;
pub const B2_THRESHOLD: f64 = 6.0;
pub const B1_THRESHOLD: f64 = 4.0;
/// Below this a learner is placed at A1.
pub const A2_THRESHOLD: f64 = 2.0;

/// Rounds to the nearest 0.5, halves rounding up.
pub fn round_half(value: f64) -> f64 {
    (value * 2.0 + 0.5).floor() / 2.0
}

/// Share of correct items mapped onto 0-10. `None` when there is nothing to grade.
pub fn score(correct: u32, total: u32) -> Option<f64> {
    if total == 0 {
        return None;
    }
    let ratio = (correct as f64 / total as f64).min(1.0);
    Some(round_half(ratio * 10.0))
}

/// Mean of all skill scores. An incomplete skill set has no overall score.
pub fn overall_score(scores: &[Option<f64>]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let values = scores.iter().copied().collect::<Option<Vec<f64>>>()?;
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some(round_half(mean))
}

pub fn score_to_band(score: f64) -> Option<Band> {
    if score >= C1_THRESHOLD {
        Some(Band::C1)
    } else if score >= B2_THRESHOLD {
        Some(Band::B2)
    } else if score >= B1_THRESHOLD {
        Some(Band::B1)
    } else {
        None
    }
}

pub fn score_to_level(score: f64) -> DifficultyLevel {
    if score >= C1_THRESHOLD {
        DifficultyLevel::C1
    } else if score >= B2_THRESHOLD {
        DifficultyLevel::B2
    } else if score >= B1_THRESHOLD {
        DifficultyLevel::B1
    } else if score >= A2_THRESHOLD {
        DifficultyLevel::A2
    } else {
        DifficultyLevel::A1
    }
}

/// Canonical comparison key for free-text objective answers.
pub fn normalize(answer: &str) -> String {
    answer
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Ordinal of a band on the five-tier ladder; 0 when there is no band.
pub fn band_index(band: Option<Band>) -> u8 {
    match band {
        None => 0,
        Some(Band::B1) => 3,
        Some(Band::B2) => 4,
        Some(Band::C1) => 5,
    }
}
