use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw answer payload stored with a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubmissionAnswer {
    /// Item id -> chosen/typed answer, for listening and reading.
    Objective { answers: BTreeMap<String, String> },
    Writing { text: String },
    Speaking {
        #[serde(rename = "audioUrl")]
        audio_url: String,
        #[serde(rename = "durationSeconds")]
        duration_seconds: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },
}

impl SubmissionAnswer {
    pub fn is_objective(&self) -> bool {
        matches!(self, SubmissionAnswer::Objective { .. })
    }

    pub fn is_writing(&self) -> bool {
        matches!(self, SubmissionAnswer::Writing { .. })
    }

    pub fn is_speaking(&self) -> bool {
        matches!(self, SubmissionAnswer::Speaking { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SubmissionAnswer::Objective { .. } => "objective",
            SubmissionAnswer::Writing { .. } => "writing",
            SubmissionAnswer::Speaking { .. } => "speaking",
        }
    }
}

/// Expected answers of an objectively gradable question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerKey {
    #[serde(rename = "correctAnswers")]
    pub correct_answers: BTreeMap<String, String>,
}

impl AnswerKey {
    /// Parses the loosely-typed key stored on a question. Anything other than
    /// `{"correctAnswers": {item: string}}` is rejected.
    pub fn parse(raw: &serde_json::Value) -> Option<AnswerKey> {
        serde_json::from_value(raw.clone()).ok()
    }

    pub fn len(&self) -> usize {
        self.correct_answers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.correct_answers.is_empty()
    }
}
