use serde::{Deserialize, Serialize};

use super::{answer::AnswerKey, DifficultyLevel, Skill};

/// Read-only view of a question; owned by the content collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(rename = "_id")]
    pub id: String,
    pub skill: Skill,
    pub level: Option<DifficultyLevel>,
    /// Kept loosely typed: legacy rows carry keys of other shapes.
    pub answer_key: Option<serde_json::Value>,
}

impl Question {
    /// `None` when the question has no key or the stored key is malformed.
    pub fn objective_key(&self) -> Option<AnswerKey> {
        self.answer_key.as_ref().and_then(AnswerKey::parse)
    }
}
