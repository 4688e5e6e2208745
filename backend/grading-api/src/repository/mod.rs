//! Storage contracts the grading core depends on.
//!
//! The services only talk to these traits. [`mongo`] backs them with MongoDB
//! multi-document transactions; [`memory`] keeps everything in process and is what the
//! test-suite runs against.

pub mod memory;
pub mod mongo;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Question, Skill, Submission, SubmissionRecord, UserProgress};

pub use memory::{InMemoryProgressStore, InMemoryQuestionStore, InMemorySubmissionStore};
pub use mongo::{MongoProgressStore, MongoQuestionStore, MongoSubmissionStore};

/// Transactional access to submissions and their details.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Opens a unit of work scoped to one submission and reads it inside that unit.
    ///
    /// Two units on the same id never both commit: the second either waits for the first
    /// or fails its commit with [`StoreError::Conflict`].
    async fn begin(&self, submission_id: &str) -> Result<Box<dyn SubmissionUnit>, StoreError>;

    /// Point read outside any unit of work.
    async fn get(&self, submission_id: &str) -> Result<Option<SubmissionRecord>, StoreError>;

    /// Used by the intake collaborator. A reused id or request id is a conflict.
    async fn insert(&self, record: SubmissionRecord) -> Result<(), StoreError>;

    /// Completed submissions whose score has not reached progress yet, least recently
    /// updated first.
    async fn list_progress_pending(&self, limit: usize) -> Result<Vec<Submission>, StoreError>;
}

/// One all-or-nothing change to a submission/detail pair.
#[async_trait]
pub trait SubmissionUnit: Send {
    /// State as read when the unit was opened; `None` if the submission does not exist.
    fn record(&self) -> Option<&SubmissionRecord>;

    /// Replaces the pending change. Nothing reaches storage before [`commit`].
    ///
    /// [`commit`]: SubmissionUnit::commit
    fn stage(&mut self, record: SubmissionRecord);

    /// Writes the staged submission and detail together, conditioned on the state read at
    /// `begin`. A unit with nothing staged commits as a no-op.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait QuestionLookup: Send + Sync {
    async fn find_question(&self, question_id: &str) -> Result<Option<Question>, StoreError>;
}

/// Per (user, skill) progress rows with optimistic versioning.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn get(&self, user_id: &str, skill: Skill) -> Result<Option<UserProgress>, StoreError>;

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<UserProgress>, StoreError>;

    /// Stores `progress` only if the current row still carries `expected_version`
    /// (`None`: the row must not exist yet). Losing the race yields
    /// [`StoreError::Conflict`].
    async fn save(
        &self,
        progress: &UserProgress,
        expected_version: Option<i64>,
    ) -> Result<(), StoreError>;
}
