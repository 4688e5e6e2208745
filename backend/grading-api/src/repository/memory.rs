//! In-process storage used by the test-suite and by local runs without MongoDB.
//!
//! Each submission sits behind its own mutex; a unit of work holds that mutex from
//! `begin` until it commits or rolls back, which serializes writers per submission.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::{ProgressStore, QuestionLookup, SubmissionStore, SubmissionUnit};
use crate::error::StoreError;
use crate::models::{
    Question, Skill, Submission, SubmissionRecord, SubmissionStatus, UserProgress,
};

#[derive(Default)]
pub struct InMemorySubmissionStore {
    records: RwLock<HashMap<String, Arc<Mutex<SubmissionRecord>>>>,
    request_ids: RwLock<HashSet<String>>,
    fail_commits: Arc<AtomicBool>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later commit fail with a backend error until switched off again.
    pub fn fail_commits(&self, enabled: bool) {
        self.fail_commits.store(enabled, Ordering::SeqCst);
    }

    async fn slot(&self, submission_id: &str) -> Option<Arc<Mutex<SubmissionRecord>>> {
        self.records.read().await.get(submission_id).cloned()
    }
}

#[async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn begin(&self, submission_id: &str) -> Result<Box<dyn SubmissionUnit>, StoreError> {
        let guard = match self.slot(submission_id).await {
            Some(slot) => Some(slot.lock_owned().await),
            None => None,
        };
        Ok(Box::new(InMemoryUnit {
            guard,
            staged: None,
            fail_commits: self.fail_commits.clone(),
        }))
    }

    async fn get(&self, submission_id: &str) -> Result<Option<SubmissionRecord>, StoreError> {
        match self.slot(submission_id).await {
            Some(slot) => Ok(Some(slot.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn insert(&self, record: SubmissionRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let mut request_ids = self.request_ids.write().await;

        let id = record.submission.id.clone();
        if records.contains_key(&id) {
            return Err(StoreError::Conflict(format!("submission {} already exists", id)));
        }
        if let Some(request_id) = &record.submission.request_id {
            if !request_ids.insert(request_id.clone()) {
                return Err(StoreError::Conflict(format!(
                    "request id {} already used",
                    request_id
                )));
            }
        }
        records.insert(id, Arc::new(Mutex::new(record)));
        Ok(())
    }

    async fn list_progress_pending(&self, limit: usize) -> Result<Vec<Submission>, StoreError> {
        let slots: Vec<_> = self.records.read().await.values().cloned().collect();
        let mut pending = Vec::new();
        for slot in slots {
            let record = slot.lock().await;
            let submission = &record.submission;
            if submission.status == SubmissionStatus::Completed
                && submission.progress_pending
                && submission.deleted_at.is_none()
            {
                pending.push(submission.clone());
            }
        }
        pending.sort_by_key(|s| s.updated_at);
        pending.truncate(limit);
        Ok(pending)
    }
}

struct InMemoryUnit {
    guard: Option<OwnedMutexGuard<SubmissionRecord>>,
    staged: Option<SubmissionRecord>,
    fail_commits: Arc<AtomicBool>,
}

#[async_trait]
impl SubmissionUnit for InMemoryUnit {
    fn record(&self) -> Option<&SubmissionRecord> {
        self.guard.as_deref()
    }

    fn stage(&mut self, record: SubmissionRecord) {
        self.staged = Some(record);
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryUnit {
            guard,
            staged,
            fail_commits,
        } = *self;

        let Some(staged) = staged else {
            return Ok(());
        };
        if fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow!("commit failed")));
        }
        match guard {
            Some(mut guard) => {
                *guard = staged;
                Ok(())
            }
            None => Err(StoreError::Conflict(format!(
                "submission {} does not exist",
                staged.submission.id
            ))),
        }
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // Dropping the guard discards the staged change.
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryQuestionStore {
    questions: RwLock<HashMap<String, Question>>,
}

impl InMemoryQuestionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, question: Question) {
        self.questions
            .write()
            .await
            .insert(question.id.clone(), question);
    }
}

#[async_trait]
impl QuestionLookup for InMemoryQuestionStore {
    async fn find_question(&self, question_id: &str) -> Result<Option<Question>, StoreError> {
        Ok(self.questions.read().await.get(question_id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryProgressStore {
    rows: RwLock<HashMap<String, UserProgress>>,
    fail_saves: AtomicBool,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later save fail with a backend error until switched off again.
    pub fn fail_saves(&self, enabled: bool) {
        self.fail_saves.store(enabled, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn get(&self, user_id: &str, skill: Skill) -> Result<Option<UserProgress>, StoreError> {
        let key = UserProgress::key(user_id, skill);
        Ok(self.rows.read().await.get(&key).cloned())
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<UserProgress>, StoreError> {
        let rows = self.rows.read().await;
        let mut out: Vec<UserProgress> = rows
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|p| p.skill);
        Ok(out)
    }

    async fn save(
        &self,
        progress: &UserProgress,
        expected_version: Option<i64>,
    ) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow!("progress store unavailable")));
        }
        let mut rows = self.rows.write().await;
        let current = rows.get(&progress.id).map(|p| p.version);
        if current != expected_version {
            return Err(StoreError::Conflict(format!(
                "progress {} is at version {:?}, expected {:?}",
                progress.id, current, expected_version
            )));
        }
        rows.insert(progress.id.clone(), progress.clone());
        Ok(())
    }
}
