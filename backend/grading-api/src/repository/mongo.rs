//! MongoDB-backed stores.
//!
//! Submission writes run inside a multi-document transaction, so the deployment must be a
//! replica set. Every staged write is conditioned on the status and claim holder read at
//! `begin`; a concurrent writer makes the filter miss and the unit fails with a conflict.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::IndexOptions;
use mongodb::{ClientSession, Collection, Database, IndexModel};

use super::{ProgressStore, QuestionLookup, SubmissionStore, SubmissionUnit};
use crate::error::StoreError;
use crate::metrics::track_store_operation;
use crate::models::{
    Question, Skill, Submission, SubmissionDetail, SubmissionRecord, UserProgress,
};

pub const SUBMISSIONS: &str = "submissions";
pub const SUBMISSION_DETAILS: &str = "submission_details";
pub const QUESTIONS: &str = "questions";
pub const USER_PROGRESS: &str = "user_progress";

/// Creates the indexes the grading core relies on. Safe to call on every start.
pub async fn ensure_indexes(db: &Database) -> anyhow::Result<()> {
    let submissions = db.collection::<Document>(SUBMISSIONS);
    submissions
        .create_index(
            IndexModel::builder()
                .keys(doc! { "request_id": 1 })
                .options(
                    IndexOptions::builder()
                        .unique(true)
                        .partial_filter_expression(doc! { "request_id": { "$type": "string" } })
                        .build(),
                )
                .build(),
        )
        .await
        .context("Failed to create submissions.request_id index")?;
    submissions
        .create_index(
            IndexModel::builder()
                .keys(doc! { "status": 1, "review_priority": 1, "created_at": 1 })
                .build(),
        )
        .await
        .context("Failed to create submissions review queue index")?;
    submissions
        .create_index(
            IndexModel::builder()
                .keys(doc! { "updated_at": 1 })
                .options(
                    IndexOptions::builder()
                        .name("progress_pending_updated_at".to_string())
                        .partial_filter_expression(doc! { "progress_pending": true })
                        .build(),
                )
                .build(),
        )
        .await
        .context("Failed to create submissions progress_pending index")?;

    db.collection::<Document>(USER_PROGRESS)
        .create_index(IndexModel::builder().keys(doc! { "user_id": 1 }).build())
        .await
        .context("Failed to create user_progress.user_id index")?;

    tracing::info!("MongoDB grading indexes ensured");
    Ok(())
}

#[derive(Clone)]
pub struct MongoSubmissionStore {
    mongo: Database,
}

impl MongoSubmissionStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn submissions(&self) -> Collection<Submission> {
        self.mongo.collection(SUBMISSIONS)
    }

    fn details(&self) -> Collection<SubmissionDetail> {
        self.mongo.collection(SUBMISSION_DETAILS)
    }
}

#[async_trait]
impl SubmissionStore for MongoSubmissionStore {
    async fn begin(&self, submission_id: &str) -> Result<Box<dyn SubmissionUnit>, StoreError> {
        let mut session = self.mongo.client().start_session().await?;
        session.start_transaction().await?;

        let submissions = self.submissions();
        let details = self.details();

        let submission = submissions
            .find_one(doc! { "_id": submission_id })
            .session(&mut session)
            .await?;

        let record = match submission {
            Some(submission) => {
                let detail = details
                    .find_one(doc! { "_id": submission_id })
                    .session(&mut session)
                    .await?
                    .ok_or_else(|| {
                        StoreError::Backend(anyhow!(
                            "submission {} has no detail document",
                            submission_id
                        ))
                    })?;
                Some(SubmissionRecord { submission, detail })
            }
            None => None,
        };

        Ok(Box::new(MongoUnit {
            session,
            submissions,
            details,
            snapshot: record,
            staged: None,
        }))
    }

    async fn get(&self, submission_id: &str) -> Result<Option<SubmissionRecord>, StoreError> {
        let Some(submission) = self
            .submissions()
            .find_one(doc! { "_id": submission_id })
            .await?
        else {
            return Ok(None);
        };
        let detail = self
            .details()
            .find_one(doc! { "_id": submission_id })
            .await?
            .ok_or_else(|| anyhow!("submission {} has no detail document", submission_id))?;
        Ok(Some(SubmissionRecord { submission, detail }))
    }

    async fn insert(&self, record: SubmissionRecord) -> Result<(), StoreError> {
        let mut session = self.mongo.client().start_session().await?;
        session.start_transaction().await?;

        self.submissions()
            .insert_one(&record.submission)
            .session(&mut session)
            .await?;
        self.details()
            .insert_one(&record.detail)
            .session(&mut session)
            .await?;

        session.commit_transaction().await?;
        Ok(())
    }

    async fn list_progress_pending(&self, limit: usize) -> Result<Vec<Submission>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        track_store_operation("find", SUBMISSIONS, async {
            let cursor = self
                .submissions()
                .find(doc! {
                    "status": "completed",
                    "progress_pending": true,
                    "deleted_at": Bson::Null,
                })
                .sort(doc! { "updated_at": 1 })
                .limit(limit)
                .await?;
            Ok::<_, StoreError>(cursor.try_collect::<Vec<Submission>>().await?)
        })
        .await
    }
}

struct MongoUnit {
    session: ClientSession,
    submissions: Collection<Submission>,
    details: Collection<SubmissionDetail>,
    snapshot: Option<SubmissionRecord>,
    staged: Option<SubmissionRecord>,
}

impl MongoUnit {
    async fn write_staged(&mut self, staged: &SubmissionRecord) -> Result<(), StoreError> {
        let snapshot = self.snapshot.as_ref().ok_or_else(|| {
            StoreError::Conflict(format!(
                "submission {} does not exist",
                staged.submission.id
            ))
        })?;

        let claimed_by = match &snapshot.submission.claimed_by {
            Some(reviewer) => Bson::String(reviewer.clone()),
            None => Bson::Null,
        };
        let filter = doc! {
            "_id": &snapshot.submission.id,
            "status": snapshot.submission.status.as_str(),
            "claimed_by": claimed_by,
        };

        let replaced = self
            .submissions
            .replace_one(filter, &staged.submission)
            .session(&mut self.session)
            .await?;
        if replaced.matched_count == 0 {
            return Err(StoreError::Conflict(format!(
                "submission {} left status {}",
                snapshot.submission.id, snapshot.submission.status
            )));
        }

        self.details
            .replace_one(doc! { "_id": &staged.detail.submission_id }, &staged.detail)
            .session(&mut self.session)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SubmissionUnit for MongoUnit {
    fn record(&self) -> Option<&SubmissionRecord> {
        self.snapshot.as_ref()
    }

    fn stage(&mut self, record: SubmissionRecord) {
        self.staged = Some(record);
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let Some(staged) = self.staged.take() else {
            self.session.abort_transaction().await?;
            return Ok(());
        };

        let written =
            track_store_operation("commit", SUBMISSIONS, self.write_staged(&staged)).await;
        if let Err(err) = written {
            if let Err(abort_err) = self.session.abort_transaction().await {
                tracing::warn!(error = %abort_err, "Failed to abort grading transaction");
            }
            return Err(err);
        }

        self.session.commit_transaction().await?;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.session.abort_transaction().await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct MongoQuestionStore {
    mongo: Database,
}

impl MongoQuestionStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }
}

#[async_trait]
impl QuestionLookup for MongoQuestionStore {
    async fn find_question(&self, question_id: &str) -> Result<Option<Question>, StoreError> {
        let questions = self.mongo.collection::<Question>(QUESTIONS);
        track_store_operation("find_one", QUESTIONS, async {
            Ok::<_, StoreError>(questions.find_one(doc! { "_id": question_id }).await?)
        })
        .await
    }
}

#[derive(Clone)]
pub struct MongoProgressStore {
    mongo: Database,
}

impl MongoProgressStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn collection(&self) -> Collection<UserProgress> {
        self.mongo.collection(USER_PROGRESS)
    }
}

#[async_trait]
impl ProgressStore for MongoProgressStore {
    async fn get(&self, user_id: &str, skill: Skill) -> Result<Option<UserProgress>, StoreError> {
        let key = UserProgress::key(user_id, skill);
        track_store_operation("find_one", USER_PROGRESS, async {
            Ok::<_, StoreError>(self.collection().find_one(doc! { "_id": key }).await?)
        })
        .await
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<UserProgress>, StoreError> {
        let mut rows = track_store_operation("find", USER_PROGRESS, async {
            let cursor = self.collection().find(doc! { "user_id": user_id }).await?;
            Ok::<_, StoreError>(cursor.try_collect::<Vec<UserProgress>>().await?)
        })
        .await?;
        rows.sort_by_key(|p| p.skill);
        Ok(rows)
    }

    async fn save(
        &self,
        progress: &UserProgress,
        expected_version: Option<i64>,
    ) -> Result<(), StoreError> {
        let collection = self.collection();
        match expected_version {
            // Duplicate key on the `_id` means another writer created the row first.
            None => {
                track_store_operation("insert_one", USER_PROGRESS, async {
                    collection.insert_one(progress).await?;
                    Ok::<_, StoreError>(())
                })
                .await
            }
            Some(version) => {
                let result = track_store_operation("replace_one", USER_PROGRESS, async {
                    Ok::<_, StoreError>(
                        collection
                            .replace_one(doc! { "_id": &progress.id, "version": version }, progress)
                            .await?,
                    )
                })
                .await?;
                if result.matched_count == 0 {
                    return Err(StoreError::Conflict(format!(
                        "progress {} moved past version {}",
                        progress.id, version
                    )));
                }
                Ok(())
            }
        }
    }
}

