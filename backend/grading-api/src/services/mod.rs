use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::config::Config;
use crate::repository::{
    mongo, MongoProgressStore, MongoQuestionStore, MongoSubmissionStore, ProgressStore,
    QuestionLookup, SubmissionStore,
};

pub mod auto_grader;
pub mod grading_dispatcher;
pub mod grading_queue;
pub mod progress_recorder;
pub mod progress_tracker;
pub mod review_service;
pub mod scoring;
pub mod state_machine;

use auto_grader::AutoGrader;
use grading_dispatcher::GradingDispatcher;
use grading_queue::{GradingQueue, RedisGradingQueue};
use progress_recorder::ProgressRecorder;
use progress_tracker::ProgressTracker;
use review_service::ReviewService;

pub struct AppState {
    pub config: Config,
    /// `None` when the state runs on in-memory stores.
    pub mongo: Option<Database>,
    pub redis: Option<ConnectionManager>,
    pub submissions: Arc<dyn SubmissionStore>,
    pub auto_grader: AutoGrader,
    pub dispatcher: GradingDispatcher,
    pub progress: Arc<ProgressTracker>,
    pub recorder: Arc<ProgressRecorder>,
    pub reviews: ReviewService,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let db = mongo_client.database(&config.mongo_database);
        mongo::ensure_indexes(&db).await?;

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let queue = Arc::new(RedisGradingQueue::new(
            redis.clone(),
            config.grading.queue_name.clone(),
        ));
        let mut state = Self::from_parts(
            config,
            Arc::new(MongoSubmissionStore::new(db.clone())),
            Arc::new(MongoQuestionStore::new(db.clone())),
            Arc::new(MongoProgressStore::new(db.clone())),
            queue,
        );
        state.mongo = Some(db);
        state.redis = Some(redis);
        Ok(state)
    }

    /// Wires the grading services over arbitrary store and queue implementations.
    pub fn from_parts(
        config: Config,
        submissions: Arc<dyn SubmissionStore>,
        questions: Arc<dyn QuestionLookup>,
        progress_store: Arc<dyn ProgressStore>,
        queue: Arc<dyn GradingQueue>,
    ) -> Self {
        let progress = Arc::new(ProgressTracker::new(
            progress_store,
            config.grading.progress_window,
        ));
        let recorder = Arc::new(ProgressRecorder::new(submissions.clone(), progress.clone()));
        let auto_grader = AutoGrader::new(submissions.clone(), questions, recorder.clone());
        let dispatcher = GradingDispatcher::new(submissions.clone(), queue);
        let reviews = ReviewService::new(
            submissions.clone(),
            recorder.clone(),
            config.grading.claim_timeout_secs,
        );

        Self {
            config,
            mongo: None,
            redis: None,
            submissions,
            auto_grader,
            dispatcher,
            progress,
            recorder,
            reviews,
        }
    }
}
