//! Outbound queue the external grading worker consumes.
//!
//! Tasks are JSON-encoded [`GradingTask`]s pushed with `LPUSH`; the worker pops from the
//! other end, so delivery is FIFO per queue.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::metrics::QUEUE_PUBLISH_DURATION_SECONDS;
use crate::models::GradingTask;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

#[async_trait]
pub trait GradingQueue: Send + Sync {
    async fn publish(&self, task: &GradingTask) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisGradingQueue {
    redis: ConnectionManager,
    queue_name: String,
}

impl RedisGradingQueue {
    pub fn new(redis: ConnectionManager, queue_name: impl Into<String>) -> Self {
        Self {
            redis,
            queue_name: queue_name.into(),
        }
    }
}

#[async_trait]
impl GradingQueue for RedisGradingQueue {
    async fn publish(&self, task: &GradingTask) -> Result<()> {
        let payload = serde_json::to_string(task).context("Failed to encode grading task")?;
        let timer = QUEUE_PUBLISH_DURATION_SECONDS.start_timer();

        let result: Result<i64, redis::RedisError> =
            retry_async_with_config(RetryConfig::publish(), || {
                let mut conn = self.redis.clone();
                let payload = payload.clone();
                async move {
                    redis::cmd("LPUSH")
                        .arg(&self.queue_name)
                        .arg(payload)
                        .query_async(&mut conn)
                        .await
                }
            })
            .await;
        timer.observe_duration();

        let depth = result.with_context(|| {
            format!(
                "Failed to push grading task for submission {}",
                task.submission_id
            )
        })?;

        tracing::debug!(
            submission_id = %task.submission_id,
            queue = %self.queue_name,
            depth,
            "Grading task published"
        );
        Ok(())
    }
}

/// Queue that keeps published tasks in memory, oldest first.
#[derive(Default)]
pub struct InMemoryGradingQueue {
    tasks: Mutex<Vec<GradingTask>>,
    fail_publishes: AtomicBool,
}

impl InMemoryGradingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_publishes(&self, enabled: bool) {
        self.fail_publishes.store(enabled, Ordering::SeqCst);
    }

    pub async fn tasks(&self) -> Vec<GradingTask> {
        self.tasks.lock().await.clone()
    }
}

#[async_trait]
impl GradingQueue for InMemoryGradingQueue {
    async fn publish(&self, task: &GradingTask) -> Result<()> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            anyhow::bail!("grading queue unavailable");
        }
        self.tasks.lock().await.push(task.clone());
        Ok(())
    }
}
