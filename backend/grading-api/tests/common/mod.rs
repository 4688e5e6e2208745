#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use vstep_grading::{
    config::Config,
    create_router,
    models::{Question, Skill, Submission, SubmissionAnswer, SubmissionDetail, SubmissionRecord},
    repository::{
        InMemoryProgressStore, InMemoryQuestionStore, InMemorySubmissionStore, SubmissionStore,
    },
    services::{grading_queue::InMemoryGradingQueue, AppState},
};

pub struct TestApp {
    pub router: Router,
    pub submissions: Arc<InMemorySubmissionStore>,
    pub questions: Arc<InMemoryQuestionStore>,
    pub progress: Arc<InMemoryProgressStore>,
    pub queue: Arc<InMemoryGradingQueue>,
}

/// Full router over in-memory stores; no MongoDB or Redis needed.
pub fn create_test_app() -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let submissions = Arc::new(InMemorySubmissionStore::new());
    let questions = Arc::new(InMemoryQuestionStore::new());
    let progress = Arc::new(InMemoryProgressStore::new());
    let queue = Arc::new(InMemoryGradingQueue::new());

    let app_state = Arc::new(AppState::from_parts(
        Config::default(),
        submissions.clone(),
        questions.clone(),
        progress.clone(),
        queue.clone(),
    ));

    TestApp {
        router: create_router(app_state),
        submissions,
        questions,
        progress,
        queue,
    }
}

impl TestApp {
    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap();
        self.send(request).await
    }

    pub async fn post_empty(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or_else(|_| json!(String::from_utf8_lossy(&body)))
        };
        (status, json)
    }

    pub async fn seed_question(&self, id: &str, skill: Skill, answer_key: Option<Value>) {
        self.questions
            .insert(Question {
                id: id.to_string(),
                skill,
                level: None,
                answer_key,
            })
            .await;
    }

    pub async fn seed_submission(
        &self,
        user_id: &str,
        question_id: &str,
        skill: Skill,
        answer: SubmissionAnswer,
    ) -> String {
        let submission = Submission::new_pending(user_id, question_id, skill);
        let id = submission.id.clone();
        let detail = SubmissionDetail::new(&id, answer);
        self.submissions
            .insert(SubmissionRecord { submission, detail })
            .await
            .unwrap();
        id
    }

    /// Seeds a pending writing submission and dispatches it to the worker queue.
    pub async fn processing_writing(&self, user_id: &str) -> String {
        let id = self
            .seed_submission(
                user_id,
                "w1",
                Skill::Writing,
                SubmissionAnswer::Writing {
                    text: "Dear Sir, I am writing to complain about ...".into(),
                },
            )
            .await;
        let (status, _) = self
            .post_empty(&format!("/internal/submissions/{}/dispatch", id))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        id
    }
}

pub fn objective(pairs: &[(&str, &str)]) -> SubmissionAnswer {
    SubmissionAnswer::Objective {
        answers: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

pub fn ai_result(score: f64, confidence: &str) -> Value {
    json!({
        "overallScore": score,
        "criteriaScores": { "taskAchievement": score, "coherence": score },
        "feedback": "Ideas are organised clearly",
        "confidence": confidence,
        "gradedAt": "2026-03-01T10:00:00Z"
    })
}
