mod common;

use axum::http::StatusCode;
use serde_json::json;
use vstep_grading::{
    models::{Skill, SubmissionAnswer, SubmissionStatus},
    repository::SubmissionStore,
};

use common::{ai_result, TestApp};

async fn report(app: &TestApp, id: &str, status: &str, score: f64, confidence: &str) {
    let (code, body) = app
        .post(
            "/internal/grading-results",
            json!({
                "submissionId": id,
                "status": status,
                "result": ai_result(score, confidence)
            }),
        )
        .await;
    assert_eq!(code, StatusCode::OK, "worker result rejected: {}", body);
}

#[tokio::test]
async fn test_confident_worker_result_completes_submission() {
    let app = common::create_test_app();
    let id = app.processing_writing("learner-3").await;

    let (status, body) = app
        .post(
            "/internal/grading-results",
            json!({
                "submissionId": id,
                "status": "completed",
                "result": ai_result(6.8, "high")
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["score"], 7.0);
    assert_eq!(body["band"], "B2");
    assert_eq!(body["grading_mode"], "auto");
    assert_eq!(body["progress_pending"], false);
}

#[tokio::test]
async fn test_uncertain_worker_result_waits_for_review() {
    let app = common::create_test_app();
    let id = app.processing_writing("learner-3").await;

    report(&app, &id, "review_pending", 5.0, "low").await;

    let record = app.submissions.get(&id).await.unwrap().unwrap();
    assert_eq!(record.submission.status, SubmissionStatus::ReviewPending);
    assert_eq!(record.submission.score, None);
    assert!(record.submission.is_consistent());
    assert_eq!(
        serde_json::to_value(record.submission.review_priority).unwrap(),
        "high"
    );
}

#[tokio::test]
async fn test_worker_result_rejects_pending_status() {
    let app = common::create_test_app();
    let id = app.processing_writing("learner-3").await;

    let (status, body) = app
        .post(
            "/internal/grading-results",
            json!({ "submissionId": id, "status": "pending", "result": null }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_worker_result_before_dispatch_commit_is_conflict() {
    let app = common::create_test_app();
    let id = app
        .seed_submission(
            "learner-3",
            "w1",
            Skill::Writing,
            SubmissionAnswer::Writing {
                text: "Dear Sir, I am writing to complain about ...".into(),
            },
        )
        .await;

    let callback = json!({
        "submissionId": id,
        "status": "completed",
        "result": ai_result(6.0, "high")
    });
    let (status, body) = app.post("/internal/grading-results", callback.clone()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
    let record = app.submissions.get(&id).await.unwrap().unwrap();
    assert_eq!(record.submission.status, SubmissionStatus::Pending);

    let (status, _) = app
        .post_empty(&format!("/internal/submissions/{}/dispatch", id))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = app.post("/internal/grading-results", callback).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["score"], 6.0);
}

#[tokio::test]
async fn test_malformed_worker_payload_uses_error_body() {
    let app = common::create_test_app();

    let (status, body) = app
        .post("/internal/grading-results", json!({ "status": "completed" }))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Failed to parse JSON request body"));
}

#[tokio::test]
async fn test_claim_and_review_blends_close_scores() {
    let app = common::create_test_app();
    let id = app.processing_writing("learner-4").await;
    report(&app, &id, "review_pending", 6.0, "medium").await;

    let (status, body) = app
        .post(
            &format!("/internal/submissions/{}/claim", id),
            json!({ "reviewerId": "reviewer-a" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["claimed_by"], "reviewer-a");

    let (status, body) = app
        .post(
            &format!("/internal/submissions/{}/review", id),
            json!({
                "reviewerId": "reviewer-a",
                "overallScore": 6.5,
                "band": "B2",
                "feedback": "Good range of vocabulary"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    // 0.4 * 6.0 + 0.6 * 6.5 = 6.3 -> 6.5
    assert_eq!(body["decision"]["finalScore"], 6.5);
    assert_eq!(body["decision"]["gradingMode"], "hybrid");
    assert_eq!(body["decision"]["auditFlag"], false);
    assert_eq!(body["band"], "B2");
    assert_eq!(body["submission"]["status"], "completed");
    assert_eq!(body["submission"]["reviewer_id"], "reviewer-a");
    assert!(body["submission"]["claimed_by"].is_null());

    let record = app.submissions.get(&id).await.unwrap().unwrap();
    assert_eq!(record.detail.feedback.as_deref(), Some("Good range of vocabulary"));
    assert!(record.submission.is_consistent());
}

#[tokio::test]
async fn test_review_with_distant_scores_is_flagged_for_audit() {
    let app = common::create_test_app();
    let id = app.processing_writing("learner-4").await;
    report(&app, &id, "review_pending", 4.0, "low").await;
    app.post(
        &format!("/internal/submissions/{}/claim", id),
        json!({ "reviewerId": "reviewer-a" }),
    )
    .await;

    let (status, body) = app
        .post(
            &format!("/internal/submissions/{}/review", id),
            json!({ "reviewerId": "reviewer-a", "overallScore": 7.5 }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["decision"]["finalScore"], 7.5);
    assert_eq!(body["decision"]["gradingMode"], "human");
    assert_eq!(body["decision"]["auditFlag"], true);
    assert_eq!(body["submission"]["audit_flag"], true);
}

#[tokio::test]
async fn test_second_reviewer_cannot_claim_or_review() {
    let app = common::create_test_app();
    let id = app.processing_writing("learner-5").await;
    report(&app, &id, "review_pending", 5.5, "medium").await;

    let (first, _) = app
        .post(
            &format!("/internal/submissions/{}/claim", id),
            json!({ "reviewerId": "reviewer-a" }),
        )
        .await;
    let (second, body) = app
        .post(
            &format!("/internal/submissions/{}/claim", id),
            json!({ "reviewerId": "reviewer-b" }),
        )
        .await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, body) = app
        .post(
            &format!("/internal/submissions/{}/review", id),
            json!({ "reviewerId": "reviewer-b", "overallScore": 6.0 }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, _) = app
        .post(
            &format!("/internal/submissions/{}/release", id),
            json!({ "reviewerId": "reviewer-b" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_can_release_and_assign() {
    let app = common::create_test_app();
    let id = app.processing_writing("learner-5").await;
    report(&app, &id, "review_pending", 5.5, "medium").await;
    app.post(
        &format!("/internal/submissions/{}/claim", id),
        json!({ "reviewerId": "reviewer-a" }),
    )
    .await;

    let (status, body) = app
        .post(
            &format!("/internal/submissions/{}/release", id),
            json!({ "reviewerId": "admin-1", "isAdmin": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["claimed_by"].is_null());

    let (status, body) = app
        .post(
            &format!("/internal/submissions/{}/assign", id),
            json!({ "reviewerId": "reviewer-c" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["claimed_by"], "reviewer-c");

    let (status, _) = app
        .post(
            &format!("/internal/submissions/{}/review", id),
            json!({ "reviewerId": "reviewer-c", "overallScore": 5.0 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_review_validation_rejects_out_of_range_score() {
    let app = common::create_test_app();
    let id = app.processing_writing("learner-6").await;
    report(&app, &id, "review_pending", 5.0, "low").await;

    let (status, body) = app
        .post(
            &format!("/internal/submissions/{}/review", id),
            json!({ "reviewerId": "reviewer-a", "isAdmin": true, "overallScore": 11.0 }),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .starts_with("Validation error"));
}

#[tokio::test]
async fn test_claim_on_submission_not_waiting_for_review_is_not_found() {
    let app = common::create_test_app();
    let id = app.processing_writing("learner-6").await;

    let (status, body) = app
        .post(
            &format!("/internal/submissions/{}/claim", id),
            json!({ "reviewerId": "reviewer-a" }),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}
