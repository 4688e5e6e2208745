mod common;

use axum::http::StatusCode;
use serde_json::json;
use vstep_grading::models::{Skill, SubmissionAnswer};

use common::{ai_result, objective, TestApp};

async fn graded_objective(
    app: &TestApp,
    user_id: &str,
    skill: Skill,
    key: &[(&str, &str)],
    given: &[(&str, &str)],
) {
    let question_id = format!("{}-{}", skill, user_id);
    let correct: serde_json::Map<String, serde_json::Value> = key
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect();
    app.seed_question(
        &question_id,
        skill,
        Some(json!({ "correctAnswers": correct })),
    )
    .await;
    let id = app
        .seed_submission(user_id, &question_id, skill, objective(given))
        .await;
    let (status, _) = app
        .post_empty(&format!("/internal/submissions/{}/auto-grade", id))
        .await;
    assert_eq!(status, StatusCode::OK);
}

async fn graded_by_worker(
    app: &TestApp,
    user_id: &str,
    skill: Skill,
    answer: SubmissionAnswer,
    score: f64,
) {
    let id = app.seed_submission(user_id, "subjective", skill, answer).await;
    let (status, _) = app
        .post_empty(&format!("/internal/submissions/{}/dispatch", id))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) = app
        .post(
            "/internal/grading-results",
            json!({
                "submissionId": id,
                "status": "completed",
                "result": ai_result(score, "high")
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_progress_overview_for_unknown_user_is_empty() {
    let app = common::create_test_app();

    let (status, body) = app.get("/internal/progress/nobody").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], "nobody");
    assert_eq!(body["skills"], json!([]));
    assert!(body["overallScore"].is_null());
    assert!(body["overallBand"].is_null());
}

#[tokio::test]
async fn test_progress_without_all_skills_has_no_overall_score() {
    let app = common::create_test_app();
    graded_objective(
        &app,
        "learner-7",
        Skill::Reading,
        &[("1", "a"), ("2", "b")],
        &[("1", "a"), ("2", "b")],
    )
    .await;

    let (status, body) = app.get("/internal/progress/learner-7").await;

    assert_eq!(status, StatusCode::OK);
    let skills = body["skills"].as_array().unwrap();
    assert_eq!(skills.len(), 1);
    assert_eq!(skills[0]["skill"], "reading");
    assert_eq!(skills[0]["sampleCount"], 1);
    assert_eq!(skills[0]["recentScores"], json!([10.0]));
    assert_eq!(skills[0]["allTimeMean"], 10.0);
    assert!(skills[0]["allTimeStdDev"].is_null());
    assert_eq!(skills[0]["trend"], "insufficient_data");
    assert!(body["overallScore"].is_null());
}

#[tokio::test]
async fn test_progress_overall_score_across_four_skills() {
    let app = common::create_test_app();
    let user = "learner-8";

    graded_objective(
        &app,
        user,
        Skill::Reading,
        &[("1", "a"), ("2", "b")],
        &[("1", "a"), ("2", "b")],
    )
    .await;
    graded_objective(
        &app,
        user,
        Skill::Listening,
        &[("1", "a"), ("2", "b")],
        &[("1", "a"), ("2", "c")],
    )
    .await;
    graded_by_worker(
        &app,
        user,
        Skill::Writing,
        SubmissionAnswer::Writing {
            text: "Nowadays, many people ...".into(),
        },
        6.0,
    )
    .await;
    graded_by_worker(
        &app,
        user,
        Skill::Speaking,
        SubmissionAnswer::Speaking {
            audio_url: "https://cdn.example.test/audio/8.webm".into(),
            duration_seconds: 120.0,
            transcript: Some("I would like to talk about ...".into()),
        },
        7.0,
    )
    .await;

    let (status, body) = app.get(&format!("/internal/progress/{}", user)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["skills"].as_array().unwrap().len(), 4);
    // (10 + 5 + 6 + 7) / 4 = 7.0
    assert_eq!(body["overallScore"], 7.0);
    assert_eq!(body["overallBand"], "B2");
}

#[tokio::test]
async fn test_progress_trend_after_repeated_gradings() {
    let app = common::create_test_app();
    let user = "learner-9";

    for given in [
        [("1", "x"), ("2", "x")],
        [("1", "a"), ("2", "x")],
        [("1", "a"), ("2", "b")],
    ] {
        graded_objective(&app, user, Skill::Reading, &[("1", "a"), ("2", "b")], &given)
            .await;
    }

    let (_, body) = app.get(&format!("/internal/progress/{}", user)).await;
    let reading = &body["skills"][0];

    assert_eq!(reading["sampleCount"], 3);
    assert_eq!(reading["streakDirection"], "up");
    assert_eq!(reading["streakCount"], 2);
    // 0, 5, 10 spread wider than 1.5
    assert_eq!(reading["trend"], "inconsistent");
}

#[tokio::test]
async fn test_grade_recorded_during_progress_outage_is_replayed() {
    let app = common::create_test_app();
    app.seed_question("r-outage", Skill::Reading, Some(json!({ "correctAnswers": { "1": "a" } })))
        .await;
    let id = app
        .seed_submission("learner-9", "r-outage", Skill::Reading, objective(&[("1", "a")]))
        .await;
    app.progress.fail_saves(true);

    let (status, body) = app
        .post_empty(&format!("/internal/submissions/{}/auto-grade", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["score"], 10.0);

    let (_, overview) = app.get("/internal/progress/learner-9").await;
    assert_eq!(overview["skills"], json!([]));

    // The grade itself is final; grading again is refused.
    let (status, _) = app
        .post_empty(&format!("/internal/submissions/{}/auto-grade", id))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .post_empty(&format!("/internal/submissions/{}/record-progress", id))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "INTERNAL_ERROR");

    app.progress.fail_saves(false);
    let (status, body) = app
        .post_empty(&format!("/internal/submissions/{}/record-progress", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["submissionId"], id.as_str());
    assert_eq!(body["replayed"], true);

    let (_, overview) = app.get("/internal/progress/learner-9").await;
    assert_eq!(overview["skills"][0]["sampleCount"], 1);
    assert_eq!(overview["skills"][0]["recentScores"], json!([10.0]));

    let (status, body) = app
        .post_empty(&format!("/internal/submissions/{}/record-progress", id))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["replayed"], false);
    let (_, overview) = app.get("/internal/progress/learner-9").await;
    assert_eq!(overview["skills"][0]["sampleCount"], 1);
}

#[tokio::test]
async fn test_reconcile_replays_worker_grades_missed_by_progress() {
    let app = common::create_test_app();
    app.progress.fail_saves(true);
    for score in [5.0, 6.0] {
        graded_by_worker(
            &app,
            "learner-10",
            Skill::Writing,
            SubmissionAnswer::Writing {
                text: "An essay about public transport".into(),
            },
            score,
        )
        .await;
    }
    let (_, overview) = app.get("/internal/progress/learner-10").await;
    assert_eq!(overview["skills"], json!([]));

    app.progress.fail_saves(false);
    let (status, report) = app.post_empty("/internal/progress/reconcile").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report, json!({ "scanned": 2, "settled": 2, "failed": 0 }));

    let (_, overview) = app.get("/internal/progress/learner-10").await;
    assert_eq!(overview["skills"][0]["skill"], "writing");
    assert_eq!(overview["skills"][0]["sampleCount"], 2);
    assert_eq!(overview["skills"][0]["allTimeMean"], 5.5);

    let (_, report) = app.post_empty("/internal/progress/reconcile").await;
    assert_eq!(report["scanned"], 0);
}

#[tokio::test]
async fn test_record_progress_on_ungraded_submission_is_conflict() {
    let app = common::create_test_app();
    let id = app
        .seed_submission("learner-11", "r1", Skill::Reading, objective(&[("1", "a")]))
        .await;

    let (status, body) = app
        .post_empty(&format!("/internal/submissions/{}/record-progress", id))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, _) = app
        .post_empty("/internal/submissions/missing/record-progress")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
