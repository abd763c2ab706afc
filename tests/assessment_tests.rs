mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{TestApp, json_body};
use serde_json::json;

async fn alice_task(app: &TestApp) -> i64 {
    let (status, body) = app
        .post(
            &format!("/api/projects/{}/tasks", app.alice_project),
            app.alice_id,
            json!({ "task_definition_id": app.definition_id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_i64().unwrap()
}

#[tokio::test]
async fn savetests_require_a_credential() {
    let app = TestApp::new();

    let response = app
        .send(Request::builder().uri("/savetests").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .send(
            Request::builder()
                .uri("/savetests/latest")
                .header("Auth-Token", "not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "Invalid authentication token");
}

#[tokio::test]
async fn query_token_is_accepted_on_savetests() {
    let app = TestApp::new();
    let uri = format!("/savetests?auth_token={}", app.token(app.alice_id));

    let response = app
        .send(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn latest_creates_a_default_attempt_once() {
    let app = TestApp::new();
    let task_id = alice_task(&app).await;
    let uri = format!("/savetests/latest?task_id={task_id}");

    let (status, first) = app.get(&uri, app.alice_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["success"], true);
    assert_eq!(first["data"]["name"], "New Test");
    assert_eq!(first["data"]["attempt_number"], 1);
    assert_eq!(first["data"]["completed"], false);
    assert_eq!(first["data"]["task_id"], task_id);

    let (_, second) = app.get(&uri, app.alice_id).await;
    assert_eq!(second["data"]["id"], first["data"]["id"]);

    let (_, list) = app.get(&format!("/savetests?task_id={task_id}"), app.alice_id).await;
    assert_eq!(list["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_task_filter_is_a_json_error() {
    let app = TestApp::new();

    for uri in [
        "/savetests?task_id=abc",
        "/savetests/latest?task_id=abc",
        "/savetests/completed-latest?task_id=1.5",
    ] {
        let (status, body) = app.get(uri, app.alice_id).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"], "task_id is invalid");
    }
    assert_eq!(app.repo.test_attempt_count(), 0);
}

#[tokio::test]
async fn latest_for_unknown_task_is_not_found() {
    let app = TestApp::new();
    let (status, body) = app.get("/savetests/latest?task_id=777777", app.alice_id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Unable to find requested Task");
}

#[tokio::test]
async fn completed_latest_never_creates() {
    let app = TestApp::new();
    let task_id = alice_task(&app).await;
    let uri = format!("/savetests/completed-latest?task_id={task_id}");

    let (status, body) = app.get(&uri, app.alice_id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "No completed test attempt found");

    let (_, list) = app.get(&format!("/savetests?task_id={task_id}"), app.alice_id).await;
    assert_eq!(list["data"], json!([]));
}

#[tokio::test]
async fn attempts_number_themselves_and_complete() {
    let app = TestApp::new();
    let task_id = alice_task(&app).await;

    let (status, first) = app
        .post(
            "/savetests",
            app.alice_id,
            json!({ "task_id": task_id, "name": "Quiz", "exam_data": { "score": 3 } }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["message"], "Test attempt saved");
    assert_eq!(first["data"]["attempt_number"], 1);
    assert_eq!(first["data"]["exam_data"], "{\"score\":3}");

    let (_, second) = app
        .post("/savetests", app.alice_id, json!({ "task_id": task_id, "name": "Quiz" }))
        .await;
    assert_eq!(second["data"]["attempt_number"], 2);

    let first_id = first["data"]["id"].as_i64().unwrap();
    let (status, updated) = app
        .put(
            &format!("/savetests/{first_id}"),
            app.alice_id,
            json!({ "completed": true, "pass_status": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["data"]["completed"], true);
    assert_eq!(updated["data"]["name"], "Quiz");

    let (status, latest) = app
        .get(&format!("/savetests/completed-latest?task_id={task_id}"), app.alice_id)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["data"]["id"], first_id);

    let (_, newest) = app
        .get(&format!("/savetests/latest?task_id={task_id}"), app.alice_id)
        .await;
    assert_eq!(newest["data"]["id"], second["data"]["id"]);
}

#[tokio::test]
async fn create_checks_name_and_task() {
    let app = TestApp::new();

    let (status, body) = app.post("/savetests", app.alice_id, json!({ "task_id": 1 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "name is missing");

    let (status, body) = app
        .post("/savetests", app.alice_id, json!({ "name": "Quiz", "attempt_number": 0 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "attempt_number is invalid");

    let (status, body) = app
        .post("/savetests", app.alice_id, json!({ "task_id": 888888, "name": "Quiz" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Unable to find requested Task");
}

#[tokio::test]
async fn exam_data_is_replaced_on_its_own() {
    let app = TestApp::new();
    let (_, created) = app
        .post("/savetests", app.alice_id, json!({ "name": "Practice" }))
        .await;
    let id = created["data"]["id"].as_i64().unwrap();
    let uri = format!("/savetests/{id}/exam_data");

    let (status, body) = app.put(&uri, app.alice_id, json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "exam_data is missing");

    let (status, body) = app
        .put(&uri, app.alice_id, json!({ "exam_data": "{\"question\":2}" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["exam_data"], "{\"question\":2}");
    assert_eq!(body["data"]["name"], "Practice");
}

#[tokio::test]
async fn deleted_attempts_are_gone() {
    let app = TestApp::new();
    let (_, created) = app
        .post("/savetests", app.alice_id, json!({ "name": "Practice" }))
        .await;
    let id = created["data"]["id"].as_i64().unwrap();

    let (status, body) = app.delete(&format!("/savetests/{id}"), app.alice_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted"], true);

    let (status, _) = app.get(&format!("/savetests/{id}"), app.alice_id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.delete(&format!("/savetests/{id}"), app.alice_id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.get("/savetests/abc", app.alice_id).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "id is invalid");
}
