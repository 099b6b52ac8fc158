/// Task routes end to end: HTTP status mapping, ownership and audit emission

mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;
use serde_json::json;
use tasktrail_shared::models::task_audit::AuditAction;

async fn create(app: &TestApp, token: &str, title: &str, status: &str) -> i64 {
    let (code, body) = app
        .call(
            Method::POST,
            "/v1/tasks",
            Some(token),
            Some(json!({ "title": title, "description": "d", "status": status })),
        )
        .await;
    assert_eq!(code, StatusCode::CREATED, "create failed: {body}");
    body["id"].as_i64().unwrap()
}

#[tokio::test]
async fn test_requires_bearer_token() {
    let app = TestApp::new();

    let (status, body) = app.call(Method::GET, "/v1/tasks", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = app
        .call(Method::GET, "/v1/tasks", Some("not-a-jwt"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_token_is_not_an_access_token() {
    let app = TestApp::new();
    let session = app.register("Ada", "ada@example.com").await;

    let (status, _) = app
        .call(Method::GET, "/v1/tasks", Some(&session.refresh_token), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_forces_caller_as_owner() {
    let app = TestApp::new();
    let ada = app.register("Ada", "ada@example.com").await;
    let bob = app.register("Bob", "bob@example.com").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/v1/tasks",
            Some(&ada.access_token),
            Some(json!({ "title": "write docs", "owner_id": bob.user_id })),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["owner_id"], ada.user_id);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["description"], "");
}

#[tokio::test]
async fn test_create_validates_title() {
    let app = TestApp::new();
    let ada = app.register("Ada", "ada@example.com").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/v1/tasks",
            Some(&ada.access_token),
            Some(json!({ "title": "" })),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["details"][0]["field"], "title");
}

#[tokio::test]
async fn test_crud_round_trip_emits_audits() {
    let mut app = TestApp::new();
    let ada = app.register("Ada", "ada@example.com").await;
    let token = Some(ada.access_token.as_str());

    let id = create(&app, &ada.access_token, "A", "pending").await;
    let uri = format!("/v1/tasks/{id}");

    let (status, body) = app.call(Method::GET, &uri, token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "A");

    let (status, body) = app
        .call(Method::PUT, &uri, token, Some(json!({ "title": "B" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "B");
    assert_eq!(body["description"], "d");

    let (status, body) = app.call(Method::DELETE, &uri, token, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());

    let (status, body) = app.call(Method::GET, &uri, token, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let emitted = app.emitted().await;
    let actions: Vec<AuditAction> = emitted.iter().map(|m| m.action).collect();
    assert_eq!(
        actions,
        vec![AuditAction::Create, AuditAction::Update, AuditAction::Delete]
    );
    assert!(emitted.iter().all(|m| m.entity_id == id && m.user_id == ada.user_id));

    let changes = emitted[1].changes.as_ref().unwrap();
    assert_eq!(changes.keys().collect::<Vec<_>>(), vec!["title"]);
}

#[tokio::test]
async fn test_other_users_task_is_forbidden() {
    let mut app = TestApp::new();
    let ada = app.register("Ada", "ada@example.com").await;
    let bob = app.register("Bob", "bob@example.com").await;
    let id = create(&app, &ada.access_token, "private", "pending").await;
    let uri = format!("/v1/tasks/{id}");
    let bob_token = Some(bob.access_token.as_str());
    let writes_before = app.store.task_writes();

    let (status, body) = app.call(Method::GET, &uri, bob_token, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _) = app
        .call(Method::PUT, &uri, bob_token, Some(json!({ "title": "mine" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.call(Method::DELETE, &uri, bob_token, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    assert_eq!(app.store.task_writes(), writes_before);
    let (status, body) = app
        .call(Method::GET, &uri, Some(&ada.access_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "private");

    let emitted = app.emitted().await;
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].action, AuditAction::Create);
}

#[tokio::test]
async fn test_empty_update_is_rejected_without_write() {
    let mut app = TestApp::new();
    let ada = app.register("Ada", "ada@example.com").await;
    let id = create(&app, &ada.access_token, "A", "pending").await;
    let writes_before = app.store.task_writes();

    let (status, body) = app
        .call(
            Method::PUT,
            &format!("/v1/tasks/{id}"),
            Some(&ada.access_token),
            Some(json!({ "title": "", "status": "" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "no fields to update");
    assert_eq!(app.store.task_writes(), writes_before);
    assert_eq!(app.emitted().await.len(), 1);
}

#[tokio::test]
async fn test_update_with_unknown_status_is_bad_request() {
    let app = TestApp::new();
    let ada = app.register("Ada", "ada@example.com").await;
    let id = create(&app, &ada.access_token, "A", "pending").await;

    let (status, _) = app
        .call(
            Method::PUT,
            &format!("/v1/tasks/{id}"),
            Some(&ada.access_token),
            Some(json!({ "status": "someday" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_filters_by_status_and_owner() {
    let app = TestApp::new();
    let ada = app.register("Ada", "ada@example.com").await;
    let bob = app.register("Bob", "bob@example.com").await;
    let token = Some(ada.access_token.as_str());

    create(&app, &ada.access_token, "one", "pending").await;
    create(&app, &ada.access_token, "two", "completed").await;
    create(&app, &ada.access_token, "three", "pending").await;
    create(&app, &bob.access_token, "bob's", "pending").await;

    let (status, body) = app.call(Method::GET, "/v1/tasks", token, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let (_, body) = app
        .call(Method::GET, "/v1/tasks?status=pending", token, None)
        .await;
    let titles: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles.len(), 2);
    assert!(titles.contains(&"one") && titles.contains(&"three"));

    let (status, _) = app
        .call(Method::GET, "/v1/tasks?status=bogus", token, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
