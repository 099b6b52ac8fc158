/// Task endpoints
///
/// All routes act as the authenticated caller. A task owned by someone else
/// answers `403` on read, update and delete.
///
/// - `GET    /v1/tasks?status=pending`: caller's tasks, newest first
/// - `POST   /v1/tasks`: create; the owner is always the caller
/// - `GET    /v1/tasks/:id`
/// - `PUT    /v1/tasks/:id`: sparse update; empty strings leave a field as is
/// - `DELETE /v1/tasks/:id`

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tasktrail_shared::auth::middleware::AuthContext;
use tasktrail_shared::models::task::{CreateTask, Task, TaskStatus};
use tasktrail_shared::service::UpdateTaskRequest;
use validator::Validate;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route("/:id", get(get_task).put(update_task).delete(delete_task))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskBody {
    #[validate(length(min = 1, max = 255, message = "Title must be 1-255 characters"))]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub status: TaskStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<TaskStatus>()
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        ),
    };

    Ok(Json(state.tasks.list_tasks(auth.user_id, status).await?))
}

pub async fn create_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(body): Json<CreateTaskBody>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    body.validate()?;

    let task = state
        .tasks
        .create_task(
            auth.user_id,
            CreateTask {
                title: body.title,
                description: body.description,
                status: body.status,
                owner_id: auth.user_id,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.tasks.get_task(id, auth.user_id).await?))
}

pub async fn update_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i64>,
    Json(body): Json<UpdateTaskRequest>,
) -> ApiResult<Json<Task>> {
    let update = body.into_update()?;
    Ok(Json(state.tasks.update_task(id, auth.user_id, update).await?))
}

pub async fn delete_task(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.tasks.delete_task(id, auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
