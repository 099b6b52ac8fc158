/// User and avatar endpoints
///
/// Any authenticated caller can read users and avatars. Changing or deleting
/// a user, or their avatar, is reserved to that user.
///
/// - `GET    /v1/users`
/// - `POST   /v1/users`
/// - `GET    /v1/users/:id`
/// - `PUT    /v1/users/:id`: name, email, is_active
/// - `DELETE /v1/users/:id`
/// - `PUT    /v1/users/:id/avatar`: raw image body, `Content-Type: image/*`
/// - `GET    /v1/users/:id/avatar`: streamed image
/// - `HEAD   /v1/users/:id/avatar`: 200 if an avatar exists, else 404
/// - `DELETE /v1/users/:id/avatar`
///
/// Avatar bodies are streamed in both directions; neither is buffered whole.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tasktrail_shared::auth::middleware::AuthContext;
use tasktrail_shared::models::avatar::Avatar;
use tasktrail_shared::models::user::{UpdateUser, User};
use tasktrail_shared::service::CreateUserRequest;
use validator::Validate;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/:id", get(get_user).put(update_user).delete(delete_user))
        .route(
            "/:id/avatar",
            get(download_avatar)
                .head(avatar_exists)
                .put(upload_avatar)
                .delete(delete_avatar),
        )
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateUserBody {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,

    #[validate(email)]
    pub email: Option<String>,

    pub is_active: Option<bool>,
}

impl From<UpdateUserBody> for UpdateUser {
    fn from(body: UpdateUserBody) -> Self {
        UpdateUser {
            name: body.name,
            email: body.email,
            is_active: body.is_active,
            avatar_url: None,
        }
    }
}

fn ensure_self(auth: &AuthContext, user_id: i64) -> ApiResult<()> {
    if auth.user_id != user_id {
        return Err(ApiError::Forbidden(
            "cannot modify another user".to_string(),
        ));
    }
    Ok(())
}

pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<User>>> {
    Ok(Json(state.users.list_users().await?))
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    req.validate()?;
    let user = state.users.create_user(req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<User>> {
    Ok(Json(state.users.get_user(id).await?))
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i64>,
    Json(body): Json<UpdateUserBody>,
) -> ApiResult<Json<User>> {
    ensure_self(&auth, id)?;
    body.validate()?;
    Ok(Json(state.users.update_user(id, body.into()).await?))
}

pub async fn delete_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    ensure_self(&auth, id)?;
    state.users.delete_user(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Streams the request body into the avatar store
///
/// The upload runs on its own task: if the client disconnects the body
/// stream errors out and the service removes the partial file, instead of
/// the handler future being dropped mid-write.
pub async fn upload_avatar(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Json<Avatar>> {
    ensure_self(&auth, id)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Content-Type header is required".to_string()))?
        .to_string();

    let users = state.users.clone();
    let cancel = state.shutdown.child_token();
    let stream = Box::pin(body.into_data_stream());

    let avatar = tokio::spawn(async move {
        users.upload_avatar(id, &content_type, stream, cancel).await
    })
    .await
    .map_err(|e| ApiError::InternalError(format!("avatar upload task failed: {e}")))??;

    Ok(Json(avatar))
}

pub async fn download_avatar(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let download = state
        .users
        .download_avatar_stream(id, state.shutdown.child_token())
        .await?;

    Ok((
        [
            (header::CONTENT_TYPE, download.content_type),
            (header::CONTENT_LENGTH, download.size.to_string()),
        ],
        Body::from_stream(download.body),
    )
        .into_response())
}

pub async fn avatar_exists(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state.users.has_avatar(id).await? {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

pub async fn delete_avatar(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    ensure_self(&auth, id)?;
    state.users.delete_avatar(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
