use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{error, instrument, warn};

use crate::{
    state::AppState,
    users::{
        dto::{
            CreateUserRequest, DeleteUserResponse, ListUsersQuery, ListUsersResponse,
            UpdateUserRequest, UserResponse,
        },
        error::UserError,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(create_user).get(list_users))
        .route(
            "/users/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
}

/// Maps a service error onto a status code and client-facing message.
fn reject(err: UserError, id: Option<i64>) -> (StatusCode, String) {
    match err {
        UserError::NotFound => {
            let msg = match id {
                Some(id) => format!("user not found with ID {id}"),
                None => "user not found".into(),
            };
            (StatusCode::NOT_FOUND, msg)
        }
        UserError::Conflict(msg) => (StatusCode::CONFLICT, msg.into()),
        e @ (UserError::Credential(_) | UserError::Storage(_)) => {
            error!(error = %e, "user operation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
            )
        }
    }
}

fn bad_request(msg: &'static str) -> (StatusCode, String) {
    warn!(reason = msg, "rejected request");
    (StatusCode::BAD_REQUEST, msg.into())
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    Json(mut payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), (StatusCode, String)> {
    payload.normalize();
    payload.validate().map_err(bad_request)?;

    let user = state
        .users
        .create_user(
            &payload.username,
            &payload.email,
            &payload.password,
            &payload.full_name,
        )
        .await
        .map_err(|e| reject(e, None))?;

    Ok((
        StatusCode::CREATED,
        Json(UserResponse { user: user.into() }),
    ))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>, (StatusCode, String)> {
    let user = state
        .users
        .get_user(id)
        .await
        .map_err(|e| reject(e, Some(id)))?;
    Ok(Json(UserResponse { user: user.into() }))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut payload): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, (StatusCode, String)> {
    payload.normalize();
    payload.validate().map_err(bad_request)?;

    let user = state
        .users
        .update_user(id, payload.into())
        .await
        .map_err(|e| reject(e, Some(id)))?;
    Ok(Json(UserResponse { user: user.into() }))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DeleteUserResponse>, (StatusCode, String)> {
    state
        .users
        .delete_user(id)
        .await
        .map_err(|e| reject(e, Some(id)))?;
    Ok(Json(DeleteUserResponse { success: true }))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    Query(q): Query<ListUsersQuery>,
) -> Result<Json<ListUsersResponse>, (StatusCode, String)> {
    let (users, total_count) = state
        .users
        .list_users(q.page, q.page_size)
        .await
        .map_err(|e| reject(e, None))?;
    Ok(Json(ListUsersResponse {
        users: users.into_iter().map(Into::into).collect(),
        total_count,
    }))
}
