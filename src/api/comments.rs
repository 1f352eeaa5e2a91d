use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use serde::Deserialize;

use super::resources::CommentResource;
use super::{ApiState, json_body};
use crate::error::{ApiError, ApiResult};
use crate::types::User;

#[derive(Debug, Deserialize)]
pub struct CommentInput {
    pub content: Option<String>,
}

impl CommentInput {
    fn content(self) -> ApiResult<String> {
        self.content.ok_or_else(|| ApiError::missing_field("content"))
    }
}

pub async fn list_comments(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<Vec<CommentResource>>> {
    let renderer = state.renderer();
    let comments = state
        .db()
        .list_comments(&user, task_id)?
        .into_iter()
        .map(|c| renderer.comment(c))
        .collect();
    Ok(Json(comments))
}

pub async fn add_comment(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(task_id): Path<i64>,
    payload: Result<Json<CommentInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CommentResource>)> {
    let content = json_body(payload)?.content()?;
    let comment = state.db().add_comment(&user, task_id, &content)?;
    Ok((StatusCode::CREATED, Json(state.renderer().comment(comment))))
}

pub async fn update_comment(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(comment_id): Path<i64>,
    payload: Result<Json<CommentInput>, JsonRejection>,
) -> ApiResult<Json<CommentResource>> {
    let content = json_body(payload)?.content()?;
    let comment = state.db().update_comment(&user, comment_id, &content)?;
    Ok(Json(state.renderer().comment(comment)))
}

pub async fn delete_comment(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(comment_id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state.db().delete_comment(&user, comment_id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::comment_not_found(comment_id))
    }
}
