use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;

use super::{ApiState, json_body};
use crate::error::{ApiError, ApiResult};
use crate::types::Tag;

#[derive(Debug, Deserialize)]
pub struct TagInput {
    pub name: Option<String>,
    pub color: Option<String>,
}

pub async fn list_tags(State(state): State<ApiState>) -> ApiResult<Json<Vec<Tag>>> {
    Ok(Json(state.db().list_tags()?))
}

pub async fn create_tag(
    State(state): State<ApiState>,
    payload: Result<Json<TagInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Tag>)> {
    let input = json_body(payload)?;
    let name = input.name.ok_or_else(|| ApiError::missing_field("name"))?;
    let tag = state.db().create_tag(&name, input.color.as_deref())?;
    Ok((StatusCode::CREATED, Json(tag)))
}

pub async fn delete_tag(
    State(state): State<ApiState>,
    Path(tag_id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state.db().delete_tag(tag_id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::tag_not_found(tag_id))
    }
}
