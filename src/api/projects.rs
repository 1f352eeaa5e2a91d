use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, OriginalUri, Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use super::pagination::PageBody;
use super::resources::ProjectResource;
use super::{ApiState, json_body};
use crate::db::projects::ProjectPatch;
use crate::db::query::page_request;
use crate::error::{ApiError, ApiResult};
use crate::types::User;

#[derive(Debug, Default, Deserialize)]
pub struct ProjectListParams {
    pub search: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProjectInput {
    pub title: Option<String>,
    pub color: Option<String>,
}

pub async fn list_projects(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<ProjectListParams>,
) -> ApiResult<Json<PageBody<ProjectResource>>> {
    let settings = state.settings();
    let page = page_request(
        params.page.as_deref(),
        params.page_size.as_deref(),
        settings.page_size,
        settings.max_page_size,
    )?;
    let projects = state
        .db()
        .list_projects(&user, params.search.as_deref(), page)?;

    let renderer = state.renderer();
    Ok(Json(PageBody::new(projects, &uri, |p| renderer.project(p))))
}

pub async fn create_project(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    payload: Result<Json<ProjectInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ProjectResource>)> {
    let input = json_body(payload)?;
    let title = input.title.ok_or_else(|| ApiError::missing_field("title"))?;
    let project = state
        .db()
        .create_project(&user, &title, input.color.as_deref())?;
    Ok((StatusCode::CREATED, Json(state.renderer().project(project))))
}

pub async fn get_project(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(project_id): Path<i64>,
) -> ApiResult<Json<ProjectResource>> {
    let project = state
        .db()
        .get_project(&user, project_id)?
        .ok_or_else(|| ApiError::project_not_found(project_id))?;
    Ok(Json(state.renderer().project(project)))
}

/// PUT: `title` is required.
pub async fn replace_project(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(project_id): Path<i64>,
    payload: Result<Json<ProjectInput>, JsonRejection>,
) -> ApiResult<Json<ProjectResource>> {
    let input = json_body(payload)?;
    let title = input.title.ok_or_else(|| ApiError::missing_field("title"))?;
    let patch = ProjectPatch {
        title: Some(title),
        color: input.color,
    };
    let project = state.db().update_project(&user, project_id, patch)?;
    Ok(Json(state.renderer().project(project)))
}

pub async fn patch_project(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(project_id): Path<i64>,
    payload: Result<Json<ProjectInput>, JsonRejection>,
) -> ApiResult<Json<ProjectResource>> {
    let input = json_body(payload)?;
    let patch = ProjectPatch {
        title: input.title,
        color: input.color,
    };
    let project = state.db().update_project(&user, project_id, patch)?;
    Ok(Json(state.renderer().project(project)))
}

pub async fn delete_project(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(project_id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state.db().delete_project(&user, project_id, state.blobs())? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::project_not_found(project_id))
    }
}
