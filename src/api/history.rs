use axum::Json;
use axum::extract::{Extension, OriginalUri, Path, Query, State};
use serde::Deserialize;

use super::ApiState;
use super::pagination::PageBody;
use super::resources::HistoryResource;
use crate::db::query::page_request;
use crate::error::{ApiError, ApiResult};
use crate::types::User;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub task: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

/// The caller's history log, newest first, optionally for one task.
pub async fn list_history(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<PageBody<HistoryResource>>> {
    let settings = state.settings();
    let page = page_request(
        params.page.as_deref(),
        params.page_size.as_deref(),
        settings.page_size,
        settings.max_page_size,
    )?;
    let task_id = params
        .task
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| {
            t.parse::<i64>()
                .map_err(|_| ApiError::invalid_value("task", format!("'{}' is not an integer", t)))
        })
        .transpose()?;

    let entries = state.db().list_history(&user, task_id, page)?;
    let renderer = state.renderer();
    Ok(Json(PageBody::new(entries, &uri, |e| renderer.history(e))))
}

/// History of one task. Entries of a deleted task remain readable.
pub async fn task_history(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<Vec<HistoryResource>>> {
    let entries = state.db().task_history(&user, task_id)?;
    if entries.is_empty() && state.db().get_task(&user, task_id)?.is_none() {
        return Err(ApiError::task_not_found(task_id));
    }
    let renderer = state.renderer();
    Ok(Json(entries.into_iter().map(|e| renderer.history(e)).collect()))
}
