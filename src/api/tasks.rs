use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, OriginalUri, Path, Query, State};
use axum::http::{StatusCode, Uri};
use serde::Deserialize;

use super::pagination::PageBody;
use super::resources::{TaskResource, double_option, parse_datetime};
use super::{ApiState, json_body};
use crate::db::query::{TaskListParams, TaskView};
use crate::db::tasks::{NewTask, TaskPatch};
use crate::db::{Page, now_ms};
use crate::error::{ApiError, ApiResult};
use crate::types::{Priority, Task, TaskStatus, User};

/// Writable task fields. `project_id` and `tags_ids` are write-only.
#[derive(Debug, Default, Deserialize)]
pub struct TaskInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<String>>,
    pub project_id: Option<i64>,
    pub tags_ids: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: Option<String>,
}

/// Parse a status, listing the valid choices on failure.
pub(crate) fn parse_status(value: &str) -> ApiResult<TaskStatus> {
    value.parse::<TaskStatus>().map_err(|_| {
        ApiError::invalid_value(
            "status",
            format!("'{}' is not a valid status", value),
        )
        .with_allowed(TaskStatus::names())
    })
}

impl TaskInput {
    fn into_patch(self, state: &ApiState) -> ApiResult<TaskPatch> {
        let tz = state.settings().timezone;
        Ok(TaskPatch {
            title: self.title,
            description: self.description,
            status: self.status.as_deref().map(parse_status).transpose()?,
            priority: self.priority,
            due_date: self
                .due_date
                .map(|due| due.map(|v| parse_datetime("due_date", &v, tz)).transpose())
                .transpose()?,
            project_id: self.project_id,
            tag_ids: self.tags_ids,
        })
    }
}

fn render_task(state: &ApiState, user: &User, task: Task) -> ApiResult<TaskResource> {
    let detail = state
        .db()
        .task_details(user, vec![task])?
        .pop()
        .ok_or_else(|| ApiError::internal("task detail lookup returned nothing"))?;
    Ok(state.renderer().task(detail))
}

fn render_page(
    state: &ApiState,
    user: &User,
    uri: &Uri,
    page: Page<Task>,
) -> ApiResult<PageBody<TaskResource>> {
    let Page {
        items,
        total,
        page,
        page_size,
    } = page;
    let details = state.db().task_details(user, items)?;
    let page = Page {
        items: details,
        total,
        page,
        page_size,
    };
    let renderer = state.renderer();
    Ok(PageBody::new(page, uri, |d| renderer.task(d)))
}

fn list_view(
    state: &ApiState,
    user: &User,
    uri: &Uri,
    params: TaskListParams,
    view: TaskView,
) -> ApiResult<PageBody<TaskResource>> {
    let settings = state.settings();
    let query = params.into_query(view, settings.page_size, settings.max_page_size)?;
    let page = state
        .db()
        .list_tasks(user, &query, settings.timezone, now_ms())?;
    render_page(state, user, uri, page)
}

pub async fn list_tasks(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<TaskListParams>,
) -> ApiResult<Json<PageBody<TaskResource>>> {
    Ok(Json(list_view(&state, &user, &uri, params, TaskView::All)?))
}

pub async fn overdue_tasks(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<TaskListParams>,
) -> ApiResult<Json<PageBody<TaskResource>>> {
    Ok(Json(list_view(&state, &user, &uri, params, TaskView::Overdue)?))
}

pub async fn upcoming_tasks(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<TaskListParams>,
) -> ApiResult<Json<PageBody<TaskResource>>> {
    Ok(Json(list_view(&state, &user, &uri, params, TaskView::Upcoming)?))
}

pub async fn create_task(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    payload: Result<Json<TaskInput>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<TaskResource>)> {
    let input = json_body(payload)?;
    let title = input
        .title
        .clone()
        .ok_or_else(|| ApiError::missing_field("title"))?;
    let project_id = input
        .project_id
        .ok_or_else(|| ApiError::missing_field("project_id"))?;
    let patch = input.into_patch(&state)?;

    let mut new_task = NewTask::new(title, project_id);
    if let Some(description) = patch.description {
        new_task.description = description;
    }
    if let Some(status) = patch.status {
        new_task.status = status;
    }
    if let Some(priority) = patch.priority {
        new_task.priority = priority;
    }
    new_task.due_date = patch.due_date.flatten();
    new_task.tag_ids = patch.tag_ids.unwrap_or_default();

    let task = state.db().create_task(&user, new_task)?;
    Ok((StatusCode::CREATED, Json(render_task(&state, &user, task)?)))
}

pub async fn get_task(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<TaskResource>> {
    let task = state
        .db()
        .get_task(&user, task_id)?
        .ok_or_else(|| ApiError::task_not_found(task_id))?;
    Ok(Json(render_task(&state, &user, task)?))
}

/// PUT: `title` and `project_id` are required; omitted optional fields keep their values.
pub async fn replace_task(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(task_id): Path<i64>,
    payload: Result<Json<TaskInput>, JsonRejection>,
) -> ApiResult<Json<TaskResource>> {
    let input = json_body(payload)?;
    if input.title.is_none() {
        return Err(ApiError::missing_field("title"));
    }
    if input.project_id.is_none() {
        return Err(ApiError::missing_field("project_id"));
    }
    let patch = input.into_patch(&state)?;
    let task = state.db().update_task(&user, task_id, patch)?;
    Ok(Json(render_task(&state, &user, task)?))
}

pub async fn patch_task(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(task_id): Path<i64>,
    payload: Result<Json<TaskInput>, JsonRejection>,
) -> ApiResult<Json<TaskResource>> {
    let patch = json_body(payload)?.into_patch(&state)?;
    let task = state.db().update_task(&user, task_id, patch)?;
    Ok(Json(render_task(&state, &user, task)?))
}

pub async fn change_status(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(task_id): Path<i64>,
    payload: Result<Json<StatusChange>, JsonRejection>,
) -> ApiResult<Json<TaskResource>> {
    let body = json_body(payload)?;
    let raw = body
        .status
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::missing_field("status"))?;
    let status = parse_status(&raw)?;

    let task = state.db().change_status(&user, task_id, status)?;
    Ok(Json(render_task(&state, &user, task)?))
}

pub async fn delete_task(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(task_id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state.db().delete_task(&user, task_id, state.blobs())? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::task_not_found(task_id))
    }
}
