use axum::Json;
use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Multipart, OriginalUri, Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use tracing::warn;

use super::pagination::PageBody;
use super::resources::AttachmentResource;
use super::{ApiState, json_body};
use crate::db::query::page_request;
use crate::error::{ApiError, ApiResult};
use crate::types::{Attachment, User};

#[derive(Debug, Default, Deserialize)]
pub struct AttachmentListParams {
    pub task: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AttachmentInput {
    pub description: Option<String>,
}

/// One file read from a multipart body.
struct Upload {
    file_name: String,
    data: Bytes,
}

fn multipart_error(e: MultipartError) -> ApiError {
    ApiError::invalid_upload("Malformed multipart body").with_details(e.body_text())
}

async fn read_upload(field: axum::extract::multipart::Field<'_>) -> ApiResult<Upload> {
    let file_name = field
        .file_name()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::invalid_upload("No filename was submitted"))?;
    let data = field.bytes().await.map_err(multipart_error)?;
    if data.is_empty() {
        return Err(ApiError::invalid_upload(format!(
            "The submitted file '{}' is empty",
            file_name
        )));
    }
    Ok(Upload { file_name, data })
}

/// Write the blob, then the record. A failed record write removes the blob again.
fn store_upload(
    state: &ApiState,
    user: &User,
    task_id: i64,
    upload: &Upload,
    description: &str,
) -> ApiResult<Attachment> {
    let blob = state
        .blobs()
        .put(&upload.file_name, &upload.data)
        .map_err(ApiError::storage)?;

    match state.db().create_attachment(
        user,
        task_id,
        &blob,
        &upload.file_name,
        description,
        state.blobs(),
    ) {
        Ok(attachment) => Ok(attachment),
        Err(e) => {
            if let Err(cleanup) = state.blobs().delete(&blob.name) {
                warn!(file = %blob.name, error = %cleanup, "Failed to remove orphaned upload");
            }
            Err(e.into())
        }
    }
}

fn ensure_task(state: &ApiState, user: &User, task_id: i64) -> ApiResult<()> {
    state
        .db()
        .get_task(user, task_id)?
        .map(|_| ())
        .ok_or_else(|| ApiError::task_not_found(task_id))
}

/// Multipart upload with a single `file` field and an optional `description`.
pub async fn upload_attachment(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(task_id): Path<i64>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<AttachmentResource>)> {
    ensure_task(&state, &user, task_id)?;

    let mut upload = None;
    let mut description = String::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("file") => upload = Some(read_upload(field).await?),
            Some("description") => description = field.text().await.map_err(multipart_error)?,
            _ => {}
        }
    }
    let upload = upload.ok_or_else(|| ApiError::invalid_upload("No file was submitted"))?;

    let attachment = store_upload(&state, &user, task_id, &upload, &description)?;
    Ok((
        StatusCode::CREATED,
        Json(state.renderer().attachment(attachment)),
    ))
}

/// Multipart upload with one or more `files` fields. Every file is checked
/// before any is stored, and a failed store discards the ones already written.
pub async fn upload_attachments(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(task_id): Path<i64>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Vec<AttachmentResource>>)> {
    ensure_task(&state, &user, task_id)?;

    let mut uploads = Vec::new();
    let mut description = String::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("files") => uploads.push(read_upload(field).await?),
            Some("description") => description = field.text().await.map_err(multipart_error)?,
            _ => {}
        }
    }
    if uploads.is_empty() {
        return Err(ApiError::invalid_upload("No files were submitted").with_field("files"));
    }

    let mut created = Vec::with_capacity(uploads.len());
    for upload in &uploads {
        match store_upload(&state, &user, task_id, upload, &description) {
            Ok(attachment) => created.push(attachment),
            Err(e) => {
                discard_uploads(&state, &user, &created);
                return Err(e);
            }
        }
    }

    let renderer = state.renderer();
    let created = created.into_iter().map(|a| renderer.attachment(a)).collect();
    Ok((StatusCode::CREATED, Json(created)))
}

/// Remove the records and blobs of a bulk upload that failed partway.
fn discard_uploads(state: &ApiState, user: &User, created: &[Attachment]) {
    for attachment in created {
        if let Err(e) = state
            .db()
            .delete_attachment(user, attachment.id, state.blobs())
        {
            warn!(attachment_id = attachment.id, error = %e, "Failed to discard partial upload");
        }
    }
}

pub async fn list_attachments(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<AttachmentListParams>,
) -> ApiResult<Json<PageBody<AttachmentResource>>> {
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

    let attachments = state.db().list_attachments(&user, task_id, page)?;
    let renderer = state.renderer();
    Ok(Json(PageBody::new(attachments, &uri, |a| {
        renderer.attachment(a)
    })))
}

pub async fn get_attachment(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(attachment_id): Path<i64>,
) -> ApiResult<Json<AttachmentResource>> {
    let attachment = state
        .db()
        .get_attachment(&user, attachment_id)?
        .ok_or_else(|| ApiError::attachment_not_found(attachment_id))?;
    Ok(Json(state.renderer().attachment(attachment)))
}

/// Edit the description. The save refreshes the size from the blob.
pub async fn update_attachment(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(attachment_id): Path<i64>,
    payload: Result<Json<AttachmentInput>, JsonRejection>,
) -> ApiResult<Json<AttachmentResource>> {
    let input = json_body(payload)?;
    let attachment =
        state
            .db()
            .update_attachment(&user, attachment_id, input.description, state.blobs())?;
    Ok(Json(state.renderer().attachment(attachment)))
}

pub async fn delete_attachment(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(attachment_id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state
        .db()
        .delete_attachment(&user, attachment_id, state.blobs())?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::attachment_not_found(attachment_id))
    }
}
