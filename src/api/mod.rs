//! REST API over the task database.
//!
//! Every `/api/*` route except `/api/health` runs behind [`auth::require_auth`],
//! which resolves the bearer token and hands the caller to handlers as an
//! `Extension<User>`.

mod attachments;
mod auth;
mod comments;
mod history;
pub mod pagination;
mod projects;
pub mod resources;
mod tags;
mod tasks;
mod users;

use axum::extract::DefaultBodyLimit;
use axum::extract::rejection::JsonRejection;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use chrono::FixedOffset;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::blob::{BlobStore, MEDIA_URL};
use crate::config::ServerConfig;
use crate::db::Database;
use crate::error::{ApiError, ApiResult, ErrorCode};
use resources::Renderer;

/// Request-independent settings the handlers need.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub page_size: i64,
    pub max_page_size: i64,
    pub timezone: FixedOffset,
    pub max_upload_bytes: usize,
    /// Directory served read-only under `/media`.
    pub media_dir: PathBuf,
}

impl ApiSettings {
    pub fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        Ok(Self {
            page_size: config.page_size,
            max_page_size: config.max_page_size,
            timezone: crate::config::parse_timezone(&config.timezone)?,
            max_upload_bytes: config.max_upload_bytes,
            media_dir: config.media_dir.clone(),
        })
    }
}

/// State shared across handlers.
#[derive(Clone)]
pub struct ApiState {
    db: Arc<Database>,
    blobs: Arc<dyn BlobStore>,
    settings: Arc<ApiSettings>,
}

impl ApiState {
    pub fn new(db: Arc<Database>, blobs: Arc<dyn BlobStore>, settings: ApiSettings) -> Self {
        Self {
            db,
            blobs,
            settings: Arc::new(settings),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub fn settings(&self) -> &ApiSettings {
        &self.settings
    }

    pub(crate) fn renderer(&self) -> Renderer<'_> {
        Renderer {
            tz: self.settings.timezone,
            blobs: self.blobs.as_ref(),
        }
    }
}

/// Unwrap a JSON body, turning extractor rejections into API errors.
pub(crate) fn json_body<T: DeserializeOwned>(
    payload: Result<Json<T>, JsonRejection>,
) -> ApiResult<T> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => Err(ApiError::new(
            ErrorCode::InvalidFieldValue,
            rejection.body_text(),
        )),
    }
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the router with all routes.
pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/api/users/me", get(users::me))
        // Projects
        .route(
            "/api/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/api/projects/{project_id}",
            get(projects::get_project)
                .put(projects::replace_project)
                .patch(projects::patch_project)
                .delete(projects::delete_project),
        )
        // Tags
        .route("/api/tags", get(tags::list_tags).post(tags::create_tag))
        .route("/api/tags/{tag_id}", axum::routing::delete(tags::delete_tag))
        // Tasks
        .route("/api/tasks", get(tasks::list_tasks).post(tasks::create_task))
        .route("/api/tasks/overdue", get(tasks::overdue_tasks))
        .route("/api/tasks/upcoming", get(tasks::upcoming_tasks))
        .route(
            "/api/tasks/{task_id}",
            get(tasks::get_task)
                .put(tasks::replace_task)
                .patch(tasks::patch_task)
                .delete(tasks::delete_task),
        )
        .route(
            "/api/tasks/{task_id}/change_status",
            post(tasks::change_status),
        )
        .route("/api/tasks/{task_id}/history", get(history::task_history))
        .route(
            "/api/tasks/{task_id}/comments",
            get(comments::list_comments).post(comments::add_comment),
        )
        .route(
            "/api/tasks/{task_id}/attachments",
            post(attachments::upload_attachment),
        )
        .route(
            "/api/tasks/{task_id}/attachments/bulk",
            post(attachments::upload_attachments),
        )
        // History
        .route("/api/history", get(history::list_history))
        // Comments
        .route(
            "/api/comments/{comment_id}",
            axum::routing::patch(comments::update_comment).delete(comments::delete_comment),
        )
        // Attachments
        .route("/api/attachments", get(attachments::list_attachments))
        .route(
            "/api/attachments/{attachment_id}",
            get(attachments::get_attachment)
                .patch(attachments::update_attachment)
                .delete(attachments::delete_attachment),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/api/health", get(health))
        .merge(protected)
        .nest_service(MEDIA_URL, ServeDir::new(&state.settings.media_dir))
        .layer(DefaultBodyLimit::max(state.settings.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until the returned sender fires or is dropped.
pub async fn start_server(
    state: ApiState,
    addr: SocketAddr,
) -> anyhow::Result<(oneshot::Sender<()>, SocketAddr, tokio::task::JoinHandle<()>)> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    info!("API server listening on http://{}", bound_addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                info!("API server shutting down");
            })
            .await
        {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok((shutdown_tx, bound_addr, handle))
}
