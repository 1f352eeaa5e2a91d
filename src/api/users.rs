use axum::Json;
use axum::extract::{Extension, State};

use super::ApiState;
use super::resources::UserResource;
use crate::types::User;

/// Profile of the authenticated caller.
pub async fn me(State(state): State<ApiState>, Extension(user): Extension<User>) -> Json<UserResource> {
    Json(state.renderer().user(&user))
}
