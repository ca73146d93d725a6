//! Admin-only account listing, mounted behind both access gates.

use axum::{extract::State, middleware, routing::get, Json, Router};
use tracing::instrument;

use crate::auth::extractors::{require_admin, require_session, AuthUser};
use crate::auth::repo_types::PublicUser;
use crate::error::AppResult;
use crate::state::AppState;

pub fn router(state: AppState) -> Router<AppState> {
    // Layers run bottom-up: the session gate first, then the admin gate.
    Router::new()
        .route("/admin/users", get(list_users))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .route_layer(middleware::from_fn_with_state(state, require_session))
}

#[instrument(skip_all, fields(admin_id = admin.user_id))]
async fn list_users(
    State(state): State<AppState>,
    admin: AuthUser,
) -> AppResult<Json<Vec<PublicUser>>> {
    let users = state.auth.list_users().await?;
    tracing::info!(count = users.len(), "admin listed users");
    Ok(Json(users))
}
