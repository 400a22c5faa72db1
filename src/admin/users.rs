//! Admin user management

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::auth::User;
use crate::error::Result;
use crate::responses::{ListEnvelope, PageParams};
use crate::state::AppState;
use crate::validate;

/// `GET /api/admin/users`
pub async fn list(
    State(state): State<AppState>,
    Query(paging): Query<PageParams>,
) -> Result<Json<ListEnvelope<User>>> {
    let page = paging.page();
    let per_page = paging.per_page();
    let (users, total) = state.auth.list_users(page, per_page).await?;
    Ok(Json(ListEnvelope::new(users, page, per_page, total)))
}

/// `DELETE /api/admin/users/{id}`: cascades to the user's keys and sessions
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = validate::uuid_param(&id)?;
    state.auth.delete_user(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
