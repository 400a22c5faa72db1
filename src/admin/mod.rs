//! Admin control plane: routes and their auth gates
//!
//! Everything under `/api/admin` demands the admin HMAC token except the
//! status/login pair and a few read endpoints that also accept a user
//! credential.

pub mod api_keys;
pub mod apps;
pub mod auth;
pub mod email;
pub mod jobs;
pub mod matviews;
pub mod oauth;
pub mod rls;
pub mod schedules;
pub mod spa;
pub mod sql;
pub mod system;
pub mod users;
pub mod webhooks;

use axum::middleware;
use axum::routing::{delete, get, patch, post};
use axum::Router;

use crate::auth::bearer;
use crate::state::AppState;

/// The `/api/admin` route group
pub fn router(state: AppState) -> Router<AppState> {
    // open: no token exists before login
    let open = Router::new()
        .route("/status", get(auth::status))
        .route("/auth", post(auth::login));

    let gated = Router::new()
        .route("/sql", post(sql::execute))
        .route("/rls/policies", post(rls::create_policy).get(rls::list_policies))
        .route("/rls/policies/{name}", delete(rls::drop_policy))
        .route("/rls/tables", post(rls::toggle_rls))
        .route("/users", get(users::list))
        .route("/users/{id}", delete(users::delete))
        .route("/api-keys", get(api_keys::list).post(api_keys::create))
        .route("/api-keys/{id}", get(api_keys::get))
        .route("/api-keys/{id}/revoke", post(api_keys::revoke))
        .route("/apps", get(apps::list).post(apps::create))
        .route(
            "/apps/{id}",
            get(apps::get).patch(apps::update).delete(apps::delete),
        )
        .route("/oauth/clients", get(oauth::list).post(oauth::register))
        .route(
            "/oauth/clients/{id}",
            get(oauth::get).patch(oauth::update).delete(oauth::revoke),
        )
        .route("/oauth/clients/{id}/rotate-secret", post(oauth::rotate_secret))
        .route("/jobs", get(jobs::list))
        .route("/jobs/stats", get(jobs::stats))
        .route("/jobs/{id}", get(jobs::get))
        .route("/jobs/{id}/cancel", post(jobs::cancel))
        .route("/jobs/{id}/retry", post(jobs::retry))
        .route("/schedules", get(schedules::list).post(schedules::create))
        .route(
            "/schedules/{id}",
            get(schedules::get)
                .patch(schedules::update)
                .delete(schedules::delete),
        )
        .route("/schedules/{id}/enable", post(schedules::enable))
        .route("/schedules/{id}/disable", post(schedules::disable))
        .route("/matviews", get(matviews::list).post(matviews::register))
        .route(
            "/matviews/{id}",
            patch(matviews::update).delete(matviews::delete),
        )
        .route("/matviews/{id}/refresh", post(matviews::refresh))
        .route("/webhooks", get(webhooks::list).post(webhooks::create))
        .route("/webhooks/deliveries", get(webhooks::deliveries))
        .route("/webhooks/{id}", delete(webhooks::delete))
        .route("/email/templates", get(email::list))
        .route("/email/templates/preview", post(email::preview))
        .route(
            "/email/templates/{key}",
            get(email::get)
                .put(email::upsert)
                .delete(email::delete)
                .patch(email::patch),
        )
        .route("/email/send", post(email::send))
        .route("/secrets/rotate", post(system::rotate_secret))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            bearer::require_admin,
        ));

    // logs and stats also serve an authenticated user credential
    let shared = Router::new()
        .route("/logs", get(system::logs))
        .route("/stats", get(system::stats))
        .route_layer(middleware::from_fn_with_state(
            state,
            bearer::require_admin_or_user,
        ));

    open.merge(gated).merge(shared)
}
