//! Route composition: every HTTP surface the server exposes

use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::admin;
use crate::auth::{bearer, Identity, TokenPair};
use crate::crud;
use crate::error::{Error, Result};
use crate::http::{self, AppJson};
use crate::messaging::SmsMessage;
use crate::realtime::sse;
use crate::responses::{ListEnvelope, PageParams};
use crate::state::AppState;
use crate::storage;
use crate::validate;

/// The embedded OpenAPI document
const OPENAPI_YAML: &str = include_str!("../assets/openapi.yaml");

// ---------------------------------------------------------------------------
// health and meta

#[derive(Debug, Serialize)]
pub struct Health {
    status: &'static str,
    database: &'static str,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Health> {
    let database = match sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.pool)
        .await
    {
        Ok(_) => "ok",
        Err(_) => "unreachable",
    };
    Json(Health {
        status: "ok",
        database,
    })
}

/// `GET /api/openapi.yaml`
pub async fn openapi() -> Response {
    (
        [(header::CONTENT_TYPE, "application/yaml")],
        OPENAPI_YAML,
    )
        .into_response()
}

/// `GET /api/schema`: the current cache snapshot
pub async fn schema_snapshot(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let snapshot = state
        .schema
        .get()
        .ok_or_else(|| Error::ServiceUnavailable("schema cache not ready".into()))?;
    let value = serde_json::to_value(&*snapshot)
        .map_err(|e| Error::internal(format!("snapshot encode failed: {e}")))?;
    Ok(Json(value))
}

// ---------------------------------------------------------------------------
// public auth surface

/// Per-IP fixed-window limit on the auth endpoints
async fn auth_rate_limit(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let ip = admin::auth::client_ip(request.headers(), &peer);
    state.auth_limiter.check(&ip)?;
    Ok(next.run(request).await)
}

#[derive(Debug, Deserialize)]
pub struct SignupBody {
    email: String,
    password: String,
}

/// `POST /api/auth/signup`
pub async fn signup(
    State(state): State<AppState>,
    AppJson(body): AppJson<SignupBody>,
) -> Result<Response> {
    let user = state.auth.signup(&body.email, &body.password).await?;
    Ok((StatusCode::CREATED, Json(user)).into_response())
}

/// Token request, accepted as JSON or form-encoded
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    #[serde(default)]
    grant_type: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default, alias = "refreshToken")]
    refresh_token: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    client_secret: Option<String>,
}

async fn decode_body<T: serde::de::DeserializeOwned>(request: Request) -> Result<T> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let bytes = axum::body::to_bytes(request.into_body(), 1024 * 1024)
        .await
        .map_err(|_| Error::bad_request("invalid request body"))?;

    if content_type.starts_with("application/x-www-form-urlencoded") {
        serde_urlencoded::from_bytes(&bytes)
            .map_err(|_| Error::bad_request("invalid form body"))
    } else {
        serde_json::from_slice(&bytes).map_err(|_| Error::bad_request("invalid JSON body"))
    }
}

/// `POST /api/auth/token`: password, refresh, or authorization_code
pub async fn token(State(state): State<AppState>, request: Request) -> Result<Json<TokenPair>> {
    let body: TokenRequest = decode_body(request).await?;

    match body.grant_type.as_str() {
        "password" => {
            let email = body
                .email
                .ok_or_else(|| Error::bad_request("email is required"))?;
            let password = body
                .password
                .ok_or_else(|| Error::bad_request("password is required"))?;
            Ok(Json(state.auth.login(&email, &password).await?))
        }
        "refresh" | "refresh_token" => {
            let refresh_token = body
                .refresh_token
                .ok_or_else(|| Error::bad_request("refreshToken is required"))?;
            Ok(Json(state.auth.refresh(&refresh_token).await?))
        }
        "authorization_code" => {
            // the one-time code minted by the hosted login flow; a
            // confidential client must also present its secret
            if let Some(client_id) = body.client_id.as_deref() {
                match body.client_secret.as_deref() {
                    Some(secret) => {
                        state.oauth_clients.verify_secret(client_id, secret).await?;
                    }
                    None => {
                        let client = state.oauth_clients.get_by_client_id(client_id).await?;
                        if client.client_secret_hash.is_some() {
                            return Err(Error::InvalidCredentials);
                        }
                        if client.revoked_at.is_some() {
                            return Err(Error::InvalidCredentials);
                        }
                    }
                }
            }
            let code = body
                .code
                .ok_or_else(|| Error::bad_request("code is required"))?;
            Ok(Json(state.auth.magic_link_consume(&code).await?))
        }
        other => Err(Error::bad_request(format!(
            "unsupported grant_type {other:?}"
        ))),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RevokeRequest {
    #[serde(default)]
    token: String,
}

/// `POST /api/auth/revoke`: RFC 7009: always 200, silent on unknowns
pub async fn revoke(State(state): State<AppState>, request: Request) -> Result<StatusCode> {
    let body: RevokeRequest = decode_body(request).await.unwrap_or_default();
    if !body.token.is_empty() {
        state.auth.revoke(&body.token).await?;
    }
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct MagicLinkBody {
    email: String,
}

/// `POST /api/auth/magic-link`
///
/// Responds 200 whether or not the account exists, so the endpoint
/// cannot be used to enumerate emails.
pub async fn magic_link_request(
    State(state): State<AppState>,
    AppJson(body): AppJson<MagicLinkBody>,
) -> Result<StatusCode> {
    if !state.config.auth.magic_link_enabled {
        return Err(Error::NotFound("magic-link login is disabled".into()));
    }
    validate::email(&body.email)?;

    match state.auth.magic_link_mint(&body.email).await {
        Ok((user, token)) => {
            if let Some(mailer) = &state.mailer {
                let base = state
                    .config
                    .auth
                    .oauth_redirect_url
                    .clone()
                    .unwrap_or_default();
                let vars = serde_json::json!({
                    "app_name": "aybase",
                    "link": format!("{base}?code={token}"),
                    "email": user.email,
                });
                match state.templates.render_key("auth.magic_link", &vars).await {
                    Ok(rendered) => {
                        if let Err(e) = mailer.send(&user.email, &rendered).await {
                            tracing::error!(error = %e, "magic-link email send failed");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "magic-link template render failed"),
                }
            }
        }
        Err(Error::UserNotFound) => {}
        Err(e) => return Err(e),
    }
    Ok(StatusCode::OK)
}

// ---------------------------------------------------------------------------
// per-app budget

/// Sliding-window budget for API-key traffic bound to an app
async fn per_app_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    if let Some(Identity::Key(key)) = request.extensions().get::<Identity>() {
        if let Some(app_id) = key.app_id {
            let app = state.apps.get(app_id).await?;
            state.app_limiter.check(
                &app_id.to_string(),
                app.rate_limit_rps.max(1) as u32,
                app.rate_limit_window_secs.max(1) as u64,
            )?;
        }
    }
    Ok(next.run(request).await)
}

// ---------------------------------------------------------------------------
// sms surface

#[derive(Debug, Deserialize)]
pub struct SendSmsBody {
    to: String,
    body: String,
}

/// `POST /api/sms/messages`
pub async fn sms_send(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    AppJson(body): AppJson<SendSmsBody>,
) -> Result<Response> {
    if !identity.can_write() {
        return Err(Error::Forbidden("credential scope is read-only".into()));
    }
    let user_id = identity
        .user_id()
        .ok_or_else(|| Error::Forbidden("a user-bound credential is required".into()))?;
    let message = state.sms.send(user_id, &body.to, &body.body).await?;
    Ok((StatusCode::CREATED, Json(message)).into_response())
}

/// `GET /api/sms/messages/{id}`: other users' ids read as not-found
pub async fn sms_get(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<SmsMessage>> {
    let user_id = identity
        .user_id()
        .ok_or_else(|| Error::Forbidden("a user-bound credential is required".into()))?;
    let id = validate::uuid_param(&id)?;
    Ok(Json(state.sms.get_for_user(user_id, id).await?))
}

/// `GET /api/sms/messages`
pub async fn sms_list(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(paging): Query<PageParams>,
) -> Result<Json<ListEnvelope<SmsMessage>>> {
    let user_id = identity
        .user_id()
        .ok_or_else(|| Error::Forbidden("a user-bound credential is required".into()))?;
    let page = paging.page();
    let per_page = paging.per_page();
    let (messages, total) = state.sms.list_for_user(user_id, page, per_page).await?;
    Ok(Json(ListEnvelope::new(messages, page, per_page, total)))
}

/// `POST /api/webhooks/sms/status`: Twilio-style form callback.
///
/// `MessageSid` missing is the only 400; everything else answers 200 so
/// the provider stops retrying, with failures logged instead.
pub async fn sms_status(
    State(state): State<AppState>,
    axum::Form(form): axum::Form<HashMap<String, String>>,
) -> Result<StatusCode> {
    let sid = form
        .get("MessageSid")
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::bad_request("MessageSid is required"))?;

    let status = form.get("MessageStatus").map(String::as_str).unwrap_or("");
    if status.is_empty() {
        return Ok(StatusCode::OK);
    }

    match state.sms.apply_status(sid, status).await {
        Ok(_) => {}
        Err(e) => {
            tracing::error!(sid = %sid, error = %e, "sms status update failed");
        }
    }
    Ok(StatusCode::OK)
}

// ---------------------------------------------------------------------------
// composition

/// CORS entry point bound to the state's policy
async fn cors_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.cors.apply(request, next).await
}

/// Build the complete application router
pub fn build(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/signup", post(signup))
        .route("/magic-link", post(magic_link_request))
        .route_layer(middleware::from_fn(http::require_json))
        .route("/token", post(token))
        .route("/revoke", post(revoke))
        .route_layer(middleware::from_fn(http::require_json_or_form))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_rate_limit,
        ));

    let collections = Router::new()
        .route(
            "/{table}",
            get(crud::handlers::list).post(crud::handlers::create),
        )
        .route(
            "/{table}/{id}",
            get(crud::handlers::get)
                .patch(crud::handlers::update)
                .delete(crud::handlers::delete),
        )
        .route_layer(middleware::from_fn(http::require_json))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            per_app_rate_limit,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            bearer::require_auth,
        ));

    let sms_routes = Router::new()
        .route("/messages", post(sms_send).get(sms_list))
        .route("/messages/{id}", get(sms_get))
        .route_layer(middleware::from_fn(http::require_json))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            per_app_rate_limit,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            bearer::require_auth,
        ));

    let storage_routes = Router::new()
        .route(
            "/{bucket}/{object}",
            get(storage::serve)
                .post(storage::upload)
                .delete(storage::delete),
        )
        .route("/{bucket}/{object}/sign", post(storage::sign))
        .route("/{bucket}", get(storage::list))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            bearer::optional_auth,
        ));

    let schema_route = Router::new()
        .route("/schema", get(schema_snapshot))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            bearer::require_admin_or_user,
        ));

    let mut api = Router::new()
        .route("/openapi.yaml", get(openapi))
        .route("/realtime", get(sse::realtime))
        .merge(schema_route)
        .nest("/auth", auth_routes)
        .nest("/collections", collections)
        .nest("/admin", admin::router(state.clone()))
        .route("/webhooks/sms/status", post(sms_status));

    if state.config.auth.sms_enabled {
        api = api.nest("/sms", sms_routes);
    }
    if state.config.storage.enabled {
        api = api.nest("/storage", storage_routes);
    }

    let mut app = Router::new()
        .route("/health", get(health))
        .nest("/api", api);

    if state.config.admin.enabled {
        let configured = state.config.admin.path.trim_end_matches('/');
        let prefix = if configured.is_empty() {
            "/admin".to_string()
        } else if configured.starts_with('/') {
            configured.to_string()
        } else {
            format!("/{configured}")
        };
        app = app
            .route(&prefix, get(admin::spa::index))
            .route(&format!("{prefix}/{{*path}}"), get(admin::spa::fallback));
    }

    app.layer(middleware::from_fn_with_state(state.clone(), cors_middleware))
        .layer(tower_http::catch_panic::CatchPanicLayer::new())
        .layer(middleware::from_fn(http::record_response))
        .layer(tower_http::request_id::PropagateRequestIdLayer::x_request_id())
        .layer(tower_http::request_id::SetRequestIdLayer::x_request_id(
            tower_http::request_id::MakeRequestUuid,
        ))
        .layer(tower_http::limit::RequestBodyLimitLayer::new(
            state.config.server.body_limit_bytes,
        ))
        .with_state(state)
}
