//! Bearer-token fallthrough
//!
//! The `Authorization` header carries one of: the admin HMAC token, a
//! user JWT, or an API-key plaintext. The type is inferred from the
//! token's shape and verified with the matching scheme.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::auth::{api_keys, ApiKey, Claims, TokenService};
use crate::error::{Error, Result};
use crate::state::AppState;

/// The authenticated caller attached to request extensions
#[derive(Debug, Clone)]
pub enum Identity {
    /// Admin HMAC token holder
    Admin,
    /// User JWT holder
    User(Claims),
    /// API-key holder
    Key(ApiKey),
}

impl Identity {
    /// Whether this identity may write through the auto-CRUD surface
    pub fn can_write(&self) -> bool {
        match self {
            Identity::Admin | Identity::User(_) => true,
            Identity::Key(key) => key.can_write(),
        }
    }

    /// Whether this identity may touch the given table
    pub fn table_allowed(&self, table: &str) -> bool {
        match self {
            Identity::Admin | Identity::User(_) => true,
            Identity::Key(key) => key.table_allowed(table),
        }
    }

    /// The acting user, when there is one
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Identity::Admin => None,
            Identity::User(claims) => Some(claims.sub),
            Identity::Key(key) => Some(key.user_id),
        }
    }

    /// Whether this is the admin token
    pub fn is_admin(&self) -> bool {
        matches!(self, Identity::Admin)
    }
}

/// Pull the bearer token out of an `Authorization` header
pub fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolve a bearer token into an identity
pub async fn resolve(state: &AppState, token: &str) -> Result<Identity> {
    if state.keystore.is_admin_token(token) {
        return Ok(Identity::Admin);
    }
    if api_keys::looks_like_key(token) {
        let key = state.api_keys.authenticate(token).await?;
        return Ok(Identity::Key(key));
    }
    if TokenService::looks_like_jwt(token) {
        let claims = state.auth.tokens().validate(token)?;
        return Ok(Identity::User(claims));
    }
    Err(Error::InvalidToken)
}

/// Middleware: any authenticated identity
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let token = bearer_token(&request)
        .ok_or_else(|| Error::Unauthorized("missing bearer token".into()))?
        .to_string();
    let identity = resolve(&state, &token).await?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

/// Middleware: attach an identity when a valid bearer is present, but
/// let anonymous requests through (signed storage URLs authorize
/// themselves).
pub async fn optional_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    if let Some(token) = bearer_token(&request).map(str::to_string) {
        if let Ok(identity) = resolve(&state, &token).await {
            request.extensions_mut().insert(identity);
        }
    }
    Ok(next.run(request).await)
}

/// Middleware: admin HMAC token only.
///
/// With no admin password configured the routes stay registered but every
/// request is rejected here.
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let token = bearer_token(&request)
        .ok_or_else(|| Error::Unauthorized("missing bearer token".into()))?;
    if !state.keystore.is_admin_token(token) {
        return Err(Error::Unauthorized("admin token required".into()));
    }
    request.extensions_mut().insert(Identity::Admin);
    Ok(next.run(request).await)
}

/// Middleware: admin HMAC token, or any user credential
pub async fn require_admin_or_user(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let token = bearer_token(&request)
        .ok_or_else(|| Error::Unauthorized("missing bearer token".into()))?
        .to_string();
    let identity = resolve(&state, &token).await?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn key_with(scope: &str, tables: Vec<String>) -> ApiKey {
        ApiKey {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            app_id: None,
            prefix: "ayb_00112233".into(),
            secret_hash: String::new(),
            name: "test".into(),
            scope: scope.into(),
            allowed_tables: tables,
            revoked_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn identity_write_rules() {
        assert!(Identity::Admin.can_write());
        assert!(Identity::Key(key_with("*", vec![])).can_write());
        assert!(Identity::Key(key_with("readwrite", vec![])).can_write());
        assert!(!Identity::Key(key_with("readonly", vec![])).can_write());
    }

    #[test]
    fn identity_table_rules() {
        let scoped = Identity::Key(key_with("*", vec!["users".into()]));
        assert!(scoped.table_allowed("users"));
        assert!(!scoped.table_allowed("orders"));
        assert!(Identity::Admin.table_allowed("anything"));
    }

    #[test]
    fn bearer_extraction() {
        let request = Request::builder()
            .header(header::AUTHORIZATION, "Bearer abc123")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&request), Some("abc123"));

        let no_scheme = Request::builder()
            .header(header::AUTHORIZATION, "abc123")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&no_scheme), None);

        let empty = Request::builder()
            .header(header::AUTHORIZATION, "Bearer ")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&empty), None);
    }
}
