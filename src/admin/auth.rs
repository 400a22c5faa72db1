//! Admin authentication: status probe and password login

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::error::{Error, Result};
use crate::http::AppJson;
use crate::keystore;
use crate::state::AppState;

/// Best-effort client address: first `X-Forwarded-For` hop, else the peer
pub fn client_ip(headers: &HeaderMap, peer: &SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}

#[derive(Debug, Serialize)]
pub struct AdminStatus {
    /// Whether an admin password is configured at all
    pub auth: bool,
}

/// `GET /api/admin/status`
pub async fn status(State(state): State<AppState>) -> Json<AdminStatus> {
    Json(AdminStatus {
        auth: state.config.admin.password.is_some(),
    })
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    #[serde(default)]
    password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    token: String,
}

/// `POST /api/admin/auth`
///
/// Rate limited per source IP before the password is even looked at;
/// the comparison itself is constant time.
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    AppJson(body): AppJson<LoginBody>,
) -> Result<Json<LoginResponse>> {
    let ip = client_ip(&headers, &peer);
    state.admin_login_limiter.check(&ip)?;

    let configured = state
        .config
        .admin
        .password
        .as_deref()
        .ok_or_else(|| Error::Unauthorized("admin authentication is not configured".into()))?;

    if !keystore::constant_time_eq(configured, &body.password) {
        return Err(Error::InvalidCredentials);
    }

    let token = state
        .keystore
        .admin_token()
        .ok_or_else(|| Error::internal("admin key missing with password configured"))?;
    Ok(Json(LoginResponse { token }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        let peer: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(client_ip(&headers, &peer), "203.0.113.9");
    }

    #[test]
    fn falls_back_to_peer() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "192.0.2.4:1234".parse().unwrap();
        assert_eq!(client_ip(&headers, &peer), "192.0.2.4");
    }
}
