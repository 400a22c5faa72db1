//! CORS middleware with exact-origin semantics
//!
//! A configured list of exact origins, or a single `*`. With multiple
//! origins the response echoes only the matching origin and adds
//! `Vary: Origin`; with `*` no `Vary` is emitted. Preflights answer 204
//! with a 24-hour max-age.

use axum::{
    extract::Request,
    http::{header, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// Methods the API surface accepts
const ALLOWED_METHODS: &str = "GET, POST, PUT, PATCH, DELETE, OPTIONS";

/// Headers handlers actually read
const ALLOWED_HEADERS: &str = "Authorization, Content-Type, Last-Event-Id";

/// Preflight cache lifetime
const MAX_AGE: &str = "86400";

/// Immutable CORS policy derived from configuration
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    origins: Arc<Vec<String>>,
    allow_any: bool,
}

impl CorsPolicy {
    /// Build from the configured origin list
    pub fn new(origins: &[String]) -> Self {
        let allow_any = origins.iter().any(|o| o == "*");
        Self {
            origins: Arc::new(origins.to_vec()),
            allow_any,
        }
    }

    /// The `Access-Control-Allow-Origin` value for a request origin, and
    /// whether `Vary: Origin` must accompany it
    fn resolve(&self, origin: Option<&str>) -> Option<(String, bool)> {
        if self.allow_any {
            return Some(("*".to_string(), false));
        }
        let origin = origin?;
        if self.origins.iter().any(|o| o == origin) {
            Some((origin.to_string(), self.origins.len() > 1))
        } else {
            None
        }
    }

    /// The middleware entry point
    pub async fn apply(&self, request: Request, next: Next) -> Response {
        let origin = request
            .headers()
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let is_preflight = request.method() == Method::OPTIONS
            && request
                .headers()
                .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);

        let resolved = self.resolve(origin.as_deref());

        if is_preflight {
            let mut response = StatusCode::NO_CONTENT.into_response();
            if let Some((allow_origin, vary)) = resolved {
                let headers = response.headers_mut();
                set(headers, header::ACCESS_CONTROL_ALLOW_ORIGIN, &allow_origin);
                set(headers, header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS);
                set(headers, header::ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS);
                set(headers, header::ACCESS_CONTROL_MAX_AGE, MAX_AGE);
                if vary {
                    set(headers, header::VARY, "Origin");
                }
            }
            return response;
        }

        let mut response = next.run(request).await;
        if let Some((allow_origin, vary)) = resolved {
            let headers = response.headers_mut();
            set(headers, header::ACCESS_CONTROL_ALLOW_ORIGIN, &allow_origin);
            if vary {
                set(headers, header::VARY, "Origin");
            }
        }
        response
    }
}

fn set(headers: &mut axum::http::HeaderMap, name: header::HeaderName, value: &str) {
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.insert(name, v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_allows_everything_without_vary() {
        let policy = CorsPolicy::new(&["*".to_string()]);
        let (origin, vary) = policy.resolve(Some("https://anything.example")).unwrap();
        assert_eq!(origin, "*");
        assert!(!vary);
        // even with no Origin header
        assert!(policy.resolve(None).is_some());
    }

    #[test]
    fn single_origin_echoes_without_vary() {
        let policy = CorsPolicy::new(&["https://app.example.com".to_string()]);
        let (origin, vary) = policy.resolve(Some("https://app.example.com")).unwrap();
        assert_eq!(origin, "https://app.example.com");
        assert!(!vary);
    }

    #[test]
    fn multi_origin_echoes_match_with_vary() {
        let policy = CorsPolicy::new(&[
            "https://app.example.com".to_string(),
            "https://admin.example.com".to_string(),
        ]);
        let (origin, vary) = policy.resolve(Some("https://admin.example.com")).unwrap();
        assert_eq!(origin, "https://admin.example.com");
        assert!(vary);
    }

    #[test]
    fn unlisted_origin_gets_nothing() {
        let policy = CorsPolicy::new(&["https://app.example.com".to_string()]);
        assert!(policy.resolve(Some("https://evil.example.com")).is_none());
        assert!(policy.resolve(None).is_none());
    }
}
