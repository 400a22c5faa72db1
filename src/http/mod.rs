//! HTTP kernel: request pipeline helpers shared by every route group

pub mod cors;

use axum::{
    extract::{FromRequest, Request},
    http::{header, Method},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::error::Error;

/// JSON body extractor with the crate's error envelope.
///
/// Any deserialization problem (malformed JSON, wrong shape, over the
/// body limit) is a 400 `invalid JSON body`.
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    axum::Json<T>: FromRequest<S>,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(AppJson(value)),
            Err(_) => Err(Error::bad_request("invalid JSON body")),
        }
    }
}

fn has_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn content_type(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
}

/// Middleware: JSON API groups only accept `application/json` bodies
pub async fn require_json(request: Request, next: Next) -> Result<Response, Error> {
    if has_body(request.method()) {
        let ok = content_type(&request)
            .map(|ct| ct.starts_with("application/json"))
            .unwrap_or(false);
        if !ok {
            return Err(Error::bad_request(
                "Content-Type must be application/json",
            ));
        }
    }
    Ok(next.run(request).await)
}

/// Middleware: OAuth token/revoke and provider webhooks also accept
/// form-encoded bodies
pub async fn require_json_or_form(request: Request, next: Next) -> Result<Response, Error> {
    if has_body(request.method()) {
        let ok = content_type(&request)
            .map(|ct| {
                ct.starts_with("application/json")
                    || ct.starts_with("application/x-www-form-urlencoded")
            })
            .unwrap_or(false);
        if !ok {
            return Err(Error::bad_request(
                "Content-Type must be application/json or application/x-www-form-urlencoded",
            ));
        }
    }
    Ok(next.run(request).await)
}

/// Middleware: record status and latency for every response
pub async fn record_response(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed = started.elapsed();

    let bytes = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        bytes,
        elapsed_ms = elapsed.as_millis() as u64,
        request_id = %request_id,
        "request"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_methods() {
        assert!(has_body(&Method::POST));
        assert!(has_body(&Method::PUT));
        assert!(has_body(&Method::PATCH));
        assert!(!has_body(&Method::GET));
        assert!(!has_body(&Method::DELETE));
        assert!(!has_body(&Method::OPTIONS));
    }
}
