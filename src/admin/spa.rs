//! Admin SPA serving
//!
//! Static assets resolve exactly; every unmatched extension-less subpath
//! falls back to `index.html` so the client router owns navigation.

use axum::extract::{Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use std::path::{Component, Path, PathBuf};

use crate::state::AppState;

/// Placeholder page when no asset directory is configured
const PLACEHOLDER: &str = "<!doctype html><html><head><title>aybase admin</title></head>\
<body><h1>aybase</h1><p>Admin SPA assets are not configured.</p></body></html>";

/// Whether a request path names a static asset (has a file extension)
pub fn is_asset_path(path: &str) -> bool {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.contains('.') && !n.starts_with('.'))
        .unwrap_or(false)
}

/// Resolve a request path inside the asset root; traversal components
/// make it unresolvable.
pub fn resolve_asset(root: &Path, request_path: &str) -> Option<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(request_path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(resolved)
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
        "html" => "text/html; charset=utf-8",
        "js" | "mjs" => "text/javascript",
        "css" => "text/css",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "ico" => "image/x-icon",
        "woff2" => "font/woff2",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

async fn serve_file(path: &Path) -> Option<Response> {
    let bytes = tokio::fs::read(path).await.ok()?;
    Some(
        (
            [(header::CONTENT_TYPE, content_type_for(path))],
            bytes,
        )
            .into_response(),
    )
}

async fn serve(state: &AppState, sub_path: &str) -> Response {
    let Some(root) = state.config.admin.assets_dir.as_deref().map(Path::new) else {
        return Html(PLACEHOLDER).into_response();
    };

    if is_asset_path(sub_path) {
        match resolve_asset(root, sub_path) {
            Some(path) => match serve_file(&path).await {
                Some(response) => response,
                // asset paths never fall back to index.html
                None => StatusCode::NOT_FOUND.into_response(),
            },
            None => StatusCode::NOT_FOUND.into_response(),
        }
    } else {
        match serve_file(&root.join("index.html")).await {
            Some(response) => response,
            None => Html(PLACEHOLDER).into_response(),
        }
    }
}

/// `GET {admin.path}`: the SPA root
pub async fn index(State(state): State<AppState>) -> Response {
    serve(&state, "").await
}

/// `GET {admin.path}/{*path}`: assets and client-routed subpaths
pub async fn fallback(
    State(state): State<AppState>,
    UrlPath(path): UrlPath<String>,
) -> Response {
    serve(&state, &path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_detection() {
        assert!(is_asset_path("assets/app.js"));
        assert!(is_asset_path("favicon.ico"));
        assert!(is_asset_path("deep/nested/style.css"));
        assert!(!is_asset_path("users"));
        assert!(!is_asset_path("users/42/edit"));
        assert!(!is_asset_path(""));
        // dotfiles are not assets
        assert!(!is_asset_path(".env"));
    }

    #[test]
    fn traversal_is_unresolvable() {
        let root = Path::new("/srv/admin");
        assert!(resolve_asset(root, "../etc/passwd").is_none());
        assert!(resolve_asset(root, "a/../../etc/passwd").is_none());
        assert_eq!(
            resolve_asset(root, "assets/app.js").unwrap(),
            PathBuf::from("/srv/admin/assets/app.js")
        );
        assert_eq!(
            resolve_asset(root, "/leading/slash.js").unwrap(),
            PathBuf::from("/srv/admin/leading/slash.js")
        );
    }

    #[tokio::test]
    async fn spa_routes_fall_back_assets_do_not() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>spa</html>").unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();

        // a real asset serves itself
        assert!(serve_file(&dir.path().join("app.js")).await.is_some());
        // a missing asset is simply missing
        assert!(serve_file(&dir.path().join("missing.js")).await.is_none());
        // index.html is there for the client-route fallback
        assert!(serve_file(&dir.path().join("index.html")).await.is_some());
    }
}
