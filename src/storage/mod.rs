//! Filesystem object storage under `/api/storage/{bucket}`
//!
//! Buckets are directories beneath the configured root. Names are
//! validated so traversal cannot be expressed; signed download URLs are
//! HMAC-tagged with an expiry and verified without touching the DB.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::PathBuf;
use std::sync::Arc;

use crate::auth::Identity;
use crate::error::{Error, Result};
use crate::keystore::Keystore;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

static OBJECT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("object name regex"));

fn check_bucket(name: &str) -> Result<()> {
    crate::validate::identifier(name)
}

fn check_object(name: &str) -> Result<()> {
    if OBJECT_NAME.is_match(name) && !name.contains("..") {
        Ok(())
    } else {
        Err(Error::bad_request(format!("invalid object name: {name:?}")))
    }
}

/// Filesystem-backed storage service
#[derive(Clone)]
pub struct StorageService {
    root: PathBuf,
    keystore: Arc<Keystore>,
    max_file_size: u64,
    sign_ttl_secs: u64,
}

impl StorageService {
    /// Create the service
    pub fn new(
        root: impl Into<PathBuf>,
        keystore: Arc<Keystore>,
        max_file_size: u64,
        sign_ttl_secs: u64,
    ) -> Self {
        Self {
            root: root.into(),
            keystore,
            max_file_size,
            sign_ttl_secs,
        }
    }

    fn object_path(&self, bucket: &str, object: &str) -> Result<PathBuf> {
        check_bucket(bucket)?;
        check_object(object)?;
        Ok(self.root.join(bucket).join(object))
    }

    /// Store an object
    pub async fn put(&self, bucket: &str, object: &str, data: &[u8]) -> Result<()> {
        if data.len() as u64 > self.max_file_size {
            return Err(Error::bad_request(format!(
                "object exceeds the {} byte limit",
                self.max_file_size
            )));
        }
        let path = self.object_path(bucket, object)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::internal(format!("bucket create failed: {e}")))?;
        }
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| Error::internal(format!("object write failed: {e}")))?;
        Ok(())
    }

    /// Read an object
    pub async fn get(&self, bucket: &str, object: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, object)?;
        tokio::fs::read(&path)
            .await
            .map_err(|_| Error::NotFound("object not found".into()))
    }

    /// Delete an object
    pub async fn delete(&self, bucket: &str, object: &str) -> Result<()> {
        let path = self.object_path(bucket, object)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|_| Error::NotFound("object not found".into()))
    }

    /// List a bucket's objects
    pub async fn list(&self, bucket: &str) -> Result<Vec<String>> {
        check_bucket(bucket)?;
        let dir = self.root.join(bucket);
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(names), // absent bucket lists empty
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn signature(&self, bucket: &str, object: &str, expires: i64) -> String {
        let secret = self.keystore.jwt_secret();
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key length");
        mac.update(format!("{bucket}/{object}:{expires}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Mint a signed download token: `(expires, signature)`
    pub fn sign(&self, bucket: &str, object: &str) -> (i64, String) {
        let expires = Utc::now().timestamp() + self.sign_ttl_secs as i64;
        let signature = self.signature(bucket, object, expires);
        (expires, signature)
    }

    /// Verify a signed download token
    pub fn verify(&self, bucket: &str, object: &str, expires: i64, signature: &str) -> bool {
        if expires < Utc::now().timestamp() {
            return false;
        }
        let expected = self.signature(bucket, object, expires);
        crate::keystore::constant_time_eq(&expected, signature)
    }
}

fn service(state: &AppState) -> Result<&StorageService> {
    state
        .storage
        .as_ref()
        .ok_or_else(|| Error::ServiceUnavailable("storage disabled".into()))
}

/// The whole group runs behind `optional_auth`; everything except signed
/// serving insists on a credential here.
fn require_identity(identity: Option<Extension<Identity>>) -> Result<Identity> {
    identity
        .map(|Extension(identity)| identity)
        .ok_or_else(|| Error::Unauthorized("missing bearer token".into()))
}

/// `POST /api/storage/{bucket}/{object}`
pub async fn upload(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    Path((bucket, object)): Path<(String, String)>,
    body: Bytes,
) -> Result<StatusCode> {
    let identity = require_identity(identity)?;
    if !identity.can_write() {
        return Err(Error::Forbidden("credential scope is read-only".into()));
    }
    service(&state)?.put(&bucket, &object, &body).await?;
    Ok(StatusCode::CREATED)
}

#[derive(Debug, Serialize)]
pub struct ObjectList {
    items: Vec<String>,
}

/// `GET /api/storage/{bucket}`
pub async fn list(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    Path(bucket): Path<String>,
) -> Result<Json<ObjectList>> {
    require_identity(identity)?;
    Ok(Json(ObjectList {
        items: service(&state)?.list(&bucket).await?,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ServeParams {
    #[serde(default)]
    expires: Option<i64>,
    #[serde(default)]
    signature: Option<String>,
}

/// `GET /api/storage/{bucket}/{object}`
///
/// Served to any authenticated caller; a valid signature substitutes for
/// credentials so signed URLs work from plain browsers.
pub async fn serve(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    Path((bucket, object)): Path<(String, String)>,
    Query(params): Query<ServeParams>,
) -> Result<Response> {
    let storage = service(&state)?;

    let signed_ok = match (params.expires, params.signature.as_deref()) {
        (Some(expires), Some(signature)) => storage.verify(&bucket, &object, expires, signature),
        _ => false,
    };
    if identity.is_none() && !signed_ok {
        return Err(Error::Unauthorized("missing bearer token or signature".into()));
    }

    let data = storage.get(&bucket, &object).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        data,
    )
        .into_response())
}

/// `DELETE /api/storage/{bucket}/{object}`
pub async fn delete(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    Path((bucket, object)): Path<(String, String)>,
) -> Result<StatusCode> {
    let identity = require_identity(identity)?;
    if !identity.can_write() {
        return Err(Error::Forbidden("credential scope is read-only".into()));
    }
    service(&state)?.delete(&bucket, &object).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    url: String,
    expires: i64,
}

/// `POST /api/storage/{bucket}/{object}/sign`
pub async fn sign(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    Path((bucket, object)): Path<(String, String)>,
) -> Result<Json<SignedUrl>> {
    require_identity(identity)?;
    let storage = service(&state)?;
    check_bucket(&bucket)?;
    check_object(&object)?;
    let (expires, signature) = storage.sign(&bucket, &object);
    Ok(Json(SignedUrl {
        url: format!(
            "/api/storage/{bucket}/{object}?expires={expires}&signature={signature}"
        ),
        expires,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_service(dir: &std::path::Path) -> StorageService {
        StorageService::new(
            dir,
            Arc::new(Keystore::new(Some("sign-secret".into()), false)),
            1024,
            300,
        )
    }

    #[test]
    fn object_names() {
        assert!(check_object("report.pdf").is_ok());
        assert!(check_object("photo-2.jpg").is_ok());
        assert!(check_object("../escape").is_err());
        assert!(check_object(".hidden").is_err());
        assert!(check_object("a/b").is_err());
        assert!(check_object("").is_err());
    }

    #[tokio::test]
    async fn put_get_list_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = make_service(dir.path());

        storage.put("uploads", "a.txt", b"hello").await.unwrap();
        storage.put("uploads", "b.txt", b"world").await.unwrap();

        assert_eq!(storage.get("uploads", "a.txt").await.unwrap(), b"hello");
        assert_eq!(
            storage.list("uploads").await.unwrap(),
            vec!["a.txt".to_string(), "b.txt".to_string()]
        );

        storage.delete("uploads", "a.txt").await.unwrap();
        assert!(storage.get("uploads", "a.txt").await.is_err());
        assert_eq!(storage.list("uploads").await.unwrap(), vec!["b.txt".to_string()]);
    }

    #[tokio::test]
    async fn size_limit_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let storage = make_service(dir.path());
        let big = vec![0u8; 2048];
        assert!(storage.put("uploads", "big.bin", &big).await.is_err());
    }

    #[test]
    fn signatures_verify_and_expire() {
        let dir = tempfile::tempdir().unwrap();
        let storage = make_service(dir.path());

        let (expires, signature) = storage.sign("uploads", "a.txt");
        assert!(storage.verify("uploads", "a.txt", expires, &signature));
        // wrong object
        assert!(!storage.verify("uploads", "b.txt", expires, &signature));
        // tampered expiry
        assert!(!storage.verify("uploads", "a.txt", expires + 1, &signature));
        // already expired
        let stale = Utc::now().timestamp() - 10;
        let stale_sig = storage.signature("uploads", "a.txt", stale);
        assert!(!storage.verify("uploads", "a.txt", stale, &stale_sig));
    }
}
