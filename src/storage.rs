//! Object-storage client for photo attachments.
//!
//! Photos never enter the database; they are uploaded to a publicly
//! readable bucket and referenced from records by URI. Uploads are
//! synchronous and sequential, and a batch stops at the first failure;
//! the error names the failed file and carries the URIs that already
//! succeeded so the caller can still commit them (uploaded objects are
//! never rolled back).

use std::path::Path;

use chrono::{NaiveDate, Utc};
use reqwest::StatusCode;
use serde_json::json;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::{AppError, AppResult};

pub const STORAGE_UPLOAD_FAILED: &str = "STORAGE/UPLOAD_FAILED";
pub const STORAGE_BUCKET_FAILED: &str = "STORAGE/BUCKET_FAILED";

#[derive(Debug, Clone)]
pub struct UploadFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A failed batch: everything uploaded before `failed_file` is still in
/// the bucket and listed in `uploaded`, in input order.
#[derive(Debug, thiserror::Error)]
#[error("upload failed for {failed_file} ({} uploaded before the failure)", .uploaded.len())]
pub struct BatchUploadError {
    pub failed_file: String,
    pub uploaded: Vec<String>,
    #[source]
    pub cause: AppError,
}

impl From<BatchUploadError> for AppError {
    fn from(err: BatchUploadError) -> Self {
        AppError::new(
            STORAGE_UPLOAD_FAILED,
            format!("Upload failed for {}", err.failed_file),
        )
        .with_context("file", err.failed_file)
        .with_context("uploaded_before_failure", err.uploaded.len().to_string())
        .with_cause(err.cause)
    }
}

/// On record update the stored references are preserved, never
/// re-uploaded; new ones are appended. No deduplication, no reordering.
pub fn merge_photo_references(existing: &[String], new: &[String]) -> Vec<String> {
    let mut merged = Vec::with_capacity(existing.len() + new.len());
    merged.extend_from_slice(existing);
    merged.extend_from_slice(new);
    merged
}

#[derive(Debug, Clone)]
pub struct StorageClient {
    http: reqwest::Client,
    endpoint: String,
    bucket: String,
    api_key: String,
}

impl StorageClient {
    pub fn new(cfg: &StorageConfig) -> Self {
        StorageClient {
            http: reqwest::Client::new(),
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            bucket: cfg.bucket.clone(),
            api_key: cfg.api_key.clone(),
        }
    }

    /// Provision the bucket as publicly readable. Idempotent: a bucket
    /// that already exists reports a conflict, which is success here.
    pub async fn ensure_bucket(&self) -> AppResult<()> {
        let response = self
            .http
            .post(format!("{}/storage/v1/bucket", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&json!({ "name": self.bucket, "public": true }))
            .send()
            .await
            .map_err(|e| AppError::from(e).with_context("operation", "ensure_bucket"))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            tracing::debug!(
                target: "pdireg",
                event = "bucket_ready",
                bucket = %self.bucket,
                created = status.is_success()
            );
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(
            AppError::new(STORAGE_BUCKET_FAILED, "Could not provision the photo bucket")
                .with_context("bucket", self.bucket.clone())
                .with_context("status", status.as_u16().to_string())
                .with_context("body", body),
        )
    }

    /// Upload each file in order and return its public URI, preserving
    /// input order. Stops at the first failure.
    pub async fn upload(&self, files: &[UploadFile]) -> Result<Vec<String>, BatchUploadError> {
        let today = Utc::now().date_naive();
        let mut uploaded = Vec::with_capacity(files.len());

        for file in files {
            let key = object_key(&file.name, today);
            match self.upload_one(file, &key).await {
                Ok(()) => {
                    tracing::info!(
                        target: "pdireg",
                        event = "photo_uploaded",
                        file = %file.name,
                        key = %key
                    );
                    uploaded.push(self.public_url(&key));
                }
                Err(cause) => {
                    tracing::warn!(
                        target: "pdireg",
                        event = "photo_upload_failed",
                        file = %file.name,
                        error = %cause
                    );
                    return Err(BatchUploadError {
                        failed_file: file.name.clone(),
                        uploaded,
                        cause,
                    });
                }
            }
        }

        Ok(uploaded)
    }

    async fn upload_one(&self, file: &UploadFile, key: &str) -> AppResult<()> {
        let response = self
            .http
            .post(format!(
                "{}/storage/v1/object/{}/{}",
                self.endpoint, self.bucket, key
            ))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, file.content_type.as_str())
            .body(file.bytes.clone())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(AppError::new(STORAGE_UPLOAD_FAILED, "Object store rejected the upload")
            .with_context("status", status.as_u16().to_string())
            .with_context("body", body))
    }

    pub fn public_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.endpoint, self.bucket, key
        )
    }
}

/// Storage keys are namespaced by upload date and unique by a random
/// 128-bit identifier; the original filename only contributes its
/// extension.
fn object_key(file_name: &str, date: NaiveDate) -> String {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();
    format!("{}/{}{}", date.format("%Y-%m-%d"), Uuid::new_v4().simple(), ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_existing_first_and_appends_in_order() {
        let existing = vec!["u0".to_string()];
        let new = vec!["u1".to_string(), "u2".to_string()];
        assert_eq!(
            merge_photo_references(&existing, &new),
            vec!["u0".to_string(), "u1".to_string(), "u2".to_string()]
        );
        // No deduplication.
        assert_eq!(merge_photo_references(&existing, &existing).len(), 2);
    }

    #[test]
    fn object_keys_are_date_namespaced_and_unique() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        let a = object_key("front-door.JPG", date);
        let b = object_key("front-door.JPG", date);
        assert!(a.starts_with("2025-03-09/"));
        assert!(a.ends_with(".jpg"));
        assert_ne!(a, b);
        // 32 hex chars between the date prefix and the extension.
        assert_eq!(a.len(), "2025-03-09/".len() + 32 + ".jpg".len());
    }

    #[test]
    fn object_key_without_extension_is_bare() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        let key = object_key("photo", date);
        assert_eq!(key.len(), "2025-03-09/".len() + 32);
    }

    #[test]
    fn public_url_addresses_the_public_object_route() {
        let client = StorageClient::new(&StorageConfig {
            endpoint: "https://project.supabase.co/".into(),
            api_key: "key".into(),
            bucket: "pdi-photos".into(),
        });
        assert_eq!(
            client.public_url("2025-03-09/abc.jpg"),
            "https://project.supabase.co/storage/v1/object/public/pdi-photos/2025-03-09/abc.jpg"
        );
    }

    #[test]
    fn batch_error_converts_with_file_and_partial_count() {
        let err = BatchUploadError {
            failed_file: "b.jpg".into(),
            uploaded: vec!["u0".into()],
            cause: AppError::new("HTTP/STATUS", "500"),
        };
        let app: AppError = err.into();
        assert_eq!(app.code(), STORAGE_UPLOAD_FAILED);
        assert_eq!(app.context().get("file"), Some(&"b.jpg".to_string()));
        assert_eq!(
            app.context().get("uploaded_before_failure"),
            Some(&"1".to_string())
        );
        assert!(app.cause().is_some());
    }
}
