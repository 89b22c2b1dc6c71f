mod gcs;
mod local;
mod s3;
mod sigv4;

pub use gcs::GcsStore;
pub use local::LocalStore;
pub use s3::S3Store;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use std::collections::BTreeMap;
use std::pin::Pin;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Invalid object name: {0}")]
    InvalidName(String),
    #[error("Signed URLs unavailable: {0}")]
    SigningUnavailable(String),
    #[error("Object exceeds maximum size of {0} bytes")]
    TooLarge(u64),
}

impl From<reqwest::Error> for ObjectStoreError {
    fn from(e: reqwest::Error) -> Self {
        ObjectStoreError::Backend(e.to_string())
    }
}

/// Body of an object write. Chunks are pulled as the backend consumes them.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + 'static>>;

/// Attributes of one stored object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectInfo {
    pub name: String,
    pub content_type: String,
    pub checksum: String,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

/// Live listing of a bucket. Never persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BucketSnapshot {
    pub name: String,
    pub storage_class: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub labels: BTreeMap<String, String>,
    pub objects: Vec<ObjectInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketCreation {
    Created,
    AlreadyExists,
}

/// Abstraction over object storage backends.
/// Each user owns one bucket; object names are the user's file names.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the bucket. A bucket that already exists (including one created by a racing
    /// request) is reported as `AlreadyExists`, not as an error.
    async fn create_bucket_if_absent(&self, bucket: &str)
        -> Result<BucketCreation, ObjectStoreError>;

    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        content_type: &str,
        body: ByteStream,
    ) -> Result<ObjectInfo, ObjectStoreError>;

    /// Delete one object. Deleting an absent object succeeds.
    async fn delete_object(&self, bucket: &str, name: &str) -> Result<(), ObjectStoreError>;

    async fn list_objects(&self, bucket: &str) -> Result<BucketSnapshot, ObjectStoreError>;

    /// A URL granting unauthenticated GET access to the object until `expires_at`.
    async fn signed_url(
        &self,
        bucket: &str,
        name: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<reqwest::Url, ObjectStoreError>;

    /// Delete the bucket together with any remaining objects.
    async fn delete_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError>;
}

/// Deterministic bucket name for a user: `<base>-<user id>`, lowercased, with every character
/// outside `[a-z0-9-]` replaced by `-`.
pub fn bucket_name(base: &str, user_id: &str) -> String {
    format!("{base}-{user_id}")
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Reject object names that could escape a bucket or break URL paths.
pub fn validate_object_name(name: &str) -> Result<(), ObjectStoreError> {
    let invalid = name.is_empty()
        || name == "."
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.chars().any(|c| c.is_control());

    if invalid {
        return Err(ObjectStoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_name_is_sanitized() {
        assert_eq!(bucket_name("fileshare", "1234"), "fileshare-1234");
        assert_eq!(
            bucket_name("fileshare", "Google|10_9.x"),
            "fileshare-google-10-9-x"
        );
    }

    #[test]
    fn object_names_are_validated() {
        assert!(validate_object_name("report.pdf").is_ok());
        assert!(validate_object_name("with spaces (1).txt").is_ok());

        for bad in ["", ".", "a/b", "..", "a..b", "dir\\file", "tab\tname"] {
            assert!(
                matches!(
                    validate_object_name(bad),
                    Err(ObjectStoreError::InvalidName(_))
                ),
                "accepted {bad:?}"
            );
        }
    }
}
