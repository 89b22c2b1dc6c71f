use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user, created on first successful login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Opaque identity provider id
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Assigned lazily on first upload or first bucket lookup
    #[serde(default)]
    pub bucket: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A file stored in its owner's bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub owner_id: String,
    /// Object name; unique per owner
    pub name: String,
    pub content_type: String,
    pub size: u64,
    pub checksum: String,
    /// Persistent owner-only download token; unique across the system
    pub private_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A time-bounded grant of one file to one recipient. Never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub token: String,
    pub file_id: String,
    pub shared_by: String,
    pub shared_for: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ShareRecord {
    /// A share is usable strictly before its expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Where the bytes of a file live in the object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub object: String,
}

/// Result of a private token lookup, prior to the ownership check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateObject {
    pub location: ObjectLocation,
    pub owner_id: String,
}

/// A share joined with the file it grants, for inbound/outbound listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SharedFile {
    pub checksum: String,
    pub content_type: String,
    pub expires_at: DateTime<Utc>,
    pub file_id: String,
    pub file_name: String,
    pub owner_id: String,
    pub shared_by: String,
    pub shared_for: String,
    pub sharing_token: String,
    pub size: u64,
}

impl SharedFile {
    pub fn new(share: &ShareRecord, file: &FileRecord) -> Self {
        Self {
            checksum: file.checksum.clone(),
            content_type: file.content_type.clone(),
            expires_at: share.expires_at,
            file_id: file.id.clone(),
            file_name: file.name.clone(),
            owner_id: file.owner_id.clone(),
            shared_by: share.shared_by.clone(),
            shared_for: share.shared_for.clone(),
            sharing_token: share.token.clone(),
            size: file.size,
        }
    }
}

/// Normalized form used for email comparisons and index keys.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
