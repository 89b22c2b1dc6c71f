//! Heals drift between a user's bucket and the metadata store.
//!
//! Objects can appear in a bucket without a metadata row (written out-of-band, or left behind
//! by an upload whose metadata insert failed). Each pass inserts one row per such object.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

use crate::object_store::{ObjectInfo, ObjectStore, ObjectStoreError};
use crate::storage::models::FileRecord;
use crate::storage::{Database, DatabaseError};
use crate::tokens::{TokenError, TokenIssuer};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Listing bucket failed: {0}")]
    Listing(#[from] ObjectStoreError),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Objects found in the bucket
    pub objects: usize,
    /// Metadata rows inserted by this pass
    pub inserted: usize,
    /// Rows written concurrently by another writer between listing and insert
    pub raced: usize,
    /// Missing objects that could not be recorded
    pub failed: usize,
}

pub struct Reconciler {
    db: Database,
    store: Arc<dyn ObjectStore>,
    tokens: TokenIssuer,
}

impl Reconciler {
    pub fn new(db: Database, store: Arc<dyn ObjectStore>, tokens: TokenIssuer) -> Self {
        Self { db, store, tokens }
    }

    /// Insert a metadata row for every object in `bucket` that `owner_id` has no row for.
    ///
    /// A listing failure aborts the pass before anything is written. Individual insert failures
    /// are logged and counted, and never stop the remaining inserts.
    pub async fn reconcile(
        &self,
        owner_id: &str,
        bucket: &str,
    ) -> Result<ReconcileReport, ReconcileError> {
        let recorded = self.db.get_files_by_owner(owner_id)?;
        let snapshot = self.store.list_objects(bucket).await?;

        let known: HashSet<(&str, &str)> = recorded
            .iter()
            .map(|f| (f.owner_id.as_str(), f.name.as_str()))
            .collect();

        let mut report = ReconcileReport {
            objects: snapshot.objects.len(),
            ..Default::default()
        };

        let missing: Vec<&ObjectInfo> = snapshot
            .objects
            .iter()
            .filter(|o| !known.contains(&(owner_id, o.name.as_str())))
            .collect();

        for object in missing {
            let record = match self.file_from_object(owner_id, object) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(user_id = %owner_id, bucket, object = %object.name, "Cannot record object: {e}");
                    report.failed += 1;
                    continue;
                }
            };

            match self.db.insert_file(&record) {
                Ok(()) => {
                    tracing::info!(user_id = %owner_id, bucket, object = %object.name, "Recorded untracked object");
                    report.inserted += 1;
                }
                // Another writer recorded the same (owner, name) first; the file exists either way
                Err(e) if e.is_conflict() => {
                    tracing::debug!(user_id = %owner_id, object = %object.name, "Object recorded concurrently");
                    report.raced += 1;
                }
                Err(e) => {
                    tracing::error!(user_id = %owner_id, bucket, object = %object.name, "Failed to record object: {e}");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    fn file_from_object(
        &self,
        owner_id: &str,
        object: &ObjectInfo,
    ) -> Result<FileRecord, TokenError> {
        // Any name the store lists is recorded as-is, including prefixed names like `docs/a.pdf`
        let now = chrono::Utc::now();

        Ok(FileRecord {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name: object.name.clone(),
            content_type: object.content_type.clone(),
            size: object.size,
            checksum: object.checksum.clone(),
            private_token: self.tokens.new_private_token(owner_id)?,
            created_at: object.created.unwrap_or(now),
            updated_at: object.updated.unwrap_or(now),
        })
    }
}
