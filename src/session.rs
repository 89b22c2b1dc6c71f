//! Session start: user provisioning and opportunistic reconciliation.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::object_store::{bucket_name, BucketCreation, ObjectStore, ObjectStoreError};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::storage::models::UserRecord;
use crate::storage::{Database, DatabaseError};
use crate::tokens::TokenIssuer;

/// The authenticated caller, verified upstream and passed explicitly to every operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),
    #[error("User {0} disappeared during session start")]
    UserVanished(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub user: UserRecord,
    pub bucket: String,
    pub bucket_created: bool,
    /// `None` when reconciliation failed; the failure is logged
    pub reconciliation: Option<ReconcileReport>,
}

#[derive(Clone)]
pub struct Sessions {
    db: Database,
    store: Arc<dyn ObjectStore>,
    tokens: TokenIssuer,
    bucket_base_name: String,
}

impl Sessions {
    pub fn new(
        db: Database,
        store: Arc<dyn ObjectStore>,
        tokens: TokenIssuer,
        bucket_base_name: &str,
    ) -> Self {
        Self {
            db,
            store,
            tokens,
            bucket_base_name: bucket_base_name.to_string(),
        }
    }

    /// Record the user and make sure their bucket name is assigned. Returns the bucket name.
    pub fn ensure_user(&self, caller: &Caller) -> Result<(UserRecord, String), SessionError> {
        let user = self
            .db
            .upsert_user(&caller.id, &caller.email, caller.name.as_deref())?;
        let bucket = match user.bucket {
            Some(ref bucket) => bucket.clone(),
            None => self
                .db
                .assign_bucket(&caller.id, &bucket_name(&self.bucket_base_name, &caller.id))?
                .ok_or_else(|| SessionError::UserVanished(caller.id.clone()))?,
        };
        Ok((user, bucket))
    }

    /// Bucket for the caller. On first use the name is assigned.
    ///
    /// The bucket is created whenever it is missing, so a name assigned by a session start whose
    /// bucket creation failed heals on the next call.
    pub async fn ensure_bucket(&self, caller: &Caller) -> Result<String, SessionError> {
        let bucket = match self.db.get_user(&caller.id)?.and_then(|u| u.bucket) {
            Some(bucket) => bucket,
            None => self.ensure_user(caller)?.1,
        };
        if self.store.create_bucket_if_absent(&bucket).await? == BucketCreation::Created {
            tracing::info!(user_id = %caller.id, bucket = %bucket, "Created bucket");
        }
        Ok(bucket)
    }

    /// Called once per login: provision the user and bucket, then reconcile.
    ///
    /// Provisioning errors are returned. Reconciliation runs inline but its failure never fails
    /// the session.
    pub async fn start(&self, caller: &Caller) -> Result<SessionInfo, SessionError> {
        let (user, bucket) = self.ensure_user(caller)?;

        // Two first logins may race here; create-if-absent tolerates the loser
        let creation = self.store.create_bucket_if_absent(&bucket).await?;
        if creation == BucketCreation::Created {
            tracing::info!(user_id = %caller.id, bucket = %bucket, "Created bucket");
        }

        let reconciler = Reconciler::new(self.db.clone(), self.store.clone(), self.tokens.clone());
        let reconciliation = match reconciler.reconcile(&caller.id, &bucket).await {
            Ok(report) => {
                if report.inserted > 0 || report.failed > 0 {
                    tracing::info!(
                        user_id = %caller.id,
                        bucket = %bucket,
                        inserted = report.inserted,
                        failed = report.failed,
                        "Reconciled bucket"
                    );
                }
                Some(report)
            }
            Err(e) => {
                tracing::error!(user_id = %caller.id, bucket = %bucket, "Reconciliation failed: {e}");
                None
            }
        };

        Ok(SessionInfo {
            user: UserRecord {
                bucket: Some(bucket.clone()),
                ..user
            },
            bucket,
            bucket_created: creation == BucketCreation::Created,
            reconciliation,
        })
    }
}
