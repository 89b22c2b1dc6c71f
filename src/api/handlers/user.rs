use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::response::{ApiError, AppJson, JSend};
use crate::object_store::BucketSnapshot;
use crate::session::{Caller, SessionInfo};
use crate::storage::models::UserRecord;
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DeleteUserRequest {
    #[serde(default)]
    pub delete_user_data: bool,
}

#[derive(Debug, Serialize)]
pub struct DeletedAccount {
    pub email: String,
    pub id: String,
    pub user_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeletedBucket {
    pub deleted: bool,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeleteUserResponse {
    pub account_deleted: DeletedAccount,
    pub bucket: DeletedBucket,
}

// ============================================================================
// Handlers
// ============================================================================

/// Called by the login flow once per authenticated session.
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<JSend<SessionInfo>>, ApiError> {
    let info = state.sessions.start(&caller).await?;
    tracing::debug!(user_id = %caller.id, bucket = %info.bucket, "Session started");
    Ok(JSend::success(info))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<JSend<UserRecord>>, ApiError> {
    let user = state
        .db
        .get_user(&caller.id)?
        .ok_or_else(|| ApiError::not_found("user_not_found", "User not found"))?;

    Ok(JSend::success(user))
}

/// Live listing of the caller's bucket
pub async fn get_bucket(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<JSend<BucketSnapshot>>, ApiError> {
    let bucket = state.sessions.ensure_bucket(&caller).await?;
    let snapshot = state.object_store.list_objects(&bucket).await?;
    Ok(JSend::success(snapshot))
}

/// Delete the caller's account and metadata. With `delete_user_data` the bucket and its objects
/// are deleted first; a bucket deletion failure is reported but does not keep the account.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    AppJson(req): AppJson<DeleteUserRequest>,
) -> Result<Json<JSend<DeleteUserResponse>>, ApiError> {
    let user = state
        .db
        .get_user(&caller.id)?
        .ok_or_else(|| ApiError::not_found("user_not_found", "User not found"))?;

    let mut bucket_deleted = false;
    if req.delete_user_data {
        if let Some(ref bucket) = user.bucket {
            match state.object_store.delete_bucket(bucket).await {
                Ok(()) => bucket_deleted = true,
                Err(e) => {
                    tracing::error!(user_id = %caller.id, bucket = %bucket, error = %e, "Failed to delete bucket");
                }
            }
        }
    }

    let deleted = state
        .db
        .delete_user(&caller.id)?
        .ok_or_else(|| ApiError::not_found("user_not_found", "User not found"))?;

    tracing::info!(user_id = %caller.id, bucket_deleted, "Deleted account");

    Ok(JSend::success(DeleteUserResponse {
        account_deleted: DeletedAccount {
            email: deleted.email,
            id: deleted.id,
            user_name: deleted.display_name,
        },
        bucket: DeletedBucket {
            deleted: bucket_deleted,
            name: user.bucket,
        },
    }))
}
