use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::api::response::{ApiError, AppJson, JSend};
use crate::session::Caller;
use crate::sharing::{ShareBatch, ShareRequest};
use crate::storage::models::SharedFile;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ShareFilesRequest {
    /// Recipient email
    pub email: String,
    /// File names owned by the caller
    pub objects: Vec<String>,
    pub duration: String,
    #[serde(default)]
    pub send_email: bool,
}

pub async fn share_files(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    AppJson(req): AppJson<ShareFilesRequest>,
) -> Result<Json<JSend<ShareBatch>>, ApiError> {
    let batch = state
        .shares
        .create_share(
            &caller,
            &ShareRequest {
                recipient: req.email,
                file_names: req.objects,
                duration: req.duration,
                notify: req.send_email,
            },
        )
        .await?;

    Ok(JSend::success(batch))
}

/// Unexpired shares addressed to the caller
pub async fn list_received(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<JSend<Vec<SharedFile>>>, ApiError> {
    Ok(JSend::success(state.shares.list_received(&caller, Utc::now())?))
}

/// Unexpired shares created by the caller
pub async fn list_shared_by_user(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<JSend<Vec<SharedFile>>>, ApiError> {
    Ok(JSend::success(state.shares.list_sent(&caller, Utc::now())?))
}
