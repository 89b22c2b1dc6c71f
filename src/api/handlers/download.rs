use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::response::{ApiError, AppQuery};
use crate::download::Disposition;
use crate::session::Caller;
use crate::tokens::redact;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    /// `inline` or `download` (default)
    #[serde(default)]
    pub mode: Option<String>,
}

/// Public download by sharing token.
/// Route: GET /d/:token
pub async fn download_shared(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    AppQuery(params): AppQuery<DownloadParams>,
) -> Result<Response, ApiError> {
    let disposition = Disposition::from_mode(params.mode.as_deref())?;
    let location = state.shares.resolve_share_token(&token)?;

    let download = state.downloads.open(&location, disposition).await?;
    tracing::info!(token = redact(&token), bucket = %location.bucket, object = %location.object, "Shared download");
    Ok(download.into_response())
}

/// Owner-only download by private file token.
/// Route: GET /d/private/:token
pub async fn download_private(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(token): Path<String>,
    AppQuery(params): AppQuery<DownloadParams>,
) -> Result<Response, ApiError> {
    let disposition = Disposition::from_mode(params.mode.as_deref())?;
    let location = state.shares.resolve_private_token(&caller.id, &token)?;

    let download = state.downloads.open(&location, disposition).await?;
    tracing::info!(user_id = %caller.id, object = %location.object, "Private download");
    Ok(download.into_response())
}
