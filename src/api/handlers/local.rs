use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use crate::api::response::{ApiError, AppQuery};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedParams {
    pub expires: i64,
    pub signature: String,
}

/// Serve an object of the local storage backend through its signed URL.
/// Route: GET /_local/:bucket/:object
pub async fn serve_local_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, object)): Path<(String, String)>,
    AppQuery(params): AppQuery<SignedParams>,
) -> Result<Response, ApiError> {
    let store = state
        .local_store
        .as_ref()
        .ok_or_else(|| ApiError::not_found("not_found", "Not found"))?;

    if !store.verify_signature(&bucket, &object, params.expires, &params.signature, Utc::now()) {
        return Err(ApiError::forbidden(
            "invalid_signature",
            "Signature is invalid or expired",
        ));
    }

    let (file, len) = store.open_object(&bucket, &object).await?;

    let mut response = (StatusCode::OK, Body::from_stream(ReaderStream::new(file))).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        mime_guess::from_path(&object)
            .first_or_octet_stream()
            .as_ref()
            .parse()
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("private, no-store"));

    Ok(response)
}
