use axum::extract::multipart::{Field, MultipartError};
use axum::extract::{Multipart, State};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::api::response::{ApiError, AppQuery, JSend, JSendPaginated, Pagination};
use crate::object_store::{validate_object_name, ByteStream, ObjectInfo, ObjectStoreError};
use crate::session::Caller;
use crate::storage::models::FileRecord;
use crate::storage::FileContent;
use crate::AppState;

/// Chunks buffered between the multipart reader and the object store
const UPLOAD_CHANNEL_DEPTH: usize = 8;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub checksum: String,
    pub content_type: String,
    pub created_at: String,
    pub name: String,
    pub private_token: String,
    pub size: u64,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct ListFilesParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
pub struct FileParams {
    pub file: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteFileResponse {
    pub file_deleted: String,
}

#[derive(Debug, Serialize)]
pub struct PrivateTokenResponse {
    pub file: String,
    pub private_link: String,
    pub private_token: String,
}

/// Why the multipart side of an upload stopped early
enum PumpError {
    TooLarge,
    Multipart(MultipartError),
    /// The store stopped reading; its own error explains why
    StoreClosed,
}

// ============================================================================
// Handlers
// ============================================================================

/// Stream the multipart `file` field into the caller's bucket, then record it.
/// Route: POST /files/upload
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    mut multipart: Multipart,
) -> Result<Json<JSend<FileResponse>>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::bad_request("invalid_multipart", format!("Invalid multipart data: {e}"))
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let name = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| ApiError::bad_request("missing_file_name", "file field has no file name"))?;
        validate_object_name(&name)?;

        // Multipart Content-Type, else a guess from the file name
        let content_type = field
            .content_type()
            .filter(|ct| *ct != "application/octet-stream")
            .map(|ct| ct.to_string())
            .or_else(|| mime_guess::from_path(&name).first().map(|m| m.to_string()))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let bucket = state.sessions.ensure_bucket(&caller).await?;
        let info = store_field(&state, field, &bucket, &name, &content_type).await?;

        let private_token = state.tokens.new_private_token(&caller.id)?;
        let file = state.db.upsert_file(
            &caller.id,
            &name,
            FileContent {
                checksum: &info.checksum,
                content_type: &info.content_type,
                size: info.size,
            },
            &private_token,
        )?;

        tracing::info!(user_id = %caller.id, bucket = %bucket, object = %name, size = info.size, "Uploaded file");
        return Ok(JSend::success(file_to_response(&file)));
    }

    Err(ApiError::bad_request("missing_file", "file field is required"))
}

/// Route: GET /files
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    AppQuery(params): AppQuery<ListFilesParams>,
) -> Result<Json<JSendPaginated<FileResponse>>, ApiError> {
    if params.limit == 0 {
        return Err(ApiError::bad_request(
            "invalid_query",
            "limit must be greater than 0",
        ));
    }

    let files = state.db.get_files_by_owner(&caller.id)?;
    let total = files.len() as u64;
    let items: Vec<FileResponse> = files
        .iter()
        .skip(params.offset as usize)
        .take(params.limit as usize)
        .map(file_to_response)
        .collect();

    Ok(JSendPaginated::success(
        items,
        Pagination {
            limit: params.limit,
            offset: params.offset,
            total,
        },
    ))
}

/// Route: GET /files/private_token?file=<name>
pub async fn get_private_token(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    AppQuery(params): AppQuery<FileParams>,
) -> Result<Json<JSend<PrivateTokenResponse>>, ApiError> {
    let file = state
        .db
        .get_file_by_owner_and_name(&caller.id, &params.file)?
        .ok_or_else(|| ApiError::not_found("file_does_not_exist", "File not found"))?;

    Ok(JSend::success(PrivateTokenResponse {
        private_link: format!(
            "{}/d/private/{}",
            state.config.node.public_url, file.private_token
        ),
        file: file.name,
        private_token: file.private_token,
    }))
}

/// Delete the object, then its metadata. An object delete failure is logged and the metadata
/// row is removed regardless.
/// Route: DELETE /files?file=<name>
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    AppQuery(params): AppQuery<FileParams>,
) -> Result<Json<JSend<DeleteFileResponse>>, ApiError> {
    if let Some(bucket) = state.db.get_user(&caller.id)?.and_then(|u| u.bucket) {
        if let Err(e) = state.object_store.delete_object(&bucket, &params.file).await {
            tracing::warn!(user_id = %caller.id, bucket = %bucket, object = %params.file, error = %e, "Failed to delete object");
        }
    }

    if !state.db.delete_file(&caller.id, &params.file)? {
        return Err(ApiError::not_found("file_does_not_exist", "File not found"));
    }

    tracing::debug!(user_id = %caller.id, object = %params.file, "Deleted file");
    Ok(JSend::success(DeleteFileResponse {
        file_deleted: params.file,
    }))
}

// ============================================================================
// Helpers
// ============================================================================

/// Pump the field into `put_object` through a bounded channel so neither side holds the whole
/// body. The size limit is enforced on the multipart side.
async fn store_field(
    state: &AppState,
    mut field: Field<'_>,
    bucket: &str,
    name: &str,
    content_type: &str,
) -> Result<ObjectInfo, ApiError> {
    let max = state.config.max_upload_size;
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(UPLOAD_CHANNEL_DEPTH);

    let body: ByteStream = Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }));

    let pump = async move {
        let mut total: u64 = 0;
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    total += chunk.len() as u64;
                    if total > max {
                        let _ = tx
                            .send(Err(io::Error::other("upload exceeds maximum size")))
                            .await;
                        return Err(PumpError::TooLarge);
                    }
                    if tx.send(Ok(chunk)).await.is_err() {
                        return Err(PumpError::StoreClosed);
                    }
                }
                Ok(None) => return Ok(total),
                Err(e) => {
                    let _ = tx.send(Err(io::Error::other(e.to_string()))).await;
                    return Err(PumpError::Multipart(e));
                }
            }
        }
    };

    let put = state
        .object_store
        .put_object(bucket, name, content_type, body);

    let (pumped, stored) = tokio::join!(pump, put);

    match pumped {
        Err(PumpError::TooLarge) => Err(ObjectStoreError::TooLarge(max).into()),
        Err(PumpError::Multipart(e)) => Err(ApiError::bad_request(
            "invalid_multipart",
            format!("Failed to read file: {e}"),
        )),
        Ok(_) | Err(PumpError::StoreClosed) => Ok(stored?),
    }
}

fn file_to_response(file: &FileRecord) -> FileResponse {
    FileResponse {
        checksum: file.checksum.clone(),
        content_type: file.content_type.clone(),
        created_at: file.created_at.to_rfc3339(),
        name: file.name.clone(),
        private_token: file.private_token.clone(),
        size: file.size,
        updated_at: file.updated_at.to_rfc3339(),
    }
}
