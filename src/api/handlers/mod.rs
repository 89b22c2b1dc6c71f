mod admin;
mod download;
mod files;
mod local;
mod sharing;
mod user;

pub use admin::health;
pub use download::{download_private, download_shared};
pub use files::{delete_file, get_private_token, list_files, upload_file};
pub use local::serve_local_object;
pub use sharing::{list_received, list_shared_by_user, share_files};
pub use user::{delete_user, get_bucket, get_user, start_session};

use crate::api::response::ApiError;
use crate::download::DownloadError;
use crate::object_store::ObjectStoreError;
use crate::session::SessionError;
use crate::sharing::ShareError;
use crate::storage::DatabaseError;
use crate::tokens::TokenError;

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        tracing::error!(error = %e, "Metadata store error");
        ApiError::internal("database_error")
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        tracing::error!(error = %e, "Token generation failed");
        ApiError::internal("token_generation_failed")
    }
}

impl From<ObjectStoreError> for ApiError {
    fn from(e: ObjectStoreError) -> Self {
        match e {
            ObjectStoreError::NotFound(_) => {
                ApiError::not_found("object_not_found", "Object not found in storage")
            }
            ObjectStoreError::InvalidName(name) => {
                ApiError::bad_request("invalid_file_name", format!("Invalid file name: {name:?}"))
            }
            ObjectStoreError::TooLarge(max) => ApiError::payload_too_large(format!(
                "File exceeds maximum upload size of {max} bytes"
            )),
            e => {
                tracing::error!(error = %e, "Object store error");
                ApiError::bad_gateway("object_store_error")
            }
        }
    }
}

impl From<ShareError> for ApiError {
    fn from(e: ShareError) -> Self {
        match e {
            ShareError::Validation(message) => ApiError::bad_request("validation_error", message),
            ShareError::InvalidDuration(e) => {
                ApiError::bad_request("invalid_duration", e.to_string())
            }
            ShareError::NotFound => {
                ApiError::not_found("token_does_not_exist", "No file matches this token")
            }
            ShareError::Expired(_) => ApiError::forbidden("token_expired", "This link has expired"),
            ShareError::Forbidden => {
                ApiError::forbidden("access_denied", "Only the owner can use this token")
            }
            ShareError::Database(e) => e.into(),
            ShareError::Token(e) => e.into(),
        }
    }
}

impl From<DownloadError> for ApiError {
    fn from(e: DownloadError) -> Self {
        match e {
            DownloadError::InvalidMode(mode) => ApiError::bad_request(
                "invalid_download_mode",
                format!("mode must be 'inline' or 'download', got {mode:?}"),
            ),
            e @ DownloadError::Signing { .. } => {
                tracing::error!(error = %e, "Cannot sign download URL");
                ApiError::internal("signed_url_error")
            }
            e @ (DownloadError::Fetch { .. } | DownloadError::UpstreamStatus { .. }) => {
                tracing::error!(error = %e, "Upstream fetch failed");
                ApiError::bad_gateway("signed_url_fetch_failed")
            }
            e @ DownloadError::Stream(_) => {
                tracing::error!(error = %e, "Download stream failed");
                ApiError::internal("streaming_error")
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Database(e) => e.into(),
            SessionError::ObjectStore(e) => e.into(),
            e @ SessionError::UserVanished(_) => {
                tracing::error!(error = %e, "Session start failed");
                ApiError::internal("session_start_failed")
            }
        }
    }
}
