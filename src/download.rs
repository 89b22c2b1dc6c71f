//! Download proxy: signs a short-lived URL for a resolved object and streams the upstream body
//! to the client without buffering it.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{Duration, Utc};
use futures::TryStreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio_util::io::StreamReader;

use crate::object_store::{ObjectStore, ObjectStoreError};
use crate::storage::models::ObjectLocation;

/// Validity of the intermediate signed URL, in seconds. Covers the proxy's own fetch only.
pub const SIGNED_URL_TTL_SECS: i64 = 60;

/// Upstream headers forwarded to the client
const FORWARDED_HEADERS: [header::HeaderName; 6] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::CONTENT_ENCODING,
    header::ETAG,
    header::LAST_MODIFIED,
    header::CACHE_CONTROL,
];

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Invalid download mode: {0}")]
    InvalidMode(String),
    #[error("Signing URL for {object} failed: {source}")]
    Signing {
        object: String,
        source: ObjectStoreError,
    },
    #[error("Fetching {object} failed: {source}")]
    Fetch {
        object: String,
        source: reqwest::Error,
    },
    #[error("Fetching {object} returned {status}")]
    UpstreamStatus { object: String, status: StatusCode },
    #[error("Streaming failed: {0}")]
    Stream(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Disposition {
    #[default]
    Attachment,
    Inline,
}

impl Disposition {
    /// `inline` or `download`; absent or empty means download.
    pub fn from_mode(mode: Option<&str>) -> Result<Self, DownloadError> {
        match mode {
            None | Some("") | Some("download") => Ok(Disposition::Attachment),
            Some("inline") => Ok(Disposition::Inline),
            Some(other) => Err(DownloadError::InvalidMode(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Attachment => "attachment",
            Disposition::Inline => "inline",
        }
    }
}

/// `attachment; filename="<name>"` with quotes and backslashes escaped
pub fn content_disposition(disposition: Disposition, file_name: &str) -> String {
    let mut quoted = String::with_capacity(file_name.len());
    for c in file_name.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    format!("{}; filename=\"{quoted}\"", disposition.as_str())
}

#[derive(Clone)]
pub struct DownloadProxy {
    client: reqwest::Client,
    store: Arc<dyn ObjectStore>,
}

/// An upstream response whose headers are ready and whose body has not been read yet
#[derive(Debug)]
pub struct Download {
    pub headers: HeaderMap,
    object: String,
    response: reqwest::Response,
}

impl DownloadProxy {
    pub fn new(client: reqwest::Client, store: Arc<dyn ObjectStore>) -> Self {
        Self { client, store }
    }

    /// Sign, fetch and prepare headers. Fails without retrying on any upstream error.
    pub async fn open(
        &self,
        location: &ObjectLocation,
        disposition: Disposition,
    ) -> Result<Download, DownloadError> {
        let object = format!("{}/{}", location.bucket, location.object);

        let url = self
            .store
            .signed_url(
                &location.bucket,
                &location.object,
                Utc::now() + Duration::seconds(SIGNED_URL_TTL_SECS),
            )
            .await
            .map_err(|source| DownloadError::Signing {
                object: object.clone(),
                source,
            })?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| DownloadError::Fetch {
                object: object.clone(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(DownloadError::UpstreamStatus { object, status });
        }

        let mut headers = HeaderMap::new();
        for name in FORWARDED_HEADERS.iter() {
            if let Some(value) = response.headers().get(name) {
                headers.insert(name.clone(), value.clone());
            }
        }
        let disposition_value = content_disposition(disposition, &location.object);
        headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_str(&disposition_value)
                .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
        );

        Ok(Download {
            headers,
            object,
            response,
        })
    }
}

impl Download {
    /// Copy the body to `writer` chunk by chunk, returning the byte count. A failure mid-copy
    /// cannot take back bytes already written.
    pub async fn copy_to<W>(self, writer: &mut W) -> Result<u64, DownloadError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut reader = StreamReader::new(
            self.response
                .bytes_stream()
                .map_err(std::io::Error::other),
        );
        let written = tokio::io::copy(&mut reader, writer)
            .await
            .map_err(DownloadError::Stream)?;
        tracing::debug!(object = %self.object, written, "Streamed object");
        Ok(written)
    }
}

impl IntoResponse for Download {
    /// Stream the upstream body as the response body. A client disconnect drops the stream,
    /// which releases the upstream connection.
    fn into_response(self) -> Response {
        let object = self.object;
        let stream = self.response.bytes_stream().inspect_err(move |e| {
            tracing::error!(object = %object, "Download stream interrupted: {e}");
        });

        (StatusCode::OK, self.headers, Body::from_stream(stream)).into_response()
    }
}
