use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;

use super::sigv4::{self, SigV4};
use super::{
    validate_object_name, BucketCreation, BucketSnapshot, ByteStream, ObjectInfo, ObjectStore,
    ObjectStoreError,
};
use crate::config::S3Config;

/// Longest validity S3 accepts for a presigned URL
const MAX_PRESIGN_SECONDS: i64 = 7 * 24 * 3600;

/// S3-compatible object store backend (AWS, MinIO, R2, ...), path-style addressing.
pub struct S3Store {
    client: Client,
    /// `scheme://host[:port]`
    base_url: String,
    /// Host header value as signed
    host: String,
    region: String,
    signer: SigV4,
    /// S3 PUT needs a content length, so uploads are buffered up to this size
    max_object_size: u64,
}

#[derive(Debug, Deserialize)]
struct ListBucketResult {
    #[serde(rename = "Contents", default)]
    contents: Vec<S3Object>,
    #[serde(rename = "IsTruncated", default)]
    is_truncated: bool,
    #[serde(rename = "NextContinuationToken")]
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "LastModified")]
    last_modified: Option<DateTime<Utc>>,
    #[serde(rename = "ETag", default)]
    etag: String,
    #[serde(rename = "Size", default)]
    size: u64,
    #[serde(rename = "StorageClass")]
    storage_class: Option<String>,
}

#[derive(Debug, Deserialize)]
struct S3ErrorBody {
    #[serde(rename = "Code", default)]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

fn trim_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

impl S3Store {
    pub fn new(config: &S3Config, max_object_size: u64) -> Result<Self, anyhow::Error> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("S3 endpoint is required"))?;
        let url = reqwest::Url::parse(endpoint)?;
        let host_name = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("S3 endpoint has no host: {endpoint}"))?;
        let host = match url.port() {
            Some(port) => format!("{host_name}:{port}"),
            None => host_name.to_string(),
        };

        let access_key_id = config
            .access_key_id
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("S3 access key id is required"))?;
        let secret_access_key = config
            .secret_access_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("S3 secret access key is required"))?;

        Ok(Self {
            client: Client::builder().build()?,
            base_url: format!("{}://{host}", url.scheme()),
            host,
            region: config.region.clone(),
            signer: SigV4::new(access_key_id, secret_access_key, &config.region),
            max_object_size,
        })
    }

    fn path(bucket: &str, object: Option<&str>) -> String {
        match object {
            Some(name) => {
                let key: Vec<String> = name.split('/').map(sigv4::uri_encode).collect();
                format!("/{bucket}/{}", key.join("/"))
            }
            None => format!("/{bucket}"),
        }
    }

    /// Send a header-signed request
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        content_type: Option<&str>,
        body: Bytes,
    ) -> Result<reqwest::Response, ObjectStoreError> {
        let now = Utc::now();
        let date = sigv4::amz_date(now);
        let payload_hash = if body.is_empty() {
            sigv4::EMPTY_PAYLOAD_SHA256.to_string()
        } else {
            sigv4::sha256_hex(&body)
        };

        let mut signed: Vec<(&str, &str)> = vec![
            ("host", self.host.as_str()),
            ("x-amz-content-sha256", payload_hash.as_str()),
            ("x-amz-date", date.as_str()),
        ];
        if let Some(content_type) = content_type {
            signed.push(("content-type", content_type));
        }
        let authorization =
            self.signer
                .authorization(method.as_str(), path, query, &signed, &payload_hash, now);

        let query_string = sigv4::canonical_query(query);
        let url = if query_string.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{query_string}", self.base_url)
        };

        let mut req = self
            .client
            .request(method, url)
            .header("x-amz-content-sha256", payload_hash.as_str())
            .header("x-amz-date", date.as_str())
            .header(reqwest::header::AUTHORIZATION, authorization);
        if let Some(content_type) = content_type {
            req = req.header(reqwest::header::CONTENT_TYPE, content_type);
        }

        Ok(req.body(body).send().await?)
    }

    async fn list_all(&self, bucket: &str) -> Result<Vec<S3Object>, ObjectStoreError> {
        let path = Self::path(bucket, None);
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = vec![("list-type", "2")];
            if let Some(ref token) = continuation {
                query.push(("continuation-token", token.as_str()));
            }

            let resp = self
                .send(Method::GET, &path, &query, None, Bytes::new())
                .await?;
            if resp.status() == StatusCode::NOT_FOUND {
                return Err(ObjectStoreError::NotFound(bucket.to_string()));
            }
            let body = check(resp, "list objects").await?.text().await?;
            let page: ListBucketResult = quick_xml::de::from_str(&body)
                .map_err(|e| ObjectStoreError::Backend(format!("invalid S3 listing: {e}")))?;

            objects.extend(page.contents);
            match page.next_continuation_token {
                Some(next) if page.is_truncated => continuation = Some(next),
                _ => break,
            }
        }

        Ok(objects)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn create_bucket_if_absent(
        &self,
        bucket: &str,
    ) -> Result<BucketCreation, ObjectStoreError> {
        // us-east-1 rejects an explicit location constraint
        let body = if self.region == "us-east-1" {
            Bytes::new()
        } else {
            Bytes::from(format!(
                "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
                 <LocationConstraint>{}</LocationConstraint></CreateBucketConfiguration>",
                self.region
            ))
        };

        let resp = self
            .send(Method::PUT, &Self::path(bucket, None), &[], None, body)
            .await?;
        if resp.status().is_success() {
            return Ok(BucketCreation::Created);
        }

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        let error: Option<S3ErrorBody> = quick_xml::de::from_str(&text).ok();
        match error {
            Some(ref e) if e.code == "BucketAlreadyOwnedByYou" => Ok(BucketCreation::AlreadyExists),
            Some(e) => Err(ObjectStoreError::Backend(format!(
                "S3 create bucket failed ({status}): {} {}",
                e.code, e.message
            ))),
            None => Err(ObjectStoreError::Backend(format!(
                "S3 create bucket failed ({status}): {text}"
            ))),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        content_type: &str,
        mut body: ByteStream,
    ) -> Result<ObjectInfo, ObjectStoreError> {
        validate_object_name(name)?;

        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if (buf.len() + chunk.len()) as u64 > self.max_object_size {
                return Err(ObjectStoreError::TooLarge(self.max_object_size));
            }
            buf.extend_from_slice(&chunk);
        }
        let data = buf.freeze();
        let size = data.len() as u64;

        let resp = self
            .send(
                Method::PUT,
                &Self::path(bucket, Some(name)),
                &[],
                Some(content_type),
                data,
            )
            .await?;
        let resp = check(resp, "upload").await?;

        let etag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(trim_etag)
            .unwrap_or_default();

        let now = Utc::now();
        Ok(ObjectInfo {
            name: name.to_string(),
            content_type: content_type.to_string(),
            checksum: etag,
            size,
            created: Some(now),
            updated: Some(now),
        })
    }

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<(), ObjectStoreError> {
        let resp = self
            .send(
                Method::DELETE,
                &Self::path(bucket, Some(name)),
                &[],
                None,
                Bytes::new(),
            )
            .await?;

        // 404 is fine -- object already gone
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(resp, "delete").await?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<BucketSnapshot, ObjectStoreError> {
        let listed = self.list_all(bucket).await?;

        let storage_class = listed.iter().find_map(|o| o.storage_class.clone());
        let objects = listed
            .into_iter()
            .map(|o| ObjectInfo {
                content_type: mime_guess::from_path(&o.key)
                    .first_or_octet_stream()
                    .to_string(),
                checksum: trim_etag(&o.etag),
                size: o.size,
                created: o.last_modified,
                updated: o.last_modified,
                name: o.key,
            })
            .collect();

        Ok(BucketSnapshot {
            name: bucket.to_string(),
            storage_class,
            created: None,
            labels: Default::default(),
            objects,
        })
    }

    async fn signed_url(
        &self,
        bucket: &str,
        name: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<reqwest::Url, ObjectStoreError> {
        let now = Utc::now();
        let expires_in = (expires_at - now).num_seconds().clamp(1, MAX_PRESIGN_SECONDS);
        let path = Self::path(bucket, Some(name));
        let query = self.signer.presign_get(&self.host, &path, expires_in, now);

        reqwest::Url::parse(&format!("{}{path}?{query}", self.base_url))
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        let objects = match self.list_all(bucket).await {
            Ok(objects) => objects,
            Err(ObjectStoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        for object in objects {
            self.delete_object(bucket, &object.key).await?;
        }

        let resp = self
            .send(
                Method::DELETE,
                &Self::path(bucket, None),
                &[],
                None,
                Bytes::new(),
            )
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(resp, "delete bucket").await?;
        Ok(())
    }
}

async fn check(resp: reqwest::Response, op: &str) -> Result<reqwest::Response, ObjectStoreError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(ObjectStoreError::Backend(format!(
        "S3 {op} failed ({status}): {body}"
    )))
}
