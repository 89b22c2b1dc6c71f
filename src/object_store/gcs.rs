use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Body, Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{
    validate_object_name, BucketCreation, BucketSnapshot, ByteStream, ObjectInfo, ObjectStore,
    ObjectStoreError,
};
use crate::config::GcsConfig;

const API_BASE: &str = "https://storage.googleapis.com/storage/v1";
const UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1";
const SIGNING_HOST: &str = "storage.googleapis.com";

/// Longest validity GCS accepts for a V4 signed URL
const MAX_SIGNED_URL_SECONDS: i64 = 7 * 24 * 3600;

/// Google Cloud Storage object store backend.
pub struct GcsStore {
    client: Client,
    location: String,
    project_id: String,
    /// Present when a service account key file is configured; required for signed URLs
    service_account: Option<ServiceAccountKey>,
    access_token: RwLock<Option<AccessToken>>,
}

#[derive(Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObject {
    name: String,
    content_type: Option<String>,
    md5_hash: Option<String>,
    size: Option<String>,
    time_created: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsObjectList {
    #[serde(default)]
    items: Vec<GcsObject>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcsBucket {
    name: String,
    storage_class: Option<String>,
    time_created: Option<DateTime<Utc>>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

impl From<GcsObject> for ObjectInfo {
    fn from(o: GcsObject) -> Self {
        // GCS reports MD5 as base64; checksums are stored hex-encoded
        let checksum = o
            .md5_hash
            .as_deref()
            .and_then(|h| {
                base64::Engine::decode(&base64::engine::general_purpose::STANDARD, h).ok()
            })
            .map(hex::encode)
            .unwrap_or_default();

        ObjectInfo {
            content_type: o
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            checksum,
            size: o.size.and_then(|s| s.parse().ok()).unwrap_or(0),
            created: o.time_created,
            updated: o.updated,
            name: o.name,
        }
    }
}

impl GcsStore {
    pub async fn new(config: &GcsConfig) -> Result<Self, anyhow::Error> {
        let client = Client::builder().build()?;

        let service_account = match config.credentials_file {
            Some(ref path) => {
                let key_json = tokio::fs::read_to_string(path).await?;
                Some(serde_json::from_str::<ServiceAccountKey>(&key_json)?)
            }
            None => None,
        };

        let store = Self {
            client,
            location: config.location.clone(),
            project_id: config
                .project_id
                .clone()
                .ok_or_else(|| anyhow::anyhow!("GCS project id is required"))?,
            service_account,
            access_token: RwLock::new(None),
        };

        store.token().await?;
        Ok(store)
    }

    /// Current bearer token, refreshed a minute before it expires
    async fn token(&self) -> Result<String, ObjectStoreError> {
        let margin = Duration::seconds(60);
        {
            let lock = self.access_token.read().await;
            if let Some(ref token) = *lock {
                if token.expires_at - margin > Utc::now() {
                    return Ok(token.value.clone());
                }
            }
        }

        let mut lock = self.access_token.write().await;
        if let Some(ref token) = *lock {
            if token.expires_at - margin > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let fetched = match self.service_account {
            Some(ref key) => self.token_from_service_account(key).await,
            None => self.token_from_metadata_server().await,
        }
        .map_err(|e| ObjectStoreError::Backend(format!("GCS token refresh failed: {e}")))?;

        let value = fetched.access_token.clone();
        *lock = Some(AccessToken {
            value: fetched.access_token,
            expires_at: Utc::now() + Duration::seconds(fetched.expires_in),
        });
        tracing::debug!(expires_in = fetched.expires_in, "Refreshed GCS access token");
        Ok(value)
    }

    async fn token_from_service_account(
        &self,
        key: &ServiceAccountKey,
    ) -> Result<TokenResponse, anyhow::Error> {
        let now = Utc::now().timestamp();
        let claims = serde_json::json!({
            "iss": key.client_email,
            "scope": "https://www.googleapis.com/auth/devstorage.full_control",
            "aud": key.token_uri,
            "iat": now,
            "exp": now + 3600,
        });

        let header = base64_url_encode(&serde_json::to_vec(&serde_json::json!({
            "alg": "RS256",
            "typ": "JWT"
        }))?);
        let payload = base64_url_encode(&serde_json::to_vec(&claims)?);
        let unsigned = format!("{header}.{payload}");

        let signature = sign_rs256(unsigned.as_bytes(), &key.private_key)?;
        let jwt = format!("{unsigned}.{}", base64_url_encode(&signature));

        let resp: TokenResponse = self
            .client
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp)
    }

    async fn token_from_metadata_server(&self) -> Result<TokenResponse, anyhow::Error> {
        let resp: TokenResponse = self
            .client
            .get("http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token")
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp)
    }

    fn object_url(bucket: &str, name: &str) -> String {
        format!("{API_BASE}/b/{bucket}/o/{}", urlencoding::encode(name))
    }

    async fn list_page(
        &self,
        bucket: &str,
        page_token: Option<&str>,
    ) -> Result<GcsObjectList, ObjectStoreError> {
        let token = self.token().await?;
        let mut req = self
            .client
            .get(format!("{API_BASE}/b/{bucket}/o"))
            .bearer_auth(&token);
        if let Some(page_token) = page_token {
            req = req.query(&[("pageToken", page_token)]);
        }

        let resp = req.send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(bucket.to_string()));
        }
        let resp = check(resp, "list objects").await?;
        Ok(resp.json().await?)
    }

    async fn list_all(&self, bucket: &str) -> Result<Vec<ObjectInfo>, ObjectStoreError> {
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_page(bucket, page_token.as_deref()).await?;
            objects.extend(page.items.into_iter().map(ObjectInfo::from));
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(objects)
    }

    /// V4 signed URL using the service account's RSA key
    fn sign_url(
        &self,
        bucket: &str,
        name: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<reqwest::Url, ObjectStoreError> {
        let key = self.service_account.as_ref().ok_or_else(|| {
            ObjectStoreError::SigningUnavailable(
                "GCS signed URLs require a service account key file".to_string(),
            )
        })?;

        let expires_in = (expires_at - now)
            .num_seconds()
            .clamp(1, MAX_SIGNED_URL_SECONDS);
        let datetime = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let scope = format!("{date}/auto/storage/goog4_request");
        let credential = format!("{}/{scope}", key.client_email);

        let path = format!("/{bucket}/{}", urlencoding::encode(name));
        let query = [
            ("X-Goog-Algorithm", "GOOG4-RSA-SHA256".to_string()),
            ("X-Goog-Credential", credential),
            ("X-Goog-Date", datetime.clone()),
            ("X-Goog-Expires", expires_in.to_string()),
            ("X-Goog-SignedHeaders", "host".to_string()),
        ]
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

        let canonical_request =
            format!("GET\n{path}\n{query}\nhost:{SIGNING_HOST}\n\nhost\nUNSIGNED-PAYLOAD");
        let string_to_sign = format!(
            "GOOG4-RSA-SHA256\n{datetime}\n{scope}\n{}",
            hex::encode(ring::digest::digest(
                &ring::digest::SHA256,
                canonical_request.as_bytes()
            ))
        );

        let signature = sign_rs256(string_to_sign.as_bytes(), &key.private_key)
            .map_err(|e| ObjectStoreError::SigningUnavailable(e.to_string()))?;

        reqwest::Url::parse(&format!(
            "https://{SIGNING_HOST}{path}?{query}&X-Goog-Signature={}",
            hex::encode(signature)
        ))
        .map_err(|e| ObjectStoreError::Backend(e.to_string()))
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn create_bucket_if_absent(
        &self,
        bucket: &str,
    ) -> Result<BucketCreation, ObjectStoreError> {
        let token = self.token().await?;

        let resp = self
            .client
            .post(format!("{API_BASE}/b"))
            .query(&[("project", self.project_id.as_str())])
            .bearer_auth(&token)
            .json(&serde_json::json!({
                "name": bucket,
                "location": self.location,
                "iamConfiguration": {
                    "uniformBucketLevelAccess": { "enabled": true },
                    "publicAccessPrevention": "enforced",
                },
            }))
            .send()
            .await?;

        // 409 is fine -- bucket already exists, possibly from a racing first login
        if resp.status() == StatusCode::CONFLICT {
            return Ok(BucketCreation::AlreadyExists);
        }
        check(resp, "create bucket").await?;
        Ok(BucketCreation::Created)
    }

    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        content_type: &str,
        body: ByteStream,
    ) -> Result<ObjectInfo, ObjectStoreError> {
        validate_object_name(name)?;
        let token = self.token().await?;

        let resp = self
            .client
            .post(format!("{UPLOAD_BASE}/b/{bucket}/o"))
            .query(&[("uploadType", "media"), ("name", name)])
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(Body::wrap_stream(body))
            .send()
            .await?;

        let resp = check(resp, "upload").await?;
        let object: GcsObject = resp.json().await?;
        Ok(object.into())
    }

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<(), ObjectStoreError> {
        let token = self.token().await?;

        let resp = self
            .client
            .delete(Self::object_url(bucket, name))
            .bearer_auth(&token)
            .send()
            .await?;

        // 404 is fine -- object already gone
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(resp, "delete").await?;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<BucketSnapshot, ObjectStoreError> {
        let token = self.token().await?;

        let resp = self
            .client
            .get(format!("{API_BASE}/b/{bucket}"))
            .bearer_auth(&token)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(bucket.to_string()));
        }
        let attrs: GcsBucket = check(resp, "bucket attributes").await?.json().await?;

        Ok(BucketSnapshot {
            name: attrs.name,
            storage_class: attrs.storage_class,
            created: attrs.time_created,
            labels: attrs.labels,
            objects: self.list_all(bucket).await?,
        })
    }

    async fn signed_url(
        &self,
        bucket: &str,
        name: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<reqwest::Url, ObjectStoreError> {
        self.sign_url(bucket, name, expires_at, Utc::now())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        let objects = match self.list_all(bucket).await {
            Ok(objects) => objects,
            Err(ObjectStoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        for object in objects {
            self.delete_object(bucket, &object.name).await?;
        }

        let token = self.token().await?;
        let resp = self
            .client
            .delete(format!("{API_BASE}/b/{bucket}"))
            .bearer_auth(&token)
            .send()
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
        "GCS {op} failed ({status}): {body}"
    )))
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

fn sign_rs256(data: &[u8], private_key_pem: &str) -> Result<Vec<u8>, anyhow::Error> {
    // Strip PEM armor and decode the PKCS#8 DER body
    let der_b64: String = private_key_pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let der = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, der_b64.trim())?;

    let key_pair = ring::signature::RsaKeyPair::from_pkcs8(&der)
        .map_err(|e| anyhow::anyhow!("Failed to parse RSA key: {e}"))?;

    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &ring::signature::RSA_PKCS1_SHA256,
            &ring::rand::SystemRandom::new(),
            data,
            &mut signature,
        )
        .map_err(|e| anyhow::anyhow!("Failed to sign: {e}"))?;

    Ok(signature)
}
