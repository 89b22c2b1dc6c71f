use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use ring::{digest, hmac};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{
    validate_object_name, BucketCreation, BucketSnapshot, ByteStream, ObjectInfo, ObjectStore,
    ObjectStoreError,
};

/// Directory under `base_path` holding one checksum sidecar per object
const META_DIR: &str = ".meta";

/// Cached attributes of one object. Valid only while the object's size and mtime match.
#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    checksum: String,
    content_type: String,
    size: u64,
    modified: Option<DateTime<Utc>>,
}

/// Local filesystem object store for development and testing.
///
/// Buckets are directories under `base_path`. Checksums are computed while writing and kept in
/// sidecars under `.meta/<bucket>/`, so listings only hash objects written out-of-band. Signed URLs point back at this service
/// (`/_local/<bucket>/<object>`) and carry an HMAC-SHA256 signature over the bucket, object and
/// expiry.
pub struct LocalStore {
    base_path: PathBuf,
    public_url: reqwest::Url,
    signing_key: hmac::Key,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(
        base_path: P,
        public_url: &str,
        signing_key: &[u8],
    ) -> Result<Self, anyhow::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(base_path.join(".tmp"))?;
        Ok(Self {
            base_path,
            public_url: reqwest::Url::parse(public_url)?,
            signing_key: hmac::Key::new(hmac::HMAC_SHA256, signing_key),
        })
    }

    fn bucket_path(&self, bucket: &str) -> Result<PathBuf, ObjectStoreError> {
        validate_object_name(bucket)?;
        Ok(self.base_path.join(bucket))
    }

    fn object_path(&self, bucket: &str, name: &str) -> Result<PathBuf, ObjectStoreError> {
        validate_object_name(name)?;
        Ok(self.bucket_path(bucket)?.join(name))
    }

    fn sidecar_path(&self, bucket: &str, name: &str) -> PathBuf {
        self.base_path.join(META_DIR).join(bucket).join(name)
    }

    async fn write_sidecar(&self, bucket: &str, name: &str, sidecar: &Sidecar) {
        let path = self.sidecar_path(bucket, name);
        let written: Result<(), anyhow::Error> = async {
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            tokio::fs::write(&path, rmp_serde::to_vec(sidecar)?).await?;
            Ok(())
        }
        .await;
        if let Err(e) = written {
            tracing::warn!(bucket, object = name, "Failed to write checksum sidecar: {e}");
        }
    }

    async fn read_sidecar(&self, bucket: &str, name: &str) -> Option<Sidecar> {
        let data = tokio::fs::read(self.sidecar_path(bucket, name)).await.ok()?;
        rmp_serde::from_slice(&data).ok()
    }

    fn string_to_sign(bucket: &str, name: &str, expires: i64) -> String {
        format!("GET\n{bucket}\n{name}\n{expires}")
    }

    /// Check a signature produced by `signed_url`. Fails for expired URLs, malformed hex and
    /// signatures over any other bucket, object or expiry. The comparison is constant-time.
    pub fn verify_signature(
        &self,
        bucket: &str,
        name: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if now.timestamp() > expires {
            return false;
        }
        let Ok(tag) = hex::decode(signature) else {
            return false;
        };
        hmac::verify(
            &self.signing_key,
            Self::string_to_sign(bucket, name, expires).as_bytes(),
            &tag,
        )
        .is_ok()
    }

    /// Open an object for streaming, returning the file handle and its length.
    pub async fn open_object(
        &self,
        bucket: &str,
        name: &str,
    ) -> Result<(tokio::fs::File, u64), ObjectStoreError> {
        let path = self.object_path(bucket, name)?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ObjectStoreError::NotFound(format!("{bucket}/{name}")))
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    async fn describe(
        &self,
        bucket: &str,
        path: &Path,
        name: &str,
    ) -> Result<ObjectInfo, ObjectStoreError> {
        let metadata = tokio::fs::metadata(path).await?;
        let modified = metadata.modified().ok().map(DateTime::<Utc>::from);

        let sidecar = match self.read_sidecar(bucket, name).await {
            Some(cached) if cached.size == metadata.len() && cached.modified == modified => cached,
            _ => {
                let sidecar = Sidecar {
                    checksum: hash_file(path).await?,
                    content_type: mime_guess::from_path(name)
                        .first_or_octet_stream()
                        .to_string(),
                    size: metadata.len(),
                    modified,
                };
                self.write_sidecar(bucket, name, &sidecar).await;
                sidecar
            }
        };

        Ok(ObjectInfo {
            name: name.to_string(),
            content_type: sidecar.content_type,
            checksum: sidecar.checksum,
            size: metadata.len(),
            created: metadata.created().ok().map(DateTime::<Utc>::from),
            updated: modified,
        })
    }
}

async fn hash_file(path: &Path) -> Result<String, ObjectStoreError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut ctx = digest::Context::new(&digest::SHA256);
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        ctx.update(&buf[..n]);
    }
    Ok(hex::encode(ctx.finish()))
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn create_bucket_if_absent(
        &self,
        bucket: &str,
    ) -> Result<BucketCreation, ObjectStoreError> {
        let path = self.bucket_path(bucket)?;
        match tokio::fs::create_dir(&path).await {
            Ok(()) => Ok(BucketCreation::Created),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(BucketCreation::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        content_type: &str,
        mut body: ByteStream,
    ) -> Result<ObjectInfo, ObjectStoreError> {
        let path = self.object_path(bucket, name)?;
        if !tokio::fs::try_exists(self.bucket_path(bucket)?).await? {
            return Err(ObjectStoreError::NotFound(bucket.to_string()));
        }

        // Write beside the bucket and rename, so readers never observe a partial object
        let tmp_path = self
            .base_path
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string());
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        let mut ctx = digest::Context::new(&digest::SHA256);
        let mut size = 0u64;

        let written: Result<(), ObjectStoreError> = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                ctx.update(&chunk);
                size += chunk.len() as u64;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(e) = written {
            drop(file);
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }
        drop(file);
        tokio::fs::rename(&tmp_path, &path).await?;

        let checksum = hex::encode(ctx.finish());
        let modified = tokio::fs::metadata(&path)
            .await?
            .modified()
            .ok()
            .map(DateTime::<Utc>::from);
        self.write_sidecar(
            bucket,
            name,
            &Sidecar {
                checksum: checksum.clone(),
                content_type: content_type.to_string(),
                size,
                modified,
            },
        )
        .await;

        let now = Utc::now();
        Ok(ObjectInfo {
            name: name.to_string(),
            content_type: content_type.to_string(),
            checksum,
            size,
            created: Some(now),
            updated: modified.or(Some(now)),
        })
    }

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<(), ObjectStoreError> {
        let path = self.object_path(bucket, name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let _ = tokio::fs::remove_file(self.sidecar_path(bucket, name)).await;
        Ok(())
    }

    async fn list_objects(&self, bucket: &str) -> Result<BucketSnapshot, ObjectStoreError> {
        let path = self.bucket_path(bucket)?;
        let mut entries = match tokio::fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ObjectStoreError::NotFound(bucket.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut objects = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                tracing::warn!(bucket, path = ?entry.path(), "Skipping object with non UTF-8 name");
                continue;
            };
            objects.push(self.describe(bucket, &entry.path(), &name).await?);
        }
        objects.sort_by(|a, b| a.name.cmp(&b.name));

        let metadata = tokio::fs::metadata(&path).await?;
        Ok(BucketSnapshot {
            name: bucket.to_string(),
            storage_class: Some("LOCAL".to_string()),
            created: metadata.created().ok().map(DateTime::<Utc>::from),
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
        validate_object_name(bucket)?;
        validate_object_name(name)?;

        let expires = expires_at.timestamp();
        let tag = hmac::sign(
            &self.signing_key,
            Self::string_to_sign(bucket, name, expires).as_bytes(),
        );

        let mut url = self.public_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ObjectStoreError::SigningUnavailable("public URL cannot be a base".to_string())
            })?
            .pop_if_empty()
            .push("_local")
            .push(bucket)
            .push(name);
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("signature", &hex::encode(tag.as_ref()));
        Ok(url)
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        let path = self.bucket_path(bucket)?;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let _ = tokio::fs::remove_dir_all(self.base_path.join(META_DIR).join(bucket)).await;
        Ok(())
    }
}
