use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mail: MailConfig,
    pub node: NodeConfig,
    pub storage: StorageConfig,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
    /// Externally reachable base URL, used for sharing links and local signed URLs.
    pub public_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Gcs,
    Local,
    S3,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Per-user buckets are named `<bucket_base_name>-<user id>`
    pub bucket_base_name: String,
    /// Directory for local storage backend
    pub local_storage_path: String,
    /// HMAC key for local signed URLs (random per process when unset)
    pub local_signing_key: Option<String>,
    pub gcs: GcsConfig,
    pub s3: S3Config,
}

#[derive(Debug, Clone, Default)]
pub struct GcsConfig {
    /// Path to GCS service account JSON (optional, defaults to the metadata server)
    pub credentials_file: Option<String>,
    pub location: String,
    /// Project that owns newly created buckets (required when backend is gcs)
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub access_key_id: Option<String>,
    /// e.g. `http://localhost:9000` for MinIO
    pub endpoint: Option<String>,
    pub region: String,
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailBackend {
    Api,
    None,
    Smtp,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub backend: MailBackend,
    pub from_address: String,
    pub smtp_host: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            data_dir: "./data".to_string(),
            public_url: "http://localhost:3000".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            bucket_base_name: "fileshare".to_string(),
            local_storage_path: "./files".to_string(),
            local_signing_key: None,
            gcs: GcsConfig {
                location: "europe-west1".to_string(),
                ..Default::default()
            },
            s3: S3Config {
                region: "us-east-1".to_string(),
                ..Default::default()
            },
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: None,
            backend: MailBackend::None,
            from_address: "noreply@localhost".to_string(),
            smtp_host: None,
            smtp_password: None,
            smtp_port: 587,
            smtp_username: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());

        let bind_address = env("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let data_dir = env("DATA_DIR").unwrap_or_else(|| "./data".to_string());
        let public_url = env("PUBLIC_URL")
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        let max_upload_size = env("MAX_UPLOAD_SIZE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(512 * 1024 * 1024); // 512MB

        let backend = match env("STORAGE_BACKEND")
            .unwrap_or_else(|| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "gcs" => StorageBackend::Gcs,
            "s3" => StorageBackend::S3,
            "local" => StorageBackend::Local,
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown STORAGE_BACKEND '{other}' (expected local, gcs or s3)"
                )))
            }
        };

        let storage_defaults = StorageConfig::default();
        let storage = StorageConfig {
            backend,
            bucket_base_name: env("BUCKET_BASE_NAME").unwrap_or(storage_defaults.bucket_base_name),
            local_storage_path: env("LOCAL_STORAGE_PATH")
                .unwrap_or(storage_defaults.local_storage_path),
            local_signing_key: env("LOCAL_SIGNING_KEY"),
            gcs: GcsConfig {
                credentials_file: env("GCS_CREDENTIALS_FILE")
                    .or_else(|| env("GOOGLE_APPLICATION_CREDENTIALS")),
                location: env("GCS_LOCATION").unwrap_or(storage_defaults.gcs.location),
                project_id: env("GCS_PROJECT_ID"),
            },
            s3: S3Config {
                access_key_id: env("S3_ACCESS_KEY_ID"),
                endpoint: env("S3_ENDPOINT").map(|e| e.trim_end_matches('/').to_string()),
                region: env("S3_REGION").unwrap_or(storage_defaults.s3.region),
                secret_access_key: env("S3_SECRET_ACCESS_KEY"),
            },
        };

        let mail_backend = match env("MAIL_BACKEND")
            .unwrap_or_else(|| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "api" => MailBackend::Api,
            "smtp" => MailBackend::Smtp,
            "none" => MailBackend::None,
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown MAIL_BACKEND '{other}' (expected none, api or smtp)"
                )))
            }
        };

        let mail_defaults = MailConfig::default();
        let mail = MailConfig {
            api_key: env("MAIL_API_KEY"),
            api_url: env("MAIL_API_URL"),
            backend: mail_backend,
            from_address: env("MAIL_FROM").unwrap_or(mail_defaults.from_address),
            smtp_host: env("SMTP_HOST"),
            smtp_password: env("SMTP_PASSWORD"),
            smtp_port: env("SMTP_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(mail_defaults.smtp_port),
            smtp_username: env("SMTP_USERNAME"),
        };

        let config = Config {
            mail,
            node: NodeConfig {
                bind_address,
                data_dir,
                public_url,
            },
            storage,
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.node.public_url.starts_with("http://")
            && !self.node.public_url.starts_with("https://")
        {
            return Err(ConfigError::ValidationError(
                "PUBLIC_URL must be an absolute http(s) URL".to_string(),
            ));
        }

        let base = &self.storage.bucket_base_name;
        if base.is_empty()
            || !base
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ConfigError::ValidationError(
                "BUCKET_BASE_NAME must be non-empty and contain only [a-z0-9-]".to_string(),
            ));
        }

        match self.storage.backend {
            StorageBackend::Gcs if self.storage.gcs.project_id.is_none() => {
                return Err(ConfigError::ValidationError(
                    "GCS_PROJECT_ID is required when STORAGE_BACKEND=gcs".to_string(),
                ));
            }
            StorageBackend::S3 => {
                let s3 = &self.storage.s3;
                if s3.endpoint.is_none()
                    || s3.access_key_id.is_none()
                    || s3.secret_access_key.is_none()
                {
                    return Err(ConfigError::ValidationError(
                        "S3_ENDPOINT, S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY are required when STORAGE_BACKEND=s3"
                            .to_string(),
                    ));
                }
            }
            _ => {}
        }

        match self.mail.backend {
            MailBackend::Api if self.mail.api_url.is_none() || self.mail.api_key.is_none() => {
                return Err(ConfigError::ValidationError(
                    "MAIL_API_URL and MAIL_API_KEY are required when MAIL_BACKEND=api".to_string(),
                ));
            }
            MailBackend::Smtp if self.mail.smtp_host.is_none() => {
                return Err(ConfigError::ValidationError(
                    "SMTP_HOST is required when MAIL_BACKEND=smtp".to_string(),
                ));
            }
            _ => {}
        }

        if self.storage.backend == StorageBackend::Local
            && self.storage.local_signing_key.is_none()
        {
            tracing::warn!(
                "LOCAL_SIGNING_KEY is not set. Signed URLs will not survive a restart."
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            mail: MailConfig::default(),
            node: NodeConfig::default(),
            storage: StorageConfig::default(),
            max_upload_size: 1024,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_gcs_requires_project() {
        let mut config = base_config();
        config.storage.backend = StorageBackend::Gcs;
        assert!(config.validate().is_err());

        config.storage.gcs.project_id = Some("project".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_s3_requires_credentials() {
        let mut config = base_config();
        config.storage.backend = StorageBackend::S3;
        config.storage.s3.endpoint = Some("http://localhost:9000".to_string());
        assert!(config.validate().is_err());

        config.storage.s3.access_key_id = Some("key".to_string());
        config.storage.s3.secret_access_key = Some("secret".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bucket_base_name_charset() {
        let mut config = base_config();
        config.storage.bucket_base_name = "Bad_Name".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_public_url_must_be_absolute() {
        let mut config = base_config();
        config.node.public_url = "files.example.com".to_string();
        assert!(config.validate().is_err());
    }
}
