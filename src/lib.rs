//! file-share - Multi-tenant file sharing over per-user object storage buckets
//!
//! Users upload files into their own bucket and grant time-bounded, token-gated access to
//! other users by email. The crate provides:
//! - Swappable object storage backends (local filesystem, GCS, S3-compatible)
//! - redb embedded database for users, files and share grants
//! - Streaming download proxy over short-lived signed URLs
//! - Reconciliation of bucket contents into the metadata store on session start
//! - Optional email notification of new shares (HTTP API or SMTP)

pub mod api;
pub mod config;
pub mod download;
pub mod mail;
pub mod object_store;
pub mod reconcile;
pub mod session;
pub mod sharing;
pub mod storage;
pub mod tokens;

use std::sync::Arc;

use config::Config;
use download::DownloadProxy;
use mail::Mailer;
use object_store::{LocalStore, ObjectStore};
use session::Sessions;
use sharing::ShareManager;
use storage::Database;
use tokens::TokenIssuer;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub object_store: Arc<dyn ObjectStore>,
    /// Set only for the local backend, which serves its own signed URLs
    pub local_store: Option<Arc<LocalStore>>,
    pub downloads: DownloadProxy,
    pub sessions: Sessions,
    pub shares: ShareManager,
    pub tokens: TokenIssuer,
}

impl AppState {
    /// Wire the services around one database, object store and optional mailer.
    pub fn new(
        config: Config,
        db: Database,
        object_store: Arc<dyn ObjectStore>,
        local_store: Option<Arc<LocalStore>>,
        mailer: Option<Arc<dyn Mailer>>,
        http: reqwest::Client,
    ) -> Self {
        let tokens = TokenIssuer::new();
        let sessions = Sessions::new(
            db.clone(),
            object_store.clone(),
            tokens.clone(),
            &config.storage.bucket_base_name,
        );
        let shares = ShareManager::new(
            db.clone(),
            tokens.clone(),
            mailer,
            &config.node.public_url,
            &config.mail.from_address,
        );
        let downloads = DownloadProxy::new(http, object_store.clone());

        Self {
            config,
            db,
            object_store,
            local_store,
            downloads,
            sessions,
            shares,
            tokens,
        }
    }
}
