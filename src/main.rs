use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use file_share::{
    api,
    config::{Config, StorageBackend},
    mail,
    object_store as obj,
    storage::Database,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "file-share starting");

    let config = Config::load()?;
    info!("Public URL: {}", config.node.public_url);

    let db = Database::open(&config.node.data_dir)?;
    info!("Database opened at: {}", config.node.data_dir);

    // Initialize object store backend
    let mut local_store = None;
    let object_store: Arc<dyn obj::ObjectStore> = match config.storage.backend {
        StorageBackend::Local => {
            let key = match config.storage.local_signing_key {
                Some(ref key) => key.as_bytes().to_vec(),
                None => random_key()?,
            };
            let store = Arc::new(obj::LocalStore::new(
                &config.storage.local_storage_path,
                &config.node.public_url,
                &key,
            )?);
            info!(
                "Using local storage backend at: {}",
                config.storage.local_storage_path
            );
            local_store = Some(Arc::clone(&store));
            store
        }
        StorageBackend::Gcs => {
            let store = obj::GcsStore::new(&config.storage.gcs).await?;
            info!(
                "Using GCS storage backend, location: {}",
                config.storage.gcs.location
            );
            Arc::new(store)
        }
        StorageBackend::S3 => {
            let store = obj::S3Store::new(&config.storage.s3, config.max_upload_size)?;
            info!(
                "Using S3 storage backend at: {}",
                config.storage.s3.endpoint.as_deref().unwrap_or_default()
            );
            Arc::new(store)
        }
    };

    let mailer = mail::from_config(&config.mail)?;
    if mailer.is_none() {
        info!("Share notifications disabled");
    }

    let http = reqwest::Client::builder().build()?;
    let state = Arc::new(AppState::new(
        config.clone(),
        db,
        object_store,
        local_store,
        mailer,
        http,
    ));

    // Build and start the HTTP server
    let app = api::create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    info!("Listening on: {}", config.node.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

/// Per-process signing key for local signed URLs
fn random_key() -> anyhow::Result<Vec<u8>> {
    use ring::rand::SecureRandom;

    let mut key = vec![0u8; 32];
    ring::rand::SystemRandom::new()
        .fill(&mut key)
        .map_err(|_| anyhow::anyhow!("system randomness source failed"))?;
    Ok(key)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
