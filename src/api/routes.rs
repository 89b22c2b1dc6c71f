use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = state.config.max_upload_size as usize;

    let mut router = Router::new()
        // Session and account
        .route("/auth/session", post(handlers::start_session))
        .route("/user", get(handlers::get_user).delete(handlers::delete_user))
        .route("/user/bucket", get(handlers::get_bucket))
        // Files
        .route(
            "/files",
            get(handlers::list_files).delete(handlers::delete_file),
        )
        .route(
            "/files/upload",
            // Multipart framing on top of the file itself
            post(handlers::upload_file)
                .layer(DefaultBodyLimit::max(upload_limit.saturating_add(64 * 1024))),
        )
        .route("/files/private_token", get(handlers::get_private_token))
        // Sharing
        .route("/files/share", post(handlers::share_files))
        .route("/files/received", get(handlers::list_received))
        .route("/files/shared_by_user", get(handlers::list_shared_by_user))
        // Downloads
        .route("/d/:token", get(handlers::download_shared))
        .route("/d/private/:token", get(handlers::download_private))
        // Internal
        .route("/_internal/health", get(handlers::health));

    if state.local_store.is_some() {
        router = router.route("/_local/:bucket/:object", get(handlers::serve_local_object));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
