//! Defines routes for the gateway.
//!
//! ## Structure
//! - **Public retrieval**
//!   - `GET    /file/{slug}`: stream a file (`?token=` for protected files)
//!
//! - **File API**
//!   - `POST   /v1/file`: multipart upload
//!   - `GET    /v1/file`: search
//!   - `GET    /v1/file/{id}`: file with its locations
//!   - `DELETE /v1/file/{id}`: delete on every barrel
//!
//! - **Barrel API**
//!   - `POST   /v1/barrel`, `GET /v1/barrel`
//!   - `GET    /v1/barrel/{id}`, `PUT /v1/barrel/{id}`
//!
//! - **Sessions**
//!   - `POST   /v1/session`

use crate::{
    handlers::{
        barrel_handlers::{create_barrel, get_barrel, search_barrel, update_barrel},
        file_handlers::{delete_file, get_file, retrieve_file, search_file, upload_file},
        health_handlers::{healthz, readyz},
        session_handlers::create_session,
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Largest accepted multipart upload.
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Build and return the router for every gateway endpoint.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/file/{slug}", get(retrieve_file))
        .route(
            "/v1/file",
            post(upload_file)
                .get(search_file)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/v1/file/{id}", get(get_file).delete(delete_file))
        .route("/v1/barrel", post(create_barrel).get(search_barrel))
        .route("/v1/barrel/{id}", get(get_barrel).put(update_barrel))
        .route("/v1/session", post(create_session))
}
