use crate::{
    services::{BarrelService, FileService},
    session::SessionService,
    storage::router::StorageRouter,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Shared state handed to every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub files: FileService,
    pub barrels: BarrelService,
    pub sessions: SessionService,
    pub router: StorageRouter,
}
