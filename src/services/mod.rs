//! Business operations. Every public method returns [`AppResult`] and maps
//! repository, driver and queue failures onto the error taxonomy.

pub mod barrel_service;
pub mod file_service;
pub mod scheduler;

pub use barrel_service::BarrelService;
pub use file_service::FileService;
pub use scheduler::ReplicationScheduler;

use crate::{
    errors::{AppError, AppResult},
    repository::RepoError,
};
use serde::Serialize;
use tracing::error;

/// Pagination echoed back with search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SearchSummary {
    pub page: i64,
    /// Number of matching rows across all pages.
    pub total_items: i64,
}

pub const MAX_PAGE_SIZE: i64 = 100;

/// Row offset of `page`. Pages whose offset does not fit an `i64` are
/// rejected rather than wrapped.
fn offset(page: i64, total_items: i64) -> AppResult<i64> {
    (page - 1)
        .checked_mul(total_items)
        .ok_or_else(|| AppError::invalid_param("page is out of range"))
}

/// Infrastructure failure from a repository call.
fn repo_failure(err: RepoError) -> AppError {
    error!("repository call failed: {}", err);
    AppError::action_failed(err.to_string())
}
