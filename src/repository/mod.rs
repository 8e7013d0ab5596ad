//! Data access contracts used by the services, plus their SQLite
//! implementation.

pub mod barrel;
pub mod file;
pub mod sqlite;

use thiserror::Error;

pub use barrel::{
    BarrelRepository, CreateBarrelParam, SearchBarrelParam, SearchBarrelResult, UpdateBarrelParam,
};
pub use file::{
    CreateFileParam, CreateLocationParam, FileRepository, FileSort, FindFileParam,
    SearchFileParam, SearchFileResult, SearchLocationParam, UpdateFileParam,
    UpdateLocationByIdsParam,
};

/// Repository failures. The first four variants are sentinels that services
/// match on explicitly; the rest are infrastructure errors.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("record is not found")]
    NotFound,
    #[error("record is already exists")]
    Exists,
    #[error("record is deleted")]
    Deleted,
    #[error("invalid repository param: {0}")]
    InvalidParam(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;
