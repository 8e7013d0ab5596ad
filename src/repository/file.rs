use super::RepoResult;
use crate::models::{
    file::{File, FileMeta, FileStatus, Visibility},
    location::{FileLocation, LocationStatus},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CreateLocationParam {
    pub id: Uuid,
    pub barrel_id: Uuid,
    pub external_id: Option<String>,
    pub priority: i32,
    pub status: LocationStatus,
    pub created_at: DateTime<Utc>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct CreateFileParam {
    pub id: Uuid,
    /// Preferred slug; the repository appends a random token before the
    /// extension when it is already taken.
    pub slug: String,
    pub name: String,
    pub mimetype: String,
    pub extension: String,
    pub size: i64,
    pub visibility: Visibility,
    pub status: FileStatus,
    pub meta: FileMeta,
    pub uploaded_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub locations: Vec<CreateLocationParam>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FindFileParam {
    Id(Uuid),
    Slug(String),
    LocationId(Uuid),
}

#[derive(Debug, Clone)]
pub struct UpdateFileParam {
    pub id: Uuid,
    /// Only update when the file is currently in this status.
    pub expected_status: Option<FileStatus>,
    pub status: Option<FileStatus>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSort {
    /// Most recently uploaded first.
    #[default]
    LatestUpload,
    /// Most recently created record first.
    NewestUpload,
    HighestSize,
    LowestSize,
}

/// Empty filter lists match everything.
#[derive(Debug, Clone, Default)]
pub struct SearchFileParam {
    /// Substring match on the file name.
    pub keyword: Option<String>,
    pub statuses: Vec<FileStatus>,
    pub visibilities: Vec<Visibility>,
    pub extensions: Vec<String>,
    pub size_gte: Option<i64>,
    pub size_lte: Option<i64>,
    pub upload_date_gte: Option<DateTime<Utc>>,
    pub upload_date_lte: Option<DateTime<Utc>>,
    pub sort: FileSort,
    pub offset: i64,
    pub limit: i64,
}

/// Items are returned without their locations.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFileResult {
    pub total_items: i64,
    pub items: Vec<File>,
}

#[derive(Debug, Clone)]
pub struct SearchLocationParam {
    pub statuses: Vec<LocationStatus>,
    /// Oldest `created_at` first.
    pub limit: i64,
}

/// Compare-and-set update over a set of locations.
#[derive(Debug, Clone)]
pub struct UpdateLocationByIdsParam {
    pub ids: Vec<Uuid>,
    /// Rows not currently in this status are left untouched.
    pub expected_status: Option<LocationStatus>,
    pub status: LocationStatus,
    pub updated_at: DateTime<Utc>,
    pub external_id: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Persists the file and all of its locations in one transaction.
    async fn create_file(&self, param: CreateFileParam) -> RepoResult<File>;

    /// Returns the file with its locations ordered by priority, whatever the
    /// file status.
    async fn find_file(&self, param: FindFileParam) -> RepoResult<File>;

    async fn search_file(&self, param: SearchFileParam) -> RepoResult<SearchFileResult>;

    /// Fails with `Deleted` when the file is gone and with `NotFound` when it
    /// never existed or is not in `expected_status`.
    async fn update_file(&self, param: UpdateFileParam) -> RepoResult<File>;

    async fn search_location(&self, param: SearchLocationParam) -> RepoResult<Vec<FileLocation>>;

    /// Returns the number of locations actually updated.
    async fn update_location_by_ids(&self, param: UpdateLocationByIdsParam) -> RepoResult<u64>;
}
