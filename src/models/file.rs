//! Represents a logical file and its replicas.

use super::location::{FileLocation, PRIMARY_PRIORITY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Protected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum FileStatus {
    Uploading,
    Available,
    Deleting,
    Deleted,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Uploading => "uploading",
            FileStatus::Available => "available",
            FileStatus::Deleting => "deleting",
            FileStatus::Deleted => "deleted",
        }
    }
}

/// User-supplied key/value metadata attached to a file.
pub type FileMeta = BTreeMap<String, String>;

/// A logical file, addressed publicly by its `slug`.
///
/// The bytes themselves live on one or more barrels; `locations` is ordered
/// by priority when read back from the repository.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct File {
    pub id: Uuid,

    /// URL-safe and globally unique. May end in `.<extension>`.
    pub slug: String,

    pub name: String,

    pub mimetype: String,

    pub extension: String,

    /// Size in bytes, at least 1.
    pub size: i64,

    pub visibility: Visibility,

    pub status: FileStatus,

    pub meta: FileMeta,

    pub uploaded_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    pub updated_at: Option<DateTime<Utc>>,

    pub deleted_at: Option<DateTime<Utc>>,

    pub locations: Vec<FileLocation>,
}

impl File {
    pub fn is_available(&self) -> bool {
        self.status == FileStatus::Available
    }

    pub fn primary_location(&self) -> Option<&FileLocation> {
        self.locations
            .iter()
            .find(|location| location.priority == PRIMARY_PRIORITY)
    }

    pub fn location(&self, location_id: Uuid) -> Option<&FileLocation> {
        self.locations
            .iter()
            .find(|location| location.id == location_id)
    }
}
