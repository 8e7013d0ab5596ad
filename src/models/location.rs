//! Represents a file location (one replica of a file on one barrel) and
//! the state machine every location moves through.

use super::barrel::BarrelStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Priority of the primary location; replicas count upward from here.
pub const PRIMARY_PRIORITY: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum LocationStatus {
    Pending,
    Replicating,
    Uploading,
    Available,
    Deleting,
    Deleted,
}

/// Something that happens to a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationEvent {
    /// The scheduler picked the location up for replication.
    Schedule,
    /// A replication worker started copying bytes from the primary.
    BeginUpload,
    /// The replica driver acknowledged the upload.
    CompleteUpload,
    /// A deletion worker started removing the replica.
    BeginDeletion,
    /// The replica is gone from its barrel.
    CompleteDeletion,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("replication is already proceeded")]
    ReplicationProceeded,
    #[error("deletion is already proceeded")]
    DeletionProceeded,
    #[error("location in status `{from}` cannot handle {event:?}")]
    Rejected {
        from: LocationStatus,
        event: LocationEvent,
    },
}

impl LocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationStatus::Pending => "pending",
            LocationStatus::Replicating => "replicating",
            LocationStatus::Uploading => "uploading",
            LocationStatus::Available => "available",
            LocationStatus::Deleting => "deleting",
            LocationStatus::Deleted => "deleted",
        }
    }

    /// Transition table for locations.
    ///
    /// The graph only moves forward:
    /// `pending -> replicating -> uploading -> available -> deleting -> deleted`,
    /// with deletion reachable from any state that is not already deleting.
    pub fn next(self, event: LocationEvent) -> Result<LocationStatus, TransitionError> {
        use LocationEvent::*;
        use LocationStatus::*;

        match (self, event) {
            (Pending, Schedule) => Ok(Replicating),
            (Replicating, BeginUpload) => Ok(Uploading),
            (Uploading, CompleteUpload) => Ok(Available),
            (Pending | Replicating | Uploading | Available, BeginDeletion) => Ok(Deleting),
            (Deleting, CompleteDeletion) => Ok(Deleted),
            (_, BeginUpload | CompleteUpload) => Err(TransitionError::ReplicationProceeded),
            (_, BeginDeletion | CompleteDeletion) => Err(TransitionError::DeletionProceeded),
            (from, event) => Err(TransitionError::Rejected { from, event }),
        }
    }
}

impl fmt::Display for LocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A replica of a file stored on a specific barrel.
///
/// `barrel_code` and `barrel_status` are read alongside the location so the
/// engine can route and health-check without a second lookup.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileLocation {
    /// Also the object id requested from the driver on upload.
    pub id: Uuid,

    pub file_id: Uuid,

    pub barrel_id: Uuid,

    pub barrel_code: String,

    pub barrel_status: BarrelStatus,

    /// Object id returned by the driver; set once the replica is uploaded.
    pub external_id: Option<String>,

    /// 1 for the primary, 2.. for replicas.
    pub priority: i32,

    pub status: LocationStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub uploaded_at: Option<DateTime<Utc>>,

    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileLocation {
    pub fn is_primary(&self) -> bool {
        self.priority == PRIMARY_PRIORITY
    }
}
