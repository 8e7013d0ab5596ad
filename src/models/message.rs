//! Queue payloads exchanged between the file engine and its workers.

use super::location::LocationStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Published to `file_replication` once per pending location picked up by
/// the scheduler.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ScheduleReplicationMessage {
    pub location_id: Uuid,
    pub file_id: Uuid,
    pub barrel_id: Uuid,
    pub priority: i32,
    pub status: LocationStatus,
}

/// Published to `file_deletion` once per location of a deleted file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DeleteFileMessage {
    pub location_id: Uuid,
    pub barrel_id: Uuid,
    pub file_id: Uuid,
    pub status: LocationStatus,
    /// Milliseconds since epoch.
    pub requested_at: i64,
}
