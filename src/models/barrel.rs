//! Represents a barrel, one logical backing store (an account, bucket or
//! namespace on some provider) that file replicas are written to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storage provider a barrel lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Provider {
    GoseidonHippo,
    AwsS3,
    GcloudStorage,
    AlicloudOss,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GoseidonHippo => "goseidon_hippo",
            Provider::AwsS3 => "aws_s3",
            Provider::GcloudStorage => "gcloud_storage",
            Provider::AlicloudOss => "alicloud_oss",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum BarrelStatus {
    Active,
    Inactive,
}

impl BarrelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BarrelStatus::Active => "active",
            BarrelStatus::Inactive => "inactive",
        }
    }
}

/// A barrel record.
///
/// `code` is globally unique and is the key the storage router resolves a
/// driver by. Only `active` barrels accept uploads or serve retrievals.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Barrel {
    pub id: Uuid,

    /// Lowercase alphanumeric, 6–128 characters.
    pub code: String,

    pub name: String,

    pub provider: Provider,

    pub status: BarrelStatus,

    pub created_at: DateTime<Utc>,

    pub updated_at: Option<DateTime<Utc>>,
}

impl Barrel {
    pub fn is_active(&self) -> bool {
        self.status == BarrelStatus::Active
    }
}
