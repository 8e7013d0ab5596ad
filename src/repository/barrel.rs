use super::RepoResult;
use crate::models::barrel::{Barrel, BarrelStatus, Provider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CreateBarrelParam {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub provider: Provider,
    pub status: BarrelStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UpdateBarrelParam {
    pub id: Uuid,
    pub name: Option<String>,
    pub status: Option<BarrelStatus>,
    pub updated_at: DateTime<Utc>,
}

/// Empty filter lists match everything.
#[derive(Debug, Clone, Default)]
pub struct SearchBarrelParam {
    /// Substring match on name or code.
    pub keyword: Option<String>,
    pub codes: Vec<String>,
    pub statuses: Vec<BarrelStatus>,
    pub providers: Vec<Provider>,
    pub offset: i64,
    pub limit: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchBarrelResult {
    /// Number of rows matching the filters, ignoring pagination.
    pub total_items: i64,
    pub items: Vec<Barrel>,
}

#[async_trait]
pub trait BarrelRepository: Send + Sync {
    /// Fails with `Exists` when the code is taken.
    async fn create_barrel(&self, param: CreateBarrelParam) -> RepoResult<Barrel>;

    async fn find_barrel(&self, id: Uuid) -> RepoResult<Barrel>;

    async fn update_barrel(&self, param: UpdateBarrelParam) -> RepoResult<Barrel>;

    async fn search_barrel(&self, param: SearchBarrelParam) -> RepoResult<SearchBarrelResult>;
}
