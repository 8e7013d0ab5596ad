use super::{MAX_PAGE_SIZE, SearchSummary, offset, repo_failure};
use crate::{
    errors::{AppError, AppResult},
    models::{
        barrel::{Barrel, BarrelStatus, Provider},
        now_millis,
    },
    repository::{self as repo, BarrelRepository, RepoError},
    validation,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBarrelParam {
    pub code: String,
    pub name: String,
    pub provider: Provider,
    pub status: BarrelStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateBarrelParam {
    #[serde(skip)]
    pub id: Uuid,
    pub name: Option<String>,
    pub status: Option<BarrelStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchBarrelParam {
    pub keyword: Option<String>,
    #[serde(default)]
    pub statuses: Vec<BarrelStatus>,
    #[serde(default)]
    pub providers: Vec<Provider>,
    pub page: i64,
    pub total_items: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchBarrelResult {
    pub summary: SearchSummary,
    pub items: Vec<Barrel>,
}

pub(crate) fn validate_code(code: &str) -> AppResult<()> {
    validation::length("code", code, 6, 128)?;
    validation::lower_alphanumeric("code", code)
}

fn validate_name(name: &str) -> AppResult<()> {
    validation::length("name", name, 1, 64)?;
    validation::printable_ascii("name", name)
}

/// CRUD over logical barrels.
#[derive(Clone)]
pub struct BarrelService {
    barrels: Arc<dyn BarrelRepository>,
}

impl BarrelService {
    pub fn new(barrels: Arc<dyn BarrelRepository>) -> Self {
        Self { barrels }
    }

    pub async fn create_barrel(&self, param: CreateBarrelParam) -> AppResult<Barrel> {
        validate_code(&param.code)?;
        validate_name(&param.name)?;

        let barrel = self
            .barrels
            .create_barrel(repo::CreateBarrelParam {
                id: Uuid::new_v4(),
                code: param.code,
                name: param.name,
                provider: param.provider,
                status: param.status,
                created_at: now_millis(),
            })
            .await
            .map_err(|err| match err {
                RepoError::Exists => AppError::action_failed("barrel is already exists"),
                err => repo_failure(err),
            })?;

        info!("created barrel {} ({})", barrel.code, barrel.provider.as_str());
        Ok(barrel)
    }

    pub async fn find_barrel_by_id(&self, id: Uuid) -> AppResult<Barrel> {
        self.barrels.find_barrel(id).await.map_err(|err| match err {
            RepoError::NotFound => AppError::not_found("barrel is not found"),
            err => repo_failure(err),
        })
    }

    pub async fn update_barrel_by_id(&self, param: UpdateBarrelParam) -> AppResult<Barrel> {
        if let Some(name) = &param.name {
            validate_name(name)?;
        }

        self.barrels
            .update_barrel(repo::UpdateBarrelParam {
                id: param.id,
                name: param.name,
                status: param.status,
                updated_at: now_millis(),
            })
            .await
            .map_err(|err| match err {
                RepoError::NotFound => AppError::not_found("barrel is not found"),
                err => repo_failure(err),
            })
    }

    pub async fn search_barrel(&self, param: SearchBarrelParam) -> AppResult<SearchBarrelResult> {
        validation::at_least("page", param.page, 1)?;
        validation::range("total_items", param.total_items, 1, MAX_PAGE_SIZE)?;
        if let Some(keyword) = &param.keyword {
            validation::length("keyword", keyword, 0, 64)?;
        }
        let offset = offset(param.page, param.total_items)?;

        let found = self
            .barrels
            .search_barrel(repo::SearchBarrelParam {
                keyword: param.keyword,
                codes: Vec::new(),
                statuses: param.statuses,
                providers: param.providers,
                offset,
                limit: param.total_items,
            })
            .await
            .map_err(repo_failure)?;

        Ok(SearchBarrelResult {
            summary: SearchSummary {
                page: param.page,
                total_items: found.total_items,
            },
            items: found.items,
        })
    }
}
