//! Barrel CRUD.

use super::{Envelope, parse_id, parse_list};
use crate::{
    errors::{AppError, AppResult},
    models::barrel::Barrel,
    services::barrel_service::{
        CreateBarrelParam, SearchBarrelParam, SearchBarrelResult, UpdateBarrelParam,
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    response::Response,
};
use serde::Deserialize;

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|err| AppError::invalid_param(err.body_text()))
}

/// `POST /v1/barrel`
pub async fn create_barrel(
    State(state): State<AppState>,
    payload: Result<Json<CreateBarrelParam>, JsonRejection>,
) -> Result<Response, AppError> {
    let barrel = state.barrels.create_barrel(json_body(payload)?).await?;
    Ok(Envelope::success("success create barrel", barrel).created())
}

/// `GET /v1/barrel/{id}`
pub async fn get_barrel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<Barrel>, AppError> {
    let barrel = state
        .barrels
        .find_barrel_by_id(parse_id("id", &id)?)
        .await?;
    Ok(Envelope::success("success get barrel", barrel))
}

/// `PUT /v1/barrel/{id}`
pub async fn update_barrel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateBarrelParam>, JsonRejection>,
) -> Result<Envelope<Barrel>, AppError> {
    let mut param = json_body(payload)?;
    param.id = parse_id("id", &id)?;
    let barrel = state.barrels.update_barrel_by_id(param).await?;
    Ok(Envelope::success("success update barrel", barrel))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchBarrelQuery {
    pub keyword: Option<String>,
    pub status_in: Option<String>,
    pub provider_in: Option<String>,
    pub page: Option<i64>,
    pub total_items: Option<i64>,
}

/// `GET /v1/barrel`
pub async fn search_barrel(
    State(state): State<AppState>,
    query: Result<Query<SearchBarrelQuery>, QueryRejection>,
) -> Result<Envelope<SearchBarrelResult>, AppError> {
    let Query(query) = query.map_err(|err| AppError::invalid_param(err.body_text()))?;
    let param = SearchBarrelParam {
        keyword: query.keyword.filter(|keyword| !keyword.is_empty()),
        statuses: parse_list("status_in", query.status_in.as_deref())?,
        providers: parse_list("provider_in", query.provider_in.as_deref())?,
        page: query.page.unwrap_or(1),
        total_items: query.total_items.unwrap_or(24),
    };
    let found = state.barrels.search_barrel(param).await?;
    Ok(Envelope::success("success search barrel", found))
}
