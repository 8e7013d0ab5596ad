//! HTTP handlers. Every JSON response is wrapped in the
//! `{"code", "message", "data"}` envelope; failures render through
//! [`AppError`]'s `IntoResponse`.

pub mod barrel_handlers;
pub mod file_handlers;
pub mod health_handlers;
pub mod session_handlers;

use crate::errors::{AppError, AppResult, ErrorCode};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub code: u16,
    pub message: String,
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            code: ErrorCode::Success.as_u16(),
            message: message.into(),
            data,
        }
    }

    /// Same envelope answered with `201 Created`.
    pub fn created(self) -> Response {
        (StatusCode::CREATED, Json(self)).into_response()
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

pub(crate) fn parse_id(field: &str, raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::invalid_param(format!("{field} is invalid")))
}

/// Splits a comma-separated query value into typed items. Blank items are
/// skipped.
pub(crate) fn parse_list<T: DeserializeOwned>(field: &str, raw: Option<&str>) -> AppResult<Vec<T>> {
    raw.into_iter()
        .flat_map(|raw| raw.split(','))
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            serde_json::from_value(Value::String(item.to_string())).map_err(|_| {
                AppError::invalid_param(format!("{field} contains unsupported value `{item}`"))
            })
        })
        .collect()
}
