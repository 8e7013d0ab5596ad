use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use std::fmt;

/// Result code shared by every service operation and the HTTP envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u16")]
pub enum ErrorCode {
    Success,
    ActionFailed,
    InvalidParam,
    ActionForbidden,
    ResourceNotFound,
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        match self {
            ErrorCode::Success => 1000,
            ErrorCode::ActionFailed => 1001,
            ErrorCode::InvalidParam => 1002,
            ErrorCode::ActionForbidden => 1003,
            ErrorCode::ResourceNotFound => 1004,
        }
    }

    /// HTTP status the front-end answers with for this code.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::Success => StatusCode::OK,
            ErrorCode::ActionFailed => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::InvalidParam => StatusCode::BAD_REQUEST,
            ErrorCode::ActionForbidden => StatusCode::FORBIDDEN,
            ErrorCode::ResourceNotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code.as_u16()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Success => "SUCCESS",
            ErrorCode::ActionFailed => "ACTION_FAILED",
            ErrorCode::InvalidParam => "INVALID_PARAM",
            ErrorCode::ActionForbidden => "ACTION_FORBIDDEN",
            ErrorCode::ResourceNotFound => "RESOURCE_NOTFOUND",
        };
        f.write_str(name)
    }
}

/// Error returned by every service operation: a taxonomy code plus a
/// caller-facing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppError {
    pub code: ErrorCode,
    pub message: String,
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
        }
    }

    pub fn action_failed(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ActionFailed, msg)
    }

    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParam, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ActionForbidden, msg)
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceNotFound, msg)
    }

    /// Errors after which a queued message must not be redelivered.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ResourceNotFound | ErrorCode::ActionForbidden
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "code": self.code.as_u16(),
            "message": self.message,
        }));

        (self.code.status(), body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::action_failed(err.to_string())
    }
}
