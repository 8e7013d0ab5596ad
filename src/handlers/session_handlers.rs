use super::Envelope;
use crate::{errors::AppError, session::CreateSessionParam, state::AppState};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    response::Response,
};

/// `POST /v1/session` with `{"duration": <seconds>, "features": [...]}`.
pub async fn create_session(
    State(state): State<AppState>,
    payload: Result<Json<CreateSessionParam>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(param) = payload.map_err(|err| AppError::invalid_param(err.body_text()))?;
    let session = state.sessions.create_session(param).await?;
    Ok(Envelope::success("success create session", session).created())
}
