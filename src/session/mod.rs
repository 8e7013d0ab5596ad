//! Short-lived session tokens granting feature-scoped access.
//!
//! A session is a signature whose payload carries
//! `{"features": {"<feature>": <expiry unix seconds>}}`. Verification grants a
//! feature iff the decoded mapping holds it as a key.

pub mod signature;

use crate::{
    errors::{AppError, AppResult},
    validation,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use signature::{CreateSignatureParam, Signer, VerifySignatureParam};
use std::{collections::BTreeMap, sync::Arc};
use tracing::warn;
use uuid::Uuid;

pub const FEATURE_UPLOAD_FILE: &str = "upload_file";
pub const FEATURE_RETRIEVE_FILE: &str = "retrieve_file";
const SUPPORTED_FEATURES: [&str; 2] = [FEATURE_UPLOAD_FILE, FEATURE_RETRIEVE_FILE];

pub const MIN_SESSION_DURATION: i64 = 1;
/// 366 days.
pub const MAX_SESSION_DURATION: i64 = 31_622_400;

/// Typed view of the signature payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub features: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionParam {
    /// Lifetime in seconds.
    pub duration: i64,
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreateSessionResult {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct VerifySessionParam {
    pub token: String,
    pub feature: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifySessionResult {
    pub features: BTreeMap<String, i64>,
}

#[derive(Clone)]
pub struct SessionService {
    signer: Arc<dyn Signer>,
}

impl SessionService {
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self { signer }
    }

    fn validate_features(features: &[String]) -> AppResult<()> {
        validation::item_count("features", features, 1, SUPPORTED_FEATURES.len())?;
        validation::unique("features", features)?;
        if let Some(unknown) = features
            .iter()
            .find(|f| !SUPPORTED_FEATURES.contains(&f.as_str()))
        {
            return Err(AppError::invalid_param(format!(
                "feature `{unknown}` is not supported"
            )));
        }
        Ok(())
    }

    pub async fn create_session(&self, param: CreateSessionParam) -> AppResult<CreateSessionResult> {
        validation::range(
            "duration",
            param.duration,
            MIN_SESSION_DURATION,
            MAX_SESSION_DURATION,
        )?;
        Self::validate_features(&param.features)?;

        let issued_at = Utc::now();
        let duration = Duration::seconds(param.duration);
        let feature_expiry = (issued_at + duration).timestamp();
        let claims = SessionClaims {
            features: param
                .features
                .into_iter()
                .map(|feature| (feature, feature_expiry))
                .collect(),
        };
        let data = serde_json::to_value(&claims)
            .map_err(|err| AppError::action_failed(err.to_string()))?;

        let signature = self
            .signer
            .create_signature(CreateSignatureParam {
                id: Some(Uuid::new_v4().to_string()),
                issued_at: Some(issued_at),
                duration,
                data,
            })
            .await
            .map_err(|err| {
                warn!("failed to sign session: {}", err);
                AppError::action_failed(err.to_string())
            })?;

        Ok(CreateSessionResult {
            token: signature.signature,
            created_at: signature.issued_at,
            expires_at: signature.expires_at,
        })
    }

    pub async fn verify_session(&self, param: VerifySessionParam) -> AppResult<VerifySessionResult> {
        validation::length("token", &param.token, 1, 4096)?;
        validation::length("feature", &param.feature, 1, 64)?;

        let verified = self
            .signer
            .verify_signature(VerifySignatureParam {
                signature: param.token,
            })
            .await
            .map_err(|err| AppError::forbidden(err.to_string()))?;

        let data = verified
            .data
            .as_object()
            .ok_or_else(|| AppError::action_failed("invalid signature data"))?;
        let features = data
            .get("features")
            .cloned()
            .and_then(|features| serde_json::from_value::<BTreeMap<String, i64>>(features).ok())
            .ok_or_else(|| AppError::action_failed("invalid features data"))?;

        if !features.contains_key(&param.feature) {
            return Err(AppError::forbidden("feature is not granted"));
        }

        Ok(VerifySessionResult { features })
    }
}
