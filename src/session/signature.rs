//! Signature provider contract and its HS256 JSON Web Token implementation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signature is expired")]
    Expired,
    #[error("invalid signature")]
    Invalid,
    #[error("signature duration is out of range")]
    InvalidDuration,
    #[error("failed to sign payload: {0}")]
    Encoding(#[source] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone)]
pub struct CreateSignatureParam {
    pub id: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub duration: Duration,
    /// Opaque payload carried inside the signature.
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSignatureResult {
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub signature: String,
}

#[derive(Debug, Clone)]
pub struct VerifySignatureParam {
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifySignatureResult {
    pub data: Value,
}

#[async_trait]
pub trait Signer: Send + Sync {
    async fn create_signature(
        &self,
        param: CreateSignatureParam,
    ) -> Result<CreateSignatureResult, SignatureError>;

    async fn verify_signature(
        &self,
        param: VerifySignatureParam,
    ) -> Result<VerifySignatureResult, SignatureError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    jti: String,
    iat: i64,
    exp: i64,
    #[serde(default)]
    data: Value,
}

/// Signs payloads as HS256 JWTs with a shared secret.
#[derive(Clone)]
pub struct JwtSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

#[async_trait]
impl Signer for JwtSigner {
    async fn create_signature(
        &self,
        param: CreateSignatureParam,
    ) -> Result<CreateSignatureResult, SignatureError> {
        if param.duration <= Duration::zero() {
            return Err(SignatureError::InvalidDuration);
        }

        // JWT timestamps carry whole seconds only.
        let issued_at = param.issued_at.unwrap_or_else(Utc::now);
        let issued_at = DateTime::from_timestamp(issued_at.timestamp(), 0).unwrap_or(issued_at);
        let expires_at = issued_at
            .checked_add_signed(param.duration)
            .ok_or(SignatureError::InvalidDuration)?;

        let claims = JwtClaims {
            jti: param.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            data: param.data,
        };
        let signature = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(SignatureError::Encoding)?;

        Ok(CreateSignatureResult {
            issued_at,
            expires_at,
            signature,
        })
    }

    async fn verify_signature(
        &self,
        param: VerifySignatureParam,
    ) -> Result<VerifySignatureResult, SignatureError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat"]);

        let token = decode::<JwtClaims>(&param.signature, &self.decoding, &validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => SignatureError::Expired,
                _ => SignatureError::Invalid,
            },
        )?;

        Ok(VerifySignatureResult {
            data: token.claims.data,
        })
    }
}
