//! Storage drivers: uniform upload, retrieve and delete over one backend.
//!
//! Every call is an ordinary future, so callers cancel an operation by
//! dropping it. Drivers are shared across tasks behind `Arc` and must be safe
//! for concurrent use.

pub mod hippo;
pub mod local;
pub mod router;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::{io, pin::Pin};
use thiserror::Error;

/// A stream of object bytes. Retrieval streams start at byte 0; upload
/// consumes the stream exactly once.
pub type ObjectStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Wraps an in-memory payload as an [`ObjectStream`].
pub fn stream_from_bytes(data: impl Into<Bytes>) -> ObjectStream {
    let data: Bytes = data.into();
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Drains an [`ObjectStream`] into memory.
pub async fn collect_stream(mut stream: ObjectStream) -> io::Result<Bytes> {
    use futures::StreamExt;

    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(buf))
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("unauthenticated access")]
    Unauthenticated,
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object id `{0}`")]
    InvalidObjectId(String),
    #[error("{0}")]
    Backend(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type DriverResult<T> = Result<T, DriverError>;

pub struct UploadObjectParam {
    pub data: ObjectStream,
    /// Object id to request; drivers may ignore it and generate their own.
    pub id: Option<String>,
    pub name: Option<String>,
    pub mimetype: Option<String>,
    pub extension: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadObjectResult {
    /// Id the caller must store to address the object later.
    pub object_id: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrieveObjectParam {
    pub object_id: String,
}

pub struct RetrieveObjectResult {
    pub data: ObjectStream,
    pub retrieved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteObjectParam {
    pub object_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteObjectResult {
    pub deleted_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageDriver: Send + Sync {
    async fn upload_object(&self, param: UploadObjectParam) -> DriverResult<UploadObjectResult>;

    async fn retrieve_object(
        &self,
        param: RetrieveObjectParam,
    ) -> DriverResult<RetrieveObjectResult>;

    async fn delete_object(&self, param: DeleteObjectParam) -> DriverResult<DeleteObjectResult>;
}
