//! Driver for a Hippo object store reached over HTTP.
//!
//! - `POST   {host}/v1/file`       multipart upload, single field `file`
//! - `GET    {host}/v1/file/{id}`  raw object bytes
//! - `DELETE {host}/v1/file/{id}`  removes the object
//!
//! Every request carries `Authorization: Basic base64(client_id:client_secret)`.
//! JSON replies use the envelope `{code, message, data}`; code `1000` is
//! success and `1003` means the credentials were refused.

use super::{
    DeleteObjectParam, DeleteObjectResult, DriverError, DriverResult, ObjectStream,
    RetrieveObjectParam, RetrieveObjectResult, StorageDriver, UploadObjectParam,
    UploadObjectResult,
};
use crate::models::from_millis;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use futures::TryStreamExt;
use reqwest::{
    Client, Response, StatusCode,
    header::AUTHORIZATION,
    multipart::{Form, Part},
};
use serde::{Deserialize, de::DeserializeOwned};
use std::io;
use tracing::{debug, warn};

const CODE_SUCCESS: i32 = 1000;
const CODE_UNAUTHENTICATED: i32 = 1003;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HippoConfig {
    pub host: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct HippoResponse<T> {
    code: i32,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    id: String,
    uploaded_at: i64,
}

#[derive(Debug, Deserialize)]
struct DeleteData {
    deleted_at: Option<i64>,
}

#[derive(Clone)]
pub struct HippoDriver {
    client: Client,
    host: String,
    authorization: String,
}

impl HippoDriver {
    pub fn new(config: HippoConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: HippoConfig) -> Self {
        let credentials = format!("{}:{}", config.client_id, config.client_secret);
        Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            authorization: format!("Basic {}", general_purpose::STANDARD.encode(credentials)),
        }
    }

    fn file_url(&self) -> String {
        format!("{}/v1/file", self.host)
    }

    fn object_url(&self, object_id: &str) -> String {
        format!("{}/v1/file/{}", self.host, object_id)
    }
}

/// Multipart filename: `name.extension` when both are present.
fn upload_filename(param: &UploadObjectParam) -> String {
    let name = param.name.as_deref().filter(|n| !n.is_empty());
    let extension = param.extension.as_deref().filter(|e| !e.is_empty());
    match (name, extension) {
        (Some(name), Some(extension)) => format!("{name}.{extension}"),
        (Some(name), None) => name.to_string(),
        (None, _) => param.id.clone().unwrap_or_else(|| "file".to_string()),
    }
}

/// Decode a JSON envelope and map its code to a driver result.
async fn read_envelope<T: DeserializeOwned>(res: Response, object_id: &str) -> DriverResult<T> {
    let status = res.status();
    let body = res.bytes().await?;
    let envelope: HippoResponse<T> = serde_json::from_slice(&body).map_err(|err| {
        DriverError::Backend(format!(
            "unexpected hippo response (status {status}): {err}"
        ))
    })?;

    if envelope.code == CODE_UNAUTHENTICATED {
        return Err(DriverError::Unauthenticated);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(DriverError::NotFound(object_id.to_string()));
    }
    if status != StatusCode::OK || envelope.code != CODE_SUCCESS {
        return Err(DriverError::Backend(envelope.message));
    }
    envelope
        .data
        .ok_or_else(|| DriverError::Backend("hippo response has no data".into()))
}

#[async_trait]
impl StorageDriver for HippoDriver {
    async fn upload_object(&self, param: UploadObjectParam) -> DriverResult<UploadObjectResult> {
        let filename = upload_filename(&param);
        let requested_id = param.id.clone().unwrap_or_default();
        let part = Part::stream(reqwest::Body::wrap_stream(param.data)).file_name(filename);
        let form = Form::new().part("file", part);

        let res = self
            .client
            .post(self.file_url())
            .header(AUTHORIZATION, &self.authorization)
            .multipart(form)
            .send()
            .await?;

        let data: UploadData = read_envelope(res, &requested_id).await.map_err(|err| {
            warn!("hippo upload failed: {}", err);
            err
        })?;
        debug!("hippo stored object {}", data.id);

        Ok(UploadObjectResult {
            object_id: data.id,
            uploaded_at: from_millis(data.uploaded_at),
        })
    }

    async fn retrieve_object(
        &self,
        param: RetrieveObjectParam,
    ) -> DriverResult<RetrieveObjectResult> {
        let res = self
            .client
            .get(self.object_url(&param.object_id))
            .header(AUTHORIZATION, &self.authorization)
            .send()
            .await?;

        if res.status() != StatusCode::OK {
            let err = read_envelope::<serde_json::Value>(res, &param.object_id)
                .await
                .err()
                .unwrap_or_else(|| DriverError::Backend("unexpected hippo response".into()));
            return Err(err);
        }

        let data: ObjectStream = Box::pin(
            res.bytes_stream()
                .map_err(io::Error::other),
        );
        Ok(RetrieveObjectResult {
            data,
            retrieved_at: Utc::now(),
        })
    }

    async fn delete_object(&self, param: DeleteObjectParam) -> DriverResult<DeleteObjectResult> {
        let res = self
            .client
            .delete(self.object_url(&param.object_id))
            .header(AUTHORIZATION, &self.authorization)
            .send()
            .await?;

        let data: DeleteData = read_envelope(res, &param.object_id).await?;
        Ok(DeleteObjectResult {
            deleted_at: data.deleted_at.map(from_millis).unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{collect_stream, stream_from_bytes};
    use axum::{
        Json, Router,
        extract::{Multipart, Path},
        http::{HeaderMap, StatusCode as AxumStatus},
        routing::{get, post},
    };
    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    const EXPECTED_AUTH: &str = "Basic Y2xpZW50OnNlY3JldA==";

    async fn upload(headers: HeaderMap, mut multipart: Multipart) -> (AxumStatus, Json<Value>) {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some(EXPECTED_AUTH) {
            return (
                AxumStatus::UNAUTHORIZED,
                Json(json!({"code": 1003, "message": "invalid credential"})),
            );
        }
        let mut filename = String::new();
        let mut size = 0usize;
        while let Some(field) = multipart.next_field().await.unwrap() {
            assert_eq!(field.name(), Some("file"));
            filename = field.file_name().unwrap_or_default().to_string();
            size = field.bytes().await.unwrap().len();
        }
        (
            AxumStatus::OK,
            Json(json!({
                "code": 1000,
                "message": "success upload file",
                "data": {
                    "id": format!("hippo-{filename}"),
                    "name": filename,
                    "mimetype": "image/jpeg",
                    "size": size,
                    "uploaded_at": 1_700_000_000_123i64
                }
            })),
        )
    }

    async fn retrieve(Path(id): Path<String>) -> Result<Vec<u8>, (AxumStatus, Json<Value>)> {
        if id == "missing" {
            return Err((
                AxumStatus::NOT_FOUND,
                Json(json!({"code": 1004, "message": "file is not found"})),
            ));
        }
        Ok(b"hippo bytes".to_vec())
    }

    async fn delete(Path(id): Path<String>) -> (AxumStatus, Json<Value>) {
        if id == "broken" {
            return (
                AxumStatus::INTERNAL_SERVER_ERROR,
                Json(json!({"code": 1001, "message": "disk on fire"})),
            );
        }
        (
            AxumStatus::OK,
            Json(json!({"code": 1000, "message": "ok", "data": {"deleted_at": 1_700_000_000_999i64}})),
        )
    }

    async fn spawn_backend() -> String {
        let app = Router::new()
            .route("/v1/file", post(upload))
            .route("/v1/file/{id}", get(retrieve).delete(delete));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn driver(host: String, secret: &str) -> HippoDriver {
        HippoDriver::new(HippoConfig {
            host,
            client_id: "client".into(),
            client_secret: secret.into(),
        })
    }

    fn upload_param(name: Option<&str>, extension: Option<&str>) -> UploadObjectParam {
        UploadObjectParam {
            data: stream_from_bytes(&b"dolphin"[..]),
            id: Some("obj-1".into()),
            name: name.map(str::to_string),
            mimetype: Some("image/jpeg".into()),
            extension: extension.map(str::to_string),
        }
    }

    #[test]
    fn filename_joins_name_and_extension() {
        assert_eq!(
            upload_filename(&upload_param(Some("dolphin"), Some("jpg"))),
            "dolphin.jpg"
        );
        assert_eq!(upload_filename(&upload_param(Some("dolphin"), None)), "dolphin");
        assert_eq!(upload_filename(&upload_param(None, Some("jpg"))), "obj-1");
    }

    #[tokio::test]
    async fn upload_maps_success_response() {
        let host = spawn_backend().await;
        let res = driver(host, "secret")
            .upload_object(upload_param(Some("dolphin"), Some("jpg")))
            .await
            .unwrap();

        assert_eq!(res.object_id, "hippo-dolphin.jpg");
        assert_eq!(res.uploaded_at, from_millis(1_700_000_000_123));
    }

    #[tokio::test]
    async fn upload_maps_refused_credentials() {
        let host = spawn_backend().await;
        let err = driver(host, "wrong")
            .upload_object(upload_param(Some("dolphin"), Some("jpg")))
            .await
            .unwrap_err();

        assert!(matches!(err, DriverError::Unauthenticated));
    }

    #[tokio::test]
    async fn retrieve_streams_body_and_maps_missing() {
        let host = spawn_backend().await;
        let hippo = driver(host, "secret");

        let res = hippo
            .retrieve_object(RetrieveObjectParam {
                object_id: "obj-1".into(),
            })
            .await
            .unwrap();
        assert_eq!(&collect_stream(res.data).await.unwrap()[..], b"hippo bytes");

        let err = hippo
            .retrieve_object(RetrieveObjectParam {
                object_id: "missing".into(),
            })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DriverError::NotFound(id) if id == "missing"));
    }

    #[tokio::test]
    async fn delete_surfaces_backend_message() {
        let host = spawn_backend().await;
        let hippo = driver(host, "secret");

        let res = hippo
            .delete_object(DeleteObjectParam {
                object_id: "obj-1".into(),
            })
            .await
            .unwrap();
        assert_eq!(res.deleted_at, from_millis(1_700_000_000_999));

        let err = hippo
            .delete_object(DeleteObjectParam {
                object_id: "broken".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "disk on fire");
    }
}
