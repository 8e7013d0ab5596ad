//! End-to-end flows through the HTTP router, backed by local-disk barrels.

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use barrel_gateway::{
    queue::{MemoryQueue, Queuer, WorkerHost},
    repository::sqlite::{self, SqliteBarrelRepository, SqliteFileRepository},
    routes::routes::routes,
    services::{BarrelService, FileService},
    session::{SessionService, signature::JwtSigner},
    state::AppState,
    storage::{
        StorageDriver,
        local::{LocalConfig, LocalDriver},
        router::StorageRouter,
    },
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const APP_HOST: &str = "http://gateway.test";
const BOUNDARY: &str = "gateway-test-boundary";
const PRIMARY: &str = "localprimary";
const REPLICA: &str = "localreplica";

struct Gateway {
    app: Router,
    files: FileService,
    shutdown: CancellationToken,
    _dirs: (TempDir, TempDir),
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn gateway() -> Gateway {
    let db = sqlite::connect("sqlite::memory:", 1).await.unwrap();
    sqlite::run_migrations(&db).await.unwrap();
    let db = Arc::new(db);

    let primary_dir = TempDir::new().unwrap();
    let replica_dir = TempDir::new().unwrap();
    let primary: Arc<dyn StorageDriver> = Arc::new(LocalDriver::new(LocalConfig {
        root: primary_dir.path().to_path_buf(),
    }));
    let replica: Arc<dyn StorageDriver> = Arc::new(LocalDriver::new(LocalConfig {
        root: replica_dir.path().to_path_buf(),
    }));
    let router = StorageRouter::new([(PRIMARY, primary), (REPLICA, replica)]);

    let shutdown = CancellationToken::new();
    let sessions = SessionService::new(Arc::new(JwtSigner::new(b"gateway-test-secret")));
    let barrel_repo = Arc::new(SqliteBarrelRepository::new(db.clone()));
    let queuer: Arc<dyn Queuer> = Arc::new(MemoryQueue::new(4, shutdown.clone()));
    let files = FileService::new(
        Arc::new(SqliteFileRepository::new(db.clone())),
        barrel_repo.clone(),
        sessions.clone(),
        router.clone(),
        queuer.clone(),
        APP_HOST,
    );
    WorkerHost::new(queuer, files.clone(), shutdown.clone())
        .start()
        .await
        .unwrap();

    let state = AppState {
        db,
        files: files.clone(),
        barrels: BarrelService::new(barrel_repo),
        sessions,
        router,
    };

    Gateway {
        app: routes().with_state(state),
        files,
        shutdown,
        _dirs: (primary_dir, replica_dir),
    }
}

impl Gateway {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    async fn send_json(&self, request: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = self.send(request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send_json(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn create_barrel(&self, code: &str) -> Value {
        let body = json!({
            "code": code,
            "name": format!("Barrel {code}"),
            "provider": "goseidon_hippo",
            "status": "active",
        });
        let (status, body) = self
            .send_json(
                Request::post("/v1/barrel")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"].clone()
    }

    async fn upload(&self, file_name: &str, data: &[u8], fields: &[(&str, &str)]) -> (StatusCode, Value) {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: image/jpeg\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        self.send_json(
            Request::post("/v1/file")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }
}

#[tokio::test]
async fn health_endpoints_report_ready() {
    let gw = gateway().await;

    let (status, body) = gw.get("/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = gw.get("/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checks"]["sqlite"]["ok"], true);
    assert_eq!(body["storages"], json!([PRIMARY, REPLICA]));
}

#[tokio::test]
async fn uploaded_file_is_served_and_replicated() {
    let gw = gateway().await;
    gw.create_barrel(PRIMARY).await;
    gw.create_barrel(REPLICA).await;

    let (status, body) = gw
        .upload(
            "Dolphin 22.jpg",
            b"hello dolphin",
            &[("barrels", "localprimary,localreplica"), ("meta", r#"{"album":"sea"}"#)],
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["code"], 1000);
    let data = &body["data"];
    assert_eq!(data["slug"], "dolphin-22.jpg");
    assert_eq!(data["size"], 13);
    assert_eq!(data["meta"]["album"], "sea");
    assert_eq!(data["file_url"], format!("{APP_HOST}/file/dolphin-22.jpg"));
    assert_eq!(data["access_url"], data["file_url"]);
    assert_eq!(data["locations"][0]["status"], "available");
    assert_eq!(data["locations"][1]["status"], "pending");
    let file_id = data["id"].as_str().unwrap().to_string();

    let response = gw
        .app
        .clone()
        .oneshot(Request::get("/file/dolphin-22.jpg").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "13");
    let served = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&served[..], b"hello dolphin");

    let scheduled = gw.files.schedule_replication(10).await.unwrap();
    assert_eq!(scheduled.total_items, 1);

    let mut replica_status = Value::Null;
    for _ in 0..100 {
        let (_, body) = gw.get(&format!("/v1/file/{file_id}")).await;
        replica_status = body["data"]["locations"][1]["status"].clone();
        if replica_status == "available" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(replica_status, "available");

    // Same name again gets a collision suffix.
    let (status, body) = gw
        .upload("Dolphin 22.jpg", b"another", &[("barrels", PRIMARY)])
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_ne!(body["data"]["slug"], "dolphin-22.jpg");
    assert!(body["data"]["slug"].as_str().unwrap().ends_with(".jpg"));

    let (status, body) = gw.get("/v1/file?keyword=dolphin&sort=lowest_size").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["summary"]["total_items"], 2);
    assert_eq!(body["data"]["items"][0]["size"], 7);
}

#[tokio::test]
async fn protected_file_requires_session() {
    let gw = gateway().await;
    gw.create_barrel(PRIMARY).await;

    let (status, body) = gw
        .upload(
            "secret.jpg",
            b"classified",
            &[("barrels", PRIMARY), ("visibility", "protected")],
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let access_url = body["data"]["access_url"].as_str().unwrap().to_string();
    assert!(access_url.starts_with(&format!("{APP_HOST}/file/secret.jpg?token=")));

    let (status, body) = gw.get("/file/secret.jpg").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], 1003);
    assert_eq!(body["message"], "session is not specified");

    let (status, _) = gw.get("/file/secret.jpg?token=forged").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, served) = gw
        .send(
            Request::get(access_url.trim_start_matches(APP_HOST))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(served, b"classified");

    let (status, body) = gw
        .send_json(
            Request::post("/v1/session")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"duration": 60, "features": ["retrieve_file"]}).to_string(),
                ))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let token = body["data"]["token"].as_str().unwrap();

    let (status, served) = gw
        .send(
            Request::get(format!("/file/secret.jpg?token={token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(served, b"classified");
}

#[tokio::test]
async fn deleted_file_is_no_longer_served() {
    let gw = gateway().await;
    gw.create_barrel(PRIMARY).await;

    let (_, body) = gw
        .upload("photo.jpg", b"bytes", &[("barrels", PRIMARY)])
        .await;
    let file_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = gw
        .send_json(
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/v1/file/{file_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["requested_at"].is_string());

    let (status, body) = gw.get("/file/photo.jpg").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "file is not available");

    let mut location_status = Value::Null;
    for _ in 0..100 {
        let (_, body) = gw.get(&format!("/v1/file/{file_id}")).await;
        assert_eq!(body["data"]["status"], "deleted");
        location_status = body["data"]["locations"][0]["status"].clone();
        if location_status == "deleted" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(location_status, "deleted");
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let gw = gateway().await;
    let barrel = gw.create_barrel(PRIMARY).await;

    let (status, body) = gw
        .upload("photo.jpg", b"bytes", &[("barrels", "missingbarrel")])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "there is invalid barrel");

    let (status, body) = gw.get("/v1/file/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1002);

    let (status, body) = gw
        .get(&format!("/v1/file/{}", uuid::Uuid::new_v4()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "file is not found");

    let (status, body) = gw
        .send_json(
            Request::put(format!("/v1/barrel/{}", barrel["id"].as_str().unwrap()))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"status": "inactive"}).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "inactive");

    let (status, _) = gw
        .upload("photo.jpg", b"bytes", &[("barrels", PRIMARY)])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = gw.get("/v1/barrel?status_in=inactive").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["summary"]["total_items"], 1);
}
