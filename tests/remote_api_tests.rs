//! The HTTP side against an in-process stand-in of the cloud API.

mod common;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use common::{register_text_object, settings, test_db};
use media_cloud_sync::{
    CloudGateway, Credentials, HttpCloudGateway, SyncEngine, SyncError, SyncOutcome, SyncSettings,
    services::{
        endpoint::UploadTarget,
        upload_client::{MultipartEncoder, Transport, UploadClient},
    },
};
use serde_json::json;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
struct CapturedUpload {
    content_type: String,
    content_length: Option<u64>,
    body: Vec<u8>,
}

#[derive(Clone)]
struct ApiState {
    base: String,
    uploads: Arc<Mutex<Vec<CapturedUpload>>>,
}

struct FakeApi {
    base: String,
    uploads: Arc<Mutex<Vec<CapturedUpload>>>,
}

impl FakeApi {
    fn uploads(&self) -> Vec<CapturedUpload> {
        self.uploads.lock().unwrap().clone()
    }
}

async fn spawn_api() -> FakeApi {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let uploads = Arc::new(Mutex::new(Vec::new()));
    let state = ApiState {
        base: base.clone(),
        uploads: uploads.clone(),
    };

    let app = Router::new()
        .route("/opapi/GetAuthCode", get(auth_code))
        .route("/opapi/Getuploads", get(upload_target))
        .route("/opapi/GetSign", get(sign))
        .route("/upload", post(receive_upload))
        .with_state(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeApi { base, uploads }
}

async fn auth_code(Query(params): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
    if params.get("aid").map(String::as_str) == Some("1001")
        && params.get("key").map(String::as_str) == Some("good")
    {
        Json(json!({ "code": 200, "data": "AUTH-1" }))
    } else {
        Json(json!({ "code": 403, "msg": "invalid key" }))
    }
}

async fn upload_target(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    if params.get("authcode").map(String::as_str) != Some("AUTH-1") {
        return Json(json!({ "code": "401", "msg": "expired" }));
    }
    Json(json!({ "code": "200", "data": { "url": state.base, "query": "sig=ok" } }))
}

async fn sign(Query(params): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
    let file = params.get("file").cloned().unwrap_or_default();
    Json(json!({ "code": 200, "data": format!("https://dl.example/{file}?sig=1") }))
}

async fn receive_upload(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if params.get("sig").map(String::as_str) == Some("reject") {
        return (StatusCode::FORBIDDEN, "signature denied".to_string());
    }
    let captured = CapturedUpload {
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        content_length: headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()),
        body: body.to_vec(),
    };
    let count = {
        let mut uploads = state.uploads.lock().unwrap();
        uploads.push(captured);
        uploads.len()
    };
    let reply = json!({ "code": 200, "data": format!("https://cdn.example/stored/{count}") });
    (StatusCode::OK, reply.to_string())
}

fn remote_settings(api: &FakeApi) -> SyncSettings {
    SyncSettings {
        api_base_url: api.base.clone(),
        ..settings()
    }
}

#[tokio::test]
async fn both_transports_send_identical_bodies() {
    let api = spawn_api().await;
    let dir = tempfile::tempdir().unwrap();
    let contents = [b"\xFF\xD8\xFF\xE0".as_slice(), &[7u8; 70_000]].concat();
    let path = common::write_file(dir.path(), "photo.jpg", &contents);
    let target = UploadTarget {
        base_url: api.base.clone(),
        signed_query: "sig=ok".into(),
    };

    let client = UploadClient::new(reqwest::Client::new());
    let streamed = client
        .upload_via(&path, &target, Transport::Streaming, "unused")
        .await
        .unwrap();
    assert_eq!(streamed, "https://cdn.example/stored/1");

    // the native form picks its own boundary; frame the buffered body with it
    let native = api.uploads().remove(0);
    let boundary = native
        .content_type
        .strip_prefix("multipart/form-data; boundary=")
        .expect("multipart content type")
        .to_string();
    let buffered = client
        .upload_via(&path, &target, Transport::Buffered, &boundary)
        .await
        .unwrap();
    assert_eq!(buffered, "https://cdn.example/stored/2");

    let expected =
        MultipartEncoder::new(boundary.as_str(), "photo.jpg", "image/jpeg").encode(&contents);
    let uploads = api.uploads();
    for upload in &uploads {
        assert_eq!(upload.content_type, format!("multipart/form-data; boundary={boundary}"));
        assert_eq!(upload.content_length, Some(expected.len() as u64));
        assert_eq!(upload.body, expected);
    }
    assert_eq!(uploads[0].body, uploads[1].body);
}

#[tokio::test]
async fn rejected_upload_carries_status_and_body() {
    let api = spawn_api().await;
    let dir = tempfile::tempdir().unwrap();
    let path = common::write_file(dir.path(), "doc.txt", b"hello");
    let target = UploadTarget {
        base_url: api.base.clone(),
        signed_query: "sig=reject".into(),
    };

    let err = UploadClient::new(reqwest::Client::new())
        .upload(&path, &target)
        .await
        .unwrap_err();
    match err {
        SyncError::Upload { status, snippet } => {
            assert_eq!(status, 403);
            assert_eq!(snippet, "signature denied");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(api.uploads().is_empty());
}

#[tokio::test]
async fn unreachable_upload_host_is_a_transport_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::write_file(dir.path(), "doc.txt", b"hello");
    let target = UploadTarget {
        base_url: "http://127.0.0.1:9".into(),
        signed_query: "sig=ok".into(),
    };

    let err = UploadClient::new(reqwest::Client::new())
        .with_transport(Transport::Buffered)
        .upload(&path, &target)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Transport(_)));
    assert!(err.is_page_level());
}

#[tokio::test]
async fn gateway_authorizes_and_resolves_targets() {
    let api = spawn_api().await;
    let gateway = HttpCloudGateway::from_settings(&remote_settings(&api)).unwrap();

    let auth = gateway.authorize().await.unwrap();
    assert_eq!(auth.as_str(), "AUTH-1");
    let target = gateway.resolve_upload_target(&auth).await.unwrap();
    assert_eq!(target.upload_url(), format!("{}/upload?sig=ok", api.base));
    assert_eq!(
        gateway.download_link(&auth, "a.jpg").await.unwrap(),
        "https://dl.example/a.jpg?sig=1"
    );
}

#[tokio::test]
async fn bad_credentials_fail_authorization() {
    let api = spawn_api().await;
    let settings = SyncSettings {
        credentials: Credentials {
            account_id: "1001".into(),
            secret_key: "wrong".into(),
        },
        ..remote_settings(&api)
    };
    let gateway = HttpCloudGateway::from_settings(&settings).unwrap();
    let err = gateway.authorize().await.unwrap_err();
    assert!(matches!(err, SyncError::Auth(ref msg) if msg.contains("invalid key")));

    let empty = SyncSettings {
        credentials: Credentials::default(),
        ..remote_settings(&api)
    };
    let gateway = HttpCloudGateway::from_settings(&empty).unwrap();
    assert!(matches!(gateway.authorize().await, Err(SyncError::Auth(_))));
}

#[tokio::test]
async fn engine_syncs_through_the_http_gateway() {
    let api = spawn_api().await;
    let db = test_db().await;
    let settings = remote_settings(&api);
    let gateway = HttpCloudGateway::from_settings(&settings).unwrap();
    let engine = SyncEngine::new(settings.clone(), db.pool.clone(), Arc::new(gateway));
    register_text_object(&engine, db.dir.path(), 1).await;

    let check = engine.test_connection().await.unwrap();
    assert!(check.authorized);
    assert_eq!(check.upload_endpoint, format!("{}/upload?<signed>", api.base));

    let outcome = engine.sync(1).await.unwrap();
    assert_eq!(outcome.cloud_url(), Some("https://cdn.example/stored/1"));
    assert!(matches!(outcome, SyncOutcome::Synced { already_synced: false, .. }));

    let upload = &api.uploads()[0];
    let text = String::from_utf8_lossy(&upload.body);
    assert!(text.contains("filename=\"obj-1.txt\""));
    assert!(text.contains("object 1"));

    assert_eq!(
        engine.download_link("obj-1.txt").await.unwrap(),
        "https://dl.example/obj-1.txt?sig=1"
    );

    let buffered = HttpCloudGateway::from_settings(&settings)
        .unwrap()
        .with_transport(Transport::Buffered);
    let engine = SyncEngine::new(settings, db.pool.clone(), Arc::new(buffered));
    register_text_object(&engine, db.dir.path(), 2).await;
    let outcome = engine.sync(2).await.unwrap();
    assert_eq!(outcome.cloud_url(), Some("https://cdn.example/stored/2"));
    assert!(String::from_utf8_lossy(&api.uploads()[1].body).contains("object 2"));
}
