use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Request, StatusCode};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use storage_proxy::config::VolumeConfig;
use storage_proxy::http::{manager, Context};
use storage_proxy::token::TokenCodec;
use storage_proxy::volume::VolumeRouter;
use tower::ServiceExt;

const SECRET: &str = "test-manager-secret";

fn context(mount: &std::path::Path) -> Arc<Context> {
    let mut volumes = BTreeMap::new();
    volumes.insert(
        "local".to_string(),
        VolumeConfig { backend: "posix".into(), path: mount.to_string_lossy().into_owned(), fsprefix: ".".into() },
    );
    let router = VolumeRouter::from_config(&volumes).unwrap();
    Arc::new(Context {
        volumes: router,
        tokens: TokenCodec::new(SECRET),
        manager_secret: SECRET.to_string(),
        scandir_limit: 0,
        max_upload_size: 100 * 1024 * 1024,
        session_expire: Duration::from_secs(900),
    })
}

fn post_request(path: &str, body: Value) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("x-backendai-storage-auth-token", SECRET)
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn create_list_and_delete_vfolder() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let app = manager::router(ctx);

    let vfid = "82a6ba2b7b8e41deb5ee2c909ce34bcb";

    let response = app
        .clone()
        .oneshot(post_request("/folder/create", json!({ "volume": "local", "vfid": vfid })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let mangled = dir.path().join(&vfid[0..2]).join(&vfid[2..4]).join(&vfid[4..]);
    assert!(mangled.exists());

    let response = app
        .clone()
        .oneshot(post_request("/folder/delete", json!({ "volume": "local", "vfid": vfid })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!mangled.exists());
}

#[tokio::test]
async fn create_without_secret_is_forbidden() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let app = manager::router(ctx);

    let vfid = "82a6ba2b7b8e41deb5ee2c909ce34bcb";
    let request = Request::builder()
        .method("POST")
        .uri("/folder/create")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(json!({ "volume": "local", "vfid": vfid }).to_string()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn sandbox_escape_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let app = manager::router(ctx);

    let vfid = "82a6ba2b7b8e41deb5ee2c909ce34bcb";
    app.clone()
        .oneshot(post_request("/folder/create", json!({ "volume": "local", "vfid": vfid })))
        .await
        .unwrap();

    let response = app
        .oneshot(post_request(
            "/folder/file/mkdir",
            json!({ "volume": "local", "vfid": vfid, "relpath": "../../etc" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!dir.path().parent().unwrap().join("etc").exists());
}

#[tokio::test]
async fn metadata_round_trips_through_http() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let app = manager::router(ctx);

    let vfid = "82a6ba2b7b8e41deb5ee2c909ce34bcb";
    app.clone()
        .oneshot(post_request("/folder/create", json!({ "volume": "local", "vfid": vfid })))
        .await
        .unwrap();

    let payload_b64 = STANDARD.encode(b"hello");
    let response = app
        .clone()
        .oneshot(post_request(
            "/folder/metadata",
            json!({ "volume": "local", "vfid": vfid, "payload": payload_b64 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let request = Request::builder()
        .method("GET")
        .uri(format!("/folder/metadata?volume=local&vfid={vfid}"))
        .header("x-backendai-storage-auth-token", SECRET)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["payload"], payload_b64);
}

#[tokio::test]
async fn upload_session_mint_returns_token_and_session() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let app = manager::router(ctx);

    let vfid = "82a6ba2b7b8e41deb5ee2c909ce34bcb";
    app.clone()
        .oneshot(post_request("/folder/create", json!({ "volume": "local", "vfid": vfid })))
        .await
        .unwrap();

    let response = app
        .oneshot(post_request(
            "/folder/file/upload",
            json!({ "volume": "local", "vfid": vfid, "relpath": "data.bin", "size": 10 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert!(body["token"].as_str().unwrap().contains('.'));
    assert!(body["session"].as_str().is_some());
}
