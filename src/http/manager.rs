//! Manager plane: the cluster control plane's trusted, shared-secret API.
//!
//! Route table mirrors the original `init_manager_app`, with its two
//! documented bugs fixed (see SPEC_FULL.md §9 / DESIGN.md): `get_metadata`/
//! `set_metadata`/`get_performance_metric` transport their real payload
//! instead of a placeholder `{"status":"ok"}`, and `/folder/file/delete` is
//! wired to `delete_files`, not to the upload-session handler.

use axum::extract::{Query, Request, State};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use crate::error::{StorageError, StorageResult};
use crate::http::validation::*;
use crate::http::SharedContext;
use crate::token::{SessionClaims, SessionOp};

const AUTH_HEADER: &str = "x-backendai-storage-auth-token";

pub fn router(ctx: SharedContext) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/volumes", get(list_volumes))
        .route("/folder/create", post(create_vfolder))
        .route("/folder/delete", post(delete_vfolder))
        .route("/folder/clone", post(clone_vfolder))
        .route("/folder/mount", get(vfolder_mount))
        .route("/folder/usage", get(vfolder_usage))
        .route("/folder/metadata", get(get_metadata).post(set_metadata))
        .route("/volume/performance-metric", get(performance_metric))
        .route("/folder/file/mkdir", post(mkdir))
        .route("/folder/file/list", post(list_files))
        .route("/folder/file/rename", post(rename_file))
        .route("/folder/file/download", post(create_download_session))
        .route("/folder/file/upload", post(create_upload_session))
        .route("/folder/file/delete", post(delete_files))
        .layer(middleware::from_fn_with_state(ctx.clone(), require_secret))
        .with_state(ctx)
}

async fn require_secret(
    State(ctx): State<SharedContext>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let provided = headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok()).unwrap_or("");
    if !constant_time_eq(provided.as_bytes(), ctx.manager_secret.as_bytes()) {
        return StorageError::InvalidToken("missing or incorrect manager secret".into())
            .into_response();
    }
    next.run(request).await
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

async fn status() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct VolumeInfo {
    name: String,
    backend: String,
    path: String,
    fsprefix: String,
    capabilities: Vec<crate::volume::Capability>,
}

async fn list_volumes(State(ctx): State<SharedContext>) -> Json<serde_json::Value> {
    let volumes: Vec<VolumeInfo> = ctx
        .volumes
        .list()
        .map(|entry| VolumeInfo {
            name: entry.name.clone(),
            backend: entry.backend.clone(),
            path: entry.instance.mount_path().to_string_lossy().into_owned(),
            fsprefix: entry.fsprefix.clone(),
            capabilities: entry.instance.capabilities().as_slice().to_vec(),
        })
        .collect();
    Json(json!({ "volumes": volumes }))
}

async fn create_vfolder(
    State(ctx): State<SharedContext>,
    Json(req): Json<CreateVFolderRequest>,
) -> StorageResult<StatusCode> {
    let options = req.validate()?;
    let volume = ctx.volumes.get(&req.volume)?;
    volume.create_vfolder(&req.vfid, options).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_vfolder(
    State(ctx): State<SharedContext>,
    Json(req): Json<VFolderRequest>,
) -> StorageResult<StatusCode> {
    req.validate()?;
    let volume = ctx.volumes.get(&req.volume)?;
    volume.delete_vfolder(&req.vfid).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clone_vfolder(
    State(ctx): State<SharedContext>,
    Json(req): Json<CloneVFolderRequest>,
) -> StorageResult<StatusCode> {
    req.validate()?;
    let volume = ctx.volumes.get(&req.volume)?;
    volume.clone_vfolder(&req.src_vfid, &req.new_vfid).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn vfolder_mount(
    State(ctx): State<SharedContext>,
    Query(req): Query<VFolderRequest>,
) -> StorageResult<Json<serde_json::Value>> {
    req.validate()?;
    let volume = ctx.volumes.get(&req.volume)?;
    let path = volume.vfolder_mount(&req.vfid)?;
    Ok(Json(json!({ "path": path.to_string_lossy() })))
}

async fn vfolder_usage(
    State(ctx): State<SharedContext>,
    Query(req): Query<UsageRequest>,
) -> StorageResult<Json<serde_json::Value>> {
    validate_vfid_field(&req.vfid)?;
    let volume = ctx.volumes.get(&req.volume)?;
    let usage = volume.get_usage(&req.vfid, req.relpath.as_deref()).await?;
    Ok(Json(json!({ "file_count": usage.file_count, "used_bytes": usage.used_bytes })))
}

async fn get_metadata(
    State(ctx): State<SharedContext>,
    Query(req): Query<VFolderRequest>,
) -> StorageResult<Json<serde_json::Value>> {
    req.validate()?;
    let volume = ctx.volumes.get(&req.volume)?;
    let payload = volume.get_metadata(&req.vfid).await?;
    Ok(Json(json!({ "payload": STANDARD.encode(payload) })))
}

async fn set_metadata(
    State(ctx): State<SharedContext>,
    Json(req): Json<MetadataRequest>,
) -> StorageResult<StatusCode> {
    validate_vfid_field(&req.vfid)?;
    let volume = ctx.volumes.get(&req.volume)?;
    let payload_b64 = req.payload.unwrap_or_default();
    let payload = STANDARD
        .decode(payload_b64)
        .map_err(|e| StorageError::InvalidApiParameters(format!("payload must be base64: {e}")))?;
    volume.put_metadata(&req.vfid, payload.into()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn performance_metric(
    State(ctx): State<SharedContext>,
    Query(req): Query<PerformanceMetricRequest>,
) -> StorageResult<Json<serde_json::Value>> {
    let volume = ctx.volumes.get(&req.volume)?;
    let metric = volume.get_performance_metric().await?;
    Ok(Json(json!({ "metric": metric })))
}

async fn mkdir(
    State(ctx): State<SharedContext>,
    Json(req): Json<MkdirRequest>,
) -> StorageResult<StatusCode> {
    req.validate()?;
    let volume = ctx.volumes.get(&req.volume)?;
    volume.mkdir(&req.vfid, &req.relpath, req.parents).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_files(
    State(ctx): State<SharedContext>,
    Json(req): Json<ListRequest>,
) -> StorageResult<Json<serde_json::Value>> {
    req.validate()?;
    let volume = ctx.volumes.get(&req.volume)?;
    let mut stream = volume.scandir(&req.vfid, &req.relpath, ctx.scandir_limit)?;

    use futures::StreamExt;
    let mut items = Vec::new();
    while let Some(entry) = stream.next().await {
        items.push(entry?);
    }
    Ok(Json(json!({ "items": items })))
}

async fn rename_file(
    State(ctx): State<SharedContext>,
    Json(req): Json<RenameRequest>,
) -> StorageResult<StatusCode> {
    req.validate()?;
    let volume = ctx.volumes.get(&req.volume)?;
    let dst = match req.relpath.rsplit_once('/') {
        Some((parent, _)) => format!("{parent}/{}", req.new_name),
        None => req.new_name.clone(),
    };
    volume.move_file(&req.vfid, &req.relpath, &dst).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_download_session(
    State(ctx): State<SharedContext>,
    Json(req): Json<DownloadRequest>,
) -> StorageResult<Json<serde_json::Value>> {
    req.validate()?;
    // touch the volume to make sure it exists and the path resolves
    let volume = ctx.volumes.get(&req.volume)?;
    let _ = volume.vfolder_mount(&req.vfid)?;

    let exp = ctx.now() + ctx.session_expire.as_secs() as i64;
    let claims = SessionClaims {
        op: SessionOp::Download,
        volume: req.volume,
        vfid: req.vfid,
        relpath: req.relpath,
        size: None,
        session: None,
        exp,
    };
    let token = ctx.tokens.mint(&claims)?;
    Ok(Json(json!({ "token": token })))
}

async fn create_upload_session(
    State(ctx): State<SharedContext>,
    Json(req): Json<UploadRequest>,
) -> StorageResult<Json<serde_json::Value>> {
    req.validate(ctx.max_upload_size)?;
    let volume = ctx.volumes.get(&req.volume)?;
    let session = volume.prepare_upload(&req.vfid).await?;

    let exp = ctx.now() + ctx.session_expire.as_secs() as i64;
    let claims = SessionClaims {
        op: SessionOp::Upload,
        volume: req.volume,
        vfid: req.vfid,
        relpath: req.relpath,
        size: Some(req.size),
        session: Some(session.clone()),
        exp,
    };
    let token = ctx.tokens.mint(&claims)?;
    Ok(Json(json!({ "token": token, "session": session })))
}

async fn delete_files(
    State(ctx): State<SharedContext>,
    Json(req): Json<DeleteFilesRequest>,
) -> StorageResult<StatusCode> {
    req.validate()?;
    let volume = ctx.volumes.get(&req.volume)?;
    volume.delete_files(&req.vfid, &req.relpaths, req.recursive).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn validate_vfid_field(vfid: &str) -> StorageResult<()> {
    crate::path::validate_vfid(vfid)
}
