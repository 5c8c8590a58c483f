//! Client plane: tus.io resumable upload and plain download, token-only auth.
//!
//! Ported from the original `init_client_app`: the `session` path segment
//! carries the whole signed token (not a bare session id) — the staging
//! filename underneath is the `session` claim inside it. No shared secret is
//! involved; CORS is permissive because the plane is meant to be reachable
//! directly from a browser.

use axum::body::Body;
use bytes::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, options};
use axum::Router;
use futures::{Stream, TryStreamExt};
use tower_http::cors::{Any, CorsLayer};

use crate::error::{StorageError, StorageResult};
use crate::http::SharedContext;
use crate::token::SessionOp;
use crate::upload;

const TUS_RESUMABLE: &str = "1.0.0";
const DEFAULT_MAX_UPLOAD_HEADER: &str = "107374182400";

pub fn router(ctx: SharedContext) -> Router {
    Router::new()
        .route("/upload/:token", options(tus_options).head(tus_head).patch(tus_patch))
        .route("/download/:token", get(download))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(ctx)
}

async fn tus_options(State(ctx): State<SharedContext>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Tus-Resumable", HeaderValue::from_static(TUS_RESUMABLE));
    headers.insert("Tus-Version", HeaderValue::from_static(TUS_RESUMABLE));
    headers.insert(
        "Tus-Max-Size",
        HeaderValue::from_str(&ctx.max_upload_size.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MAX_UPLOAD_HEADER)),
    );
    (StatusCode::NO_CONTENT, headers).into_response()
}

async fn tus_head(
    State(ctx): State<SharedContext>,
    Path(token): Path<String>,
) -> StorageResult<Response> {
    let claims = ctx.tokens.verify(&token, ctx.now())?;
    require_op(&claims.op, SessionOp::Upload)?;
    let volume = ctx.volumes.get(&claims.volume)?;
    let session = claims.session.clone().ok_or_else(|| {
        StorageError::InvalidToken("upload token missing session".into())
    })?;

    let offset = upload::staged_offset(volume.mount_path(), &claims.vfid, &session).await?;
    let Some(offset) = offset else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    let mut headers = HeaderMap::new();
    headers.insert("Tus-Resumable", HeaderValue::from_static(TUS_RESUMABLE));
    headers.insert("Upload-Offset", HeaderValue::from_str(&offset.to_string()).unwrap());
    if let Some(size) = claims.size {
        headers.insert("Upload-Length", HeaderValue::from_str(&size.to_string()).unwrap());
    }
    Ok((StatusCode::OK, headers).into_response())
}

async fn tus_patch(
    State(ctx): State<SharedContext>,
    Path(token): Path<String>,
    body: Body,
) -> StorageResult<Response> {
    let claims = ctx.tokens.verify(&token, ctx.now())?;
    require_op(&claims.op, SessionOp::Upload)?;
    let volume = ctx.volumes.get(&claims.volume)?;
    let session = claims.session.clone().ok_or_else(|| {
        StorageError::InvalidToken("upload token missing session".into())
    })?;
    let size = claims
        .size
        .ok_or_else(|| StorageError::InvalidToken("upload token missing size".into()))?;

    let chunks = body_to_io_stream(body);
    let outcome = upload::append_and_maybe_commit(
        volume.mount_path(),
        &claims.vfid,
        &session,
        &claims.relpath,
        size,
        Box::new(chunks),
    )
    .await?;

    let mut headers = HeaderMap::new();
    headers.insert("Tus-Resumable", HeaderValue::from_static(TUS_RESUMABLE));
    headers.insert("Upload-Offset", HeaderValue::from_str(&outcome.offset.to_string()).unwrap());
    Ok((StatusCode::NO_CONTENT, headers).into_response())
}

async fn download(
    State(ctx): State<SharedContext>,
    Path(token): Path<String>,
) -> StorageResult<Response> {
    let claims = ctx.tokens.verify(&token, ctx.now())?;
    require_op(&claims.op, SessionOp::Download)?;
    let volume = ctx.volumes.get(&claims.volume)?;

    let stream = volume.read_file(&claims.vfid, &claims.relpath, 0)?;
    let body = Body::from_stream(stream);
    Ok((StatusCode::OK, body).into_response())
}

fn require_op(actual: &SessionOp, expected: SessionOp) -> StorageResult<()> {
    if std::mem::discriminant(actual) != std::mem::discriminant(&expected) {
        return Err(StorageError::InvalidToken("token is not valid for this operation".into()));
    }
    Ok(())
}

fn body_to_io_stream(body: Body) -> impl Stream<Item = std::io::Result<Bytes>> + Unpin {
    body.into_data_stream().map_err(std::io::Error::other)
}
