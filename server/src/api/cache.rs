//! Archive transfer endpoints.
//!
//! `GET /cache/{sha}` streams an archive out through a reader handle
//! that pins the blob entry until the last chunk is sent.
//! `PUT /cache/{sha}` streams the request body into a writer handle
//! and publishes the entry on close.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Extension, Path};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures::TryStreamExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::instrument;

use crate::access::{self, Uploader};
use crate::archive::Sha;
use crate::database::{NewCache, VcacheDatabase};
use crate::error::{ServerError, ServerResult};
use crate::html;
use crate::State;

pub(crate) fn get_router() -> Router {
    Router::new()
        .route("/cache/:sha", get(get_cache).put(put_cache))
        .route_layer(axum::middleware::from_fn(access::apply_write_auth))
}

fn client_ip(connect: Option<ConnectInfo<SocketAddr>>) -> String {
    connect
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "?".to_owned())
}

#[instrument(skip_all)]
async fn get_cache(
    Extension(state): Extension<State>,
    Path(sha): Path<String>,
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
) -> ServerResult<Response> {
    let sha = Sha::new(&sha).ok_or(ServerError::NotFound)?;

    let reader = state.store.read(&sha).await?.ok_or(ServerError::NotFound)?;
    let info = reader.info().clone();

    let ip = client_ip(connect);
    let user = access::request_user(&state.config.auth, &headers);
    tracing::info!(
        "{} GET: {} v{} {} Size: {} Time: {} User: {} Sha: {}",
        ip,
        info.package,
        info.version,
        info.architecture,
        html::format_size(info.size),
        html::format_time(info.mtime),
        user,
        sha
    );

    let db = state.database().await?;
    let now = Utc::now();
    let cache_id = match db.get_cache_id(&sha).await? {
        Some(id) => id,
        None => {
            // The archive predates the index (found by the startup
            // scan); register it on first download.
            let package_id = db.get_or_add_package_id(&info.package).await?;
            db.add_cache(NewCache {
                sha: sha.clone(),
                package_id,
                created: info.mtime,
                ip: "?".to_owned(),
                user: "?".to_owned(),
                size: info.size,
            })
            .await?
            .id
        }
    };
    db.add_download(cache_id, &ip, &user, now).await?;
    db.update_last_use(cache_id, now).await?;

    let body = Body::from_stream(ReaderStream::new(reader));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_LENGTH, info.size)
        .body(body)
        .map_err(ServerError::request_error)
}

#[instrument(skip_all)]
async fn put_cache(
    Extension(state): Extension<State>,
    Extension(Uploader(user)): Extension<Uploader>,
    Path(sha): Path<String>,
    connect: Option<ConnectInfo<SocketAddr>>,
    body: Body,
) -> ServerResult<Response> {
    let sha = Sha::new(&sha).ok_or(ServerError::NotFound)?;

    let ip = client_ip(connect);
    tracing::info!("{} PUT: User: {} Sha: {}", ip, user, sha);

    let mut writer = state.store.write(&sha).await?;

    let stream = body.into_data_stream().map_err(std::io::Error::other);
    let mut reader = StreamReader::new(stream);
    tokio::io::copy(&mut reader, &mut writer)
        .await
        .map_err(ServerError::storage_error)?;

    match writer.close().await {
        Ok(info) => {
            let db = state.database().await?;
            let package_id = db.get_or_add_package_id(&info.package).await?;
            db.add_cache(NewCache {
                sha,
                package_id,
                created: info.mtime,
                ip,
                user,
                size: info.size,
            })
            .await?;
            Ok(StatusCode::OK.into_response())
        }
        Err(e) => {
            // The next startup scan reconciles the entry.
            tracing::warn!("Unable to finalize upload of {}: {}", sha, e);
            Ok(StatusCode::OK.into_response())
        }
    }
}
