//! HTTP API.

mod assets;
mod cache;
mod site;

use axum::Router;

pub(crate) fn get_router() -> Router {
    Router::new()
        .merge(cache::get_router())
        .merge(site::get_router())
        .merge(assets::get_router())
}
