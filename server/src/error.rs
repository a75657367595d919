//! Error handling.

use std::error::Error as StdError;

use anyhow::Error as AnyError;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use displaydoc::Display;

pub type ServerResult<T> = Result<T, ServerError>;

/// An error.
#[derive(Debug, Display)]
pub enum ServerError {
    // Generic responses
    /// The URL you requested was not found.
    NotFound,

    /// Authorization required.
    Unauthorized,

    /// Forbidden.
    Forbidden,

    /// The server encountered an internal error or misconfiguration.
    InternalServerError,

    // Specialized responses
    /// A cache with this fingerprint already exists or is being uploaded.
    Conflict,

    /// Unable to open archive: {0}
    MalformedArchive(AnyError),

    /// Missing CONTROL file in archive.
    MissingControl,

    /// Missing vcpkg_abi_info.txt file in archive.
    MissingAbi,

    /// Database error: {0}
    DatabaseError(AnyError),

    /// Storage error: {0}
    StorageError(AnyError),

    /// General request error: {0}
    RequestError(AnyError),
}

impl ServerError {
    pub fn database_error(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::DatabaseError(AnyError::new(error))
    }

    pub fn storage_error(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::StorageError(AnyError::new(error))
    }

    pub fn request_error(error: impl StdError + Send + Sync + 'static) -> Self {
        Self::RequestError(AnyError::new(error))
    }

    fn http_status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Conflict => StatusCode::CONFLICT,

            Self::MalformedArchive(_) => StatusCode::BAD_REQUEST,
            Self::MissingControl => StatusCode::BAD_REQUEST,
            Self::MissingAbi => StatusCode::BAD_REQUEST,
            Self::RequestError(_) => StatusCode::BAD_REQUEST,

            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl StdError for ServerError {}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if matches!(self, Self::DatabaseError(_) | Self::StorageError(_)) {
            tracing::error!("{:?}", self);
        }

        let status = self.http_status_code();
        // Development-facing deployment: the message goes into the body.
        let body = Html(format!(
            "<h1>Error {}</h1><p>{}</p>",
            status.as_u16(),
            crate::html::escape(&self.to_string())
        ));

        if matches!(self, Self::Unauthorized) {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}
