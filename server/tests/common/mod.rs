//! Test utilities.
//!
//! Note: #[allow(dead_code)] because each test file compiles common/
//! separately.
#![allow(dead_code)]

use std::io::Write as _;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use tempfile::TempDir;
use tower::ServiceExt;

use vcache_server::config::{Authorization, MaintenanceSettings, Settings};
use vcache_server::{State, StateInner};

/// Bearer token accepted by the test server.
pub const TOKEN: &str = "test-token";

/// Username the test token maps to.
pub const USER: &str = "alice";

/// A test server wrapper with all dependencies on temporary storage.
pub struct TestServer {
    pub router: axum::Router,
    pub state: State,
    _temp_dir: TempDir,
}

impl TestServer {
    pub async fn new() -> Self {
        Self::with_settings(|_| {}).await
    }

    pub async fn with_settings<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut Settings),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let mut settings = Settings {
            cache_dir: temp_dir.path().join("cache"),
            db_file: temp_dir.path().join("meta.db"),
            host: "127.0.0.1".to_owned(),
            port: 0,
            verbosity: 6,
            log_file: None,
            cert_and_key: None,
            auth: Authorization::default(),
            maintenance: MaintenanceSettings::default(),
        };
        settings
            .auth
            .write
            .insert(TOKEN.to_owned(), USER.to_owned());
        modifier(&mut settings);

        let state = StateInner::new(settings)
            .await
            .expect("Failed to open the store");
        vcache_server::run_migrations(&state)
            .await
            .expect("Failed to run migrations");
        let router = vcache_server::build_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }
}

/// A fingerprint made of one repeated hex digit.
pub fn sha(digit: char) -> String {
    std::iter::repeat(digit).take(64).collect()
}

/// Builds a minimal valid archive in memory.
pub fn archive_bytes(package: &str, version: &str, arch: &str, abi: &[(&str, &str)]) -> Vec<u8> {
    use zip::write::SimpleFileOptions;

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);

        writer.start_file("CONTROL", options).unwrap();
        write!(
            writer,
            "Package: {package}\nVersion: {version}\nArchitecture: {arch}\n"
        )
        .unwrap();

        writer
            .start_file(format!("share/{package}/vcpkg_abi_info.txt"), options)
            .unwrap();
        for (key, value) in abi {
            writeln!(writer, "{key} {value}").unwrap();
        }

        writer.finish().unwrap();
    }
    cursor.into_inner()
}

/// Fires one request at the router.
pub async fn send(
    router: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Body,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {token}"));
    }
    let request = builder.body(body).unwrap();
    router.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_string(response: Response) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}
