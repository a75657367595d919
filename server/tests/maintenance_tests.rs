//! Eviction policy tests.

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::StatusCode;
use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use common::{archive_bytes, send, sha, TestServer, TOKEN};
use vcache_server::archive::Sha;
use vcache_server::database::{self, entity::cache};
use vcache_server::maintenance::run_maintenance_once;

async fn upload(server: &TestServer, digit: char, package: &str) -> String {
    let s = sha(digit);
    let response = send(
        &server.router,
        "PUT",
        &format!("/cache/{s}"),
        Some(TOKEN),
        Body::from(archive_bytes(package, "1.0", "x64", &[("k", "v")])),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    s
}

async fn download(server: &TestServer, s: &str) {
    let response = send(
        &server.router,
        "GET",
        &format!("/cache/{s}"),
        None,
        Body::empty(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

async fn set_created(server: &TestServer, s: &str, days_ago: i64) {
    let db = server.state.database().await.unwrap();
    cache::Entity::update_many()
        .col_expr(
            cache::Column::Created,
            Expr::value(Utc::now() - ChronoDuration::days(days_ago)),
        )
        .filter(cache::Column::Sha.eq(s))
        .exec(db)
        .await
        .unwrap();
}

async fn set_last_used(server: &TestServer, s: &str, minutes_ago: i64) {
    let db = server.state.database().await.unwrap();
    cache::Entity::update_many()
        .col_expr(
            cache::Column::LastUsed,
            Expr::value(Utc::now() - ChronoDuration::minutes(minutes_ago)),
        )
        .filter(cache::Column::Sha.eq(s))
        .exec(db)
        .await
        .unwrap();
}

async fn cache_row(server: &TestServer, s: &str) -> cache::Model {
    let db = server.state.database().await.unwrap();
    cache::Entity::find()
        .filter(cache::Column::Sha.eq(s))
        .one(db)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn max_age_evicts_old_caches_and_keeps_their_ledger() {
    let server = TestServer::with_settings(|settings| {
        settings.maintenance.max_age = Some(Duration::from_secs(7 * 86_400));
    })
    .await;

    let old = upload(&server, 'a', "foo").await;
    let fresh = upload(&server, 'b', "foo").await;
    download(&server, &old).await;

    set_created(&server, &old, 10).await;
    set_created(&server, &fresh, 2).await;

    run_maintenance_once(&server.state).await.unwrap();

    // The old cache is tombstoned and its archive unlinked.
    assert!(cache_row(&server, &old).await.deleted);
    assert!(!server.state.store.exists(&Sha::new(&old).unwrap()));
    let response = send(
        &server.router,
        "GET",
        &format!("/cache/{old}"),
        None,
        Body::empty(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Its download history is retained.
    let db = server.state.database().await.unwrap();
    let rows = database::downloads_page(db, None, database::LedgerColumn::Time, true, 0, 100)
        .await
        .unwrap();
    assert!(rows.iter().any(|row| row.sha == old));

    // The fresh cache is untouched.
    assert!(!cache_row(&server, &fresh).await.deleted);
    download(&server, &fresh).await;
}

#[tokio::test]
async fn max_unused_treats_never_used_as_oldest() {
    let server = TestServer::with_settings(|settings| {
        settings.maintenance.max_unused = Some(Duration::from_secs(3_600));
    })
    .await;

    let never_used = upload(&server, 'a', "foo").await;
    let stale = upload(&server, 'b', "foo").await;
    let active = upload(&server, 'c', "foo").await;

    set_last_used(&server, &stale, 120).await;
    download(&server, &active).await;

    run_maintenance_once(&server.state).await.unwrap();

    assert!(cache_row(&server, &never_used).await.deleted);
    assert!(cache_row(&server, &stale).await.deleted);
    assert!(!cache_row(&server, &active).await.deleted);
}

#[tokio::test]
async fn max_total_size_evicts_least_recently_used_first() {
    let payload = archive_bytes("pkg", "1.0", "x64", &[("k", "v")]);
    let size = payload.len() as u64;
    let ceiling = size * 3 / 2;

    let server = TestServer::with_settings(|settings| {
        settings.maintenance.max_total_size = Some(ceiling);
    })
    .await;

    let oldest = upload(&server, 'a', "pkg").await;
    let middle = upload(&server, 'b', "pkg").await;
    let newest = upload(&server, 'c', "pkg").await;

    set_last_used(&server, &oldest, 30).await;
    set_last_used(&server, &middle, 20).await;
    set_last_used(&server, &newest, 10).await;

    run_maintenance_once(&server.state).await.unwrap();

    // overflow = 3s - 1.5s; the walk marks the two least recently
    // used caches before the removed total first exceeds it.
    assert!(cache_row(&server, &oldest).await.deleted);
    assert!(cache_row(&server, &middle).await.deleted);
    assert!(!cache_row(&server, &newest).await.deleted);

    // Boundedness: the remaining total is within one cache of the
    // ceiling.
    let db = server.state.database().await.unwrap();
    let total = database::total_size(db, None).await.unwrap();
    assert_eq!(total, size);
    assert!(total <= ceiling + size);
}

#[tokio::test]
async fn max_package_size_only_touches_the_oversized_package() {
    let payload = archive_bytes("biggish", "1.0", "x64", &[("k", "v")]);
    let size = payload.len() as u64;

    let server = TestServer::with_settings(move |settings| {
        settings.maintenance.max_package_size = Some(size * 3 / 2);
    })
    .await;

    let first = upload(&server, 'a', "biggish").await;
    let second = upload(&server, 'b', "biggish").await;
    let other = upload(&server, 'c', "small").await;

    set_last_used(&server, &first, 30).await;
    set_last_used(&server, &second, 10).await;

    run_maintenance_once(&server.state).await.unwrap();

    // biggish exceeds its ceiling by half a cache; evicting the
    // least recently used one already clears the overflow.
    assert!(cache_row(&server, &first).await.deleted);
    assert!(!cache_row(&server, &second).await.deleted);
    assert!(!cache_row(&server, &other).await.deleted);
}

#[tokio::test]
async fn dry_run_marks_nothing() {
    let server = TestServer::with_settings(|settings| {
        settings.maintenance.max_age = Some(Duration::from_secs(7 * 86_400));
        settings.maintenance.dry_run = true;
    })
    .await;

    let old = upload(&server, 'a', "foo").await;
    set_created(&server, &old, 30).await;

    run_maintenance_once(&server.state).await.unwrap();

    assert!(!cache_row(&server, &old).await.deleted);
    assert!(server.state.store.exists(&Sha::new(&old).unwrap()));
    download(&server, &old).await;
}

#[tokio::test]
async fn policies_compose_within_one_pass() {
    let server = TestServer::with_settings(|settings| {
        settings.maintenance.max_age = Some(Duration::from_secs(7 * 86_400));
        settings.maintenance.max_unused = Some(Duration::from_secs(24 * 3_600));
    })
    .await;

    let ancient = upload(&server, 'a', "foo").await;
    let unused = upload(&server, 'b', "foo").await;
    let live = upload(&server, 'c', "foo").await;

    set_created(&server, &ancient, 10).await;
    set_last_used(&server, &ancient, 1).await;
    set_last_used(&server, &unused, 48 * 60).await;
    download(&server, &live).await;

    run_maintenance_once(&server.state).await.unwrap();

    assert!(cache_row(&server, &ancient).await.deleted);
    assert!(cache_row(&server, &unused).await.deleted);
    assert!(!cache_row(&server, &live).await.deleted);
}
