//! Blob-store handle protocol tests.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use common::{archive_bytes, sha};
use vcache_server::archive::Sha;
use vcache_server::store::Store;
use vcache_server::ServerError;

/// Places an archive at the store's fan-out path without going
/// through the store.
fn plant_archive(root: &Path, sha: &str, bytes: &[u8]) {
    let dir = root.join(&sha[0..2]);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(format!("{sha}.zip")), bytes).unwrap();
}

#[tokio::test]
async fn scan_finds_planted_archives() {
    let dir = tempfile::tempdir().unwrap();
    let sha_a = sha('a');
    plant_archive(
        dir.path(),
        &sha_a,
        &archive_bytes("zlib", "1.3", "x64", &[("k", "v")]),
    );

    let store = Store::open(dir.path().to_owned()).unwrap();
    let parsed = Sha::new(&sha_a).unwrap();
    assert!(store.exists(&parsed));

    let info = store.info(&parsed).await.unwrap().unwrap();
    assert_eq!(info.package, "zlib");
    assert_eq!(info.sha.as_str(), sha_a);

    let snapshot = store.all_infos().await;
    assert_eq!(snapshot.iter().count(), 1);
    assert!(snapshot.statistics().contains("Found 1 caches of 1 packages"));
    drop(snapshot);
    assert!(store.statistics().await.contains("Found 1 caches"));
}

#[tokio::test]
async fn scan_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    for digit in ['a', 'b', 'c'] {
        plant_archive(
            dir.path(),
            &sha(digit),
            &archive_bytes("pkg", "1.0", "x64", &[("k", "v")]),
        );
    }

    async fn collect(store: &Store) -> Vec<String> {
        let snapshot = store.all_infos().await;
        let mut shas: Vec<String> = snapshot.iter().map(|i| i.sha.to_string()).collect();
        shas.sort();
        shas
    }

    let first = Store::open(dir.path().to_owned()).unwrap();
    let second = Store::open(dir.path().to_owned()).unwrap();
    assert_eq!(collect(&first).await, collect(&second).await);
}

#[tokio::test]
async fn scan_unlinks_unreadable_archives_and_ignores_strays() {
    let dir = tempfile::tempdir().unwrap();
    let bad = sha('b');
    plant_archive(dir.path(), &bad, b"garbage");

    // Not fingerprint-named; must be left alone and unindexed.
    let stray = dir.path().join("notes.zip");
    std::fs::write(&stray, b"whatever").unwrap();

    let store = Store::open(dir.path().to_owned()).unwrap();
    assert!(!store.exists(&Sha::new(&bad).unwrap()));
    assert!(stray.exists());
    assert_eq!(store.all_infos().await.iter().count(), 0);
}

#[tokio::test]
async fn write_conflicts_while_writing_and_after_publish() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().to_owned()).unwrap();
    let parsed = Sha::new(&sha('a')).unwrap();

    let mut writer = store.write(&parsed).await.unwrap();
    assert!(matches!(
        store.write(&parsed).await,
        Err(ServerError::Conflict)
    ));

    writer
        .write_all(&archive_bytes("fmt", "1.0", "x64", &[("k", "v")]))
        .await
        .unwrap();
    let info = writer.close().await.unwrap();
    assert_eq!(info.package, "fmt");

    assert!(matches!(
        store.write(&parsed).await,
        Err(ServerError::Conflict)
    ));
    assert_eq!(store.info(&parsed).await.unwrap().unwrap().package, "fmt");
}

#[tokio::test]
async fn round_trip_through_handles() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().to_owned()).unwrap();
    let parsed = Sha::new(&sha('a')).unwrap();
    let payload = archive_bytes("fmt", "1.0", "x64", &[("k", "v")]);

    let mut writer = store.write(&parsed).await.unwrap();
    writer.write_all(&payload).await.unwrap();
    writer.close().await.unwrap();

    let mut reader = store.read(&parsed).await.unwrap().unwrap();
    assert_eq!(reader.info().size, payload.len() as u64);
    let mut served = Vec::new();
    reader.read_to_end(&mut served).await.unwrap();
    assert_eq!(served, payload);
}

#[tokio::test]
async fn remove_waits_for_active_readers() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().to_owned()).unwrap());
    let parsed = Sha::new(&sha('a')).unwrap();

    let mut writer = store.write(&parsed).await.unwrap();
    writer
        .write_all(&archive_bytes("fmt", "1.0", "x64", &[("k", "v")]))
        .await
        .unwrap();
    writer.close().await.unwrap();

    let reader = store.read(&parsed).await.unwrap().unwrap();

    let remove = tokio::spawn({
        let store = store.clone();
        let sha = parsed.clone();
        async move { store.remove(&sha).await }
    });

    // The removal cannot take effect while the reader is alive.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!remove.is_finished());
    assert!(store.exists(&parsed));

    drop(reader);
    remove.await.unwrap();

    assert!(!store.exists(&parsed));
    assert!(store.read(&parsed).await.unwrap().is_none());
    assert!(store.info(&parsed).await.unwrap().is_none());
}

#[tokio::test]
async fn deleted_entries_accept_a_new_upload() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().to_owned()).unwrap();
    let parsed = Sha::new(&sha('a')).unwrap();

    let mut writer = store.write(&parsed).await.unwrap();
    writer
        .write_all(&archive_bytes("fmt", "1.0", "x64", &[("k", "v")]))
        .await
        .unwrap();
    writer.close().await.unwrap();

    store.remove(&parsed).await;
    assert!(store.read(&parsed).await.unwrap().is_none());

    let mut writer = store.write(&parsed).await.unwrap();
    writer
        .write_all(&archive_bytes("fmt", "2.0", "x64", &[("k", "v2")]))
        .await
        .unwrap();
    let info = writer.close().await.unwrap();
    assert_eq!(info.version, "2.0");
    assert_eq!(store.info(&parsed).await.unwrap().unwrap().version, "2.0");
}

#[tokio::test]
async fn dropped_writer_keeps_the_fingerprint_reserved() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().to_owned()).unwrap();
    let parsed = Sha::new(&sha('a')).unwrap();

    let mut writer = store.write(&parsed).await.unwrap();
    writer.write_all(b"partial").await.unwrap();
    drop(writer);

    // The entry stays in the writing state: unreadable, unwritable.
    assert!(store.read(&parsed).await.unwrap().is_none());
    assert!(store.info(&parsed).await.unwrap().is_none());
    assert!(matches!(
        store.write(&parsed).await,
        Err(ServerError::Conflict)
    ));
}

#[tokio::test]
async fn info_lazily_indexes_files_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().to_owned()).unwrap();
    let sha_a = sha('a');
    let parsed = Sha::new(&sha_a).unwrap();

    assert!(store.info(&parsed).await.unwrap().is_none());

    // An archive appears behind the store's back.
    plant_archive(
        dir.path(),
        &sha_a,
        &archive_bytes("zlib", "1.3", "x64", &[("k", "v")]),
    );

    let info = store.info(&parsed).await.unwrap().unwrap();
    assert_eq!(info.package, "zlib");
    assert!(store.read(&parsed).await.unwrap().is_some());
}

#[tokio::test]
async fn snapshot_entries_survive_concurrent_removal() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(dir.path().to_owned()).unwrap());
    let parsed = Sha::new(&sha('a')).unwrap();

    let mut writer = store.write(&parsed).await.unwrap();
    writer
        .write_all(&archive_bytes("fmt", "1.0", "x64", &[("k", "v")]))
        .await
        .unwrap();
    writer.close().await.unwrap();

    let snapshot = store.all_infos().await;
    assert_eq!(snapshot.iter().count(), 1);

    let remove = tokio::spawn({
        let store = store.clone();
        let sha = parsed.clone();
        async move { store.remove(&sha).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    // The snapshot pins the entry; everything it yields is still
    // valid and on disk.
    assert!(!remove.is_finished());
    assert_eq!(snapshot.get(&parsed).unwrap().package, "fmt");
    assert!(store.exists(&parsed));

    drop(snapshot);
    remove.await.unwrap();
    assert!(!store.exists(&parsed));
}
