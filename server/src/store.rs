//! Content-addressed blob store.
//!
//! Archives live at `root/<sha[0:2]>/<sha>.zip`. Next to the
//! filesystem the store keeps an in-memory table of
//! `sha -> (state, Info)` rows guarding every archive it has ever
//! observed. Rows are never erased from the table; a removed archive
//! is only marked [`EntryState::Deleted`]. Each row sits behind its
//! own reader-writer lock so that handles can pin a row without
//! blocking unrelated lookups:
//!
//! * a [`ReaderHandle`] holds the row's shared lock for its whole
//!   lifetime, so [`Store::remove`] cannot take effect while the
//!   archive is being served;
//! * a [`WriterHandle`] marks the row `Writing`, which makes every
//!   concurrent write attempt for the same fingerprint fail with a
//!   conflict.
//!
//! Legal state transitions: absent -> Writing -> Valid -> Deleted ->
//! Writing (re-upload). Nothing else.

use std::collections::{BTreeSet, HashMap};
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::{OwnedRwLockReadGuard, RwLock};
use tokio::task;

use crate::archive::{self, Info, Sha};
use crate::error::{ServerError, ServerResult};
use crate::html;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Valid,
    Writing,
    Deleted,
}

#[derive(Debug)]
struct Slot {
    state: EntryState,
    info: Info,
}

type Entry = Arc<RwLock<Slot>>;

/// The blob store.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    entries: RwLock<HashMap<String, Entry>>,
}

impl Store {
    /// Opens the store, scanning `root` for existing archives.
    ///
    /// Archives that cannot be inspected are unlinked; they can never
    /// be served. Files whose name is not a fingerprint are ignored.
    /// This is blocking; call it off the runtime.
    pub fn open(root: PathBuf) -> ServerResult<Self> {
        std::fs::create_dir_all(&root).map_err(ServerError::storage_error)?;

        tracing::info!("Start scan of {}", root.display());
        let slots = scan(&root)?;
        tracing::info!("Scan finished");
        tracing::info!("{}", describe(slots.values().map(|slot| &slot.info)));

        let entries = slots
            .into_iter()
            .map(|(sha, slot)| (sha, Arc::new(RwLock::new(slot))))
            .collect();

        Ok(Self {
            root,
            entries: RwLock::new(entries),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, sha: &Sha) -> PathBuf {
        self.root.join(sha.prefix()).join(format!("{sha}.zip"))
    }

    /// Filesystem probe only.
    pub fn exists(&self, sha: &Sha) -> bool {
        self.path_for(sha).is_file()
    }

    /// Returns the cached info for a valid entry, lazily indexing the
    /// archive from disk when the table has no row for it yet.
    pub async fn info(&self, sha: &Sha) -> ServerResult<Option<Info>> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(sha.as_str()) {
                let slot = entry.read().await;
                return Ok((slot.state == EntryState::Valid).then(|| slot.info.clone()));
            }
        }

        let path = self.path_for(sha);
        if !path.is_file() {
            return Ok(None);
        }
        let info = task::spawn_blocking(move || archive::inspect(&path))
            .await
            .map_err(ServerError::storage_error)??;

        let mut entries = self.entries.write().await;
        let entry = entries.entry(sha.to_string()).or_insert_with(|| {
            Arc::new(RwLock::new(Slot {
                state: EntryState::Valid,
                info,
            }))
        });
        let slot = entry.read().await;
        Ok((slot.state == EntryState::Valid).then(|| slot.info.clone()))
    }

    /// Opens the archive for reading.
    ///
    /// Returns `None` unless the entry is valid. The handle pins the
    /// entry: removal waits until the last reader is gone.
    pub async fn read(&self, sha: &Sha) -> ServerResult<Option<ReaderHandle>> {
        let entry = { self.entries.read().await.get(sha.as_str()).cloned() };
        let Some(entry) = entry else {
            return Ok(None);
        };

        let guard = entry.read_owned().await;
        if guard.state != EntryState::Valid {
            return Ok(None);
        }

        let file = File::open(self.path_for(sha))
            .await
            .map_err(ServerError::storage_error)?;

        Ok(Some(ReaderHandle { file, guard }))
    }

    /// Opens the archive for writing.
    ///
    /// Fails with [`ServerError::Conflict`] when an upload for the
    /// same fingerprint already finished or is still running.
    pub async fn write(&self, sha: &Sha) -> ServerResult<WriterHandle> {
        let path = self.path_for(sha);

        let existing = { self.entries.read().await.get(sha.as_str()).cloned() };
        if let Some(entry) = existing {
            return reuse_entry(entry, path).await;
        }

        let mut entries = self.entries.write().await;
        // Re-check; the sha may have been inserted while we upgraded.
        if let Some(entry) = entries.get(sha.as_str()).cloned() {
            drop(entries);
            return reuse_entry(entry, path).await;
        }

        if path.is_file() {
            // Lost a race against the startup scan or an out-of-band
            // copy; index the file and report the conflict.
            let probe = path.clone();
            let info = task::spawn_blocking(move || archive::inspect(&probe))
                .await
                .map_err(ServerError::storage_error)??;
            entries.insert(
                sha.to_string(),
                Arc::new(RwLock::new(Slot {
                    state: EntryState::Valid,
                    info,
                })),
            );
            return Err(ServerError::Conflict);
        }

        let file = open_output(&path).await?;
        let entry = Arc::new(RwLock::new(Slot {
            state: EntryState::Writing,
            info: Info::placeholder(sha.clone()),
        }));
        entries.insert(sha.to_string(), entry.clone());
        Ok(WriterHandle::new(entry, path, file))
    }

    /// Marks a valid entry deleted and unlinks its archive.
    ///
    /// Waits for active readers to finish first. Absent or already
    /// deleted entries are left alone.
    pub async fn remove(&self, sha: &Sha) {
        let entry = { self.entries.read().await.get(sha.as_str()).cloned() };
        let Some(entry) = entry else {
            return;
        };

        let mut slot = entry.write().await;
        if slot.state != EntryState::Valid {
            return;
        }
        slot.state = EntryState::Deleted;

        let path = self.path_for(sha);
        tracing::info!("Deleting {}", path.display());
        if let Err(e) = fs::remove_file(&path).await {
            tracing::warn!("Failed to delete {}: {}", path.display(), e);
        }
    }

    /// Takes a consistent snapshot over every valid entry.
    ///
    /// The snapshot holds the shared lock of each row, so every info
    /// it yields stays valid until the snapshot is dropped.
    pub async fn all_infos(&self) -> Snapshot {
        let entries: Vec<Entry> = { self.entries.read().await.values().cloned().collect() };

        let mut guards = Vec::with_capacity(entries.len());
        for entry in entries {
            guards.push(entry.read_owned().await);
        }
        Snapshot { guards }
    }

    pub async fn statistics(&self) -> String {
        let snapshot = self.all_infos().await;
        describe(snapshot.iter())
    }
}

fn describe<'a>(infos: impl Iterator<Item = &'a Info>) -> String {
    let mut count = 0usize;
    let mut size = 0u64;
    let mut packages = BTreeSet::new();
    for info in infos {
        count += 1;
        size += info.size;
        packages.insert(info.package.as_str());
    }
    format!(
        "Found {} caches of {} packages. Using {}",
        count,
        packages.len(),
        html::format_size(size)
    )
}

fn scan(root: &Path) -> ServerResult<HashMap<String, Slot>> {
    let mut found = Vec::new();
    walk(root, &mut found)?;

    let mut slots = HashMap::new();
    for path in found {
        tracing::debug!("scan: {}", path.display());
        match archive::inspect(&path) {
            Ok(info) => {
                slots.insert(
                    info.sha.to_string(),
                    Slot {
                        state: EntryState::Valid,
                        info,
                    },
                );
            }
            Err(e) => {
                tracing::error!("error scanning {}: {}, removing entry", path.display(), e);
                let _ = std::fs::remove_file(&path);
            }
        }
    }
    Ok(slots)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> ServerResult<()> {
    for entry in std::fs::read_dir(dir).map_err(ServerError::storage_error)? {
        let entry = entry.map_err(ServerError::storage_error)?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, out)?;
        } else if path.extension().and_then(OsStr::to_str) == Some("zip")
            && path
                .file_stem()
                .and_then(OsStr::to_str)
                .and_then(Sha::new)
                .is_some()
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Attempts the state transition to `Writing` on a tracked row.
///
/// The row lock is never awaited: a row that cannot be locked
/// immediately is pinned by readers or a snapshot, and such a row is
/// not writable now anyway.
async fn reuse_entry(entry: Entry, path: PathBuf) -> ServerResult<WriterHandle> {
    let mut slot = match entry.try_write() {
        Ok(slot) => slot,
        Err(_) => return Err(ServerError::Conflict),
    };
    match slot.state {
        EntryState::Valid | EntryState::Writing => Err(ServerError::Conflict),
        EntryState::Deleted => {
            let file = open_output(&path).await?;
            slot.state = EntryState::Writing;
            drop(slot);
            Ok(WriterHandle::new(entry, path, file))
        }
    }
}

async fn open_output(path: &Path) -> ServerResult<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(ServerError::storage_error)?;
    }
    File::create(path).await.map_err(ServerError::storage_error)
}

/// An open archive pinned for reading.
pub struct ReaderHandle {
    file: File,
    guard: OwnedRwLockReadGuard<Slot>,
}

impl ReaderHandle {
    pub fn info(&self) -> &Info {
        &self.guard.info
    }
}

impl AsyncRead for ReaderHandle {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}

/// An in-flight upload.
///
/// [`WriterHandle::close`] publishes the entry; a handle dropped
/// without closing leaves the entry in the writing state, which only
/// the next startup scan repairs.
pub struct WriterHandle {
    entry: Entry,
    path: PathBuf,
    file: Option<File>,
    finished: bool,
}

impl WriterHandle {
    fn new(entry: Entry, path: PathBuf, file: File) -> Self {
        Self {
            entry,
            path,
            file: Some(file),
            finished: false,
        }
    }

    /// Finalizes the upload: closes the stream, inspects the finished
    /// archive and publishes the entry as valid.
    pub async fn close(mut self) -> ServerResult<Info> {
        self.finished = true;

        let mut file = match self.file.take() {
            Some(file) => file,
            None => return Err(ServerError::InternalServerError),
        };
        file.flush().await.map_err(ServerError::storage_error)?;
        file.sync_all().await.map_err(ServerError::storage_error)?;
        drop(file);

        let path = self.path.clone();
        let info = task::spawn_blocking(move || archive::inspect(&path))
            .await
            .map_err(ServerError::storage_error)??;

        let mut slot = self.entry.write().await;
        slot.info = info.clone();
        slot.state = EntryState::Valid;
        Ok(info)
    }
}

impl AsyncWrite for WriterHandle {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.file.as_mut() {
            Some(file) => Pin::new(file).poll_write(cx, buf),
            None => Poll::Ready(Err(io::Error::other("writer already closed"))),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.file.as_mut() {
            Some(file) => Pin::new(file).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.file.as_mut() {
            Some(file) => Pin::new(file).poll_shutdown(cx),
            None => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for WriterHandle {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                "writer for {} dropped before close; entry stays in writing state until restart",
                self.path.display()
            );
        }
    }
}

/// A locked view over every valid entry.
pub struct Snapshot {
    guards: Vec<OwnedRwLockReadGuard<Slot>>,
}

impl Snapshot {
    pub fn iter(&self) -> impl Iterator<Item = &Info> {
        self.guards
            .iter()
            .filter(|slot| slot.state == EntryState::Valid)
            .map(|slot| &slot.info)
    }

    pub fn get(&self, sha: &Sha) -> Option<&Info> {
        self.iter().find(|info| &info.sha == sha)
    }

    /// Summary line over the snapshot. Holders of a snapshot must use
    /// this instead of [`Store::statistics`], which would acquire the
    /// row locks a second time.
    pub fn statistics(&self) -> String {
        describe(self.iter())
    }
}
