//! # Download Store
//!
//! On-disk layout, one directory per download:
//!
//! ```text
//! {root}/video-{id}/
//!     video.dat        video elementary stream
//!     audio.dat        audio elementary stream
//!     thumbnail.jpg
//!     title.txt        raw UTF-8 title
//!     mime_type.txt    "{video mime} {audio mime}"
//! ```
//!
//! A directory only counts as a record once both sidecars exist. Sidecars are
//! written through a temporary file and a rename after the payload files are
//! complete, with the MIME sidecar last, so a listing never observes a partial
//! record. Deletion renames the directory out of the reserved namespace before
//! removing it, which makes it indivisible for readers.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::DownloadError;
use crate::events::{ChangeFeed, ChangeSubscriber};

pub const VIDEO_DIR_PREFIX: &str = "video-";

const VIDEO_FILE_NAME: &str = "video.dat";
const AUDIO_FILE_NAME: &str = "audio.dat";
const TITLE_FILE_NAME: &str = "title.txt";
const MIME_TYPE_FILE_NAME: &str = "mime_type.txt";
const THUMBNAIL_FILE_NAME: &str = "thumbnail.jpg";

const TOMBSTONE_PREFIX: &str = ".trash-";
const PARTIAL_SUFFIX: &str = ".part";

/// Target paths for one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadPaths {
    pub dir: PathBuf,
    pub video: PathBuf,
    pub audio: PathBuf,
    pub title: PathBuf,
    pub mime_type: PathBuf,
    pub thumbnail: PathBuf,
}

impl DownloadPaths {
    fn new(dir: PathBuf) -> Self {
        Self {
            video: dir.join(VIDEO_FILE_NAME),
            audio: dir.join(AUDIO_FILE_NAME),
            title: dir.join(TITLE_FILE_NAME),
            mime_type: dir.join(MIME_TYPE_FILE_NAME),
            thumbnail: dir.join(THUMBNAIL_FILE_NAME),
            dir,
        }
    }
}

/// A completed download as found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadRecord {
    pub id: String,
    pub title: String,
    pub video: PathBuf,
    pub audio: PathBuf,
    pub thumbnail: PathBuf,
    pub video_mime_type: String,
    pub audio_mime_type: String,
    /// Bytes used by the payload and sidecar files.
    pub size_on_disk: u64,
}

impl DownloadRecord {
    pub fn dir(&self) -> &Path {
        self.video.parent().unwrap_or(&self.video)
    }

    /// What an external player needs to compose the two elementary streams.
    pub fn playable_source(&self) -> PlayableSource {
        PlayableSource {
            video: self.video.clone(),
            video_mime_type: self.video_mime_type.clone(),
            audio: self.audio.clone(),
            audio_mime_type: self.audio_mime_type.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayableSource {
    pub video: PathBuf,
    pub video_mime_type: String,
    pub audio: PathBuf,
    pub audio_mime_type: String,
}

/// Whether `id` can be used verbatim as part of a directory name.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Exclusive claim on an identifier for the duration of a download.
///
/// Released on drop.
#[derive(Debug)]
pub struct Reservation {
    id: String,
    table: Arc<DashMap<String, ()>>,
}

impl Reservation {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}

#[derive(Debug)]
pub struct DownloadStore {
    root: PathBuf,
    changes: ChangeFeed,
    reservations: Arc<DashMap<String, ()>>,
}

impl DownloadStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// Leftovers of deletions interrupted by a crash are purged.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, DownloadError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| DownloadError::io("creating store root", &root, e))?;

        let store = Self {
            root,
            changes: ChangeFeed::new(),
            reservations: Arc::new(DashMap::new()),
        };
        store.purge_tombstones().await;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths(&self, id: &str) -> DownloadPaths {
        DownloadPaths::new(self.root.join(format!("{VIDEO_DIR_PREFIX}{id}")))
    }

    pub fn subscribe(&self) -> ChangeSubscriber {
        self.changes.subscribe()
    }

    pub fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    /// Claim `id` so no other download can write to its directory.
    pub fn reserve(&self, id: &str) -> Result<Reservation, DownloadError> {
        match self.reservations.entry(id.to_owned()) {
            Entry::Occupied(_) => Err(DownloadError::AlreadyInProgress { id: id.to_owned() }),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(Reservation {
                    id: id.to_owned(),
                    table: Arc::clone(&self.reservations),
                })
            }
        }
    }

    pub fn is_reserved(&self, id: &str) -> bool {
        self.reservations.contains_key(id)
    }

    /// Every complete record, sorted by id.
    ///
    /// Incomplete or damaged entries are skipped with a warning, and entries
    /// that vanish during the scan are simply not returned.
    pub async fn list(&self) -> Result<Vec<DownloadRecord>, DownloadError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DownloadError::io("listing", &self.root, e)),
        };

        let mut records = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(root = %self.root.display(), error = %e, "Store scan ended early");
                    break;
                }
            };

            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_prefix(VIDEO_DIR_PREFIX)) else {
                continue;
            };
            if !is_valid_id(id) {
                continue;
            }

            if let Some(record) = self.read_record(id).await {
                records.push(record);
            }
        }

        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    /// The record for `id`, if it is complete.
    pub async fn get(&self, id: &str) -> Option<DownloadRecord> {
        if !is_valid_id(id) {
            return None;
        }
        self.read_record(id).await
    }

    async fn read_record(&self, id: &str) -> Option<DownloadRecord> {
        let paths = self.paths(id);

        let title = match fs::read_to_string(&paths.title).await {
            Ok(title) => title,
            Err(e) => {
                self.skip_entry(id, "title", &e);
                return None;
            }
        };

        let mime_line = match fs::read_to_string(&paths.mime_type).await {
            Ok(line) => line,
            Err(e) => {
                self.skip_entry(id, "MIME type", &e);
                return None;
            }
        };
        let Some((video_mime_type, audio_mime_type)) = parse_mime_line(&mime_line) else {
            warn!(id, line = %mime_line.trim(), "Skipping download with malformed MIME sidecar");
            return None;
        };

        let mut size_on_disk = 0;
        for path in [
            &paths.video,
            &paths.audio,
            &paths.thumbnail,
            &paths.title,
            &paths.mime_type,
        ] {
            match fs::metadata(path).await {
                Ok(meta) => size_on_disk += meta.len(),
                Err(e) => {
                    self.skip_entry(id, "payload", &e);
                    return None;
                }
            }
        }

        Some(DownloadRecord {
            id: id.to_owned(),
            title,
            video: paths.video,
            audio: paths.audio,
            thumbnail: paths.thumbnail,
            video_mime_type,
            audio_mime_type,
            size_on_disk,
        })
    }

    fn skip_entry(&self, id: &str, what: &str, error: &std::io::Error) {
        if error.kind() == IoErrorKind::NotFound {
            // in progress, or deleted while we were scanning
            debug!(id, what, "Skipping incomplete download");
        } else {
            warn!(id, what, error = %error, "Skipping unreadable download");
        }
    }

    /// Derive the paths for `id` and create its directory.
    ///
    /// If a previous record lives there, its sidecars are retired first so it
    /// stops being listed before its payload files get overwritten.
    pub async fn prepare(&self, id: &str) -> Result<DownloadPaths, DownloadError> {
        if !is_valid_id(id) {
            return Err(DownloadError::invalid_url(id, "identifier is not filesystem-safe"));
        }
        let paths = self.paths(id);

        let mut retired = false;
        for sidecar in [&paths.mime_type, &paths.title] {
            match fs::remove_file(sidecar).await {
                Ok(()) => retired = true,
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => return Err(DownloadError::io("retiring sidecar", sidecar, e)),
            }
        }
        if retired {
            info!(id, "Replacing existing download");
            self.changes.publish();
        }

        fs::create_dir_all(&paths.dir)
            .await
            .map_err(|e| DownloadError::io("creating download directory", &paths.dir, e))?;
        debug!(id, dir = %paths.dir.display(), "Prepared download directory");
        Ok(paths)
    }

    /// Write the sidecars, making the record visible, and notify subscribers.
    pub async fn finalize(
        &self,
        paths: &DownloadPaths,
        title: &str,
        video_mime_type: &str,
        audio_mime_type: &str,
    ) -> Result<(), DownloadError> {
        write_atomic(&paths.title, title.as_bytes()).await?;
        write_atomic(
            &paths.mime_type,
            format!("{video_mime_type} {audio_mime_type}").as_bytes(),
        )
        .await?;

        info!(dir = %paths.dir.display(), "Download finalized");
        self.changes.publish();
        Ok(())
    }

    pub async fn delete(&self, record: &DownloadRecord) -> Result<(), DownloadError> {
        self.remove(&record.id).await.map(|_| ())
    }

    /// Delete the record for `id`. Returns whether anything was removed.
    ///
    /// Refused while a download for `id` is running.
    pub async fn remove(&self, id: &str) -> Result<bool, DownloadError> {
        if !is_valid_id(id) {
            return Ok(false);
        }
        let _claim = self.reserve(id)?;
        let removed = self.remove_dir(&self.paths(id).dir).await?;
        if removed {
            info!(id, "Download deleted");
        }
        self.changes.publish();
        Ok(removed)
    }

    /// Roll back a download that never completed. Nothing was listable, so
    /// subscribers are not notified.
    pub(crate) async fn discard(&self, paths: &DownloadPaths) -> Result<(), DownloadError> {
        self.remove_dir(&paths.dir).await.map(|_| ())
    }

    /// Arm a guard that removes the directory of `paths` if it is dropped
    /// before being disarmed.
    pub(crate) fn partial_guard(&self, paths: &DownloadPaths) -> PartialDownloadGuard {
        PartialDownloadGuard {
            root: self.root.clone(),
            dir: paths.dir.clone(),
            armed: true,
        }
    }

    async fn remove_dir(&self, dir: &Path) -> Result<bool, DownloadError> {
        let tombstone = tombstone_for(&self.root, dir);

        let target = match fs::rename(dir, &tombstone).await {
            Ok(()) => tombstone,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(false),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Rename before delete failed, deleting in place");
                dir.to_path_buf()
            }
        };

        match fs::remove_dir_all(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(true),
            Err(e) => Err(DownloadError::io("deleting", &target, e)),
        }
    }

    async fn purge_tombstones(&self) {
        let Ok(mut entries) = fs::read_dir(&self.root).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_tombstone = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(TOMBSTONE_PREFIX));
            if !is_tombstone {
                continue;
            }
            let path = entry.path();
            match fs::remove_dir_all(&path).await {
                Ok(()) => debug!(path = %path.display(), "Purged interrupted deletion"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to purge interrupted deletion"),
            }
        }
    }
}

/// Removes a download directory left behind by an abandoned download.
///
/// The directory is renamed out of the reserved namespace synchronously, so it
/// is gone from listings by the time `drop` returns. The tombstone itself is
/// removed in the background, or by the next [`DownloadStore::open`].
#[derive(Debug)]
pub(crate) struct PartialDownloadGuard {
    root: PathBuf,
    dir: PathBuf,
    armed: bool,
}

impl PartialDownloadGuard {
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialDownloadGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let tombstone = tombstone_for(&self.root, &self.dir);
        match std::fs::rename(&self.dir, &tombstone) {
            Ok(()) => {
                warn!(dir = %self.dir.display(), "Download abandoned, removing partial files");
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move {
                            if let Err(e) = fs::remove_dir_all(&tombstone).await {
                                warn!(path = %tombstone.display(), error = %e, "Failed to remove abandoned download");
                            }
                        });
                    }
                    Err(_) => {
                        let _ = std::fs::remove_dir_all(&tombstone);
                    }
                }
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => {}
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Failed to remove abandoned download");
            }
        }
    }
}

fn tombstone_for(root: &Path, dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    root.join(format!("{TOMBSTONE_PREFIX}{name}-{}", uuid::Uuid::new_v4().simple()))
}

/// `"{video} {audio}"`. Either half may be empty; anything after a second
/// separator is ignored.
fn parse_mime_line(line: &str) -> Option<(String, String)> {
    let mut parts = line.trim_end_matches(['\n', '\r']).split(' ');
    let video = parts.next()?;
    let audio = parts.next()?;
    Some((video.to_owned(), audio.to_owned()))
}

/// Write `contents` to `path` via a synced temporary file and a rename.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), DownloadError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(PARTIAL_SUFFIX);
    let tmp = PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp)
        .await
        .map_err(|e| DownloadError::io("creating", &tmp, e))?;
    file.write_all(contents)
        .await
        .map_err(|e| DownloadError::io("writing", &tmp, e))?;
    file.sync_all()
        .await
        .map_err(|e| DownloadError::io("syncing", &tmp, e))?;
    drop(file);

    fs::rename(&tmp, path)
        .await
        .map_err(|e| DownloadError::io("renaming", path, e))
}
