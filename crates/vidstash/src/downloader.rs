//! # Download Orchestrator
//!
//! Drives one download from selection to a listed record:
//!
//! ```text
//! Idle -> Preparing -> Downloading -> Finalizing -> Complete
//!            \______________\______________\_______-> RolledBack
//! ```
//!
//! The video, audio and thumbnail fetches run concurrently inside the caller's
//! task. The first failure drops the other two, the prepared directory is
//! removed, and only then is the error returned. A download future dropped
//! before it settles removes its directory from the guard's `Drop`.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use reqwest::Client;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    DownloadError,
    config::DownloaderConfig,
    fetcher::{ProgressFn, StreamFetcher},
    media::{DownloadOptions, StreamKind, StreamSelection},
    store::{DownloadPaths, DownloadRecord, DownloadStore, is_valid_id},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadPhase {
    Idle,
    Preparing,
    Downloading,
    Finalizing,
    Complete,
    RolledBack,
}

impl DownloadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Preparing => "PREPARING",
            Self::Downloading => "DOWNLOADING",
            Self::Finalizing => "FINALIZING",
            Self::Complete => "COMPLETE",
            Self::RolledBack => "ROLLED_BACK",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::RolledBack)
    }

    pub fn can_transition_to(&self, target: DownloadPhase) -> bool {
        use DownloadPhase::*;

        matches!(
            (self, target),
            (Idle, Preparing)
                | (Preparing, Downloading)
                | (Downloading, Finalizing)
                | (Finalizing, Complete)
                | (Preparing | Downloading | Finalizing, RolledBack)
        )
    }

    pub fn transition_to(&self, target: DownloadPhase) -> Result<DownloadPhase, DownloadError> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(DownloadError::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

impl fmt::Display for DownloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stream progress callbacks. Either may be absent.
#[derive(Default)]
pub struct DownloadProgress<'a> {
    pub on_video: Option<ProgressFn<'a>>,
    pub on_audio: Option<ProgressFn<'a>>,
}

impl<'a> DownloadProgress<'a> {
    pub fn new(on_video: ProgressFn<'a>, on_audio: ProgressFn<'a>) -> Self {
        Self {
            on_video: Some(on_video),
            on_audio: Some(on_audio),
        }
    }
}

impl fmt::Debug for DownloadProgress<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadProgress")
            .field("on_video", &self.on_video.is_some())
            .field("on_audio", &self.on_audio.is_some())
            .finish()
    }
}

/// Tracks the phase of a single download and logs every move.
struct PhaseTracker<'a> {
    id: &'a str,
    phase: DownloadPhase,
}

impl<'a> PhaseTracker<'a> {
    fn new(id: &'a str) -> Self {
        Self {
            id,
            phase: DownloadPhase::Idle,
        }
    }

    fn enter(&mut self, target: DownloadPhase) -> Result<(), DownloadError> {
        let from = self.phase;
        self.phase = from.transition_to(target)?;
        debug!(id = self.id, from = %from, to = %target, "Download phase changed");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Downloader {
    fetcher: StreamFetcher,
    store: Arc<DownloadStore>,
}

impl Downloader {
    pub fn new(client: Client, config: &DownloaderConfig, store: Arc<DownloadStore>) -> Self {
        Self {
            fetcher: StreamFetcher::new(client, config),
            store,
        }
    }

    pub fn store(&self) -> &Arc<DownloadStore> {
        &self.store
    }

    /// Download the selected streams and the thumbnail of `options`.
    ///
    /// On success the record is listed and subscribers have been notified.
    /// On failure or cancellation nothing of this download is left on disk.
    #[instrument(skip_all, fields(id = %options.video_id))]
    pub async fn download(
        &self,
        options: &DownloadOptions,
        selection: StreamSelection,
        progress: DownloadProgress<'_>,
        token: &CancellationToken,
    ) -> Result<DownloadRecord, DownloadError> {
        let id = options.video_id.as_str();
        let metadata = &options.metadata;

        let video = metadata.video_streams.get(selection.video_index).ok_or(
            DownloadError::InvalidSelection {
                kind: StreamKind::Video,
                index: selection.video_index,
                available: metadata.video_streams.len(),
            },
        )?;
        let audio = metadata.audio_streams.get(selection.audio_index).ok_or(
            DownloadError::InvalidSelection {
                kind: StreamKind::Audio,
                index: selection.audio_index,
                available: metadata.audio_streams.len(),
            },
        )?;
        check_mime_type(StreamKind::Video, &video.mime_type)?;
        check_mime_type(StreamKind::Audio, &audio.mime_type)?;
        if !is_valid_id(id) {
            return Err(DownloadError::invalid_url(id, "identifier is not filesystem-safe"));
        }

        let _reservation = self.store.reserve(id)?;
        let paths = self.store.paths(id);
        // dropped before the reservation, so the directory is gone before the id is free
        let mut guard = self.store.partial_guard(&paths);
        let mut phase = PhaseTracker::new(id);
        phase.enter(DownloadPhase::Preparing)?;

        info!(
            title = %options.title,
            video_quality = %video.quality,
            audio_quality = %audio.quality,
            "Starting download"
        );

        let result = self
            .run(
                &mut phase,
                &paths,
                options,
                (video.url.as_str(), video.mime_type.as_str()),
                (audio.url.as_str(), audio.mime_type.as_str()),
                progress,
                token,
            )
            .await;

        match result {
            Ok(record) => {
                phase.enter(DownloadPhase::Complete)?;
                guard.disarm();
                Ok(record)
            }
            Err(e) => {
                if phase.phase.can_transition_to(DownloadPhase::RolledBack) {
                    phase.enter(DownloadPhase::RolledBack)?;
                }
                if let Err(cleanup) = self.store.discard(&paths).await {
                    warn!(error = %cleanup, "Failed to remove partial download");
                }
                guard.disarm();
                if e.is_cancelled() {
                    info!("Download cancelled, partial files removed");
                } else {
                    warn!(error = %e, "Download failed, partial files removed");
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        phase: &mut PhaseTracker<'_>,
        paths: &DownloadPaths,
        options: &DownloadOptions,
        (video_url, video_mime): (&str, &str),
        (audio_url, audio_mime): (&str, &str),
        progress: DownloadProgress<'_>,
        token: &CancellationToken,
    ) -> Result<DownloadRecord, DownloadError> {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        self.store.prepare(&options.video_id).await?;

        phase.enter(DownloadPhase::Downloading)?;
        let child = token.child_token();
        let DownloadProgress { on_video, on_audio } = progress;

        let fetched = tokio::try_join!(
            self.fetch_into(StreamKind::Video, video_url, &paths.video, on_video, &child),
            self.fetch_into(StreamKind::Audio, audio_url, &paths.audio, on_audio, &child),
            self.fetch_into(
                StreamKind::Thumbnail,
                &options.metadata.thumbnail_url,
                &paths.thumbnail,
                None,
                &child,
            ),
        );
        // the remaining fetches were dropped with the join; stop anything spawned from the token too
        child.cancel();
        let (video_bytes, audio_bytes, thumbnail_bytes) = fetched?;
        debug!(video_bytes, audio_bytes, thumbnail_bytes, "All streams fetched");

        phase.enter(DownloadPhase::Finalizing)?;
        self.store
            .finalize(paths, &options.title, video_mime, audio_mime)
            .await?;

        self.store.get(&options.video_id).await.ok_or_else(|| {
            DownloadError::io(
                "reading back",
                &paths.dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "record not listable after finalize"),
            )
        })
    }

    async fn fetch_into(
        &self,
        kind: StreamKind,
        url: &str,
        path: &Path,
        on_progress: Option<ProgressFn<'_>>,
        token: &CancellationToken,
    ) -> Result<u64, DownloadError> {
        let mut file = fs::File::create(path).await.map_err(|e| {
            DownloadError::stream_fetch(kind, format!("creating `{}` failed: {e}", path.display()))
        })?;
        let written = self
            .fetcher
            .fetch(kind, url, &mut file, on_progress, token)
            .await?;
        file.sync_all().await.map_err(|e| {
            DownloadError::stream_fetch(kind, format!("syncing `{}` failed: {e}", path.display()))
        })?;
        Ok(written)
    }
}

/// The MIME sidecar separates the two types with a single space.
fn check_mime_type(kind: StreamKind, value: &str) -> Result<(), DownloadError> {
    if value.is_empty() || value.chars().any(char::is_whitespace) {
        return Err(DownloadError::InvalidMimeType {
            kind,
            value: value.to_owned(),
        });
    }
    Ok(())
}
