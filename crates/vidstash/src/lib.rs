//! Offline video download engine.
//!
//! A watch URL is resolved into stream metadata through a metadata API
//! instance ([`MetadataResolver`]), the chosen video and audio streams plus the
//! thumbnail are fetched concurrently ([`Downloader`]), and the result is kept
//! in a directory per video ([`DownloadStore`]) whose changes can be observed
//! through a coalescing change feed.

pub mod config;
pub mod downloader;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod media;
pub mod resolver;
pub mod store;

#[cfg(test)]
mod test_utils;

pub use config::{CompatibilityFilter, DownloaderConfig, ResolverConfig, create_client};
pub use downloader::{DownloadPhase, DownloadProgress, Downloader};
pub use error::{DownloadError, ErrorKind, Result};
pub use events::{ChangeFeed, ChangeSubscriber};
pub use fetcher::{ProgressFn, StreamFetcher};
pub use media::{
    AudioStream, DownloadOptions, StreamDescriptor, StreamKind, StreamSelection, VideoMetadata,
    VideoStream,
};
pub use resolver::{MetadataResolver, extract_video_id};
pub use store::{DownloadPaths, DownloadRecord, DownloadStore, PlayableSource};
pub use tokio_util::sync::CancellationToken;
