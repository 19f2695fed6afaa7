//! Stream metadata as returned by the metadata API, and the filtered view handed
//! to the downloader.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::CompatibilityFilter;

/// Which of the three parallel legs of a download a value refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Thumbnail,
}

impl StreamKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Thumbnail => "thumbnail",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accessors shared by video and audio stream entries.
pub trait StreamDescriptor {
    fn url(&self) -> &str;
    fn format(&self) -> &str;
    fn quality(&self) -> &str;
    fn codec(&self) -> Option<&str>;
    fn mime_type(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStream {
    pub url: String,
    pub format: String,
    pub quality: String,
    #[serde(default)]
    pub codec: Option<String>,
    pub mime_type: String,
    #[serde(default)]
    pub video_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStream {
    pub url: String,
    pub format: String,
    pub quality: String,
    #[serde(default)]
    pub codec: Option<String>,
    pub mime_type: String,
}

macro_rules! impl_stream_descriptor {
    ($ty:ty) => {
        impl StreamDescriptor for $ty {
            fn url(&self) -> &str {
                &self.url
            }

            fn format(&self) -> &str {
                &self.format
            }

            fn quality(&self) -> &str {
                &self.quality
            }

            fn codec(&self) -> Option<&str> {
                self.codec.as_deref()
            }

            fn mime_type(&self) -> &str {
                &self.mime_type
            }
        }
    };
}

impl_stream_descriptor!(VideoStream);
impl_stream_descriptor!(AudioStream);

/// Body of `GET {instance}/streams/{id}`. Fields the API adds later are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub title: String,
    pub video_streams: Vec<VideoStream>,
    pub audio_streams: Vec<AudioStream>,
    pub thumbnail_url: String,
}

impl VideoMetadata {
    /// A copy with every stream the filter rejects removed, order preserved.
    pub fn without_incompatible_streams(&self, filter: &CompatibilityFilter) -> Self {
        Self {
            title: self.title.clone(),
            video_streams: self
                .video_streams
                .iter()
                .filter(|s| {
                    !filter.is_format_excluded(s.format()) && !filter.is_video_codec_excluded(s.codec())
                })
                .cloned()
                .collect(),
            audio_streams: self
                .audio_streams
                .iter()
                .filter(|s| !filter.is_format_excluded(s.format()))
                .cloned()
                .collect(),
            thumbnail_url: self.thumbnail_url.clone(),
        }
    }
}

/// Resolver output: everything needed to start a download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOptions {
    pub title: String,
    /// Storage key. Restricted to `[A-Za-z0-9_-]` by the identifier grammar.
    pub video_id: String,
    pub metadata: VideoMetadata,
}

/// Indices into the filtered video and audio lists of a [`DownloadOptions`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSelection {
    pub video_index: usize,
    pub audio_index: usize,
}

impl StreamSelection {
    pub const fn new(video_index: usize, audio_index: usize) -> Self {
        Self {
            video_index,
            audio_index,
        }
    }
}
