use std::sync::LazyLock;

use regex::Regex;
use reqwest::Client;
use tracing::{debug, info, instrument};

use crate::{
    DownloadError,
    config::ResolverConfig,
    media::{DownloadOptions, VideoMetadata},
};

/// Watch URL with a `v` query parameter, e.g. `https://www.youtube.com/watch?v=dQw4w9WgXcQ`.
pub static WATCH_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"watch\?.*v=([A-Za-z0-9_-]+)").unwrap());

/// Extract the video identifier from a watch URL.
pub fn extract_video_id(url: &str) -> Result<&str, DownloadError> {
    if !url.starts_with("http") {
        return Err(DownloadError::invalid_url(url, "not an http(s) URL"));
    }

    WATCH_URL_REGEX
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| DownloadError::invalid_url(url, "no `v` parameter in watch URL"))
}

/// Turns a user supplied watch URL into [`DownloadOptions`] using the
/// configured metadata API instance.
#[derive(Debug, Clone)]
pub struct MetadataResolver {
    client: Client,
    config: ResolverConfig,
}

impl MetadataResolver {
    pub fn new(client: Client, config: ResolverConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn resolve(&self, url: &str) -> Result<DownloadOptions, DownloadError> {
        let video_id = extract_video_id(url)?;
        let base = self.config.instance_base()?;

        let metadata = self.fetch_metadata(base, video_id).await?;
        let filtered = metadata.without_incompatible_streams(&self.config.filter);

        info!(
            video_id,
            title = %filtered.title,
            video_streams = filtered.video_streams.len(),
            audio_streams = filtered.audio_streams.len(),
            dropped = (metadata.video_streams.len() + metadata.audio_streams.len())
                - (filtered.video_streams.len() + filtered.audio_streams.len()),
            "Resolved video metadata"
        );

        Ok(DownloadOptions {
            title: filtered.title.clone(),
            video_id: video_id.to_owned(),
            metadata: filtered,
        })
    }

    async fn fetch_metadata(&self, base: &str, video_id: &str) -> Result<VideoMetadata, DownloadError> {
        let metadata_url = format!("{base}/streams/{video_id}");
        info!(url = %metadata_url, "Getting metadata");

        let response = self
            .client
            .get(&metadata_url)
            .send()
            .await
            .map_err(|e| DownloadError::metadata_fetch(&metadata_url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::metadata_status(&metadata_url, status));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| DownloadError::metadata_fetch(&metadata_url, e.to_string()))?;
        debug!(url = %metadata_url, bytes = body.len(), "Metadata body received");

        serde_json::from_slice(&body).map_err(|e| {
            DownloadError::metadata_fetch(&metadata_url, format!("unexpected response shape: {e}"))
        })
    }
}
