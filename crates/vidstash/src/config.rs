use std::time::Duration;

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::DownloadError;

pub const DEFAULT_USER_AGENT: &str = concat!("vidstash/", env!("CARGO_PKG_VERSION"));

/// Default size of a single body read, matching the granularity of progress updates.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// HTTP options shared by the metadata resolver and the stream fetcher.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Overall timeout for a whole request. Zero disables it, which is what
    /// long elementary stream transfers want.
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Maximum time to wait for a single body chunk. Also bounds how long a
    /// cancelled fetch can stay blocked on the network.
    pub read_timeout: Duration,

    /// Size of each body read written to the sink
    pub chunk_size: usize,

    pub follow_redirects: bool,

    pub user_agent: String,

    /// Extra headers merged over the defaults
    pub headers: HeaderMap,

    pub pool_max_idle_per_host: usize,

    pub pool_idle_timeout: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(30),
            chunk_size: DEFAULT_CHUNK_SIZE,
            follow_redirects: true,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: HeaderMap::new(),
            pool_max_idle_per_host: 4,
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

impl DownloaderConfig {
    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(
            reqwest::header::CONNECTION,
            HeaderValue::from_static("keep-alive"),
        );
        headers
    }

    /// Defaults overlaid with the custom headers; custom values win.
    pub fn merged_headers(&self) -> HeaderMap {
        let mut headers = Self::default_headers();
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }
}

/// Build the process-wide HTTP client.
///
/// The client is cheap to clone and is handed to the resolver and fetcher
/// explicitly; nothing in this crate keeps a global one.
pub fn create_client(config: &DownloaderConfig) -> Result<Client, DownloadError> {
    let mut builder = Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(config.merged_headers())
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .pool_idle_timeout(config.pool_idle_timeout)
        .redirect(if config.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        });

    if !config.timeout.is_zero() {
        builder = builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        builder = builder.connect_timeout(config.connect_timeout);
    }

    debug!(user_agent = %config.user_agent, "Building HTTP client");

    builder
        .build()
        .map_err(|e| DownloadError::configuration(format!("failed to build HTTP client: {e}")))
}

/// Streams the target player cannot handle.
///
/// Matching is a case-insensitive substring test, so `"WEBM"` also removes
/// `"WEBM_OPUS"` style format names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompatibilityFilter {
    /// Container formats dropped from both video and audio lists.
    pub excluded_formats: Vec<String>,
    /// Codecs dropped from the video list.
    pub excluded_video_codecs: Vec<String>,
}

impl Default for CompatibilityFilter {
    fn default() -> Self {
        Self {
            excluded_formats: vec!["WEBM".to_owned()],
            excluded_video_codecs: vec!["av01".to_owned()],
        }
    }
}

impl CompatibilityFilter {
    /// A filter that keeps everything.
    pub fn permissive() -> Self {
        Self {
            excluded_formats: Vec::new(),
            excluded_video_codecs: Vec::new(),
        }
    }

    pub fn is_format_excluded(&self, format: &str) -> bool {
        contains_any_ignore_case(format, &self.excluded_formats)
    }

    pub fn is_video_codec_excluded(&self, codec: Option<&str>) -> bool {
        codec.is_some_and(|codec| contains_any_ignore_case(codec, &self.excluded_video_codecs))
    }
}

fn contains_any_ignore_case(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .filter(|needle| !needle.is_empty())
        .any(|needle| haystack.contains(&needle.to_lowercase()))
}

/// Settings consumed by [`crate::MetadataResolver`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Base address of the metadata API instance, e.g. `https://pipedapi.example.org`.
    pub instance_url: Option<String>,
    pub filter: CompatibilityFilter,
}

impl ResolverConfig {
    pub fn new(instance_url: impl Into<String>) -> Self {
        Self {
            instance_url: Some(instance_url.into()),
            filter: CompatibilityFilter::default(),
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: CompatibilityFilter) -> Self {
        self.filter = filter;
        self
    }

    /// The configured instance without trailing slashes, or a configuration
    /// error when it is unset or blank.
    pub fn instance_base(&self) -> Result<&str, DownloadError> {
        let base = match self.instance_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => url.trim_end_matches('/'),
            _ => {
                return Err(DownloadError::configuration(
                    "metadata API instance URL is not set",
                ));
            }
        };

        match Url::parse(base) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(base),
            Ok(parsed) => Err(DownloadError::configuration(format!(
                "unsupported scheme `{}` in instance URL `{base}`",
                parsed.scheme()
            ))),
            Err(e) => Err(DownloadError::configuration(format!(
                "invalid instance URL `{base}`: {e}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_matches_case_insensitively() {
        let filter = CompatibilityFilter::default();
        assert!(filter.is_format_excluded("WEBM"));
        assert!(filter.is_format_excluded("webm_opus"));
        assert!(!filter.is_format_excluded("MPEG_4"));
        assert!(filter.is_video_codec_excluded(Some("av01.0.08M.08")));
        assert!(!filter.is_video_codec_excluded(Some("avc1.4d401f")));
        assert!(!filter.is_video_codec_excluded(None));
    }

    #[test]
    fn permissive_filter_keeps_everything() {
        let filter = CompatibilityFilter::permissive();
        assert!(!filter.is_format_excluded("WEBM"));
        assert!(!filter.is_video_codec_excluded(Some("av01")));
    }

    #[test]
    fn blank_instance_is_a_configuration_error() {
        for instance in [None, Some(""), Some("   ")] {
            let config = ResolverConfig {
                instance_url: instance.map(str::to_owned),
                ..Default::default()
            };
            let err = config.instance_base().unwrap_err();
            assert!(matches!(err, DownloadError::Configuration { .. }));
        }
    }

    #[test]
    fn malformed_instance_is_a_configuration_error() {
        for url in ["not a url", "ftp://api.example.org"] {
            let err = ResolverConfig::new(url).instance_base().unwrap_err();
            assert!(matches!(err, DownloadError::Configuration { .. }), "{url}");
        }
    }

    #[test]
    fn instance_base_strips_trailing_slash() {
        let config = ResolverConfig::new("https://api.example.org/ ");
        assert_eq!(config.instance_base().unwrap(), "https://api.example.org");
    }

    #[test]
    fn custom_headers_override_defaults() {
        let mut config = DownloaderConfig::default();
        config
            .headers
            .insert(reqwest::header::ACCEPT, HeaderValue::from_static("video/*"));
        let headers = config.merged_headers();
        assert_eq!(headers[reqwest::header::ACCEPT], "video/*");
        assert!(headers.contains_key(reqwest::header::CONNECTION));
    }
}
