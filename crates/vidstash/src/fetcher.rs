//! # Stream Fetcher
//!
//! Downloads one elementary stream (or thumbnail) into an async sink in fixed
//! size reads. The body is never buffered as a whole; each read races the
//! cancellation token and is bounded by the configured read timeout, so a
//! cancelled fetch stops after at most the read and write already in flight.

use std::time::Duration;

use futures::TryStreamExt;
use humansize::{BINARY, format_size};
use reqwest::Client;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::{DownloadError, config::DownloaderConfig, media::StreamKind};

/// Callback receiving a completion percentage in `0..=100`.
pub type ProgressFn<'a> = &'a mut (dyn FnMut(u8) + Send);

/// `floor(received / total * 100)`, clamped to 100. An empty body counts as complete.
pub fn percentage(received: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = u128::from(received) * 100 / u128::from(total);
    pct.min(100) as u8
}

/// Per-stream progress state.
///
/// Owned by exactly one fetch. Reports a value only when it is larger than the
/// previous one, so consumers see a strictly increasing sequence.
pub struct ProgressTracker<'a> {
    total: Option<u64>,
    received: u64,
    last_reported: Option<u8>,
    on_progress: Option<ProgressFn<'a>>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(total: Option<u64>, on_progress: Option<ProgressFn<'a>>) -> Self {
        Self {
            total,
            received: 0,
            last_reported: None,
            on_progress,
        }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn advance(&mut self, bytes: u64) {
        self.received += bytes;
        if let Some(total) = self.total {
            self.report(percentage(self.received, total));
        }
    }

    /// Called once the body is exhausted. Without a known length this is the
    /// only report the consumer gets.
    pub fn finish(&mut self) {
        if self.total.is_none_or(|total| self.received >= total) {
            self.report(100);
        }
    }

    fn report(&mut self, pct: u8) {
        if self.last_reported.is_some_and(|last| pct <= last) {
            return;
        }
        self.last_reported = Some(pct);
        if let Some(callback) = self.on_progress.as_mut() {
            callback(pct);
        }
    }
}

/// Streams HTTP bodies into sinks.
#[derive(Debug, Clone)]
pub struct StreamFetcher {
    client: Client,
    chunk_size: usize,
    read_timeout: Duration,
}

impl StreamFetcher {
    pub fn new(client: Client, config: &DownloaderConfig) -> Self {
        Self {
            client,
            chunk_size: config.chunk_size.max(1),
            read_timeout: config.read_timeout,
        }
    }

    /// Download `url` into `sink`, returning the number of bytes written.
    ///
    /// `on_progress` is invoked with de-duplicated, increasing percentages.
    /// Returns [`DownloadError::Cancelled`] as soon as `token` fires.
    #[instrument(skip(self, sink, on_progress, token), fields(stream = %kind), level = "debug")]
    pub async fn fetch<W>(
        &self,
        kind: StreamKind,
        url: &str,
        sink: &mut W,
        on_progress: Option<ProgressFn<'_>>,
        token: &CancellationToken,
    ) -> Result<u64, DownloadError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Fetch cancelled before the request completed");
                return Err(DownloadError::Cancelled);
            }
            response = self.client.get(url).send() => response
                .map_err(|e| DownloadError::stream_fetch(kind, format!("request failed: {e}")))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::stream_fetch(
                kind,
                format!("server responded with HTTP {status}"),
            ));
        }

        let total = response.content_length();
        match total {
            Some(len) => info!(url = %url, size = %format_size(len, BINARY), "Stream download started"),
            None => debug!(url = %url, "Content length not available"),
        }

        let body = response.bytes_stream().map_err(std::io::Error::other);
        let mut reader = std::pin::pin!(StreamReader::new(body));
        let mut tracker = ProgressTracker::new(total, on_progress);
        let mut buf = vec![0u8; self.chunk_size];

        loop {
            let read = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(received = tracker.received(), "Fetch cancelled mid-transfer");
                    return Err(DownloadError::Cancelled);
                }
                read = self.read_chunk(&mut reader, &mut buf) => read,
            };

            let n = read.map_err(|reason| DownloadError::stream_fetch(kind, reason))?;
            if n == 0 {
                break;
            }

            sink.write_all(&buf[..n])
                .await
                .map_err(|e| DownloadError::stream_fetch(kind, format!("write failed: {e}")))?;
            tracker.advance(n as u64);
        }

        sink.flush()
            .await
            .map_err(|e| DownloadError::stream_fetch(kind, format!("flush failed: {e}")))?;
        tracker.finish();

        info!(
            url = %url,
            size = %format_size(tracker.received(), BINARY),
            "Stream download finished"
        );
        Ok(tracker.received())
    }

    async fn read_chunk<R>(&self, reader: &mut R, buf: &mut [u8]) -> Result<usize, String>
    where
        R: AsyncRead + Unpin,
    {
        if self.read_timeout.is_zero() {
            return reader
                .read(buf)
                .await
                .map_err(|e| format!("body read failed: {e}"));
        }

        match tokio::time::timeout(self.read_timeout, reader.read(buf)).await {
            Ok(read) => read.map_err(|e| format!("body read failed: {e}")),
            Err(_) => Err(format!(
                "no data received for {}s",
                self.read_timeout.as_secs_f32()
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestServer, payload};
    use std::time::Duration;

    fn fetcher(chunk_size: usize) -> StreamFetcher {
        let config = DownloaderConfig {
            chunk_size,
            read_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        StreamFetcher::new(Client::new(), &config)
    }

    #[test]
    fn percentage_floors_and_clamps() {
        assert_eq!(percentage(0, 1000), 0);
        assert_eq!(percentage(9, 1000), 0);
        assert_eq!(percentage(10, 1000), 1);
        assert_eq!(percentage(999, 1000), 99);
        assert_eq!(percentage(1000, 1000), 100);
        assert_eq!(percentage(2000, 1000), 100);
        assert_eq!(percentage(0, 0), 100);
        assert_eq!(percentage(u64::MAX, u64::MAX), 100);
    }

    #[test]
    fn tracker_deduplicates_and_never_decreases() {
        let mut seen = Vec::new();
        let mut callback = |pct: u8| seen.push(pct);
        {
            let mut tracker = ProgressTracker::new(Some(1000), Some(&mut callback));
            for _ in 0..1000 {
                tracker.advance(1);
            }
            tracker.finish();
        }
        assert_eq!(seen, (0..=100).collect::<Vec<u8>>());
    }

    #[test]
    fn tracker_without_length_reports_completion_once() {
        let mut seen = Vec::new();
        let mut callback = |pct: u8| seen.push(pct);
        {
            let mut tracker = ProgressTracker::new(None, Some(&mut callback));
            tracker.advance(4096);
            tracker.advance(4096);
            tracker.finish();
            tracker.finish();
        }
        assert_eq!(seen, [100]);
    }

    #[tokio::test]
    async fn streams_body_into_sink_with_progress() {
        let server = TestServer::start().await;
        let mut sink = Vec::new();
        let mut seen = Vec::new();
        let mut on_progress = |pct: u8| seen.push(pct);

        let written = fetcher(8 * 1024)
            .fetch(
                StreamKind::Video,
                &server.url("/bytes/100000"),
                &mut sink,
                Some(&mut on_progress),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(written, 100_000);
        assert_eq!(sink, payload(100_000));
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "{seen:?}");
        // 100_000 bytes in 8 KiB reads: at most one report per read
        assert!(seen.len() <= 100_000usize.div_ceil(8 * 1024) + 1);
    }

    #[tokio::test]
    async fn chunked_body_reports_completion_only() {
        let server = TestServer::start().await;
        let mut sink = Vec::new();
        let mut seen = Vec::new();
        let mut on_progress = |pct: u8| seen.push(pct);

        fetcher(1024)
            .fetch(
                StreamKind::Audio,
                &server.url("/chunked/5000"),
                &mut sink,
                Some(&mut on_progress),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(sink.len(), 5000);
        assert_eq!(seen, [100]);
    }

    #[tokio::test]
    async fn thumbnail_fetch_without_callback() {
        let server = TestServer::start().await;
        let mut sink = Vec::new();
        let written = fetcher(8 * 1024)
            .fetch(
                StreamKind::Thumbnail,
                &server.url("/bytes/0"),
                &mut sink,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn non_success_status_is_a_stream_error() {
        let server = TestServer::start().await;
        let err = fetcher(1024)
            .fetch(
                StreamKind::Audio,
                &server.url("/status/403"),
                &mut Vec::new(),
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DownloadError::StreamFetch {
                stream: StreamKind::Audio,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn aborted_body_is_a_stream_error() {
        let server = TestServer::start().await;
        let mut sink = Vec::new();
        let err = fetcher(1024)
            .fetch(
                StreamKind::Audio,
                &server.url("/broken/20000"),
                &mut sink,
                None,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::StreamFetch { .. }), "{err:?}");
        assert!(!err.is_cancelled());
    }

    #[tokio::test]
    async fn cancellation_stops_a_transfer_promptly() {
        let server = TestServer::start().await;
        let token = CancellationToken::new();
        let canceller = token.clone();
        let mut sink = Vec::new();
        let mut on_progress = move |_pct: u8| canceller.cancel();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            fetcher(1024).fetch(
                StreamKind::Video,
                &server.url("/slow"),
                &mut sink,
                Some(&mut on_progress),
                &token,
            ),
        )
        .await
        .expect("cancelled fetch must not hang");

        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn already_cancelled_token_issues_no_read() {
        let server = TestServer::start().await;
        let token = CancellationToken::new();
        token.cancel();
        let mut sink = Vec::new();
        let err = fetcher(1024)
            .fetch(StreamKind::Video, &server.url("/bytes/10"), &mut sink, None, &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(sink.is_empty());
    }
}
