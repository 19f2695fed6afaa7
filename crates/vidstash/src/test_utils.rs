//! Local HTTP server used by the unit tests.
//!
//! Serves deterministic payloads, truncated bodies, never-ending slow bodies and
//! a metadata endpoint whose stream URLs point back at the same server.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use futures::stream;
use serde_json::json;
use tokio::net::TcpListener;

pub(crate) const SLOW_CHUNK: usize = 1024;

/// Deterministic payload of `len` bytes.
pub(crate) fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub(crate) struct TestServer {
    base: String,
}

impl TestServer {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let app = Router::new()
            .route("/bytes/{len}", get(bytes))
            .route("/chunked/{len}", get(chunked))
            .route("/broken/{len}", get(broken))
            .route("/slow", get(slow))
            .route("/status/{code}", get(status))
            .route("/streams/{id}", get(streams))
            .with_state(base.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base }
    }

    pub(crate) fn uri(&self) -> &str {
        &self.base
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }
}

async fn bytes(Path(len): Path<usize>) -> Vec<u8> {
    payload(len)
}

async fn chunked(Path(len): Path<usize>) -> Body {
    let data = payload(len);
    let chunks: Vec<Result<Bytes, Infallible>> = data
        .chunks(1000)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    Body::from_stream(stream::iter(chunks))
}

/// Announces twice the bytes it sends, then aborts the connection.
async fn broken(Path(len): Path<usize>) -> Response {
    let data = payload(len);
    let items: Vec<Result<Bytes, std::io::Error>> = vec![
        Ok(Bytes::from(data)),
        Err(std::io::Error::other("simulated connection drop")),
    ];
    Response::builder()
        .header(header::CONTENT_LENGTH, len * 2)
        .body(Body::from_stream(stream::iter(items)))
        .unwrap()
}

/// A large body trickled out one small chunk at a time.
async fn slow() -> Response {
    let chunks = stream::unfold((), |()| async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Some((Ok::<_, Infallible>(Bytes::from(vec![7u8; SLOW_CHUNK])), ()))
    });
    Response::builder()
        .header(header::CONTENT_LENGTH, SLOW_CHUNK * 100_000)
        .body(Body::from_stream(chunks))
        .unwrap()
}

async fn status(Path(code): Path<u16>) -> StatusCode {
    StatusCode::from_u16(code).unwrap()
}

/// Metadata for `abc123`-style ids. The id selects the audio leg behaviour:
/// `broken-audio` truncates it, `slow-audio` never finishes.
async fn streams(State(base): State<String>, Path(id): Path<String>) -> impl IntoResponse {
    let audio_url = match id.as_str() {
        "broken-audio" => format!("{base}/broken/30000"),
        "slow-audio" => format!("{base}/slow"),
        _ => format!("{base}/bytes/30000"),
    };

    Json(json!({
        "title": format!("Title of {id}"),
        "thumbnailUrl": format!("{base}/bytes/2048"),
        "uploader": "tester",
        "videoStreams": [
            {"url": format!("{base}/bytes/120000"), "format": "MPEG_4", "quality": "720p",
             "codec": "avc1.4d401f", "mimeType": "video/mp4", "videoOnly": true},
            {"url": format!("{base}/bytes/1"), "format": "WEBM", "quality": "1080p",
             "codec": "vp9", "mimeType": "video/webm", "videoOnly": true}
        ],
        "audioStreams": [
            {"url": audio_url, "format": "M4A", "quality": "128 kbps",
             "codec": "mp4a.40.2", "mimeType": "audio/mp4"}
        ]
    }))
}
