//! Integration tests for the HTTP streaming endpoints.
//!
//! These tests start a real HTTP server over an in-memory upstream network
//! and make actual requests.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use axum::http::StatusCode;
use bytes::Bytes;
use mediarelay_core::{ByteStreamer, CdnPlacement, MemoryNetwork, StreamerConfig};
use mediarelay_server::AppState;
use pretty_assertions::assert_eq;
use std::net::SocketAddr;
use std::sync::Arc;

const CHUNK: u64 = 8192;
const FILE_SIZE: usize = 3 * CHUNK as usize + 500;

fn payload(len: usize) -> Bytes {
    (0..len)
        .map(|i| (i * 7 % 253) as u8)
        .collect::<Vec<_>>()
        .into()
}

/// Start test HTTP server on random port.
async fn start_test_server(network: &MemoryNetwork) -> (SocketAddr, Arc<AppState>) {
    // Install ring crypto provider for reqwest (idempotent)
    let _ = rustls::crypto::ring::default_provider().install_default();

    let streamer = ByteStreamer::new(
        network.pool(2, 2).expect("Failed to build connection pool"),
        StreamerConfig::default().with_chunk_size(CHUNK),
    )
    .expect("Failed to build streamer");
    let state = Arc::new(
        AppState::with_streamer(streamer, "https://media.example.org")
            .expect("Failed to initialize AppState"),
    );
    let app = mediarelay_server::http::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind HTTP listener");
    let addr = listener
        .local_addr()
        .expect("Failed to get listener address");

    tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("HTTP server failed to run");
    });

    (addr, state)
}

fn header<'a>(response: &'a reqwest::Response, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("Response should have {name} header"))
        .to_str()
        .expect("Header should be valid UTF-8")
}

#[tokio::test]
async fn test_stream_whole_file() {
    let network = MemoryNetwork::new();
    let data = payload(FILE_SIZE);
    network.add_document("clip", 2, data.clone());
    let (addr, _state) = start_test_server(&network).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/stream/clip"))
        .send()
        .await
        .expect("Failed to send GET request to test server");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "accept-ranges"), "bytes");
    assert_eq!(header(&response, "content-length"), FILE_SIZE.to_string());
    assert_eq!(header(&response, "content-type"), "application/octet-stream");
    assert!(header(&response, "content-disposition").starts_with("inline; filename="));
    assert!(response.headers().get("content-range").is_none());

    let body = response.bytes().await.expect("Failed to read body");
    assert_eq!(body, data);
}

#[tokio::test]
async fn test_stream_partial_range() {
    let network = MemoryNetwork::new();
    let data = payload(FILE_SIZE);
    network.add_document("clip", 2, data.clone());
    let (addr, _state) = start_test_server(&network).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/stream/clip"))
        .header("range", "bytes=5000-20000")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        header(&response, "content-range"),
        format!("bytes 5000-20000/{FILE_SIZE}")
    );
    assert_eq!(header(&response, "content-length"), "15001");

    let body = response.bytes().await.unwrap();
    assert_eq!(body, data.slice(5000..=20000));
}

#[tokio::test]
async fn test_stream_suffix_range() {
    let network = MemoryNetwork::new();
    let data = payload(FILE_SIZE);
    network.add_document("clip", 2, data.clone());
    let (addr, _state) = start_test_server(&network).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/stream/clip"))
        .header("range", "bytes=-100")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let body = response.bytes().await.unwrap();
    assert_eq!(body, data.slice(FILE_SIZE - 100..));
}

#[tokio::test]
async fn test_download_is_attachment() {
    let network = MemoryNetwork::new();
    let descriptor = network
        .add_document("song", 2, payload(1000))
        .with_mime_type("audio/mpeg")
        .with_file_name("song.mp3");
    network.add_file("song", descriptor, payload(1000));
    let (addr, _state) = start_test_server(&network).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/dl/song"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "content-type"), "audio/mpeg");
    assert_eq!(
        header(&response, "content-disposition"),
        "attachment; filename=\"song.mp3\""
    );
}

#[tokio::test]
async fn test_unsatisfiable_range() {
    let network = MemoryNetwork::new();
    network.add_document("clip", 2, payload(FILE_SIZE));
    let (addr, state) = start_test_server(&network).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/stream/clip"))
        .header("range", format!("bytes={FILE_SIZE}-"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        header(&response, "content-range"),
        format!("bytes */{FILE_SIZE}")
    );
    assert_eq!(state.streamer().workloads().snapshot(), vec![0, 0]);
}

#[tokio::test]
async fn test_unknown_file() {
    let network = MemoryNetwork::new();
    let (addr, _state) = start_test_server(&network).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/stream/missing"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cdn_file_is_decrypted() {
    let network = MemoryNetwork::new();
    let data = payload(FILE_SIZE);
    network.add_document("clip", 2, data.clone());
    network.place_on_cdn(
        "clip",
        CdnPlacement::new(201).with_segments(4096, CHUNK as usize),
    );
    let (addr, state) = start_test_server(&network).await;

    let response = reqwest::Client::new()
        .get(format!("http://{addr}/stream/clip"))
        .header("range", "bytes=100-")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let body = response.bytes().await.unwrap();
    assert_eq!(body, data.slice(100..));
    assert_eq!(state.streamer().status().connections[0].cdn_redirects, 1);
}

#[tokio::test]
async fn test_corrupted_cdn_content_aborts_body() {
    let network = MemoryNetwork::new();
    network.add_document("clip", 2, payload(FILE_SIZE));
    network.place_on_cdn(
        "clip",
        CdnPlacement::new(201).with_segments(4096, CHUNK as usize),
    );
    network.corrupt_cdn_hashes(true);
    let (addr, _state) = start_test_server(&network).await;

    let result = reqwest::Client::new()
        .get(format!("http://{addr}/stream/clip"))
        .send()
        .await;

    // The status line may already be out when verification fails
    let failed = match result {
        Ok(response) => {
            assert_eq!(response.status(), StatusCode::OK);
            response.bytes().await.is_err()
        }
        Err(_) => true,
    };
    assert!(failed);
}

#[tokio::test]
async fn test_status_endpoint() {
    let network = MemoryNetwork::new();
    network.add_document("clip", 2, payload(100));
    let (addr, _state) = start_test_server(&network).await;
    let client = reqwest::Client::new();

    client
        .get(format!("http://{addr}/stream/clip"))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();

    let response = client
        .get(format!("http://{addr}/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status: serde_json::Value =
        serde_json::from_str(&response.text().await.unwrap()).expect("Status should be JSON");
    assert_eq!(status["public_url"], "https://media.example.org");
    assert_eq!(status["connections"].as_array().unwrap().len(), 2);
    assert_eq!(status["connections"][0]["name"], "memory-0");
    assert_eq!(status["cache"]["entries"], 1);
    assert_eq!(status["sessions"]["active"], 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let network = MemoryNetwork::new();
    network.add_document("clip", 2, payload(100));
    let (addr, _state) = start_test_server(&network).await;
    let client = reqwest::Client::new();

    client
        .get(format!("http://{addr}/stream/nothing"))
        .send()
        .await
        .unwrap();

    let response = client
        .get(format!("http://{addr}/metrics"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "content-type").starts_with("text/plain"));

    let text = response.text().await.unwrap();
    assert!(text.contains("mediarelay_connection_workload{connection=\"0\"} 0"));
    assert!(text.contains("mediarelay_http_responses_total{route=\"stream\",status=\"404\"} 1"));
}
