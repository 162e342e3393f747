// tests/integration/sse_connection_test.rs

//! The SSE adapter writing into an in-memory pipe.

use super::fixtures::wait_until;
use axum::http::HeaderMap;
use serde_json::json;
use spinelhub::config::SseConfig;
use spinelhub::connection::{Connection, SseConnection};
use spinelhub::core::{HubError, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio_util::sync::CancellationToken;

fn quiet_config() -> SseConfig {
    SseConfig {
        send_timeout: Duration::from_millis(200),
        keepalive_interval: Duration::from_secs(3600),
        inactivity_timeout: Duration::from_secs(3600),
    }
}

fn open(
    capacity: usize,
    config: SseConfig,
) -> (Arc<SseConnection<DuplexStream>>, DuplexStream, HeaderMap) {
    let (writer, reader) = tokio::io::duplex(capacity);
    let mut headers = HeaderMap::new();
    let root = CancellationToken::new();
    let conn = SseConnection::new(&root, "conn-1", &mut headers, writer, config);
    (conn, reader, headers)
}

/// Reads until `needle` shows up in the accumulated output.
async fn read_until(reader: &mut DuplexStream, needle: &str) -> String {
    let mut collected = String::new();
    let mut buf = [0u8; 1024];
    let read = async {
        while !collected.contains(needle) {
            let n = reader.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            collected.push_str(&String::from_utf8_lossy(&buf[..n]));
        }
    };
    tokio::time::timeout(Duration::from_secs(2), read)
        .await
        .expect("timed out waiting for SSE output");
    collected
}

#[tokio::test]
async fn test_headers_are_applied() {
    let (conn, _reader, headers) = open(4096, quiet_config());
    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache");
    assert_eq!(headers["connection"], "keep-alive");
    assert_eq!(headers["x-accel-buffering"], "no");
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert_eq!(headers["access-control-allow-headers"], "Cache-Control");
    assert_eq!(conn.connection_type(), "sse");
    assert_eq!(conn.id(), "conn-1");
}

#[tokio::test]
async fn test_send_writes_framed_event() {
    let (conn, mut reader, _) = open(4096, quiet_config());
    let ctx = CancellationToken::new();

    let message = Message::new("m1", "notice", json!("line1\nline2"));
    conn.send(&ctx, Arc::new(message)).await.unwrap();

    let output = read_until(&mut reader, "\n\n").await;
    assert_eq!(output, "id: m1\nevent: notice\ndata: line1\ndata: line2\n\n");
}

#[tokio::test]
async fn test_close_is_idempotent_and_rejects_sends() {
    let (conn, _reader, _) = open(4096, quiet_config());
    let token = conn.context();

    conn.close().unwrap();
    conn.close().unwrap();
    assert!(conn.is_closed());
    assert!(token.is_cancelled());

    let ctx = CancellationToken::new();
    let result = conn
        .send(&ctx, Arc::new(Message::new("m1", "notice", json!("hi"))))
        .await;
    assert_eq!(result, Err(HubError::ConnectionClosed));
}

#[tokio::test]
async fn test_parent_cancellation_propagates() {
    let (writer, _reader) = tokio::io::duplex(4096);
    let mut headers = HeaderMap::new();
    let parent = CancellationToken::new();
    let conn = SseConnection::new(&parent, "conn-1", &mut headers, writer, quiet_config());

    parent.cancel();
    assert!(conn.context().is_cancelled());
}

#[tokio::test]
async fn test_cancelled_caller_leaves_connection_open() {
    // A pipe too small for the frame keeps the write pending.
    let (conn, _reader, _) = open(8, quiet_config());
    let ctx = CancellationToken::new();
    ctx.cancel();

    let result = conn
        .send(&ctx, Arc::new(Message::new("m1", "notice", json!("payload"))))
        .await;
    assert_eq!(result, Err(HubError::Cancelled));
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn test_stalled_writer_times_out_and_closes() {
    let (conn, _reader, _) = open(8, quiet_config());
    let ctx = CancellationToken::new();

    let result = conn
        .send(&ctx, Arc::new(Message::new("m1", "notice", json!("payload"))))
        .await;
    assert_eq!(result, Err(HubError::SendTimeout));
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_write_error_closes_connection() {
    let (conn, reader, _) = open(4096, quiet_config());
    drop(reader);

    let ctx = CancellationToken::new();
    let result = conn
        .send(&ctx, Arc::new(Message::new("m1", "notice", json!("hi"))))
        .await;
    assert!(matches!(result, Err(HubError::Write(_))));
    assert!(conn.is_closed());
}

#[tokio::test]
async fn test_keepalive_is_sent_periodically() {
    let config = SseConfig {
        keepalive_interval: Duration::from_millis(50),
        ..quiet_config()
    };
    let (conn, mut reader, _) = open(4096, config);

    let output = read_until(&mut reader, "\n\n").await;
    assert!(output.starts_with("id: keepalive-"));
    assert!(output.contains("event: keepalive\n"));
    assert!(output.contains("\"message\":\"connection alive\""));
    assert!(!conn.is_closed());
}

#[tokio::test]
async fn test_inactive_connection_is_closed() {
    let config = SseConfig {
        keepalive_interval: Duration::from_millis(50),
        inactivity_timeout: Duration::from_millis(1),
        ..quiet_config()
    };
    let (conn, _reader, _) = open(4096, config);

    assert!(wait_until(|| conn.is_closed(), Duration::from_secs(2)).await);
    assert!(conn.context().is_cancelled());
}
