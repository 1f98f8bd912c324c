//! Websocket change feed
//!
//! Connects to the backend's realtime endpoint and forwards every change
//! notification into a bounded channel. The channel closes when the socket
//! closes or errors, which the realtime listener treats as a disconnect.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::ChangeEvent;
use crate::error::{Result, SyncError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open the feed and spawn the reader task
///
/// The handshake must finish within `timeout`.
pub async fn connect_change_feed(
    url: &str,
    capacity: usize,
    timeout: Duration,
) -> Result<mpsc::Receiver<ChangeEvent>> {
    debug!("Connecting to change feed");
    let (ws_stream, _response) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| SyncError::Timeout(timeout))?
        .map_err(|e| SyncError::Transient(format!("Failed to connect to change feed: {}", e)))?;

    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(forward_events(ws_stream, tx));
    Ok(rx)
}

/// Decode one feed frame
pub fn decode_event(data: &[u8]) -> Result<ChangeEvent> {
    Ok(serde_json::from_slice(data)?)
}

async fn forward_events(ws_stream: WsStream, tx: mpsc::Sender<ChangeEvent>) {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                let data = match msg {
                    Some(Ok(Message::Text(text))) => text.into_bytes(),
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Change feed closed by server");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Change feed error: {}", e);
                        break;
                    }
                    _ => continue,
                };

                match decode_event(&data) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Failed to decode change event: {}", e),
                }
            }
            _ = tx.closed() => {
                debug!("Change feed receiver dropped");
                break;
            }
        }
    }

    write.close().await.ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ChangeEventType;

    #[test]
    fn test_decode_event() {
        let frame = br#"{"eventType":"insert","newRecord":{"user_id":"u","device_id":"d"}}"#;
        let event = decode_event(frame).unwrap();
        assert_eq!(event.event_type, ChangeEventType::Insert);
        assert_eq!(event.originating_device(), Some("d"));
    }

    #[test]
    fn test_decode_garbage_is_serialization_error() {
        let err = decode_event(b"not json").unwrap_err();
        assert!(matches!(err, SyncError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_connect_refused_is_transient() {
        // Port 9 (discard) is closed on test machines
        let err = connect_change_feed("ws://127.0.0.1:9/feed", 4, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_stalled_handshake_times_out() {
        // Accepts the TCP connection but never answers the upgrade
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/feed", listener.local_addr().unwrap());

        let err = connect_change_feed(&url, 4, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
        drop(listener);
    }
}
