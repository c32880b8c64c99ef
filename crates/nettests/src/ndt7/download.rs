//! ndt7 download subtest: a single receive loop.

use super::{proto, WsStream};
use common::model::Event;
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Receive until the subtest timer expires, the peer closes, or any
/// read fails. I/O errors end the subtest, they do not fail it.
pub(super) async fn run(
    token: &CancellationToken,
    mut stream: WsStream,
    events: &mpsc::Sender<Event>,
    measurements: &mut Vec<serde_json::Value>,
) {
    let deadline = tokio::time::Instant::now() + proto::DOWNLOAD_TIMEOUT;
    let mut binary_bytes: u64 = 0;
    loop {
        let message = tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => break,
            // the per-read deadline rolls forward on every iteration
            result = tokio::time::timeout(proto::IO_TIMEOUT, stream.next()) => {
                match result {
                    Err(_elapsed) => break,
                    Ok(None) => break,
                    Ok(Some(Err(_))) => break,
                    Ok(Some(Ok(message))) => message,
                }
            }
        };
        match message {
            Message::Text(text) => {
                // the server measurement schema is opaque; we only
                // require it to be valid JSON and forward it verbatim
                let value: serde_json::Value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(_) => break,
                };
                let _ = events
                    .send(Event::with_value("ndt7.download", json!({ "json_str": text })))
                    .await;
                measurements.push(value);
            }
            Message::Binary(data) => {
                binary_bytes += data.len() as u64;
            }
            Message::Close(_) => break,
            _ => continue,
        }
    }
    debug!(binary_bytes, "download subtest done");
    let _ = stream.close(None).await;
}
