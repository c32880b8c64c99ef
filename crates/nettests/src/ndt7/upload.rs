//! ndt7 upload subtest: a writer loop and a periodic sampler sharing
//! one WebSocket, plus a background reader that keeps the engine
//! servicing control frames.

use super::{proto, AppInfo, ClientSample, WsStream};
use common::model::Event;
use futures_util::{SinkExt, StreamExt};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Textual random payload: easier on the eyes in packet captures.
fn make_bulk_payload() -> Vec<u8> {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(proto::BULK_MESSAGE_SIZE)
        .collect()
}

/// Send the prepared payload repeatedly until the subtest timer
/// expires or a write fails, emitting a client sample at least every
/// [`proto::UPDATE_INTERVAL`].
pub(super) async fn run(
    token: &CancellationToken,
    stream: WsStream,
    events: &mpsc::Sender<Event>,
    samples: &mut Vec<ClientSample>,
) {
    let (mut sink, mut reader) = stream.split();

    // Drain whatever the peer sends for the duration of the subtest so
    // control frames keep being processed even if the server is mute.
    let drain = tokio::spawn(async move {
        loop {
            match tokio::time::timeout(proto::UPLOAD_TIMEOUT, reader.next()).await {
                Ok(Some(Ok(_))) => continue,
                _ => break,
            }
        }
    });

    let (totals_tx, mut totals_rx) = mpsc::channel::<i64>(1);
    let writer_token = token.clone();
    let writer = tokio::spawn(async move {
        let deadline = tokio::time::Instant::now() + proto::UPLOAD_TIMEOUT;
        let payload = make_bulk_payload();
        let mut total: i64 = 0;
        loop {
            tokio::select! {
                _ = writer_token.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => break,
                result = tokio::time::timeout(
                    proto::IO_TIMEOUT,
                    sink.send(Message::Binary(payload.clone())),
                ) => {
                    match result {
                        Ok(Ok(())) => {
                            total += proto::BULK_MESSAGE_SIZE as i64;
                            if totals_tx.send(total).await.is_err() {
                                break;
                            }
                        }
                        _ => break, // write timeout or write error
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    let started = tokio::time::Instant::now();
    let mut last_emit = started;
    while let Some(total) = totals_rx.recv().await {
        let now = tokio::time::Instant::now();
        if now.duration_since(last_emit) < proto::UPDATE_INTERVAL {
            continue;
        }
        last_emit = now;
        let sample = ClientSample {
            elapsed_seconds: now.duration_since(started).as_secs_f64(),
            app_info: AppInfo { num_bytes: total },
        };
        match serde_json::to_value(&sample) {
            Ok(value) => {
                let _ = events.send(Event::with_value("ndt7.upload", value)).await;
                samples.push(sample);
            }
            Err(e) => debug!(error = %e, "cannot serialize upload sample"),
        }
    }

    let _ = writer.await;
    drain.abort();
    debug!(samples = samples.len(), "upload subtest done");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn client_for(addr: std::net::SocketAddr) -> WsStream {
        let (stream, _response) =
            tokio_tungstenite::connect_async(format!("ws://{addr}/ndt/v7/upload"))
                .await
                .unwrap();
        stream
    }

    #[tokio::test]
    async fn test_upload_emits_samples_while_server_reads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            // read for long enough that the client samples at least once
            let deadline = tokio::time::Instant::now() + Duration::from_millis(700);
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    frame = ws.next() => {
                        match frame {
                            Some(Ok(_)) => continue,
                            _ => break,
                        }
                    }
                }
            }
            let _ = ws.close(None).await;
        });

        let stream = client_for(addr).await;
        let (tx, mut rx) = mpsc::channel(64);
        let token = CancellationToken::new();
        let mut samples = Vec::new();
        run(&token, stream, &tx, &mut samples).await;
        let _ = server.await;

        assert!(!samples.is_empty());
        assert!(samples[0].app_info.num_bytes >= proto::BULK_MESSAGE_SIZE as i64);
        assert!(samples[0].elapsed_seconds > 0.0);
        // samples are monotonically increasing in both dimensions
        for pair in samples.windows(2) {
            assert!(pair[1].app_info.num_bytes >= pair[0].app_info.num_bytes);
            assert!(pair[1].elapsed_seconds >= pair[0].elapsed_seconds);
        }

        drop(tx);
        let mut keys = Vec::new();
        while let Some(ev) = rx.recv().await {
            keys.push(ev.key);
        }
        assert!(keys.iter().all(|k| k == "ndt7.upload"));
        assert_eq!(keys.len(), samples.len());
    }

    #[tokio::test]
    async fn test_abrupt_close_stops_the_writer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            drop(ws);
        });

        let stream = client_for(addr).await;
        let (tx, _rx) = mpsc::channel(64);
        let token = CancellationToken::new();
        let started = tokio::time::Instant::now();
        let mut samples = Vec::new();
        run(&token, stream, &tx, &mut samples).await;
        server.await.unwrap();
        // well before the overall subtest timeout
        assert!(started.elapsed() < proto::UPLOAD_TIMEOUT);
    }

    #[tokio::test]
    async fn test_cancellation_ends_promptly() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let stream = client_for(addr).await;
        let (tx, _rx) = mpsc::channel(64);
        let token = CancellationToken::new();
        token.cancel();
        let started = tokio::time::Instant::now();
        let mut samples = Vec::new();
        run(&token, stream, &tx, &mut samples).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        server.abort();
    }
}
