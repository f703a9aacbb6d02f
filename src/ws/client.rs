//! Reconnecting WebSocket client
//!
//! One full-duplex message channel per call to [`connect`]. The returned
//! receiver survives reconnects and is closed exactly once, when the
//! cancellation token fires or the consumer goes away.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::{WsConfig, WsError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Redial cadence while the transport is down.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(2);

/// Channel capacity between the read pump and the consumer.
const RECV_BUFFER: usize = 64;

/// Dial `url` and return the frame receiver.
///
/// The first dial (and handshake, if configured) must succeed; afterwards a
/// background task keeps the connection alive, re-dialing every two seconds
/// on failure until `ctx` is cancelled. Frames arrive in order within one
/// connected session; the handshake is re-sent on every reconnect.
pub async fn connect(
    url: impl Into<String>,
    ctx: CancellationToken,
    config: WsConfig,
) -> Result<mpsc::Receiver<Vec<u8>>, WsError> {
    let url = url.into();
    let stream = dial(&url, &config).await?;
    let (tx, rx) = mpsc::channel(RECV_BUFFER);
    tokio::spawn(run(url, config, ctx, tx, stream));
    Ok(rx)
}

async fn dial(url: &str, config: &WsConfig) -> Result<WsStream, WsError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| WsError::Dial(e.to_string()))?;
    for (name, value) in &config.headers {
        let name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| WsError::Header(e.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|e| WsError::Header(e.to_string()))?;
        request.headers_mut().append(name, value);
    }

    let (mut stream, _response) = connect_async(request)
        .await
        .map_err(|e| WsError::Dial(e.to_string()))?;

    if let Some(handshake) = &config.handshake {
        match tokio::time::timeout(
            config.write_timeout,
            stream.send(Message::Text(handshake.clone())),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(WsError::Handshake(e.to_string())),
            Err(_) => return Err(WsError::Handshake("write timeout".to_string())),
        }
    }

    Ok(stream)
}

enum SessionEnd {
    /// Token fired; the transport ends permanently.
    Cancelled,
    /// Read/write error or pong timeout; reconnect.
    Closed,
    /// The consumer dropped the receiver; nothing left to deliver to.
    ReceiverGone,
}

async fn run(
    url: String,
    config: WsConfig,
    ctx: CancellationToken,
    tx: mpsc::Sender<Vec<u8>>,
    mut stream: WsStream,
) {
    loop {
        match session(&config, &ctx, &tx, stream).await {
            SessionEnd::Cancelled => {
                tracing::info!(url = %url, "transport cancelled");
                return;
            }
            SessionEnd::ReceiverGone => {
                tracing::debug!(url = %url, "receiver dropped, closing transport");
                return;
            }
            SessionEnd::Closed => {
                tracing::warn!(url = %url, "connection closed, reconnecting");
            }
        }

        stream = loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    tracing::info!(url = %url, "transport cancelled");
                    return;
                }
                _ = tokio::time::sleep(RECONNECT_INTERVAL) => {
                    match dial(&url, &config).await {
                        Ok(stream) => break stream,
                        Err(e) => tracing::debug!(url = %url, error = %e, "redial failed"),
                    }
                }
            }
        };
        tracing::info!(url = %url, "reconnected");
    }
    // Dropping `tx` here is what closes the receiver, exactly once.
}

async fn session(
    config: &WsConfig,
    ctx: &CancellationToken,
    tx: &mpsc::Sender<Vec<u8>>,
    stream: WsStream,
) -> SessionEnd {
    let (mut write, mut read) = stream.split();

    let ping_interval = config.ping_interval();
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + ping_interval,
        ping_interval,
    );
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // The deadline is only pushed forward by pongs, never by data frames.
    let mut read_deadline = tokio::time::Instant::now() + config.pong_timeout;

    loop {
        tokio::select! {
            _ = ctx.cancelled() => return SessionEnd::Cancelled,

            _ = tokio::time::sleep_until(read_deadline) => {
                tracing::warn!("pong timeout");
                return SessionEnd::Closed;
            }

            _ = ping.tick() => {
                match tokio::time::timeout(
                    config.write_timeout,
                    write.send(Message::Ping(Vec::new())),
                )
                .await
                {
                    Ok(Ok(())) => {}
                    _ => return SessionEnd::Closed,
                }
            }

            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if tx.send(text.into_bytes()).await.is_err() {
                        return SessionEnd::ReceiverGone;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if tx.send(data).await.is_err() {
                        return SessionEnd::ReceiverGone;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    match tokio::time::timeout(
                        config.write_timeout,
                        write.send(Message::Pong(payload)),
                    )
                    .await
                    {
                        Ok(Ok(())) => {}
                        _ => return SessionEnd::Closed,
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    read_deadline = tokio::time::Instant::now() + config.pong_timeout;
                }
                Some(Ok(Message::Close(_))) | None => return SessionEnd::Closed,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "read error");
                    return SessionEnd::Closed;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_surfaces_dial_error() {
        let result = connect(
            "ws://127.0.0.1:1",
            CancellationToken::new(),
            WsConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(WsError::Dial(_))));
    }

    #[tokio::test]
    async fn test_handshake_then_frames() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let handshake = ws.next().await.unwrap().unwrap();
            assert_eq!(handshake, Message::Text("hello".to_string()));
            ws.send(Message::Text("frame-1".to_string())).await.unwrap();
            ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
            // Keep the connection open until the client is done reading.
            let _ = ws.next().await;
        });

        let ctx = CancellationToken::new();
        let mut rx = connect(
            format!("ws://{addr}"),
            ctx.clone(),
            WsConfig::new().handshake("hello"),
        )
        .await
        .unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"frame-1".to_vec());
        assert_eq!(rx.recv().await.unwrap(), vec![1, 2, 3]);

        ctx.cancel();
        server.abort();
    }

    #[tokio::test]
    async fn test_cancel_closes_receiver() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let _ = ws.next().await;
        });

        let ctx = CancellationToken::new();
        let mut rx = connect(format!("ws://{addr}"), ctx.clone(), WsConfig::default())
            .await
            .unwrap();

        ctx.cancel();
        let closed = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("receiver must close after cancellation");
        assert!(closed.is_none());
    }
}
