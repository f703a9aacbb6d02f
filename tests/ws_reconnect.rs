//! Transport reconnection scenario
//!
//! The server drops the connection twice; the client must redial on its
//! two-second cadence and keep delivering frames through the same receiver.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::SinkExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use trendbot::ws::{self, WsConfig};

#[tokio::test]
async fn test_reconnect_keeps_the_same_receiver() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept_times: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

    let server = {
        let accept_times = accept_times.clone();
        tokio::spawn(async move {
            for round in 0..3u8 {
                let (socket, _) = listener.accept().await.unwrap();
                accept_times.lock().unwrap().push(Instant::now());
                let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
                ws.send(Message::Text(format!("frame-{round}")))
                    .await
                    .unwrap();
                if round < 2 {
                    // Kill the session; the client has to redial.
                    drop(ws);
                } else {
                    // Hold the last session open until the test ends.
                    futures_util::StreamExt::next(&mut ws).await;
                }
            }
        })
    };

    let ctx = CancellationToken::new();
    let mut rx = ws::connect(format!("ws://{addr}"), ctx.clone(), WsConfig::default())
        .await
        .unwrap();

    for round in 0..3u8 {
        let frame = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("frame must arrive through the same receiver")
            .expect("receiver must stay open across reconnects");
        assert_eq!(frame, format!("frame-{round}").into_bytes());
    }

    // Redials happen on the fixed two-second cadence, not immediately.
    let times = accept_times.lock().unwrap().clone();
    assert_eq!(times.len(), 3);
    for gap in times.windows(2) {
        let elapsed = gap[1].duration_since(gap[0]);
        assert!(
            elapsed >= Duration::from_millis(1_800),
            "redial came too early: {elapsed:?}"
        );
    }

    ctx.cancel();
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        while rx.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "receiver must close after cancellation");
    server.abort();
}
