//! Confirmed-candle synchronization from a live stream plus REST backfill

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Candle, CandleStreamData, Interval, SyncBuffer};

/// Source of candle data: one live stream per (symbol, interval) plus
/// historical fetches. Implemented by every broker adapter.
#[async_trait]
pub trait CandleProvider: Send + Sync {
    /// Most-recent `limit` candles, oldest first. The last one is the
    /// still-open bucket.
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>>;

    /// Live frame stream; the channel closes when `ctx` is cancelled.
    async fn candle_stream(
        &self,
        ctx: CancellationToken,
        symbol: &str,
        interval: Interval,
    ) -> anyhow::Result<mpsc::Receiver<CandleStreamData>>;
}

/// Counts in-flight confirm writes so readers can wait for a settled buffer.
#[derive(Debug, Default)]
struct ConfirmGate {
    pending: AtomicUsize,
    notify: Notify,
}

impl ConfirmGate {
    fn add(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    async fn wait(&self) {
        while self.pending.load(Ordering::SeqCst) != 0 {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct Subscriber {
    sink: mpsc::Sender<CandleStreamData>,
    done: CancellationToken,
}

type SubscriberMap = Arc<RwLock<HashMap<Uuid, Subscriber>>>;

/// Maintains the confirmed-candle history for one (symbol, interval) and
/// fans live frames out to subscribers.
///
/// The confirmed buffer is mutated by a single task, so appends are totally
/// ordered with times strictly increasing in whole interval steps. Slow
/// subscribers drop intermediate frames; confirmations are never reordered.
pub struct CandleSync {
    pub symbol: String,
    pub interval: Interval,
    candles: Arc<SyncBuffer<Candle>>,
    gate: Arc<ConfirmGate>,
    subscribers: SubscriberMap,
}

impl CandleSync {
    /// Open the live stream, seed the buffer with history, and spawn the
    /// confirm-writer / fan-out / stream-processor tasks.
    ///
    /// A one-second delayed backfill re-reads the two most recent candles and
    /// pushes the older one through the confirm path, closing the gap when
    /// the process starts mid-bucket.
    pub async fn start(
        ctx: CancellationToken,
        symbol: impl Into<String>,
        interval: Interval,
        buffer_size: usize,
        provider: Arc<dyn CandleProvider>,
    ) -> anyhow::Result<Arc<Self>> {
        let symbol = symbol.into();
        let buffer_size = buffer_size.max(2);

        let stream = provider
            .candle_stream(ctx.clone(), &symbol, interval)
            .await?;
        let history = provider
            .get_candles(&symbol, interval, buffer_size)
            .await?;
        if history.is_empty() {
            anyhow::bail!("no historical candles for {symbol} {interval}");
        }

        let candles = Arc::new(SyncBuffer::new(buffer_size));
        candles.write(&history[..history.len() - 1]);
        let confirm_time = history[history.len() - 1].time;

        let (confirm_tx, confirm_rx) = mpsc::channel::<Candle>(1);
        let (subs_tx, subs_rx) = mpsc::channel::<CandleStreamData>(2);

        let sync = Arc::new(Self {
            symbol: symbol.clone(),
            interval,
            candles: candles.clone(),
            gate: Arc::new(ConfirmGate::default()),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        });

        tokio::spawn(confirm_writer(
            confirm_rx,
            confirm_time,
            symbol.clone(),
            interval,
            provider.clone(),
            candles.clone(),
            sync.gate.clone(),
        ));
        tokio::spawn(sub_messenger(subs_rx, sync.subscribers.clone()));
        tokio::spawn(stream_processor(
            stream,
            confirm_tx.clone(),
            subs_tx,
            candles,
            sync.gate.clone(),
        ));

        // Startup backfill for the bucket that closed while we were seeding.
        {
            let provider = provider.clone();
            let gate = sync.gate.clone();
            let symbol = symbol.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let recent = match provider.get_candles(&symbol, interval, 2).await {
                    Ok(recent) if !recent.is_empty() => recent,
                    Ok(_) => return,
                    Err(e) => {
                        debug!(symbol = %symbol, error = %e, "startup backfill fetch failed");
                        return;
                    }
                };
                gate.add();
                if confirm_tx.send(recent[0]).await.is_err() {
                    gate.done();
                }
            });
        }

        Ok(sync)
    }

    /// Register a subscriber sink. The sync owns the sink and closes it on
    /// unsubscribe or shutdown; cancel the returned token to unsubscribe.
    pub fn subscribe(&self, sink: mpsc::Sender<CandleStreamData>) -> CancellationToken {
        let done = CancellationToken::new();
        self.subscribers.write().unwrap().insert(
            Uuid::new_v4(),
            Subscriber {
                sink,
                done: done.clone(),
            },
        );
        done
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }

    /// Waits for pending confirm writes to drain, then reads up to `limit`
    /// most-recent confirmed candles, oldest first.
    pub async fn read_confirm_candles(&self, limit: usize) -> Vec<Candle> {
        self.gate.wait().await;
        self.candles.read(limit)
    }
}

/// Single writer of the confirmed buffer.
///
/// `miss` counts how many buckets the incoming candle is ahead of the last
/// confirmed one (the +5 ms fudge absorbs exchange timestamp jitter).
/// Zero or negative means duplicate/late; one is the common append; more
/// than one is a gap to backfill from the provider.
async fn confirm_writer(
    mut confirm_rx: mpsc::Receiver<Candle>,
    mut confirm_time: i64,
    symbol: String,
    interval: Interval,
    provider: Arc<dyn CandleProvider>,
    candles: Arc<SyncBuffer<Candle>>,
    gate: Arc<ConfirmGate>,
) {
    let interval_ms = interval.as_millis();

    while let Some(candle) = confirm_rx.recv().await {
        let miss = (candle.time - confirm_time + 5) / interval_ms;
        if miss <= 0 {
            gate.done();
            continue;
        }

        if miss == 1 {
            confirm_time = candle.time;
            candles.push(candle);
            gate.done();
            continue;
        }

        match provider
            .get_candles(&symbol, interval, (miss + 2) as usize)
            .await
        {
            Ok(fetched) if fetched.len() > 1 => {
                let n = fetched.len();
                for (i, c) in fetched[..n - 1].iter().enumerate() {
                    if c.time - confirm_time + 2 >= 0 {
                        candles.write(&fetched[i..n - 1]);
                        break;
                    }
                }
                confirm_time = fetched[n - 1].time;
            }
            Ok(_) => {
                debug!(symbol = %symbol, miss, "gap backfill returned too little data");
            }
            Err(e) => {
                warn!(symbol = %symbol, miss, error = %e, "gap backfill fetch failed");
            }
        }
        gate.done();
    }
}

/// Broadcasts frames to every active subscriber with a non-blocking send;
/// a slow or absent subscriber drops that frame. Strategies only act on
/// confirm frames, which also travel through this path.
async fn sub_messenger(mut subs_rx: mpsc::Receiver<CandleStreamData>, subscribers: SubscriberMap) {
    while let Some(data) = subs_rx.recv().await {
        let mut unsubscribed = Vec::new();
        {
            let subs = subscribers.read().unwrap();
            for (id, sub) in subs.iter() {
                if sub.done.is_cancelled() {
                    unsubscribed.push(*id);
                    continue;
                }
                let _ = sub.sink.try_send(data);
            }
        }
        for id in unsubscribed {
            // Dropping the entry closes the subscriber's sink.
            subscribers.write().unwrap().remove(&id);
        }
    }

    // Upstream closed: drop every sink so subscribers observe shutdown.
    subscribers.write().unwrap().clear();
}

/// Feeds confirm frames into the writer and every frame into the fan-out.
/// When the upstream closes, dropping the senders shuts both tasks down.
async fn stream_processor(
    mut stream: mpsc::Receiver<CandleStreamData>,
    confirm_tx: mpsc::Sender<Candle>,
    subs_tx: mpsc::Sender<CandleStreamData>,
    candles: Arc<SyncBuffer<Candle>>,
    gate: Arc<ConfirmGate>,
) {
    while let Some(data) = stream.recv().await {
        if data.confirm {
            gate.add();
            if confirm_tx.send(data.candle).await.is_err() {
                gate.done();
            }
        }
        if subs_tx.send(data).await.is_err() {
            break;
        }
    }
    candles.close();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gate_wait_returns_immediately_when_idle() {
        let gate = ConfirmGate::default();
        tokio::time::timeout(Duration::from_millis(50), gate.wait())
            .await
            .expect("idle gate must not block");
    }

    #[tokio::test]
    async fn test_gate_wait_blocks_until_done() {
        let gate = Arc::new(ConfirmGate::default());
        gate.add();
        gate.add();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };

        gate.done();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.done();
        tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("gate must release after last done")
            .unwrap();
    }
}
