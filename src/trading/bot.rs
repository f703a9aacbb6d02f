//! Trading bot: strategy registry and the order-request pipeline

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::broker::Broker;

use super::{Order, OrderRequest, OrderUpdate, SubData};

/// Backoff between broker retries inside a deadline.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);
/// Poll cadence while waiting for an order to close.
const CLOSE_POLL: Duration = Duration::from_millis(100);
/// Hard ceiling for cancellation attempts.
const CANCEL_DEADLINE: Duration = Duration::from_secs(300);
/// Deadline for delivering a reply snapshot.
const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// A unit of trading policy managed by the bot.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Wire the strategy to the bot's shared data and order channel.
    fn init(
        &mut self,
        ctx: CancellationToken,
        sub_data: Arc<SubData>,
        orders: mpsc::Sender<OrderRequest>,
    );

    /// Start trading. Must be idempotent.
    async fn launch(&mut self) -> anyhow::Result<()>;

    /// Stop trading and flatten. Returns false when already stopped.
    async fn stop(&mut self) -> bool;
}

type StrategyMap = Arc<Mutex<HashMap<String, Box<dyn Strategy>>>>;

/// Owns the order-request channel and the strategy registry. Each request is
/// driven through place → wait-for-close → cancel-on-timeout in its own task.
pub struct TradingBot {
    ctx: CancellationToken,
    sub_data: Arc<SubData>,
    order_tx: mpsc::Sender<OrderRequest>,
    strategies: StrategyMap,
}

impl TradingBot {
    /// Candle history kept per (symbol, interval).
    const CANDLE_BUFFER: usize = 1_000;

    pub fn new(ctx: CancellationToken, broker: Arc<dyn Broker>) -> Self {
        let sub_data = Arc::new(SubData::new(ctx.clone(), broker.clone(), Self::CANDLE_BUFFER));
        // Capacity 1: senders block until the bot picks the request up.
        let (order_tx, order_rx) = mpsc::channel(1);
        let strategies: StrategyMap = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(order_request_handler(order_rx, broker));

        {
            let ctx = ctx.clone();
            let strategies = strategies.clone();
            tokio::spawn(async move {
                ctx.cancelled().await;
                stop_all(&strategies).await;
            });
        }

        info!("trading bot start polling");
        Self {
            ctx,
            sub_data,
            order_tx,
            strategies,
        }
    }

    pub fn sub_data(&self) -> Arc<SubData> {
        self.sub_data.clone()
    }

    /// Sender side of the order-request pipeline.
    pub fn order_channel(&self) -> mpsc::Sender<OrderRequest> {
        self.order_tx.clone()
    }

    /// Initialize and register a strategy; returns its id.
    pub async fn add_strategy(&self, mut strategy: Box<dyn Strategy>) -> String {
        strategy.init(
            self.ctx.clone(),
            self.sub_data.clone(),
            self.order_tx.clone(),
        );
        let id = Uuid::new_v4().to_string();
        self.strategies.lock().await.insert(id.clone(), strategy);
        id
    }

    pub async fn launch_strategy(&self, id: &str) -> anyhow::Result<()> {
        match self.strategies.lock().await.get_mut(id) {
            Some(strategy) => strategy.launch().await,
            None => Ok(()),
        }
    }

    pub async fn stop_strategy(&self, id: &str) -> bool {
        match self.strategies.lock().await.get_mut(id) {
            Some(strategy) => strategy.stop().await,
            None => false,
        }
    }

    /// Launch every registered strategy; the last error wins.
    pub async fn resume(&self) -> anyhow::Result<()> {
        let mut result = Ok(());
        for strategy in self.strategies.lock().await.values_mut() {
            if let Err(e) = strategy.launch().await {
                result = Err(e);
            }
        }
        if result.is_ok() {
            info!("trading bot start polling");
        }
        result
    }

    pub async fn stop(&self) {
        stop_all(&self.strategies).await;
    }
}

async fn stop_all(strategies: &StrategyMap) {
    for strategy in strategies.lock().await.values_mut() {
        strategy.stop().await;
    }
    info!("trading bot stopped");
}

async fn order_request_handler(mut order_rx: mpsc::Receiver<OrderRequest>, broker: Arc<dyn Broker>) {
    while let Some(request) = order_rx.recv().await {
        tokio::spawn(process_order_request(broker.clone(), request));
    }
}

/// Drive one request to completion: optional delay, placement with retry,
/// reply, wait for the terminal state, cancel on timeout, final reply.
async fn process_order_request(broker: Arc<dyn Broker>, mut request: OrderRequest) {
    if !request.delay.is_zero() {
        tokio::time::sleep(request.delay).await;
    }

    if !place_order_with_retry(broker.as_ref(), &mut request).await {
        return;
    }
    reply_order(&request).await;

    let mut failure = None;
    if !wait_for_order_closed(broker.as_ref(), &mut request).await {
        failure = Some("waiting time for order closing has expired");
        if !cancel_order_with_retry(broker.as_ref(), &request).await {
            failure = Some("failed to cancel unclosed order");
        }
    }
    reply_order(&request).await;

    match failure {
        None => info!(
            link_id = %request.link_id,
            order = ?request.order,
            "order processing completed"
        ),
        Some(e) => error!(
            link_id = %request.link_id,
            error = e,
            order = ?request.order,
            "order processing completed"
        ),
    }
}

async fn place_order_with_retry(broker: &dyn Broker, request: &mut OrderRequest) -> bool {
    let deadline = tokio::time::Instant::now() + request.place_timeout;
    loop {
        match broker
            .place_order(&request.order.symbol, request.order.qty, request.order.price)
            .await
        {
            Ok(order_id) => {
                request.order.id = order_id;
                return true;
            }
            Err(e) => {
                let now = tokio::time::Instant::now();
                if now >= deadline {
                    error!(
                        link_id = %request.link_id,
                        error = %e,
                        order = ?request.order,
                        "order registration deadline has expired"
                    );
                    return false;
                }
                tokio::time::sleep(RETRY_BACKOFF.min(deadline - now)).await;
            }
        }
    }
}

/// Poll the broker until the order reports closed, swapping the fetched
/// snapshot into the request. Undecodable snapshots are skipped.
async fn wait_for_order_closed(broker: &dyn Broker, request: &mut OrderRequest) -> bool {
    let deadline = tokio::time::Instant::now() + request.close_timeout;
    loop {
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(CLOSE_POLL.min(deadline - now)).await;
        if tokio::time::Instant::now() >= deadline {
            return false;
        }

        let Ok(raw) = broker.get_order(&request.order.id).await else {
            continue;
        };
        let Ok(updated) = serde_json::from_slice::<Order>(&raw) else {
            continue;
        };
        if updated.is_closed {
            request.order.replace(&updated);
            return true;
        }
    }
}

async fn cancel_order_with_retry(broker: &dyn Broker, request: &OrderRequest) -> bool {
    let deadline = tokio::time::Instant::now() + CANCEL_DEADLINE;
    loop {
        if broker.cancel_order(&request.order.id).await.is_ok() {
            return true;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(RETRY_BACKOFF.min(deadline - now)).await;
    }
}

async fn reply_order(request: &OrderRequest) {
    let Some(reply) = &request.reply else { return };
    let update = OrderUpdate {
        link_id: request.link_id.clone(),
        tag: request.tag.clone(),
        order: request.order.clone(),
    };
    let _ = tokio::time::timeout(REPLY_TIMEOUT, reply.send(update)).await;
}
