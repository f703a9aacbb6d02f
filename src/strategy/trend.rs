//! Trend-following strategy with martingale sizing
//!
//! On each confirmed candle the policy loop asks the predictor for a
//! trend/zone score pair and drives the position toward the directed target
//! with a limit order priced off the maintained ceil/floor bands.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::candle::{Candle, CandleStreamData, Interval};
use crate::config::StrategyConfig;
use crate::numeric::{decimal_places, round_float, truncate_float, AtomicF64};
use crate::predict::{PredictService, TrendPredictor, INIT_BUFFER_SIZE};
use crate::trading::{now_ms, Order, OrderRequest, OrderUpdate, Strategy, SubData};

use super::OrderLog;

/// Confirmed candles handed to the predictor on every policy tick.
const POLICY_HISTORY: usize = 90;
/// Order snapshots remembered for exec-qty delta accounting.
const ORDER_LOG_CAPACITY: usize = 100;
/// Limit price bands are recomputed on this cadence.
const BAND_REFRESH: Duration = Duration::from_secs(8);

/// Hot fields shared between the strategy tasks. Each field has a single
/// writer; readers take the latest committed value.
#[derive(Default)]
struct SharedState {
    working: AtomicBool,
    qty_position: AtomicF64,
    avg_position_price: AtomicF64,
    last_price: AtomicF64,
    limit_ceil_price: AtomicF64,
    limit_floor_price: AtomicF64,
    long_losses: AtomicU32,
    short_losses: AtomicU32,
    last_order_request_time: AtomicI64,
}

/// Instrument constraints resolved at launch.
#[derive(Debug, Clone, Copy)]
struct InstrumentParams {
    qty_precision: u32,
    min_order_amt: f64,
    tick_size_precision: u32,
}

/// Per-launch handles used for teardown.
struct Session {
    token: CancellationToken,
    unsubscribe: CancellationToken,
}

pub struct TrendStrategy {
    symbol: String,
    interval: Interval,
    long_ratio: f64,
    martingale_steps: Vec<f64>,
    trend_zone_filter: f64,
    limit_order_offset: f64,
    service: Arc<dyn PredictService>,

    ctx: Option<CancellationToken>,
    sub_data: Option<Arc<SubData>>,
    order_tx: Option<mpsc::Sender<OrderRequest>>,

    state: Arc<SharedState>,
    session: Option<Session>,
}

impl TrendStrategy {
    pub fn new(cfg: &StrategyConfig, service: Arc<dyn PredictService>) -> anyhow::Result<Self> {
        if cfg.symbol.is_empty() {
            anyhow::bail!("symbol not specified in configuration parameters");
        }

        let interval: Interval = cfg.interval.parse()?;
        if !matches!(interval, Interval::M5 | Interval::M15) {
            anyhow::bail!("strategy does not support interval: {interval}");
        }

        let long_ratio = cfg.long_ratio.unwrap_or(0.5).clamp(0.0, 1.0);
        let trend_zone_filter = cfg.trend_zone_filter.unwrap_or(0.5).clamp(0.0, 0.7);
        let limit_order_offset = match cfg.limit_order_offset {
            None => 0.01,
            Some(v) if v > 0.1 => 0.1,
            Some(v) if v < 0.0 => 0.001,
            Some(v) => v,
        };

        Ok(Self {
            symbol: cfg.symbol.clone(),
            interval,
            long_ratio,
            martingale_steps: martingale_steps(
                cfg.available_balance,
                cfg.martingale_ratios.as_deref(),
            ),
            trend_zone_filter,
            limit_order_offset,
            service,
            ctx: None,
            sub_data: None,
            order_tx: None,
            state: Arc::new(SharedState::default()),
            session: None,
        })
    }

    async fn start_session(&mut self) -> anyhow::Result<Session> {
        let ctx = self
            .ctx
            .clone()
            .ok_or_else(|| anyhow::anyhow!("strategy is not initialized"))?;
        let sub_data = self.sub_data.clone().expect("initialized with ctx");
        let order_tx = self.order_tx.clone().expect("initialized with ctx");

        let info = sub_data.instrument_info(&self.symbol).await?;
        let params = InstrumentParams {
            qty_precision: info.qty_precision,
            min_order_amt: info.min_order_amt,
            tick_size_precision: decimal_places(info.tick_size),
        };

        let first_step = self.martingale_steps[0];
        if first_step < params.min_order_amt {
            if self.martingale_steps.len() > 1 {
                anyhow::bail!(
                    "martingale step is less than the minimum order amt: {first_step} < {}",
                    params.min_order_amt
                );
            }
            anyhow::bail!(
                "available balance is less than the minimum order amt: {first_step} < {}",
                params.min_order_amt
            );
        }
        let long_amt = first_step * self.long_ratio;
        if long_amt > 0.0 && long_amt < params.min_order_amt {
            anyhow::bail!(
                "long amt is less than the minimum order amt: {long_amt} < {}",
                params.min_order_amt
            );
        }
        let short_amt = first_step * (1.0 - self.long_ratio);
        if short_amt > 0.0 && short_amt < params.min_order_amt {
            anyhow::bail!(
                "short amt is less than the minimum order amt: {short_amt} < {}",
                params.min_order_amt
            );
        }

        self.state.long_losses.store(0, Ordering::Relaxed);
        self.state.short_losses.store(0, Ordering::Relaxed);
        self.state.qty_position.store(0.0);
        self.state.avg_position_price.store(0.0);

        let last = sub_data
            .read_confirm_candles(&self.symbol, self.interval, 1)
            .await?;
        let last = last
            .last()
            .ok_or_else(|| anyhow::anyhow!("no confirmed candles for {}", self.symbol))?;
        self.state.last_price.store(last.close);
        self.state.limit_ceil_price.store(last.close);
        self.state.limit_floor_price.store(last.close);

        let (stream_tx, stream_rx) = mpsc::channel::<CandleStreamData>(1);
        let unsubscribe = sub_data
            .subscribe_chan(&self.symbol, self.interval, stream_tx)
            .await?;

        let mut predictor = TrendPredictor::new(self.interval, self.service.clone());
        let history = sub_data
            .read_confirm_candles(&self.symbol, self.interval, INIT_BUFFER_SIZE)
            .await?;
        if let Err(e) = predictor.init(&history).await {
            unsubscribe.cancel();
            return Err(e.into());
        }

        let token = ctx.child_token();
        let (order_update_tx, order_update_rx) = mpsc::channel::<OrderUpdate>(1);
        let (confirm_tx, confirm_rx) = mpsc::channel::<Candle>(1);
        let (background_tx, background_rx) = mpsc::channel::<Candle>(1);

        tokio::spawn(order_update_loop(
            order_update_rx,
            self.state.clone(),
            params,
            token.clone(),
        ));
        tokio::spawn(background_loop(
            background_rx,
            self.state.clone(),
            params,
            self.limit_order_offset,
            token.clone(),
        ));

        let policy = PolicyLoop {
            symbol: self.symbol.clone(),
            interval: self.interval,
            trend_zone_filter: self.trend_zone_filter,
            long_ratio: self.long_ratio,
            martingale_steps: self.martingale_steps.clone(),
            params,
            state: self.state.clone(),
            predictor,
            sub_data,
            order_tx,
            order_update_tx,
        };
        tokio::spawn(policy.run(confirm_rx, token.clone()));
        tokio::spawn(observe_loop(
            stream_rx,
            background_tx,
            confirm_tx,
            token.clone(),
        ));

        Ok(Session { token, unsubscribe })
    }
}

#[async_trait]
impl Strategy for TrendStrategy {
    fn init(
        &mut self,
        ctx: CancellationToken,
        sub_data: Arc<SubData>,
        orders: mpsc::Sender<OrderRequest>,
    ) {
        self.ctx = Some(ctx);
        self.sub_data = Some(sub_data);
        self.order_tx = Some(orders);
    }

    async fn launch(&mut self) -> anyhow::Result<()> {
        if self
            .state
            .working
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        match self.start_session().await {
            Ok(session) => {
                info!(symbol = %self.symbol, interval = %self.interval, "strategy launched");
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                self.state.working.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn stop(&mut self) -> bool {
        if self
            .state
            .working
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let Some(session) = self.session.take() else {
            return true;
        };

        // Stop the policy loop before flattening so no new request races in.
        session.token.cancel();

        if now_ms() - self.state.last_order_request_time.load(Ordering::Relaxed) < 500 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let position = self.state.qty_position.load();
        if position != 0.0 {
            if let Some(order_tx) = &self.order_tx {
                let close = OrderRequest::new(Order::new(&self.symbol, -position, None));
                let _ = order_tx.send(close).await;
            }
        }

        session.unsubscribe.cancel();
        info!(symbol = %self.symbol, "strategy stopped");
        true
    }
}

/// First-attempt through last-resort order sizes, derived right-to-left from
/// the configured ratios (always prefixed with 1.0): the last step is the
/// whole balance, each earlier one divided by the following ratio.
fn martingale_steps(balance: f64, ratios: Option<&[f64]>) -> Vec<f64> {
    let mut all = vec![1.0];
    if let Some(ratios) = ratios {
        all.extend_from_slice(ratios);
    }
    let mut steps = vec![0.0; all.len()];
    let mut balance = balance;
    for i in (0..all.len()).rev() {
        steps[i] = balance;
        balance /= all[i];
    }
    steps
}

/// Step for the current loss streak, saturating at the last one.
fn martingale_step(steps: &[f64], losses: u32) -> f64 {
    steps[(steps.len() - 1).min(losses as usize)]
}

/// Forward frames to the background task; confirmed ones also to the policy
/// loop.
async fn observe_loop(
    mut stream_rx: mpsc::Receiver<CandleStreamData>,
    background_tx: mpsc::Sender<Candle>,
    confirm_tx: mpsc::Sender<Candle>,
    token: CancellationToken,
) {
    loop {
        let data = tokio::select! {
            _ = token.cancelled() => return,
            data = stream_rx.recv() => match data {
                Some(data) => data,
                None => return,
            },
        };
        if background_tx.send(data.candle).await.is_err() {
            return;
        }
        if data.confirm && confirm_tx.send(data.candle).await.is_err() {
            return;
        }
    }
}

/// Track the last traded price from every tick and refresh the truncated
/// limit ceil/floor bands every eight seconds.
async fn background_loop(
    mut background_rx: mpsc::Receiver<Candle>,
    state: Arc<SharedState>,
    params: InstrumentParams,
    limit_order_offset: f64,
    token: CancellationToken,
) {
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + BAND_REFRESH, BAND_REFRESH);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                let last_price = state.last_price.load();
                state.limit_ceil_price.store(truncate_float(
                    last_price * (1.0 + limit_order_offset),
                    params.tick_size_precision,
                ));
                state.limit_floor_price.store(truncate_float(
                    last_price * (1.0 - limit_order_offset),
                    params.tick_size_precision,
                ));
            }
            candle = background_rx.recv() => {
                match candle {
                    Some(candle) => state.last_price.store(candle.close),
                    None => return,
                }
            }
        }
    }
}

/// The confirmed-candle policy loop. Owns the predictor; calls into it are
/// strictly serialized here.
struct PolicyLoop {
    symbol: String,
    interval: Interval,
    trend_zone_filter: f64,
    long_ratio: f64,
    martingale_steps: Vec<f64>,
    params: InstrumentParams,
    state: Arc<SharedState>,
    predictor: TrendPredictor,
    sub_data: Arc<SubData>,
    order_tx: mpsc::Sender<OrderRequest>,
    order_update_tx: mpsc::Sender<OrderUpdate>,
}

impl PolicyLoop {
    async fn run(mut self, mut confirm_rx: mpsc::Receiver<Candle>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                candle = confirm_rx.recv() => {
                    if candle.is_none() {
                        return;
                    }
                    self.on_confirm().await;
                }
            }
        }
    }

    async fn on_confirm(&mut self) {
        let candles = match self
            .sub_data
            .read_confirm_candles(&self.symbol, self.interval, POLICY_HISTORY)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "get confirm candles error");
                return;
            }
        };

        let p = match self.predictor.next_prediction(&candles).await {
            Ok(p) => p,
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "get next prediction error");
                return;
            }
        };
        // No zone signal yet.
        if p[1] == 0.0 {
            return;
        }

        let mut directed_qty = 0.0;
        if p[1] > self.trend_zone_filter {
            let last_price = self.state.last_price.load();
            if p[0] > 0.5 {
                let losses = self.state.long_losses.load(Ordering::Relaxed);
                let step = martingale_step(&self.martingale_steps, losses);
                directed_qty = step / last_price * self.long_ratio;
            } else {
                let losses = self.state.short_losses.load(Ordering::Relaxed);
                let step = martingale_step(&self.martingale_steps, losses);
                directed_qty = -(step / last_price) * (1.0 - self.long_ratio);
            }
        }

        let position = self.state.qty_position.load();
        if position == 0.0 && directed_qty == 0.0 {
            return;
        }

        let qty = round_float(-position + directed_qty, self.params.qty_precision);
        let notional = (qty * self.state.last_price.load()).abs();
        if notional < self.params.min_order_amt {
            info!(
                symbol = %self.symbol,
                notional,
                min_order_amt = self.params.min_order_amt,
                "qty less than minimum limit"
            );
            return;
        }

        let price = if qty > 0.0 {
            self.state.limit_ceil_price.load()
        } else {
            self.state.limit_floor_price.load()
        };

        if self.state.working.load(Ordering::SeqCst) {
            self.state
                .last_order_request_time
                .store(now_ms(), Ordering::Relaxed);
            let request = OrderRequest::new(Order::new(&self.symbol, qty, Some(price)))
                .link_id(Uuid::new_v4().to_string())
                .reply(self.order_update_tx.clone());
            let _ = self.order_tx.send(request).await;
        }
    }
}

/// Single consumer of order updates: position accounting, rolling average
/// entry price, and the win/loss streak counters behind martingale sizing.
async fn order_update_loop(
    mut order_update_rx: mpsc::Receiver<OrderUpdate>,
    state: Arc<SharedState>,
    params: InstrumentParams,
    token: CancellationToken,
) {
    let mut log = OrderLog::new(ORDER_LOG_CAPACITY);
    loop {
        let update = tokio::select! {
            _ = token.cancelled() => return,
            update = order_update_rx.recv() => match update {
                Some(update) => update,
                None => return,
            },
        };
        apply_order_update(&mut log, &state, params, &update);
    }
}

fn apply_order_update(
    log: &mut OrderLog,
    state: &SharedState,
    params: InstrumentParams,
    update: &OrderUpdate,
) {
    if update.order.id.is_empty() {
        return;
    }
    let mut exec_delta = update.order.exec_qty;
    if exec_delta == 0.0 {
        return;
    }
    if let Some(prev) = log.get(&update.link_id) {
        exec_delta -= prev.exec_qty;
    }

    let prev_position = state.qty_position.load();
    let position = truncate_float(prev_position + exec_delta, params.qty_precision);
    state.qty_position.store(position);
    log.insert(update.link_id.clone(), update.order.clone());

    // First order of the session defines the entry price.
    if log.len() == 1 {
        state.avg_position_price.store(update.order.avg_price);
        return;
    }

    // Same side and still open: blend the average entry.
    if (prev_position > 0.0) == (position > 0.0) && position != 0.0 {
        let avg = truncate_float(
            (state.avg_position_price.load() + update.order.avg_price) / 2.0,
            params.tick_size_precision,
        );
        state.avg_position_price.store(avg);
        return;
    }

    // Flip or flatten: score the closed round for the loss counters.
    let prev_avg = state.avg_position_price.load();
    state.avg_position_price.store(update.order.avg_price);

    if prev_position > 0.0 {
        if prev_avg > update.order.avg_price {
            state.long_losses.fetch_add(1, Ordering::Relaxed);
        } else {
            state.long_losses.store(0, Ordering::Relaxed);
        }
    }
    if prev_position < 0.0 {
        if prev_avg < update.order.avg_price {
            state.short_losses.fetch_add(1, Ordering::Relaxed);
        } else {
            state.short_losses.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predict::PredictError;

    struct NullService;

    #[async_trait]
    impl PredictService for NullService {
        async fn predict(
            &self,
            _features: &[Vec<f64>],
            _model: &str,
        ) -> Result<Vec<f64>, PredictError> {
            Err(PredictError::Empty)
        }
    }

    fn strategy_config() -> StrategyConfig {
        StrategyConfig {
            symbol: "BTCUSDT".to_string(),
            interval: "M5".to_string(),
            available_balance: 40.0,
            long_ratio: None,
            martingale_ratios: Some(vec![2.0, 2.0]),
            trend_zone_filter: None,
            limit_order_offset: None,
        }
    }

    fn params() -> InstrumentParams {
        InstrumentParams {
            qty_precision: 3,
            min_order_amt: 5.0,
            tick_size_precision: 1,
        }
    }

    fn update(link_id: &str, exec_qty: f64, avg_price: f64) -> OrderUpdate {
        let mut order = Order::new("BTCUSDT", exec_qty, None);
        order.id = format!("o-{link_id}");
        order.exec_qty = exec_qty;
        order.avg_price = avg_price;
        OrderUpdate {
            link_id: link_id.to_string(),
            tag: String::new(),
            order,
        }
    }

    #[test]
    fn test_martingale_steps_escalate_right_to_left() {
        let steps = martingale_steps(40.0, Some(&[2.0, 2.0]));
        assert_eq!(steps, vec![10.0, 20.0, 40.0]);
        assert_eq!(martingale_steps(15.0, None), vec![15.0]);
    }

    #[test]
    fn test_martingale_step_saturates_at_last() {
        let steps = [10.0, 20.0, 40.0];
        assert_eq!(martingale_step(&steps, 0), 10.0);
        assert_eq!(martingale_step(&steps, 2), 40.0);
        assert_eq!(martingale_step(&steps, 9), 40.0);
    }

    #[test]
    fn test_config_clamping() {
        let mut cfg = strategy_config();
        cfg.long_ratio = Some(1.5);
        cfg.trend_zone_filter = Some(0.9);
        cfg.limit_order_offset = Some(-0.2);
        let strategy = TrendStrategy::new(&cfg, Arc::new(NullService)).unwrap();
        assert_eq!(strategy.long_ratio, 1.0);
        assert_eq!(strategy.trend_zone_filter, 0.7);
        assert_eq!(strategy.limit_order_offset, 0.001);
    }

    #[test]
    fn test_unsupported_interval_is_rejected() {
        let mut cfg = strategy_config();
        cfg.interval = "H1".to_string();
        assert!(TrendStrategy::new(&cfg, Arc::new(NullService)).is_err());

        cfg.interval = "M15".to_string();
        assert!(TrendStrategy::new(&cfg, Arc::new(NullService)).is_ok());
    }

    #[test]
    fn test_missing_symbol_is_rejected() {
        let mut cfg = strategy_config();
        cfg.symbol = String::new();
        assert!(TrendStrategy::new(&cfg, Arc::new(NullService)).is_err());
    }

    #[test]
    fn test_position_tracks_signed_exec_deltas() {
        let mut log = OrderLog::new(10);
        let state = SharedState::default();

        apply_order_update(&mut log, &state, params(), &update("a", 0.5, 100.0));
        assert_eq!(state.qty_position.load(), 0.5);
        assert_eq!(state.avg_position_price.load(), 100.0);

        // Second snapshot for the same link only applies the delta.
        apply_order_update(&mut log, &state, params(), &update("a", 0.75, 100.0));
        assert_eq!(state.qty_position.load(), 0.75);

        apply_order_update(&mut log, &state, params(), &update("b", -0.25, 101.0));
        assert_eq!(state.qty_position.load(), 0.5);
    }

    #[test]
    fn test_position_is_truncated_to_precision() {
        let mut log = OrderLog::new(10);
        let state = SharedState::default();
        apply_order_update(&mut log, &state, params(), &update("a", 0.0015, 100.0));
        assert_eq!(state.qty_position.load(), 0.001);
    }

    #[test]
    fn test_long_losses_escalate_and_reset() {
        let mut log = OrderLog::new(10);
        let state = SharedState::default();
        let params = params();

        // Round one: open long at 100, flatten at 90. A loss.
        apply_order_update(&mut log, &state, params, &update("a", 1.0, 100.0));
        apply_order_update(&mut log, &state, params, &update("b", -1.0, 90.0));
        assert_eq!(state.long_losses.load(Ordering::Relaxed), 1);

        // Round two: open long at 90, flatten at 80. Second loss in a row:
        // the next long step is the full balance.
        apply_order_update(&mut log, &state, params, &update("c", 1.0, 90.0));
        apply_order_update(&mut log, &state, params, &update("d", -1.0, 80.0));
        assert_eq!(state.long_losses.load(Ordering::Relaxed), 2);
        assert_eq!(martingale_step(&[10.0, 20.0, 40.0], 2), 40.0);

        // A winning round resets the streak.
        apply_order_update(&mut log, &state, params, &update("e", 1.0, 80.0));
        apply_order_update(&mut log, &state, params, &update("f", -1.0, 95.0));
        assert_eq!(state.long_losses.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_short_losses_mirror_long() {
        let mut log = OrderLog::new(10);
        let state = SharedState::default();
        let params = params();

        // Short at 100, forced out at 110: a short loss.
        apply_order_update(&mut log, &state, params, &update("a", -1.0, 100.0));
        apply_order_update(&mut log, &state, params, &update("b", 1.0, 110.0));
        assert_eq!(state.short_losses.load(Ordering::Relaxed), 1);
        assert_eq!(state.long_losses.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_same_side_add_blends_average_price() {
        let mut log = OrderLog::new(10);
        let state = SharedState::default();
        let params = params();

        apply_order_update(&mut log, &state, params, &update("a", 1.0, 100.0));
        apply_order_update(&mut log, &state, params, &update("b", 0.5, 104.3));
        // (100.0 + 104.3) / 2 truncated to the tick precision.
        assert_eq!(state.avg_position_price.load(), 102.1);
        assert_eq!(state.short_losses.load(Ordering::Relaxed), 0);
        assert_eq!(state.long_losses.load(Ordering::Relaxed), 0);
    }
}
