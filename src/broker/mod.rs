//! Broker capability interface and adapters
//!
//! `TradingBot` and `CandleSync` only ever see this narrow contract; the
//! wire details live in the per-exchange adapter underneath.

pub mod bybit;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::candle::{Candle, CandleStreamData, Interval};

/// Exchange operations required by the trading core.
///
/// Sign conventions: positive qty buys, negative sells; a `None` price is a
/// market order. `instrument_info` and `get_order` return the adapter's
/// normalized JSON documents.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Normalized instrument metadata:
    /// `{ "qtyPrecision": int, "minOrderAmt": float, "tickSize": float }`.
    async fn instrument_info(&self, symbol: &str) -> anyhow::Result<Vec<u8>>;

    /// Most-recent `limit` candles, oldest first; the last one is still open.
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>>;

    /// Live kline stream; the channel closes when `ctx` is cancelled.
    async fn candle_stream(
        &self,
        ctx: CancellationToken,
        symbol: &str,
        interval: Interval,
    ) -> anyhow::Result<mpsc::Receiver<CandleStreamData>>;

    /// Returns the exchange order id.
    async fn place_order(
        &self,
        symbol: &str,
        qty: f64,
        price: Option<f64>,
    ) -> anyhow::Result<String>;

    async fn cancel_order(&self, order_id: &str) -> anyhow::Result<String>;

    /// Normalized order snapshot JSON (the shape of [`crate::trading::Order`]).
    async fn get_order(&self, order_id: &str) -> anyhow::Result<Vec<u8>>;
}

/// Adapter error taxonomy. Protocol errors carry the server's code and
/// message; transport and decode problems keep their own lanes so callers
/// can decide what is retryable.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("decode failed: {0}")]
    Serde(String),
    #[error("server error {code}: {msg}")]
    Server { code: i64, msg: String },
    #[error("{0}")]
    Internal(String),
}
