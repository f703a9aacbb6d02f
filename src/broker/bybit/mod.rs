//! Bybit V5 adapter
//!
//! REST + public WebSocket client implementing the [`Broker`] contract.
//! Requests are signed with HMAC-SHA256 over
//! `timestamp + api_key + recv_window + queryOrBody`.

mod market;
mod models;
mod trade;

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Broker, BrokerError};
use crate::candle::{Candle, CandleStreamData, Interval};
use crate::numeric::decimal_places;

pub const MAINNET: &str = "https://api.bybit.com";
pub const TESTNET: &str = "https://api-testnet.bybit.com";
pub const PUBLIC_WS: &str = "wss://stream.bybit.com/v5/public";

/// Bybit REST/WebSocket client. Cheap to clone is not a goal; share it
/// behind an `Arc` like any other broker.
pub struct BybitClient {
    base_url: String,
    ws_url: String,
    api_key: String,
    api_secret: String,
    recv_window: u32,
    category: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl BybitClient {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            base_url: MAINNET.to_string(),
            ws_url: PUBLIC_WS.to_string(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            recv_window: 5_000,
            category: "spot".to_string(),
            timeout: Duration::from_secs(5),
            http: reqwest::Client::new(),
        }
    }

    /// Credentials from `BYBIT_API_KEY` / `BYBIT_API_SECRET` (a `.env` file
    /// is honoured when present).
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        let api_key = std::env::var("BYBIT_API_KEY")
            .map_err(|_| anyhow::anyhow!("BYBIT_API_KEY is not set"))?;
        let api_secret = std::env::var("BYBIT_API_SECRET")
            .map_err(|_| anyhow::anyhow!("BYBIT_API_SECRET is not set"))?;
        Ok(Self::new(api_key, api_secret))
    }

    /// Set the REST base URL (mainnet, testnet, or a mock).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the public stream base URL.
    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    /// Set the product category (`spot`, `linear`, `inverse`).
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the request validity window in milliseconds.
    pub fn recv_window(mut self, recv_window: u32) -> Self {
        self.recv_window = recv_window;
        self
    }

    /// Set the per-request HTTP timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn sign(&self, timestamp: &str, payload: &str) -> String {
        let message = format!("{timestamp}{}{}{payload}", self.api_key, self.recv_window);
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Sign and execute a request, unwrap the server envelope, and decode
    /// `result`. `payload` is the query string for GETs, the body for POSTs.
    pub(crate) async fn call<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        payload: &str,
    ) -> Result<T, BrokerError> {
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let signature = self.sign(&timestamp, payload);

        let response = request
            .header("X-BAPI-API-KEY", &self.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-SIGN", signature)
            .header("X-BAPI-RECV-WINDOW", self.recv_window.to_string())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| BrokerError::Request(e.to_string()))?;

        let envelope: models::ServerResponse = response
            .json()
            .await
            .map_err(|e| BrokerError::Serde(e.to_string()))?;
        if envelope.ret_code != 0 {
            return Err(BrokerError::Server {
                code: envelope.ret_code,
                msg: envelope.ret_msg,
            });
        }
        serde_json::from_value(envelope.result).map_err(|e| BrokerError::Serde(e.to_string()))
    }

    pub(crate) fn rest_url(&self, path: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        }
    }

    /// Normalize raw instrument metadata into the broker-agnostic document.
    /// Spot instruments take the order-amount ceiling and the base-asset
    /// precision; derivatives take the notional floor and the qty step.
    fn normalize_instrument(
        &self,
        info: &models::InstrumentInfoRaw,
    ) -> Result<Vec<u8>, BrokerError> {
        let (min_order_amt, qty_precision) = if self.category == "spot" {
            (
                parse_num(&info.lot_size_filter.max_order_amt)?,
                decimal_places(parse_num(&info.lot_size_filter.base_precision)?),
            )
        } else {
            (
                parse_num(&info.lot_size_filter.min_notional_value)?,
                decimal_places(parse_num(&info.lot_size_filter.qty_step)?),
            )
        };
        let tick_size = parse_num(&info.price_filter.tick_size)?;

        let doc = serde_json::json!({
            "qtyPrecision": qty_precision,
            "minOrderAmt": min_order_amt,
            "tickSize": tick_size,
        });
        serde_json::to_vec(&doc).map_err(|e| BrokerError::Serde(e.to_string()))
    }
}

/// Bybit's interval encoding: minutes as numbers, then D/W/M.
pub fn wire_interval(interval: Interval) -> &'static str {
    match interval {
        Interval::M1 => "1",
        Interval::M3 => "3",
        Interval::M5 => "5",
        Interval::M15 => "15",
        Interval::M30 => "30",
        Interval::H1 => "60",
        Interval::H2 => "120",
        Interval::H4 => "240",
        Interval::H6 => "360",
        Interval::H12 => "720",
        Interval::D1 => "D",
        Interval::D7 => "W",
        Interval::D30 => "M",
    }
}

/// Bybit sends numeric fields as strings; unfilled ones come through empty.
pub(crate) fn parse_num(s: &str) -> Result<f64, BrokerError> {
    if s.is_empty() {
        return Ok(0.0);
    }
    s.parse()
        .map_err(|e| BrokerError::Serde(format!("bad number {s:?}: {e}")))
}

pub(crate) fn parse_millis(s: &str) -> Result<i64, BrokerError> {
    if s.is_empty() {
        return Ok(0);
    }
    s.parse()
        .map_err(|e| BrokerError::Serde(format!("bad timestamp {s:?}: {e}")))
}

#[async_trait]
impl Broker for BybitClient {
    async fn instrument_info(&self, symbol: &str) -> anyhow::Result<Vec<u8>> {
        let info = self.fetch_instrument_info(symbol).await?;
        Ok(self.normalize_instrument(&info)?)
    }

    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        Ok(self.fetch_candles(symbol, interval, limit).await?)
    }

    async fn candle_stream(
        &self,
        ctx: CancellationToken,
        symbol: &str,
        interval: Interval,
    ) -> anyhow::Result<mpsc::Receiver<CandleStreamData>> {
        Ok(self.open_candle_stream(ctx, symbol, interval).await?)
    }

    async fn place_order(
        &self,
        symbol: &str,
        qty: f64,
        price: Option<f64>,
    ) -> anyhow::Result<String> {
        Ok(self.create_order(symbol, qty, price).await?)
    }

    async fn cancel_order(&self, order_id: &str) -> anyhow::Result<String> {
        Ok(self.cancel_active_order(order_id).await?)
    }

    async fn get_order(&self, order_id: &str) -> anyhow::Result<Vec<u8>> {
        let detail = self.order_history_detail(order_id).await?;

        let mut qty = parse_num(&detail.qty)?;
        let mut exec_qty = parse_num(&detail.cum_exec_qty)?;
        let mut exec_value = parse_num(&detail.cum_exec_value)?;
        if detail.side == "Sell" {
            qty = -qty;
            exec_qty = -exec_qty;
            exec_value = -exec_value;
        }
        let is_closed = !matches!(
            detail.order_status.as_str(),
            "New" | "PartiallyFilled" | "Untriggered"
        );

        let doc = serde_json::json!({
            "id": detail.order_id,
            "symbol": detail.symbol,
            "qty": qty,
            "price": parse_num(&detail.price)?,
            "avgPrice": parse_num(&detail.avg_price)?,
            "execQty": exec_qty,
            "execValue": exec_value,
            "fee": parse_num(&detail.cum_exec_fee)?,
            "isClosed": is_closed,
            "createdAt": parse_millis(&detail.created_time)?,
            "updatedAt": parse_millis(&detail.updated_time)?,
        });
        Ok(serde_json::to_vec(&doc)?)
    }
}
