//! Per-(symbol, interval) registry of candle synchronizers

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::candle::{Candle, CandleProvider, CandleStreamData, CandleSync, Interval};

/// Normalized instrument metadata from the broker.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentInfo {
    pub qty_precision: u32,
    pub min_order_amt: f64,
    pub tick_size: f64,
}

/// Presents a broker as a candle source for [`CandleSync`].
struct BrokerCandles(Arc<dyn Broker>);

#[async_trait]
impl CandleProvider for BrokerCandles {
    async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        self.0.get_candles(symbol, interval, limit).await
    }

    async fn candle_stream(
        &self,
        ctx: CancellationToken,
        symbol: &str,
        interval: Interval,
    ) -> anyhow::Result<mpsc::Receiver<CandleStreamData>> {
        self.0.candle_stream(ctx, symbol, interval).await
    }
}

/// Lazily creates one [`CandleSync`] per (symbol, interval) and memoizes
/// instrument metadata per symbol. Shared by every strategy in the bot.
pub struct SubData {
    ctx: CancellationToken,
    broker: Arc<dyn Broker>,
    provider: Arc<dyn CandleProvider>,
    buffer_size: usize,
    registry: Mutex<HashMap<(String, Interval), Arc<CandleSync>>>,
    instruments: Mutex<HashMap<String, InstrumentInfo>>,
}

impl SubData {
    pub fn new(ctx: CancellationToken, broker: Arc<dyn Broker>, buffer_size: usize) -> Self {
        Self {
            ctx,
            provider: Arc::new(BrokerCandles(broker.clone())),
            broker,
            buffer_size,
            registry: Mutex::new(HashMap::new()),
            instruments: Mutex::new(HashMap::new()),
        }
    }

    async fn get_or_create(
        &self,
        symbol: &str,
        interval: Interval,
    ) -> anyhow::Result<Arc<CandleSync>> {
        let mut registry = self.registry.lock().await;
        let key = (symbol.to_string(), interval);
        if let Some(sync) = registry.get(&key) {
            return Ok(sync.clone());
        }
        let sync = CandleSync::start(
            self.ctx.child_token(),
            symbol,
            interval,
            self.buffer_size,
            self.provider.clone(),
        )
        .await?;
        registry.insert(key, sync.clone());
        Ok(sync)
    }

    /// Subscribe a sink to the live stream; cancel the returned token to
    /// unsubscribe.
    pub async fn subscribe_chan(
        &self,
        symbol: &str,
        interval: Interval,
        sink: mpsc::Sender<CandleStreamData>,
    ) -> anyhow::Result<CancellationToken> {
        Ok(self.get_or_create(symbol, interval).await?.subscribe(sink))
    }

    /// Settled read of the most-recent confirmed candles.
    pub async fn read_confirm_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        let sync = self.get_or_create(symbol, interval).await?;
        Ok(sync.read_confirm_candles(limit).await)
    }

    /// Instrument metadata, fetched once per symbol.
    pub async fn instrument_info(&self, symbol: &str) -> anyhow::Result<InstrumentInfo> {
        let mut instruments = self.instruments.lock().await;
        if let Some(info) = instruments.get(symbol) {
            return Ok(*info);
        }
        let raw = self.broker.instrument_info(symbol).await?;
        let info: InstrumentInfo = serde_json::from_slice(&raw)?;
        instruments.insert(symbol.to_string(), info);
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_info_decodes_normalized_doc() {
        let body = r#"{"qtyPrecision":3,"minOrderAmt":5.0,"tickSize":0.5}"#;
        let info: InstrumentInfo = serde_json::from_str(body).unwrap();
        assert_eq!(info.qty_precision, 3);
        assert_eq!(info.min_order_amt, 5.0);
        assert_eq!(info.tick_size, 0.5);
    }
}
