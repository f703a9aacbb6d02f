//! Market data endpoints and the public kline stream

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::models::{InstrumentInfoRaw, InstrumentInfoResult, KlineResult, KlineStreamMsg};
use super::{parse_num, wire_interval, BybitClient};
use crate::broker::BrokerError;
use crate::candle::{Candle, CandleStreamData, Interval};
use crate::ws::{self, WsConfig};

/// One REST kline page is capped by the exchange.
const KLINE_PAGE_LIMIT: usize = 1_000;

impl BybitClient {
    /// <https://bybit-exchange.github.io/docs/v5/market/instrument>
    pub(crate) async fn fetch_instrument_info(
        &self,
        symbol: &str,
    ) -> Result<InstrumentInfoRaw, BrokerError> {
        let query = format!("category={}&symbol={}", self.category, symbol);
        let url = self.rest_url("/v5/market/instruments-info", &query);
        let result: InstrumentInfoResult = self.call(self.http.get(&url), &query).await?;
        result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| BrokerError::Internal(format!("instrument {symbol} not found")))
    }

    /// Historical candles, oldest first; the last one is still open.
    /// Pages through the 1000-row REST cap with the `end` cursor.
    /// <https://bybit-exchange.github.io/docs/v5/market/kline>
    pub(crate) async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, BrokerError> {
        let mut candles = self
            .kline_page(symbol, interval, limit.min(KLINE_PAGE_LIMIT), None)
            .await?;

        let mut remaining = limit.saturating_sub(KLINE_PAGE_LIMIT);
        while remaining > 0 {
            let Some(oldest) = candles.last() else { break };
            let page_limit = remaining.min(KLINE_PAGE_LIMIT);
            let page = self
                .kline_page(symbol, interval, page_limit, Some(oldest.time - 1))
                .await?;
            if page.is_empty() {
                break;
            }
            candles.extend(page);
            remaining -= page_limit;
        }

        candles.reverse();
        Ok(candles)
    }

    /// One kline page in API order (newest first).
    async fn kline_page(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        end: Option<i64>,
    ) -> Result<Vec<Candle>, BrokerError> {
        let mut query = format!(
            "category={}&interval={}&limit={}&symbol={}",
            self.category,
            wire_interval(interval),
            limit,
            symbol,
        );
        if let Some(end) = end {
            // Keys stay alphabetical; the signature covers the query string.
            query = format!(
                "category={}&end={}&interval={}&limit={}&symbol={}",
                self.category,
                end,
                wire_interval(interval),
                limit,
                symbol,
            );
        }
        let url = self.rest_url("/v5/market/kline", &query);
        let result: KlineResult = self.call(self.http.get(&url), &query).await?;
        result
            .list
            .iter()
            .map(|raw| Candle::from_raw(raw).map_err(|e| BrokerError::Serde(e.to_string())))
            .collect()
    }

    /// Subscribe to `kline.<interval>.<symbol>` on the public stream.
    ///
    /// Raw frames that do not decode into a kline update are dropped. If the
    /// consumer stalls for over a second, non-confirm frames are dropped too;
    /// confirm frames are always delivered.
    /// <https://bybit-exchange.github.io/docs/v5/websocket/public/kline>
    pub(crate) async fn open_candle_stream(
        &self,
        ctx: CancellationToken,
        symbol: &str,
        interval: Interval,
    ) -> Result<mpsc::Receiver<CandleStreamData>, BrokerError> {
        let topic = format!("kline.{}.{}", wire_interval(interval), symbol);
        let handshake = serde_json::json!({
            "req_id": Uuid::new_v4().to_string(),
            "op": "subscribe",
            "args": [topic],
        })
        .to_string();

        let url = format!("{}/{}", self.ws_url, self.category);
        let mut frames = ws::connect(url, ctx, WsConfig::new().handshake(handshake))
            .await
            .map_err(|e| {
                BrokerError::Internal(format!("failed to create websocket connection: {e}"))
            })?;

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            while let Some(bytes) = frames.recv().await {
                let Ok(msg) = serde_json::from_slice::<KlineStreamMsg>(&bytes) else {
                    continue;
                };
                let Some(data) = decode_stream_frame(&msg) else {
                    continue;
                };

                match tokio::time::timeout(Duration::from_secs(1), tx.send(data)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => return,
                    Err(_) => {
                        if data.confirm && tx.send(data).await.is_err() {
                            return;
                        }
                    }
                }
            }
            // Transport closed (cancellation); dropping tx closes the stream.
        });

        Ok(rx)
    }
}

/// Stream candles are stamped with the bucket's end boundary: a confirm
/// frame closing the pending bucket lands exactly one interval past the
/// synchronizer's `confirm_time`, which is what drives the miss arithmetic.
fn decode_stream_frame(msg: &KlineStreamMsg) -> Option<CandleStreamData> {
    let data = msg.data.first()?;
    let interval = parse_wire_interval(&data.interval)?;
    let candle = Candle {
        time: data.end,
        open: parse_num(&data.open).ok()?,
        high: parse_num(&data.high).ok()?,
        low: parse_num(&data.low).ok()?,
        close: parse_num(&data.close).ok()?,
        volume: parse_num(&data.volume).ok()?,
        turnover: parse_num(&data.turnover).ok()?,
    };
    Some(CandleStreamData {
        candle,
        interval,
        confirm: data.confirm,
    })
}

fn parse_wire_interval(s: &str) -> Option<Interval> {
    Some(match s {
        "1" => Interval::M1,
        "3" => Interval::M3,
        "5" => Interval::M5,
        "15" => Interval::M15,
        "30" => Interval::M30,
        "60" => Interval::H1,
        "120" => Interval::H2,
        "240" => Interval::H4,
        "360" => Interval::H6,
        "720" => Interval::H12,
        "D" => Interval::D1,
        "W" => Interval::D7,
        "M" => Interval::D30,
        _ => return None,
    })
}
