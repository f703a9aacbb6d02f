//! Bybit V5 wire models

use serde::Deserialize;

/// Standard envelope of every REST response. `ret_code == 0` is success.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerResponse {
    pub ret_code: i64,
    #[serde(default)]
    pub ret_msg: String,
    #[serde(default)]
    pub result: serde_json::Value,
    /// Server timestamp in milliseconds.
    #[serde(default)]
    #[allow(dead_code)]
    pub time: i64,
}

#[derive(Debug, Deserialize)]
pub struct InstrumentInfoResult {
    #[serde(default)]
    pub list: Vec<InstrumentInfoRaw>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentInfoRaw {
    #[serde(default)]
    #[allow(dead_code)]
    pub symbol: String,
    #[serde(default)]
    pub lot_size_filter: LotSizeFilter,
    #[serde(default)]
    pub price_filter: PriceFilter,
}

/// Quantity constraints. Spot instruments populate the order-amount and
/// base-precision fields, derivatives the notional and step fields.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotSizeFilter {
    #[serde(default)]
    pub base_precision: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub min_order_amt: String,
    #[serde(default)]
    pub max_order_amt: String,
    #[serde(default)]
    pub min_notional_value: String,
    #[serde(default)]
    pub qty_step: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceFilter {
    #[serde(default)]
    pub tick_size: String,
}

/// Kline page: rows are `[start, open, high, low, close, volume, turnover]`
/// as strings, newest first.
#[derive(Debug, Deserialize)]
pub struct KlineResult {
    #[serde(default)]
    pub list: Vec<[String; 7]>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderResult {
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderResult {
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderHistoryResult {
    #[serde(default)]
    pub list: Vec<OrderDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub order_id: String,
    pub symbol: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub qty: String,
    #[serde(default)]
    pub price: String,
    #[serde(default)]
    pub avg_price: String,
    #[serde(default)]
    pub cum_exec_qty: String,
    #[serde(default)]
    pub cum_exec_value: String,
    #[serde(default)]
    pub cum_exec_fee: String,
    #[serde(default)]
    pub order_status: String,
    #[serde(default)]
    pub created_time: String,
    #[serde(default)]
    pub updated_time: String,
}

/// One kline frame from the public WebSocket topic.
#[derive(Debug, Deserialize)]
pub struct KlineStreamMsg {
    #[serde(default)]
    #[allow(dead_code)]
    pub topic: String,
    #[serde(default)]
    pub data: Vec<KlineStreamData>,
}

#[derive(Debug, Deserialize)]
pub struct KlineStreamData {
    /// Bucket start boundary.
    #[serde(default)]
    #[allow(dead_code)]
    pub start: i64,
    /// Bucket end boundary; used as the frame's candle timestamp.
    pub end: i64,
    pub interval: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    pub turnover: String,
    pub confirm: bool,
}
