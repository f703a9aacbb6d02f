//! Order records and the request/update envelope

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Wall clock in milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// An exchange order. Positive qty buys, negative sells; `exec_qty` and
/// `exec_value` inherit the side's sign. The serde shape matches the
/// broker's normalized order JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub qty: f64,
    /// Limit price; `None` is a market order.
    pub price: Option<f64>,
    pub avg_price: f64,
    pub exec_qty: f64,
    pub exec_value: f64,
    pub fee: f64,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_closed: bool,
}

impl Order {
    pub fn new(symbol: impl Into<String>, qty: f64, price: Option<f64>) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            price,
            created_at: now_ms(),
            ..Default::default()
        }
    }

    /// Overwrite every field with the fetched snapshot.
    pub fn replace(&mut self, updated: &Order) {
        *self = updated.clone();
    }
}

/// Snapshot sent back to the requester: once after placement, once after the
/// terminal state. Never more than two per link id.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub link_id: String,
    pub tag: String,
    pub order: Order,
}

/// A strategy's ask to the bot. The bot owns `order` while the request is in
/// flight; the requester only sees `OrderUpdate` snapshots on `reply`.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub link_id: String,
    pub tag: String,
    pub order: Order,
    pub delay: Duration,
    pub place_timeout: Duration,
    pub close_timeout: Duration,
    pub reply: Option<mpsc::Sender<OrderUpdate>>,
}

impl OrderRequest {
    pub fn new(order: Order) -> Self {
        Self {
            link_id: String::new(),
            tag: String::new(),
            order,
            delay: Duration::ZERO,
            place_timeout: Duration::from_secs(2),
            close_timeout: Duration::from_secs(60),
            reply: None,
        }
    }

    pub fn link_id(mut self, link_id: impl Into<String>) -> Self {
        self.link_id = link_id.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn place_timeout(mut self, timeout: Duration) -> Self {
        self.place_timeout = timeout;
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn reply(mut self, reply: mpsc::Sender<OrderUpdate>) -> Self {
        self.reply = Some(reply);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_is_structurally_equal() {
        let mut order = Order::new("BTCUSDT", -0.5, Some(42_000.0));
        order.id = "o-1".to_string();
        order.exec_qty = -0.5;
        order.fee = 0.01;
        assert_eq!(order.clone(), order);
    }

    #[test]
    fn test_decodes_broker_snapshot() {
        let body = r#"{
            "id": "o-1",
            "symbol": "BTCUSDT",
            "qty": -0.5,
            "price": 42000.0,
            "avgPrice": 41990.5,
            "execQty": -0.5,
            "execValue": -20995.25,
            "fee": 0.01,
            "isClosed": true,
            "createdAt": 1700000000000,
            "updatedAt": 1700000001000
        }"#;
        let order: Order = serde_json::from_str(body).unwrap();
        assert_eq!(order.id, "o-1");
        assert_eq!(order.qty, -0.5);
        assert_eq!(order.avg_price, 41_990.5);
        assert!(order.is_closed);
    }

    #[test]
    fn test_request_defaults_and_builder() {
        let (tx, _rx) = mpsc::channel(1);
        let request = OrderRequest::new(Order::new("BTCUSDT", 1.0, None))
            .link_id("link-1")
            .tag("close")
            .delay(Duration::from_millis(50))
            .close_timeout(Duration::from_millis(500))
            .reply(tx);

        assert_eq!(request.link_id, "link-1");
        assert_eq!(request.tag, "close");
        assert_eq!(request.place_timeout, Duration::from_secs(2));
        assert_eq!(request.close_timeout, Duration::from_millis(500));
        assert!(request.reply.is_some());
    }

    #[test]
    fn test_replace_overwrites_all_fields() {
        let mut order = Order::new("BTCUSDT", 1.0, None);
        let mut updated = order.clone();
        updated.id = "o-9".to_string();
        updated.exec_qty = 1.0;
        updated.is_closed = true;
        order.replace(&updated);
        assert_eq!(order, updated);
    }
}
