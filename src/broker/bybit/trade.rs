//! Order endpoints

use super::models::{CancelOrderResult, OrderDetail, OrderHistoryResult, PlaceOrderResult};
use super::BybitClient;
use crate::broker::BrokerError;

impl BybitClient {
    /// Create a market or limit order. The qty sign selects the side.
    /// <https://bybit-exchange.github.io/docs/v5/order/create-order>
    pub(crate) async fn create_order(
        &self,
        symbol: &str,
        qty: f64,
        price: Option<f64>,
    ) -> Result<String, BrokerError> {
        let mut params = serde_json::json!({
            "category": self.category,
            "symbol": symbol,
            "side": if qty < 0.0 { "Sell" } else { "Buy" },
            "orderType": "Market",
            "isLeverage": 1,
            "qty": qty.abs().to_string(),
        });
        if let Some(price) = price {
            params["price"] = serde_json::Value::String(price.to_string());
            params["orderType"] = serde_json::Value::String("Limit".to_string());
        }
        let body = params.to_string();

        let url = self.rest_url("/v5/order/create", "");
        let request = self.http.post(&url).body(body.clone());
        let result: PlaceOrderResult = self.call(request, &body).await?;
        Ok(result.order_id)
    }

    /// <https://bybit-exchange.github.io/docs/v5/order/cancel-order>
    pub(crate) async fn cancel_active_order(&self, order_id: &str) -> Result<String, BrokerError> {
        let query = format!("category={}&orderId={}", self.category, order_id);
        let url = self.rest_url("/v5/order/cancel", &query);
        let result: CancelOrderResult = self.call(self.http.post(&url), &query).await?;
        Ok(result.order_id)
    }

    /// <https://bybit-exchange.github.io/docs/v5/order/order-list>
    pub(crate) async fn order_history_detail(
        &self,
        order_id: &str,
    ) -> Result<OrderDetail, BrokerError> {
        let query = format!("category={}&orderId={}", self.category, order_id);
        let url = self.rest_url("/v5/order/history", &query);
        let result: OrderHistoryResult = self.call(self.http.get(&url), &query).await?;
        result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| BrokerError::Internal(format!("order with id {order_id} not found")))
    }
}
