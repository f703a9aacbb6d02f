//! HTTP client for the external prediction service

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("could not parse the server response: {0}")]
    Serde(String),
    /// The service answered with a non-empty `error` field.
    #[error("{0}")]
    Service(String),
    #[error("empty response")]
    Empty,
}

/// The seam the predictor depends on; scripted in tests, HTTP in production.
#[async_trait]
pub trait PredictService: Send + Sync {
    /// Score a feature matrix with the named model.
    async fn predict(&self, features: &[Vec<f64>], model: &str) -> Result<Vec<f64>, PredictError>;
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    features: &'a [Vec<f64>],
    model: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct PredictResponse {
    #[serde(default)]
    predict: HashMap<String, Vec<f64>>,
    #[serde(default)]
    error: String,
}

impl PredictResponse {
    /// A non-empty `error` wins; otherwise the first entry in the predict
    /// map is the answer, and an empty map is a protocol violation.
    pub fn into_values(self) -> Result<Vec<f64>, PredictError> {
        if !self.error.is_empty() {
            return Err(PredictError::Service(self.error));
        }
        self.predict
            .into_values()
            .next()
            .ok_or(PredictError::Empty)
    }
}

/// Stateless client for the prediction service. Injected into each strategy
/// through its constructor; there is no process-wide instance.
pub struct PredictClient {
    addr: String,
    http: reqwest::Client,
}

impl PredictClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            http: reqwest::Client::new(),
        }
    }

    /// The service is up once `/ping` answers with any non-empty body.
    pub async fn ping(&self) -> bool {
        let url = format!("http://{}/ping", self.addr);
        match self.http.get(&url).send().await {
            Ok(response) => match response.text().await {
                Ok(body) => !body.is_empty(),
                Err(_) => false,
            },
            Err(_) => false,
        }
    }
}

#[async_trait]
impl PredictService for PredictClient {
    async fn predict(&self, features: &[Vec<f64>], model: &str) -> Result<Vec<f64>, PredictError> {
        let url = format!("http://{}/predict", self.addr);
        let response = self
            .http
            .post(&url)
            .json(&PredictRequest { features, model })
            .send()
            .await
            .map_err(|e| PredictError::Request(e.to_string()))?;

        let decoded: PredictResponse = response
            .json()
            .await
            .map_err(|e| PredictError::Serde(e.to_string()))?;
        decoded.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_error_field_wins() {
        let response: PredictResponse =
            serde_json::from_str(r#"{"predict":{"PT-M5":[0.7]},"error":"model not loaded"}"#)
                .unwrap();
        match response.into_values() {
            Err(PredictError::Service(msg)) => assert_eq!(msg, "model not loaded"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_unwrap_first_prediction() {
        let response: PredictResponse =
            serde_json::from_str(r#"{"predict":{"PT-M5":[0.25,0.75]},"error":""}"#).unwrap();
        assert_eq!(response.into_values().unwrap(), vec![0.25, 0.75]);
    }

    #[test]
    fn test_unwrap_empty_map() {
        let response: PredictResponse = serde_json::from_str(r#"{"predict":{},"error":""}"#).unwrap();
        assert!(matches!(response.into_values(), Err(PredictError::Empty)));
    }
}
