//! Bot configuration

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "./config.json";

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingBotConfig {
    pub strategies: Vec<StrategyConfig>,
}

/// Per-strategy parameters. Optional fields fall back to the strategy's
/// defaults and clamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    pub symbol: String,
    pub interval: String,
    pub available_balance: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_ratio: Option<f64>,
    #[serde(
        default,
        rename = "martngaleRatios",
        skip_serializing_if = "Option::is_none"
    )]
    pub martingale_ratios: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend_zone_filter: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_order_offset: Option<f64>,
}

impl Default for TradingBotConfig {
    fn default() -> Self {
        Self {
            strategies: vec![StrategyConfig {
                symbol: String::new(),
                interval: "M5".to_string(),
                available_balance: 15.0,
                long_ratio: Some(0.5),
                martingale_ratios: Some(vec![1.1]),
                trend_zone_filter: Some(0.5),
                limit_order_offset: Some(0.01),
            }],
        }
    }
}

impl TradingBotConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: TradingBotConfig = serde_json::from_str(&content)?;
        Ok(config)
    }
}
