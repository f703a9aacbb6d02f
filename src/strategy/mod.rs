//! Strategy implementations driven by the trading bot

mod order_log;
mod trend;

pub use order_log::OrderLog;
pub use trend::TrendStrategy;
