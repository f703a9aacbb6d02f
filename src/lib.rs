//! trendbot: live trading core for a trend-following crypto futures bot
//!
//! This library provides the core components for:
//! - Reconnecting WebSocket transport with ping/pong keepalive
//! - Per-(symbol, interval) confirmed-candle history with gap backfill
//! - Trend/zone prediction via an external model service
//! - Order pipeline with placement retry, close-wait, and cancellation
//! - Martingale-sized trend strategy with position tracking
//! - Bybit V5 broker adapter

pub mod broker;
pub mod candle;
pub mod config;
pub mod numeric;
pub mod predict;
pub mod strategy;
pub mod telemetry;
pub mod trading;
pub mod ws;
