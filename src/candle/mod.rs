//! Candle data model and real-time synchronization
//!
//! Types for OHLCV buckets, the bounded confirmed-candle buffer, and the
//! per-(symbol, interval) synchronizer that merges the live stream with
//! REST backfill.

mod buffer;
mod fields;
mod sync;
mod types;

pub use buffer::SyncBuffer;
pub use fields::{CandleField, OHLCV_FIELDS};
pub use sync::{CandleProvider, CandleSync};
pub use types::{Candle, CandleParseError, CandleStreamData, Interval};
