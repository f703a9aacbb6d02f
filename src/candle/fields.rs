//! Per-candle field accessors
//!
//! The predictor builds its feature matrix from the six raw OHLCV fields;
//! the derived accessors are available to any consumer that wants a price
//! or shape series without hand-rolling the arithmetic.

use super::Candle;

/// Selects a scalar value out of a candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleField {
    Open,
    High,
    Low,
    Close,
    Volume,
    Turnover,
    /// (high + low) / 2
    MedianPrice,
    /// (high + low + close) / 3
    TypicalPrice,
    /// (open + high + low + close) / 4
    MeanPrice,
    /// high - low
    TrueRange,
    /// close - open
    Momentum,
    /// (close - open) / open
    RateOfChange,
    /// |close - open|
    Body,
    /// high - max(open, close)
    UpperWick,
    /// min(open, close) - low
    LowerWick,
    /// 1 bullish, -1 bearish, 0 doji
    Direction,
    /// turnover / volume
    Vwap,
    /// (close - low) / (high - low)
    CloseLocation,
}

/// The feature basis used by the trend models, in model input order.
pub const OHLCV_FIELDS: [CandleField; 6] = [
    CandleField::Open,
    CandleField::High,
    CandleField::Low,
    CandleField::Close,
    CandleField::Volume,
    CandleField::Turnover,
];

impl CandleField {
    pub fn value(self, c: &Candle) -> f64 {
        match self {
            CandleField::Open => c.open,
            CandleField::High => c.high,
            CandleField::Low => c.low,
            CandleField::Close => c.close,
            CandleField::Volume => c.volume,
            CandleField::Turnover => c.turnover,
            CandleField::MedianPrice => (c.high + c.low) / 2.0,
            CandleField::TypicalPrice => (c.high + c.low + c.close) / 3.0,
            CandleField::MeanPrice => (c.open + c.high + c.low + c.close) / 4.0,
            CandleField::TrueRange => c.high - c.low,
            CandleField::Momentum => c.close - c.open,
            CandleField::RateOfChange => {
                if c.open != 0.0 {
                    (c.close - c.open) / c.open
                } else {
                    0.0
                }
            }
            CandleField::Body => (c.close - c.open).abs(),
            CandleField::UpperWick => c.high - c.open.max(c.close),
            CandleField::LowerWick => c.open.min(c.close) - c.low,
            CandleField::Direction => {
                if c.close > c.open {
                    1.0
                } else if c.close < c.open {
                    -1.0
                } else {
                    0.0
                }
            }
            CandleField::Vwap => {
                if c.volume != 0.0 {
                    c.turnover / c.volume
                } else {
                    0.0
                }
            }
            CandleField::CloseLocation => {
                let range = c.high - c.low;
                if range != 0.0 {
                    (c.close - c.low) / range
                } else {
                    0.0
                }
            }
        }
    }

    /// Extract this field from every candle in the slice.
    pub fn series(self, candles: &[Candle]) -> Vec<f64> {
        candles.iter().map(|c| self.value(c)).collect()
    }
}
