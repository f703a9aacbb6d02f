//! Core candle and interval types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One OHLCV bucket. `time` is the bucket timestamp in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: f64,
}

/// A live frame from the exchange stream. `confirm = true` marks the final
/// state of the bucket; it arrives exactly once per bucket in healthy
/// conditions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandleStreamData {
    pub candle: Candle,
    pub interval: Interval,
    pub confirm: bool,
}

#[derive(Debug, Error)]
pub enum CandleParseError {
    #[error("invalid candle timestamp: {0}")]
    Time(#[from] std::num::ParseIntError),
    #[error("invalid candle field: {0}")]
    Field(#[from] std::num::ParseFloatError),
    #[error("unsupported interval: {0}")]
    Interval(String),
}

impl Candle {
    /// Parse the exchange's raw 7-element representation:
    /// `[time, open, high, low, close, volume, turnover]`, all strings.
    pub fn from_raw(raw: &[String; 7]) -> Result<Self, CandleParseError> {
        Ok(Self {
            time: raw[0].parse()?,
            open: raw[1].parse()?,
            high: raw[2].parse()?,
            low: raw[3].parse()?,
            close: raw[4].parse()?,
            volume: raw[5].parse()?,
            turnover: raw[6].parse()?,
        })
    }
}

/// Candle bucket duration. Closed set: everything the exchange serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H12,
    D1,
    D7,
    D30,
}

impl Interval {
    /// Bucket duration in milliseconds.
    pub fn as_millis(self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            Interval::M1 => MINUTE,
            Interval::M3 => 3 * MINUTE,
            Interval::M5 => 5 * MINUTE,
            Interval::M15 => 15 * MINUTE,
            Interval::M30 => 30 * MINUTE,
            Interval::H1 => 60 * MINUTE,
            Interval::H2 => 120 * MINUTE,
            Interval::H4 => 240 * MINUTE,
            Interval::H6 => 360 * MINUTE,
            Interval::H12 => 720 * MINUTE,
            Interval::D1 => 1_440 * MINUTE,
            Interval::D7 => 7 * 1_440 * MINUTE,
            Interval::D30 => 30 * 1_440 * MINUTE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Interval::M1 => "M1",
            Interval::M3 => "M3",
            Interval::M5 => "M5",
            Interval::M15 => "M15",
            Interval::M30 => "M30",
            Interval::H1 => "H1",
            Interval::H2 => "H2",
            Interval::H4 => "H4",
            Interval::H6 => "H6",
            Interval::H12 => "H12",
            Interval::D1 => "D1",
            Interval::D7 => "D7",
            Interval::D30 => "D30",
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Interval {
    type Err = CandleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "M1" => Ok(Interval::M1),
            "M3" => Ok(Interval::M3),
            "M5" => Ok(Interval::M5),
            "M15" => Ok(Interval::M15),
            "M30" => Ok(Interval::M30),
            "H1" => Ok(Interval::H1),
            "H2" => Ok(Interval::H2),
            "H4" => Ok(Interval::H4),
            "H6" => Ok(Interval::H6),
            "H12" => Ok(Interval::H12),
            "D1" => Ok(Interval::D1),
            "D7" => Ok(Interval::D7),
            "D30" => Ok(Interval::D30),
            other => Err(CandleParseError::Interval(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candle_from_raw() {
        let raw = [
            "1700000000000".to_string(),
            "100.5".to_string(),
            "101".to_string(),
            "99.75".to_string(),
            "100.25".to_string(),
            "1234.5".to_string(),
            "123789.25".to_string(),
        ];
        let candle = Candle::from_raw(&raw).unwrap();
        assert_eq!(candle.time, 1_700_000_000_000);
        assert_eq!(candle.open, 100.5);
        assert_eq!(candle.turnover, 123_789.25);
    }

    #[test]
    fn test_candle_from_raw_invalid() {
        let mut raw = std::array::from_fn::<String, 7, _>(|_| "1".to_string());
        raw[2] = "not a number".to_string();
        assert!(Candle::from_raw(&raw).is_err());
    }

    #[test]
    fn test_interval_millis() {
        assert_eq!(Interval::M1.as_millis(), 60_000);
        assert_eq!(Interval::M5.as_millis(), 300_000);
        assert_eq!(Interval::H1.as_millis(), 3_600_000);
        assert_eq!(Interval::D7.as_millis(), 7 * 86_400_000);
    }

    #[test]
    fn test_interval_parse_roundtrip() {
        for s in ["M1", "M15", "H4", "D1", "D30"] {
            let interval: Interval = s.parse().unwrap();
            assert_eq!(interval.as_str(), s);
        }
        assert!("M2".parse::<Interval>().is_err());
    }
}
