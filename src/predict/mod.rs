//! Prediction service client and the trend/zone predictor

mod client;
mod features;
mod trend;

pub use client::{PredictClient, PredictError, PredictResponse, PredictService};
pub use features::{gen_next_tzone_features, gen_trend_features, transpose, z_score, z_score_normalize};
pub use trend::{PredictorError, TrendPredictor};

/// Rolling z-score window for trend features.
pub const NORM_PERIOD: usize = 21;
/// Shifted views per field in the trend feature matrix.
pub const LOOKBACK: usize = 9;
/// Zone feature rows kept per side.
pub const ZONE_LOOKBACK: usize = 5;
/// Values per zone feature row: six OHLCV z-scores plus the duration score.
pub const ZONE_FEATURES: usize = 7;
/// Zone length at which the duration score saturates.
pub const MAX_ZONE_LEN: f64 = 14.0;
/// Trend-score buffer target size; trimmed back once it doubles.
pub const TREND_BUFFER_SIZE: usize = 200;
/// Confirmed candles needed to seed the predictor.
pub const INIT_BUFFER_SIZE: usize = 300;
