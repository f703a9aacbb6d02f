//! Feature generation for the trend and zone models

use crate::candle::{Candle, OHLCV_FIELDS};

use super::{LOOKBACK, MAX_ZONE_LEN, NORM_PERIOD, ZONE_FEATURES};

/// Z-score of the last element against the whole slice (population std).
pub fn z_score(s: &[f64]) -> f64 {
    let n = s.len();
    if n <= 1 {
        return 0.0;
    }
    let mean = s.iter().sum::<f64>() / n as f64;
    let variance = s.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        0.0
    } else {
        (s[n - 1] - mean) / std_dev
    }
}

/// Rolling z-score over a trailing window of `period` observations.
/// Early positions use the shorter prefix window.
pub fn z_score_normalize(s: &[f64], period: usize) -> Vec<f64> {
    (0..s.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(period);
            z_score(&s[start..=i])
        })
        .collect()
}

/// Transpose a row-major matrix. Rows must share a length.
pub fn transpose(matrix: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let Some(width) = matrix.first().map(Vec::len) else {
        return Vec::new();
    };
    (0..width)
        .map(|col| matrix.iter().map(|row| row[col]).collect())
        .collect()
}

/// Trend-model input: for each OHLCV field, z-score the series over
/// `NORM_PERIOD` and emit `LOOKBACK` shifted views, aligned per timestep
/// after transposition. One output row per candle beyond the lookback.
pub fn gen_trend_features(candles: &[Candle]) -> Vec<Vec<f64>> {
    let n = candles.len();
    let mut features = vec![Vec::new(); OHLCV_FIELDS.len() * LOOKBACK];

    for (i, field) in OHLCV_FIELDS.iter().enumerate() {
        let series = field.series(candles);
        let normalized = z_score_normalize(&series, NORM_PERIOD);
        for shift in 0..LOOKBACK {
            features[i * LOOKBACK + shift] = normalized[LOOKBACK - shift..n - shift].to_vec();
        }
    }

    transpose(&features)
}

/// Zone-model input for one closed trend zone: the whole-zone z-score of
/// each OHLCV field plus a duration score capped at `MAX_ZONE_LEN`.
pub fn gen_next_tzone_features(zone: &[Candle]) -> Vec<f64> {
    let mut f = vec![0.0; ZONE_FEATURES];
    for (i, field) in OHLCV_FIELDS.iter().enumerate() {
        f[i] = z_score(&field.series(zone));
    }
    f[ZONE_FEATURES - 1] = MAX_ZONE_LEN.min(zone.len() as f64) / MAX_ZONE_LEN;
    f
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_candle(time: i64, price: f64) -> Candle {
        Candle {
            time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: price,
            turnover: price,
        }
    }

    #[test]
    fn test_z_score_constant_series_is_zero() {
        assert_eq!(z_score(&[5.0, 5.0, 5.0]), 0.0);
        assert_eq!(z_score(&[1.0]), 0.0);
        assert_eq!(z_score(&[]), 0.0);
    }

    #[test]
    fn test_z_score_known_value() {
        // mean 2, population std sqrt(2/3); last = 3
        let z = z_score(&[1.0, 2.0, 3.0]);
        assert!((z - 1.0 / (2.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_z_score_normalize_window() {
        let s: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let normalized = z_score_normalize(&s, 3);
        assert_eq!(normalized.len(), 10);
        assert_eq!(normalized[0], 0.0);
        // From the window-filled position on, a linear series has constant score.
        assert!((normalized[5] - normalized[9]).abs() < 1e-12);
    }

    #[test]
    fn test_transpose() {
        let m = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let t = transpose(&m);
        assert_eq!(t, vec![vec![1.0, 4.0], vec![2.0, 5.0], vec![3.0, 6.0]]);
        assert!(transpose(&[]).is_empty());
    }

    #[test]
    fn test_gen_trend_features_shape() {
        let candles: Vec<Candle> = (0..40)
            .map(|i| flat_candle(i as i64 * 60_000, 100.0 + (i % 7) as f64))
            .collect();
        let features = gen_trend_features(&candles);
        assert_eq!(features.len(), 40 - LOOKBACK);
        assert!(features
            .iter()
            .all(|row| row.len() == OHLCV_FIELDS.len() * LOOKBACK));
    }

    #[test]
    fn test_zone_features_length_and_duration_score() {
        let zone: Vec<Candle> = (0..5)
            .map(|i| flat_candle(i as i64, 100.0 + i as f64))
            .collect();
        let f = gen_next_tzone_features(&zone);
        assert_eq!(f.len(), ZONE_FEATURES);
        assert!((f[ZONE_FEATURES - 1] - 5.0 / MAX_ZONE_LEN).abs() < 1e-12);

        let long_zone: Vec<Candle> = (0..30)
            .map(|i| flat_candle(i as i64, 100.0 + i as f64))
            .collect();
        let f = gen_next_tzone_features(&long_zone);
        assert_eq!(f[ZONE_FEATURES - 1], 1.0);
    }

    #[test]
    fn test_zone_features_invariant_under_interior_permutation() {
        let mut zone: Vec<Candle> = (0..8)
            .map(|i| flat_candle(i as i64, 100.0 + (i * i % 11) as f64))
            .collect();
        let before = gen_next_tzone_features(&zone);
        // The score depends on summary statistics and the final candle only.
        zone.swap(1, 4);
        zone.swap(2, 6);
        let after = gen_next_tzone_features(&zone);
        for (a, b) in before.iter().zip(&after) {
            assert!((a - b).abs() < 1e-12);
        }
    }
}
