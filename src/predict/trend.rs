//! Stateful trend/zone predictor
//!
//! Owns the rolling trend-score buffer, the current trend zone, and the two
//! zone-feature buffers. Not safe for concurrent use; the owning strategy
//! serializes calls from its policy loop.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::candle::{Candle, Interval};

use super::features::{gen_next_tzone_features, gen_trend_features};
use super::{
    PredictError, PredictService, INIT_BUFFER_SIZE, LOOKBACK, NORM_PERIOD, TREND_BUFFER_SIZE,
    ZONE_FEATURES, ZONE_LOOKBACK,
};

#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("not enough candles: {have} < {need}")]
    NotEnoughData { have: usize, need: usize },
    #[error("candles data not updated")]
    NotUpdated,
    #[error("received empty prediction")]
    EmptyPrediction,
    #[error(transparent)]
    Service(#[from] PredictError),
}

pub struct TrendPredictor {
    interval: Interval,
    trend_model: String,
    long_zone_model: String,
    short_zone_model: String,
    service: Arc<dyn PredictService>,
    trend_zone: Vec<Candle>,
    trend_buffer: Vec<f64>,
    long_zone_features: Vec<f64>,
    short_zone_features: Vec<f64>,
    last_upd_time: i64,
}

impl TrendPredictor {
    pub fn new(interval: Interval, service: Arc<dyn PredictService>) -> Self {
        let tag = interval.as_str();
        Self {
            interval,
            trend_model: format!("PT-{tag}"),
            long_zone_model: format!("LNTZS-{tag}"),
            short_zone_model: format!("SNTZS-{tag}"),
            service,
            trend_zone: Vec::new(),
            trend_buffer: Vec::with_capacity(TREND_BUFFER_SIZE),
            long_zone_features: vec![0.0; ZONE_FEATURES * ZONE_LOOKBACK],
            short_zone_features: vec![0.0; ZONE_FEATURES * ZONE_LOOKBACK],
            last_upd_time: 0,
        }
    }

    /// Seed the predictor from the last `INIT_BUFFER_SIZE` confirmed candles:
    /// score them with the trend model, replay the zone switches into the
    /// long/short feature buffers, and snapshot the current trend zone.
    pub async fn init(&mut self, candles: &[Candle]) -> Result<(), PredictorError> {
        let n = candles.len();
        if n < INIT_BUFFER_SIZE {
            return Err(PredictorError::NotEnoughData {
                have: n,
                need: INIT_BUFFER_SIZE,
            });
        }
        let candles = &candles[n - INIT_BUFFER_SIZE..];

        let features = gen_trend_features(candles);
        let trend_preds = self.service.predict(&features, &self.trend_model).await?;
        if trend_preds.is_empty() {
            return Err(PredictorError::EmptyPrediction);
        }

        let (long_buf, short_buf) = replay_zone_features(candles, &trend_preds);
        self.long_zone_features = long_buf;
        self.short_zone_features = short_buf;

        self.append_trend_buffer(&trend_preds);
        self.update_trend_zone(candles);
        self.last_upd_time = candles[candles.len() - 1].time + self.interval.as_millis();
        Ok(())
    }

    /// Score the candles that arrived since the last update and return
    /// `[trend, zone]`.
    ///
    /// The zone slot stays 0.0 unless the newest trend score crossed 0.5:
    /// then the just-closed zone is folded into its side's feature buffer and
    /// the *opposing* model is queried with the untouched buffer, because the
    /// prediction is about the newly emerging trend.
    pub async fn next_prediction(&mut self, candles: &[Candle]) -> Result<[f64; 2], PredictorError> {
        let mut prediction = [0.0; 2];
        let n = candles.len();
        let need = NORM_PERIOD + LOOKBACK;
        if n < need {
            return Err(PredictorError::NotEnoughData { have: n, need });
        }

        let new_time = candles[n - 1].time;
        // The +10 ms fudge absorbs exchange timestamp jitter.
        let miss = (new_time - self.last_upd_time + 10) / self.interval.as_millis();
        if miss <= 0 {
            return Err(PredictorError::NotUpdated);
        }
        let miss = miss as usize;
        if n < need + miss {
            return Err(PredictorError::NotEnoughData {
                have: n,
                need: need + miss,
            });
        }

        let features = gen_trend_features(&candles[n - need - miss..]);
        let features = &features[features.len() - miss..];
        let trend_preds = self.service.predict(features, &self.trend_model).await?;
        if trend_preds.is_empty() {
            return Err(PredictorError::EmptyPrediction);
        }

        self.append_trend_buffer(&trend_preds);
        if miss == 1 {
            self.trend_zone.push(candles[n - 1]);
        } else {
            self.update_trend_zone(candles);
        }

        let np = self.trend_buffer.len();
        if np >= 2 && (self.trend_buffer[np - 2] > 0.5) != (self.trend_buffer[np - 1] > 0.5) {
            let f = gen_next_tzone_features(&self.trend_zone);
            let (query, model) = if self.trend_buffer[np - 2] > 0.5 {
                shift_in(&mut self.long_zone_features, &f);
                (self.short_zone_features.clone(), &self.short_zone_model)
            } else {
                shift_in(&mut self.short_zone_features, &f);
                (self.long_zone_features.clone(), &self.long_zone_model)
            };

            match self.service.predict(std::slice::from_ref(&query), model).await {
                Ok(preds) if !preds.is_empty() => prediction[1] = preds[0],
                Ok(_) => warn!(model = %model, "zone model returned no values"),
                Err(e) => warn!(model = %model, error = %e, "zone prediction failed"),
            }
            self.trend_zone = vec![candles[n - 1]];
        }

        self.last_upd_time = new_time;
        prediction[0] = self.trend_buffer[np - 1];
        Ok(prediction)
    }

    fn append_trend_buffer(&mut self, values: &[f64]) {
        self.trend_buffer.extend_from_slice(values);
        if self.trend_buffer.len() > TREND_BUFFER_SIZE * 2 {
            let drop = self.trend_buffer.len() - TREND_BUFFER_SIZE;
            self.trend_buffer.drain(..drop);
        }
    }

    /// Scan the trend buffer backward for the most recent 0.5-crossing and
    /// snapshot the trailing candles of that run as the current zone.
    fn update_trend_zone(&mut self, candles: &[Candle]) {
        let np = self.trend_buffer.len();
        let mut zone_len = 0;
        for i in (1..np.saturating_sub(1)).rev() {
            if (self.trend_buffer[i - 1] > 0.5) != (self.trend_buffer[i] > 0.5) {
                zone_len = np - i;
                break;
            }
        }
        let zone_len = zone_len.min(candles.len());
        self.trend_zone = candles[candles.len() - zone_len..].to_vec();
    }

    #[cfg(test)]
    pub(crate) fn trend_zone_len(&self) -> usize {
        self.trend_zone.len()
    }
}

/// Shift the ring of `ZONE_LOOKBACK` feature rows left by one and write `f`
/// at the tail.
fn shift_in(buffer: &mut [f64], f: &[f64]) {
    buffer.copy_within(ZONE_FEATURES.., 0);
    let tail = buffer.len() - ZONE_FEATURES;
    buffer[tail..].copy_from_slice(f);
}

/// Replay historical zone switches: every adjacent pair of trend scores that
/// straddles 0.5 closes a zone, whose features roll into the buffer of the
/// side that just ended.
fn replay_zone_features(candles: &[Candle], trend: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let nt = trend.len();
    let candles = &candles[candles.len() - nt..];
    let mut long_buf = vec![0.0; ZONE_FEATURES * ZONE_LOOKBACK];
    let mut short_buf = vec![0.0; ZONE_FEATURES * ZONE_LOOKBACK];

    let mut start = 0;
    for i in 1..nt {
        let prev_up = trend[i - 1] > 0.5;
        if prev_up == (trend[i] > 0.5) {
            continue;
        }
        let f = gen_next_tzone_features(&candles[start..=i]);
        if prev_up {
            shift_in(&mut long_buf, &f);
        } else {
            shift_in(&mut short_buf, &f);
        }
        start = i;
    }

    (long_buf, short_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    /// Returns scripted responses in order and records each call's model.
    struct ScriptedService {
        responses: Mutex<VecDeque<Vec<f64>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedService {
        fn new(responses: Vec<Vec<f64>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PredictService for ScriptedService {
        async fn predict(
            &self,
            _features: &[Vec<f64>],
            model: &str,
        ) -> Result<Vec<f64>, PredictError> {
            self.calls.lock().unwrap().push(model.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(PredictError::Empty)
        }
    }

    fn candle_run(count: usize, start_time: i64, interval: Interval) -> Vec<Candle> {
        (0..count)
            .map(|i| {
                let price = 100.0 + (i % 13) as f64 * 0.5;
                Candle {
                    time: start_time + i as i64 * interval.as_millis(),
                    open: price,
                    high: price + 1.0,
                    low: price - 1.0,
                    close: price + 0.25,
                    volume: 10.0 + (i % 5) as f64,
                    turnover: 1_000.0 + i as f64,
                }
            })
            .collect()
    }

    /// Init scores ending above 0.5 so the next crossing closes a long zone.
    fn init_scores() -> Vec<f64> {
        let rows = INIT_BUFFER_SIZE - LOOKBACK;
        (0..rows)
            .map(|i| if (i / 20) % 2 == 0 { 0.8 } else { 0.3 })
            .collect()
    }

    #[tokio::test]
    async fn test_init_requires_enough_candles() {
        let service = ScriptedService::new(vec![]);
        let mut predictor = TrendPredictor::new(Interval::M5, service);
        let candles = candle_run(100, 1_700_000_000_000, Interval::M5);
        assert!(matches!(
            predictor.init(&candles).await,
            Err(PredictorError::NotEnoughData { .. })
        ));
    }

    #[tokio::test]
    async fn test_next_prediction_rejects_stale_candles() {
        let service = ScriptedService::new(vec![init_scores()]);
        let mut predictor = TrendPredictor::new(Interval::M5, service);
        let candles = candle_run(INIT_BUFFER_SIZE, 1_700_000_000_000, Interval::M5);
        predictor.init(&candles).await.unwrap();

        // Same candles again: nothing new to score.
        let tail = &candles[candles.len() - 90..];
        assert!(matches!(
            predictor.next_prediction(tail).await,
            Err(PredictorError::NotUpdated)
        ));
    }

    #[tokio::test]
    async fn test_zone_switch_queries_opposing_model_and_resets_zone() {
        let interval = Interval::M5;
        let service = ScriptedService::new(vec![
            init_scores(),  // PT on init; ends at 0.8 (long)
            vec![0.3],      // PT on update; crossing down closes the long zone
            vec![0.65],     // zone model answer
        ]);
        let mut predictor = TrendPredictor::new(interval, service.clone());

        let mut candles = candle_run(INIT_BUFFER_SIZE + 1, 1_700_000_000_000, interval);
        let next = candles.pop().unwrap();
        predictor.init(&candles).await.unwrap();

        candles.push(next);
        let tail = &candles[candles.len() - 90..];
        let prediction = predictor.next_prediction(tail).await.unwrap();

        assert_eq!(prediction[0], 0.3);
        assert_eq!(prediction[1], 0.65);
        // A closed long zone is scored by the short-side model.
        assert_eq!(
            service.calls(),
            vec!["PT-M5", "PT-M5", "SNTZS-M5"]
        );
        assert_eq!(predictor.trend_zone_len(), 1);
    }

    #[tokio::test]
    async fn test_no_switch_leaves_zone_slot_zero() {
        let interval = Interval::M5;
        let service = ScriptedService::new(vec![
            init_scores(),
            vec![0.8], // stays on the long side
        ]);
        let mut predictor = TrendPredictor::new(interval, service.clone());

        let mut candles = candle_run(INIT_BUFFER_SIZE + 1, 1_700_000_000_000, interval);
        let next = candles.pop().unwrap();
        predictor.init(&candles).await.unwrap();

        let zone_before = predictor.trend_zone_len();
        candles.push(next);
        let tail = &candles[candles.len() - 90..];
        let prediction = predictor.next_prediction(tail).await.unwrap();

        assert_eq!(prediction, [0.8, 0.0]);
        assert_eq!(service.calls().len(), 2);
        // The still-open zone grew by the new candle instead of resetting.
        assert_eq!(predictor.trend_zone_len(), zone_before + 1);
    }

    #[test]
    fn test_trend_buffer_cap_keeps_the_tail() {
        let service = ScriptedService::new(vec![]);
        let mut predictor = TrendPredictor::new(Interval::M5, service);
        for chunk in 0..5 {
            let values: Vec<f64> = (0..100).map(|i| (chunk * 100 + i) as f64).collect();
            predictor.append_trend_buffer(&values);
        }
        assert!(predictor.trend_buffer.len() <= TREND_BUFFER_SIZE * 2);
        assert_eq!(*predictor.trend_buffer.last().unwrap(), 499.0);
    }
}
