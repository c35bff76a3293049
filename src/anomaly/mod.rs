//! Anomaly Detector: trend-based risk over metric streams
//!
//! Each metric keeps its last `2N` samples: the older half is the prior
//! window, the newer half the recent window. A metric is at risk when
//! `avg(recent) > avg(prior) × growth_factor`. Predictions are heuristics
//! that feed preventive actions; the reactive check path never waits on
//! them.

use dashmap::DashMap;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tracing::debug;

use crate::config::AnomalyConfig;
use crate::types::{MetricSample, Prediction};

/// Floor and ceiling for the reported probability
const MIN_PROBABILITY: f64 = 0.5;
const MAX_PROBABILITY: f64 = 0.99;

/// Recent vs prior sub-windows for one metric
#[derive(Debug, Clone)]
pub struct TrendWindow {
    samples: VecDeque<f64>,
    size: usize,
}

impl TrendWindow {
    /// `size` samples per sub-window
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            samples: VecDeque::with_capacity(size * 2),
            size,
        }
    }

    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if self.samples.len() == self.size * 2 {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Both sub-windows are populated
    pub fn is_full(&self) -> bool {
        self.samples.len() == self.size * 2
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// (prior average, recent average) once full
    pub fn averages(&self) -> Option<(f64, f64)> {
        if !self.is_full() {
            return None;
        }
        let n = self.size as f64;
        let prior: f64 = self.samples.iter().take(self.size).sum::<f64>() / n;
        let recent: f64 = self.samples.iter().skip(self.size).sum::<f64>() / n;
        Some((prior, recent))
    }
}

pub struct AnomalyDetector {
    windows: DashMap<String, TrendWindow>,
    window_size: usize,
    growth_factor: f64,
    min_prior_average: f64,
    limits: BTreeMap<String, f64>,
    sample_interval: Duration,
}

impl AnomalyDetector {
    pub fn new(config: &AnomalyConfig, sample_interval: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            window_size: config.window_size.max(1),
            growth_factor: config.growth_factor,
            min_prior_average: config.min_prior_average.max(0.0),
            limits: config.limits.clone(),
            sample_interval,
        }
    }

    pub fn observe(&self, sample: &MetricSample) {
        self.windows
            .entry(sample.name.clone())
            .or_insert_with(|| TrendWindow::new(self.window_size))
            .push(sample.value);
    }

    /// Metrics currently trending past the growth factor, ordered by name
    pub fn predict(&self) -> Vec<Prediction> {
        let mut predictions: Vec<Prediction> = self
            .windows
            .iter()
            .filter_map(|entry| self.evaluate(entry.key(), entry.value()))
            .collect();
        predictions.sort_by(|a, b| a.metric.cmp(&b.metric));
        predictions
    }

    fn evaluate(&self, metric: &str, window: &TrendWindow) -> Option<Prediction> {
        let (prior, recent) = window.averages()?;
        if prior <= self.min_prior_average || prior <= 0.0 {
            return None;
        }

        let ratio = recent / prior;
        if ratio <= self.growth_factor {
            return None;
        }

        let prediction = Prediction {
            metric: metric.to_string(),
            probability: self.probability(ratio),
            estimated_impact_secs: self.impact_secs(metric, prior, recent),
            recent_avg: recent,
            baseline_avg: prior,
            growth_ratio: ratio,
        };
        debug!(
            metric,
            ratio,
            probability = prediction.probability,
            "Trend risk detected"
        );
        Some(prediction)
    }

    /// 0.5 at the growth factor, approaching 1.0 as the ratio grows
    fn probability(&self, ratio: f64) -> f64 {
        let p = MIN_PROBABILITY + (1.0 - MIN_PROBABILITY) * (1.0 - self.growth_factor / ratio);
        p.clamp(MIN_PROBABILITY, MAX_PROBABILITY)
    }

    /// Linear extrapolation of the trend to the metric's configured limit.
    ///
    /// The two window averages sit `N` samples apart.
    fn impact_secs(&self, metric: &str, prior: f64, recent: f64) -> Option<u64> {
        let limit = *self.limits.get(metric)?;
        if recent >= limit {
            return Some(0);
        }
        let slope_per_sample = (recent - prior) / self.window_size as f64;
        if slope_per_sample <= 0.0 {
            return None;
        }
        let samples_to_limit = (limit - recent) / slope_per_sample;
        let secs = samples_to_limit * self.sample_interval.as_secs_f64();
        Some(secs.ceil().max(0.0) as u64)
    }

    /// Samples held for a metric
    pub fn window_len(&self, metric: &str) -> usize {
        self.windows.get(metric).map(|w| w.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(window: usize, growth: f64) -> AnomalyDetector {
        let config = AnomalyConfig {
            window_size: window,
            growth_factor: growth,
            min_prior_average: 0.0,
            limits: BTreeMap::from([("queue.depth".to_string(), 100.0)]),
        };
        AnomalyDetector::new(&config, Duration::from_secs(10))
    }

    fn feed(d: &AnomalyDetector, metric: &str, values: &[f64]) {
        for v in values {
            d.observe(&MetricSample::new(metric, *v));
        }
    }

    #[test]
    fn test_no_prediction_until_full() {
        let d = detector(5, 1.2);
        feed(&d, "queue.depth", &[10.0; 5]);
        feed(&d, "queue.depth", &[50.0; 4]);
        assert!(d.predict().is_empty());
        assert_eq!(d.window_len("queue.depth"), 9);
    }

    #[test]
    fn test_window_slides() {
        let d = detector(3, 1.2);
        feed(&d, "m", &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
        assert_eq!(d.window_len("m"), 6);
    }

    #[test]
    fn test_zero_baseline_never_predicts() {
        let d = detector(3, 1.2);
        feed(&d, "errors", &[0.0, 0.0, 0.0, 5.0, 5.0, 5.0]);
        assert!(d.predict().is_empty());
    }

    #[test]
    fn test_probability_monotonic_and_bounded() {
        let d = detector(3, 1.2);
        let p1 = d.probability(1.25);
        let p2 = d.probability(2.0);
        let p3 = d.probability(100.0);
        assert!(p1 >= MIN_PROBABILITY);
        assert!(p1 < p2 && p2 < p3);
        assert!(p3 <= MAX_PROBABILITY);
    }

    #[test]
    fn test_impact_window_extrapolated() {
        let d = detector(5, 1.2);
        feed(&d, "queue.depth", &[10.0; 5]);
        feed(&d, "queue.depth", &[20.0; 5]);

        let predictions = d.predict();
        assert_eq!(predictions.len(), 1);
        let p = &predictions[0];
        // slope 2/sample, 80 to go → 40 samples × 10s
        assert_eq!(p.estimated_impact_secs, Some(400));
        assert!((p.growth_ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_limit_no_impact() {
        let d = detector(2, 1.2);
        feed(&d, "unbounded", &[10.0, 10.0, 20.0, 20.0]);
        let predictions = d.predict();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].estimated_impact_secs, None);
    }
}
