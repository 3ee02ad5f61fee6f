//! Anomaly detection against a trailing baseline
//!
//! Flags points deviating from the mean of the preceding samples by more
//! than `k` standard deviations. Stateless per call and fully
//! deterministic: no wall clock, no randomness.

use crate::models::{AnomalyRecord, AnomalySeverity, Sample};

/// Upper bound on deviation scores. A constant signal that suddenly moves
/// has no meaningful z-score (zero stddev), so it is flagged at this
/// ceiling; ordinary scores clamp to it as well, keeping scores totally
/// ordered and serializable.
pub const SCORE_CEILING: f64 = 100.0;

/// Tuning for the baseline detector
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Standard-deviation multiplier: a point is anomalous when its score
    /// exceeds this
    pub k: f64,
    /// Trailing baseline length, in samples, excluding the evaluated point
    pub baseline_window: usize,
    /// Cold-start guard: below this many baseline samples there is no
    /// verdict at all
    pub min_baseline: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            k: 3.0,
            baseline_window: 20,
            min_baseline: 5,
        }
    }
}

/// Detects baseline deviations in one metric's ordered sample sequence
pub struct AnomalyDetector {
    config: DetectorConfig,
}

/// An open run of consecutive deviating points in one direction
struct Run {
    start: usize,
    end: usize,
    direction: i8,
    best_score: f64,
    best_value: f64,
    best_mean: f64,
    best_std_dev: f64,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Analyze an ordered sample sequence for one key.
    ///
    /// Baselines are built from preceding samples that were not themselves
    /// flagged, so a sustained excursion is judged against the normal level
    /// that preceded it instead of absorbing itself into the baseline.
    /// Consecutive flagged points deviating in the same direction merge
    /// into a single record spanning their time range.
    pub fn detect(&self, key: &str, samples: &[Sample]) -> Vec<AnomalyRecord> {
        let mut records = Vec::new();
        let mut flagged = vec![false; samples.len()];
        let mut run: Option<Run> = None;

        for i in 0..samples.len() {
            let value = samples[i].value;
            let verdict = self.evaluate(i, value, samples, &flagged);

            match verdict {
                Some((score, mean, std_dev, direction)) if score > self.config.k => {
                    flagged[i] = true;
                    match run.as_mut() {
                        Some(open) if open.direction == direction => {
                            open.end = i;
                            if score > open.best_score {
                                open.best_score = score;
                                open.best_value = value;
                                open.best_mean = mean;
                                open.best_std_dev = std_dev;
                            }
                        }
                        _ => {
                            // A direction flip closes the run before a new
                            // one opens
                            if let Some(closed) = run.take() {
                                records.push(self.finish(key, samples, closed));
                            }
                            run = Some(new_run(i, direction, score, value, mean, std_dev));
                        }
                    }
                }
                _ => {
                    if let Some(closed) = run.take() {
                        records.push(self.finish(key, samples, closed));
                    }
                }
            }
        }
        if let Some(closed) = run.take() {
            records.push(self.finish(key, samples, closed));
        }

        records
    }

    /// Score one point against its trailing baseline.
    /// Returns None when there is insufficient baseline (no verdict).
    fn evaluate(
        &self,
        index: usize,
        value: f64,
        samples: &[Sample],
        flagged: &[bool],
    ) -> Option<(f64, f64, f64, i8)> {
        let baseline: Vec<f64> = samples[..index]
            .iter()
            .enumerate()
            .rev()
            .filter(|(j, _)| !flagged[*j])
            .take(self.config.baseline_window)
            .map(|(_, s)| s.value)
            .collect();

        if baseline.len() < self.config.min_baseline {
            return None;
        }

        let n = baseline.len() as f64;
        let mean = baseline.iter().sum::<f64>() / n;
        let std_dev = if baseline.len() > 1 {
            let variance = baseline.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            variance.sqrt()
        } else {
            0.0
        };

        let deviation = value - mean;
        let score = if std_dev < f64::EPSILON {
            if deviation.abs() > f64::EPSILON {
                SCORE_CEILING
            } else {
                0.0
            }
        } else {
            (deviation.abs() / std_dev).min(SCORE_CEILING)
        };

        let direction = if deviation >= 0.0 { 1 } else { -1 };
        Some((score, mean, std_dev, direction))
    }

    fn finish(&self, key: &str, samples: &[Sample], run: Run) -> AnomalyRecord {
        let severity = if run.best_score >= 2.0 * self.config.k {
            AnomalySeverity::Critical
        } else {
            AnomalySeverity::Warning
        };
        AnomalyRecord {
            key: key.to_string(),
            window_start: samples[run.start].timestamp,
            window_end: samples[run.end].timestamp,
            observed_value: run.best_value,
            baseline_mean: run.best_mean,
            baseline_std_dev: run.best_std_dev,
            score: run.best_score,
            severity,
        }
    }
}

fn new_run(i: usize, direction: i8, score: f64, value: f64, mean: f64, std_dev: f64) -> Run {
    Run {
        start: i,
        end: i,
        direction,
        best_score: score,
        best_value: value,
        best_mean: mean,
        best_std_dev: std_dev,
    }
}
