//! Waveform statistics, rolling averaging and period estimation.

use serde::Serialize;

/// Summary statistics of one decoded trace.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Statistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub rms: f64,
}

impl Statistics {
    /// Single pass over the trace. An empty trace yields all zeros.
    pub fn compute(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for &x in samples {
            min = min.min(x);
            max = max.max(x);
            sum += x;
            sum_sq += x * x;
        }
        let n = samples.len() as f64;
        Self {
            min,
            max,
            mean: sum / n,
            rms: (sum_sq / n).sqrt(),
        }
    }
}

/// Count-weighted running average of successive traces of one channel.
///
/// Each new trace is blended as `(buffer * n + new) / (n + 1)` where `n` is
/// the number of traces folded so far, capped at `depth - 1`.
#[derive(Debug, Clone, Default)]
pub struct AverageBuffer {
    samples: Vec<f64>,
    folds: usize,
}

impl AverageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.folds = 0;
    }

    pub fn folds(&self) -> usize {
        self.folds
    }

    /// Fold `trace` into the buffer and return the averaged trace.
    ///
    /// A trace whose length differs from the buffered one restarts averaging.
    pub fn fold(&mut self, trace: &[f64], depth: usize) -> &[f64] {
        let depth = depth.max(1);
        if self.folds == 0 || self.samples.len() != trace.len() {
            self.samples.clear();
            self.samples.extend_from_slice(trace);
            self.folds = 1;
            return &self.samples;
        }

        let n = self.folds.min(depth - 1) as f64;
        for (avg, &new) in self.samples.iter_mut().zip(trace) {
            *avg = (*avg * n + new) / (n + 1.0);
        }
        self.folds = (self.folds + 1).min(depth);
        &self.samples
    }
}

/// Estimate the period of `samples` in samples (lag), or 0 if none is found.
///
/// Uses the raw autocorrelation of the de-meaned trace for lags `1..=N/2`.
/// The first local maximum above `mean + stddev` of those values, scanning
/// from lag 2, is the period.
pub fn estimate_period_lag(samples: &[f64]) -> usize {
    let n = samples.len();
    let max_lag = n / 2;
    if max_lag < 3 {
        return 0;
    }

    let mean = samples.iter().sum::<f64>() / n as f64;
    let centered: Vec<f64> = samples.iter().map(|x| x - mean).collect();

    // acf[lag - 1] holds lag 1..=max_lag
    let acf: Vec<f64> = (1..=max_lag)
        .map(|lag| {
            centered[..n - lag]
                .iter()
                .zip(&centered[lag..])
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect();

    let acf_mean = acf.iter().sum::<f64>() / acf.len() as f64;
    let variance = acf.iter().map(|r| (r - acf_mean).powi(2)).sum::<f64>() / acf.len() as f64;
    let threshold = acf_mean + variance.sqrt();

    let at = |lag: usize| acf[lag - 1];
    (2..max_lag)
        .find(|&lag| at(lag) > threshold && at(lag) > at(lag - 1) && at(lag) >= at(lag + 1))
        .unwrap_or(0)
}

/// Estimated period in seconds, 0 if no periodicity is found.
pub fn estimate_period(samples: &[f64], sample_rate_hz: f64) -> f64 {
    let lag = estimate_period_lag(samples);
    if lag == 0 || sample_rate_hz <= 0.0 {
        return 0.0;
    }
    lag as f64 / sample_rate_hz
}
