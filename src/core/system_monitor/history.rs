use std::collections::VecDeque;

use super::metrics::Sample;

pub const DEFAULT_WINDOW_SIZE: usize = 20;

/// Fixed-size sliding window of samples for one metric
#[derive(Debug, Clone)]
pub struct MetricSeries {
    capacity: usize,
    samples: VecDeque<Sample>,
}

impl MetricSeries {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_WINDOW_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a sample, evicting the oldest one when the window is full
    pub fn push(&mut self, sample: Sample) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().map(|s| s.value)
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.values().sum::<f64>() / self.samples.len() as f64
    }

    /// Sample standard deviation (n - 1); 0 for fewer than two samples
    pub fn std_dev(&self) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let variance = self.values().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        variance.sqrt()
    }

    /// Least-squares slope over sample index, in value units per sample
    pub fn slope(&self) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }
        let n_f = n as f64;
        let mean_x = (n_f - 1.0) / 2.0;
        let mean_y = self.mean();

        let (num, den) = self
            .values()
            .enumerate()
            .fold((0.0, 0.0), |(num, den), (i, y)| {
                let dx = i as f64 - mean_x;
                (num + dx * (y - mean_y), den + dx * dx)
            });

        if den == 0.0 {
            0.0
        } else {
            num / den
        }
    }
}

impl Default for MetricSeries {
    fn default() -> Self {
        Self::new()
    }
}
