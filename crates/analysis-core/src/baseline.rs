//! Rolling per-metric baselines.

use std::collections::VecDeque;

/// Summary of a ready baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineStats {
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    pub samples: usize,
}

/// Mean and deviation over the most recent `window_length` samples.
///
/// Only the detector decides what gets pushed; anomalous samples are kept
/// out so a long defect never becomes the norm.
#[derive(Debug, Clone)]
pub struct RollingBaseline {
    window: VecDeque<f64>,
    window_length: usize,
    min_samples: usize,
}

impl RollingBaseline {
    pub fn new(window_length: usize, min_samples: usize) -> Self {
        let window_length = window_length.max(1);
        Self {
            window: VecDeque::with_capacity(window_length),
            window_length,
            min_samples: min_samples.clamp(1, window_length),
        }
    }

    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if self.window.len() == self.window_length {
            self.window.pop_front();
        }
        self.window.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.window.len() >= self.min_samples
    }

    /// Forget every sample, e.g. after a scene change.
    pub fn reset(&mut self) {
        self.window.clear();
    }

    /// Current statistics, once enough samples have been seen.
    pub fn stats(&self) -> Option<BaselineStats> {
        if !self.is_ready() {
            return None;
        }
        let n = self.window.len() as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let variance = self
            .window
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / n;
        Some(BaselineStats {
            mean,
            std_dev: variance.sqrt(),
            samples: self.window.len(),
        })
    }
}
