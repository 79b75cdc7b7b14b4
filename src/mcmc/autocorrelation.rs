//! Running autocorrelation of a scalar chain over a bounded lag horizon.

use std::collections::VecDeque;

/// Tracks the autocorrelation of a scalar series for lags `0..window`.
///
/// Only the last `window` values are stored. Sums are accumulated on values
/// shifted by the first value seen, which keeps the variance numerically
/// stable when the series sits far from zero.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoCorrelationCalc {
    window: VecDeque<f64>,
    capacity: usize,
    shift: f64,
    n: usize,
    sum: f64,
    sum_sq: f64,
    lag_sums: Vec<f64>,
    lag_counts: Vec<usize>,
}

impl AutoCorrelationCalc {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            shift: 0.0,
            n: 0,
            sum: 0.0,
            sum_sq: 0.0,
            lag_sums: vec![0.0; capacity],
            lag_counts: vec![0; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of values seen since the last clear.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn fill(&mut self, value: f64) {
        if self.n == 0 {
            self.shift = value;
        }
        let x = value - self.shift;
        self.n += 1;
        self.sum += x;
        self.sum_sq += x * x;

        if self.capacity == 0 {
            return;
        }
        if self.window.len() == self.capacity {
            self.window.pop_back();
        }
        self.window.push_front(x);
        // window[lag] is the value `lag` steps before this one
        for (lag, &earlier) in self.window.iter().enumerate() {
            self.lag_sums[lag] += x * earlier;
            self.lag_counts[lag] += 1;
        }
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        self.shift + self.sum / self.n as f64
    }

    /// Population variance of every value seen.
    pub fn var(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        let n = self.n as f64;
        let m = self.sum / n;
        (self.sum_sq / n - m * m).max(0.0)
    }

    /// Autocorrelation for every lag with at least one pair, starting at lag 0.
    /// A constant series is fully correlated at every lag.
    pub fn get(&self) -> Vec<f64> {
        let lags = self.lag_counts.iter().take_while(|&&c| c > 0).count();
        let var = self.var();
        if var == 0.0 {
            return vec![1.0; lags];
        }
        let m = self.sum / self.n as f64;
        (0..lags)
            .map(|lag| (self.lag_sums[lag] / self.lag_counts[lag] as f64 - m * m) / var)
            .collect()
    }

    pub fn clear(&mut self) {
        *self = Self::new(self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn mean_var_and_lag_zero() {
        let mut calc = AutoCorrelationCalc::new(3);
        for x in [1e6 + 1.0, 1e6 + 2.0, 1e6 + 3.0, 1e6 + 4.0] {
            calc.fill(x);
        }
        assert_abs_diff_eq!(calc.mean(), 1e6 + 2.5, epsilon = 1e-9);
        assert_abs_diff_eq!(calc.var(), 1.25, epsilon = 1e-9);
        let acf = calc.get();
        assert_eq!(acf.len(), 3);
        assert_abs_diff_eq!(acf[0], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn alternating_series_anticorrelates() {
        let mut calc = AutoCorrelationCalc::new(2);
        for i in 0..1000 {
            calc.fill(if i % 2 == 0 { 1.0 } else { -1.0 });
        }
        let acf = calc.get();
        assert_abs_diff_eq!(acf[1], -1.0, epsilon = 1e-9);
    }

    #[test]
    fn constant_series_and_clear() {
        let mut calc = AutoCorrelationCalc::new(5);
        assert!(calc.get().is_empty());
        for _ in 0..3 {
            calc.fill(7.0);
        }
        assert_eq!(calc.get(), vec![1.0; 3]);
        calc.clear();
        assert!(calc.is_empty());
        assert_eq!(calc.capacity(), 5);
    }
}
