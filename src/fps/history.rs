//! Bounded history of instantaneous frame rates.
//!
//! Keeps the most recent values and a running sum so the rolling
//! average is O(1) per sample.

use std::collections::VecDeque;

/// Default number of instantaneous rates kept for the rolling average.
pub const HISTORY_CAPACITY: usize = 30;

/// Fixed-capacity, oldest-evicted history with a running sum.
#[derive(Debug, Clone)]
pub struct RollingHistory {
    /// Retained values, oldest first.
    values: VecDeque<f64>,
    /// Maximum number of retained values.
    capacity: usize,
    /// Sum of all retained values.
    sum: f64,
}

impl RollingHistory {
    /// Creates an empty history. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0.0,
        }
    }

    /// Appends a value, returning the evicted oldest value when full.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        let evicted = if self.values.len() == self.capacity {
            let old = self.values.pop_front();
            if let Some(old) = old {
                self.sum -= old;
            }
            old
        } else {
            None
        };

        self.values.push_back(value);
        self.sum += value;
        evicted
    }

    /// Returns the mean of the retained values, or `None` when empty.
    pub fn average(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.sum / self.values.len() as f64)
        }
    }

    /// Returns the most recently pushed value.
    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops all values.
    pub fn clear(&mut self) {
        self.values.clear();
        self.sum = 0.0;
    }
}

impl Default for RollingHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_history_has_no_average() {
        let history = RollingHistory::default();
        assert!(history.average().is_none());
        assert_eq!(history.capacity(), HISTORY_CAPACITY);
    }

    #[test]
    fn test_eviction_keeps_average_correct() {
        let mut history = RollingHistory::new(3);
        assert_eq!(history.push(10.0), None);
        assert_eq!(history.push(20.0), None);
        assert_eq!(history.push(30.0), None);
        assert_eq!(history.average(), Some(20.0));

        // Fourth value evicts exactly the oldest
        assert_eq!(history.push(40.0), Some(10.0));
        assert_eq!(history.len(), 3);
        assert_eq!(history.average(), Some(30.0));
    }

    #[test]
    fn test_clear_resets_sum() {
        let mut history = RollingHistory::new(4);
        history.push(5.0);
        history.clear();
        assert!(history.is_empty());
        history.push(7.0);
        assert_eq!(history.average(), Some(7.0));
    }

    proptest! {
        #[test]
        fn average_matches_mean_of_retained_tail(
            values in proptest::collection::vec(0.0f64..240.0, 1..100)
        ) {
            let mut history = RollingHistory::default();
            for v in &values {
                history.push(*v);
            }

            let tail = &values[values.len().saturating_sub(HISTORY_CAPACITY)..];
            let expected = tail.iter().sum::<f64>() / tail.len() as f64;
            let actual = history.average().unwrap();
            prop_assert!((actual - expected).abs() < 1e-6, "{} vs {}", actual, expected);
        }
    }
}
