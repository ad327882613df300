//! Small shared helpers used by `data_manager` and `controller::fast_trigger`.

use std::collections::VecDeque;

/// Exponentially-smoothed update interval (spec.md §4.1: "update rolling-
/// average update interval, α=0.1").
#[derive(Debug, Clone, Copy)]
pub struct EwmaInterval {
    alpha: f64,
    value: Option<f64>,
}

impl EwmaInterval {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    /// Folds in a new observed interval (seconds between two updates).
    pub fn observe(&mut self, interval_seconds: f64) {
        self.value = Some(match self.value {
            Some(prev) => self.alpha * interval_seconds + (1.0 - self.alpha) * prev,
            None => interval_seconds,
        });
    }

    pub fn current(&self) -> Option<f64> {
        self.value
    }
}

impl Default for EwmaInterval {
    fn default() -> Self {
        Self::new(0.1)
    }
}

/// A fixed-capacity FIFO history, used for the fast-trigger's length-2
/// per-phase sample window (spec.md §4.10).
#[derive(Debug, Clone)]
pub struct FixedHistory<T> {
    capacity: usize,
    items: VecDeque<T>,
}

impl<T> FixedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, items: VecDeque::with_capacity(capacity) }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewma_seeds_with_first_sample() {
        let mut e = EwmaInterval::new(0.1);
        e.observe(10.0);
        assert_eq!(e.current(), Some(10.0));
        e.observe(20.0);
        assert_eq!(e.current(), Some(0.1 * 20.0 + 0.9 * 10.0));
    }

    #[test]
    fn fixed_history_evicts_oldest() {
        let mut h: FixedHistory<i32> = FixedHistory::new(2);
        h.push(1);
        assert!(!h.is_full());
        h.push(2);
        assert!(h.is_full());
        h.push(3);
        let v: Vec<_> = h.iter().copied().collect();
        assert_eq!(v, vec![2, 3]);
    }
}
