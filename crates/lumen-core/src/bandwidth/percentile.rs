//! Weighted sliding-window percentile

/// A weighted sample in the window
#[derive(Debug, Clone, Copy)]
struct Sample {
    /// Insertion order, used to evict the oldest samples first
    index: u64,
    weight: u32,
    value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortOrder {
    Index,
    Value,
}

/// Bounded set of weighted samples answering percentile queries.
///
/// Once the total weight exceeds `max_weight`, the oldest samples are
/// trimmed (partially, if needed) until the total fits again.
#[derive(Debug, Clone)]
pub struct SlidingPercentile {
    max_weight: u32,
    samples: Vec<Sample>,
    next_index: u64,
    total_weight: u32,
    order: SortOrder,
}

impl SlidingPercentile {
    pub fn new(max_weight: u32) -> Self {
        Self {
            max_weight,
            samples: Vec::new(),
            next_index: 0,
            total_weight: 0,
            order: SortOrder::Index,
        }
    }

    /// Add a sample, evicting the oldest weight beyond capacity
    pub fn add_sample(&mut self, weight: u32, value: f64) {
        self.sort(SortOrder::Index);

        self.samples.push(Sample {
            index: self.next_index,
            weight,
            value,
        });
        self.next_index += 1;
        self.total_weight = self.total_weight.saturating_add(weight);

        while self.total_weight > self.max_weight {
            let excess = self.total_weight - self.max_weight;
            let oldest = &mut self.samples[0];
            if oldest.weight <= excess {
                self.total_weight -= oldest.weight;
                self.samples.remove(0);
            } else {
                oldest.weight -= excess;
                self.total_weight -= excess;
            }
        }
    }

    /// Weighted percentile of the window, `NaN` when empty
    pub fn percentile(&mut self, percentile: f64) -> f64 {
        self.sort(SortOrder::Value);

        let desired = percentile * self.total_weight as f64;
        let mut accumulated = 0u64;
        for sample in &self.samples {
            accumulated += u64::from(sample.weight);
            if accumulated as f64 >= desired {
                return sample.value;
            }
        }

        self.samples.last().map(|s| s.value).unwrap_or(f64::NAN)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn total_weight(&self) -> u32 {
        self.total_weight
    }

    fn sort(&mut self, order: SortOrder) {
        if self.order == order {
            return;
        }
        match order {
            SortOrder::Index => self.samples.sort_by_key(|s| s.index),
            SortOrder::Value => self.samples.sort_by(|a, b| a.value.total_cmp(&b.value)),
        }
        self.order = order;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_is_nan() {
        let mut window = SlidingPercentile::new(10);
        assert!(window.percentile(0.5).is_nan());
        assert!(window.is_empty());
    }

    #[test]
    fn test_median_of_equal_weights() {
        let mut window = SlidingPercentile::new(100);
        window.add_sample(1, 300.0);
        window.add_sample(1, 100.0);
        window.add_sample(1, 200.0);
        assert_eq!(window.percentile(0.5), 200.0);
    }

    #[test]
    fn test_heavier_samples_dominate() {
        let mut window = SlidingPercentile::new(100);
        window.add_sample(1, 10.0);
        window.add_sample(9, 50.0);
        assert_eq!(window.percentile(0.5), 50.0);
    }

    #[test]
    fn test_oldest_weight_is_evicted() {
        let mut window = SlidingPercentile::new(10);
        window.add_sample(6, 1.0);
        window.add_sample(6, 2.0);
        // 2 units of the first sample were trimmed
        assert_eq!(window.total_weight(), 10);
        window.add_sample(10, 3.0);
        assert_eq!(window.total_weight(), 10);
        assert_eq!(window.percentile(0.0), 3.0);
        assert_eq!(window.percentile(1.0), 3.0);
    }

    #[test]
    fn test_eviction_after_value_sort_uses_insertion_order() {
        let mut window = SlidingPercentile::new(2);
        window.add_sample(1, 9.0);
        window.add_sample(1, 1.0);
        // Sorting by value must not change which sample is oldest
        assert_eq!(window.percentile(0.5), 1.0);
        window.add_sample(1, 5.0);
        assert_eq!(window.percentile(1.0), 5.0);
        assert_eq!(window.percentile(0.0), 1.0);
    }
}
