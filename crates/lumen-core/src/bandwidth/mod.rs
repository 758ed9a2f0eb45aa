//! Bandwidth estimation
//!
//! A thread-safe estimator fed by data-source transfer callbacks:
//! - Overlapping transfers share one accumulation window
//! - Samples are weighted by the square root of their size
//! - The published estimate is the window median, capped externally

mod percentile;

pub use percentile::SlidingPercentile;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// Default total weight kept in the sliding window
pub const DEFAULT_MAX_WEIGHT: u32 = 2000;

/// Monotonic millisecond clock
pub trait Clock: Send + Sync {
    fn elapsed_ms(&self) -> u64;
}

/// Clock backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Receives transfer progress from a data source.
///
/// Called from I/O tasks; implementations must be cheap and non-blocking.
pub trait TransferListener: Send + Sync {
    fn on_transfer_start(&self);
    fn on_bytes_transferred(&self, bytes: usize);
    fn on_transfer_end(&self);
}

/// Current bitrate estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BandwidthEstimate {
    /// No transfer has completed yet
    NoEstimate,
    /// Estimated bits per second
    Bitrate(u64),
}

impl BandwidthEstimate {
    pub fn bitrate(self) -> Option<u64> {
        match self {
            BandwidthEstimate::NoEstimate => None,
            BandwidthEstimate::Bitrate(bps) => Some(bps),
        }
    }

    /// Apply an upper bound; `NoEstimate` stays unknown
    pub fn capped(self, cap: u64) -> Self {
        match self {
            BandwidthEstimate::NoEstimate => BandwidthEstimate::NoEstimate,
            BandwidthEstimate::Bitrate(bps) => BandwidthEstimate::Bitrate(bps.min(cap)),
        }
    }
}

/// One completed measurement, reported for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthSample {
    pub elapsed_ms: u64,
    pub bytes: u64,
    /// Published estimate after this sample was added
    pub estimate: BandwidthEstimate,
}

/// Receives bandwidth samples.
///
/// Invoked after the estimator lock is released. Implementations should hand
/// the sample off (post it to another context) rather than process it inline.
pub trait BandwidthSampleListener: Send + Sync {
    fn on_bandwidth_sample(&self, sample: BandwidthSample);
}

#[derive(Debug)]
struct EstimatorState {
    active_transfers: u32,
    window_start_ms: u64,
    bytes_accumulated: u64,
    window: SlidingPercentile,
    estimate: BandwidthEstimate,
    cap: u64,
}

/// Sliding-window bandwidth estimator with an externally imposed cap
pub struct BandwidthEstimator {
    state: Mutex<EstimatorState>,
    clock: Arc<dyn Clock>,
    listener: Option<Arc<dyn BandwidthSampleListener>>,
}

impl BandwidthEstimator {
    /// Create an estimator using the system clock and default window
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()), DEFAULT_MAX_WEIGHT)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, max_weight: u32) -> Self {
        Self {
            state: Mutex::new(EstimatorState {
                active_transfers: 0,
                window_start_ms: 0,
                bytes_accumulated: 0,
                window: SlidingPercentile::new(max_weight),
                estimate: BandwidthEstimate::NoEstimate,
                cap: u64::MAX,
            }),
            clock,
            listener: None,
        }
    }

    /// Report every completed sample to `listener`
    pub fn with_listener(mut self, listener: Arc<dyn BandwidthSampleListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Start with an initial cap
    pub fn with_cap(self, cap: u64) -> Self {
        self.set_cap(cap);
        self
    }

    /// Published estimate: `min(window median, cap)`
    pub fn estimate(&self) -> BandwidthEstimate {
        let state = self.state.lock();
        state.estimate.capped(state.cap)
    }

    pub fn set_cap(&self, cap: u64) {
        self.state.lock().cap = cap;
    }

    pub fn cap(&self) -> u64 {
        self.state.lock().cap
    }

    /// Number of transfers currently open
    pub fn active_transfers(&self) -> u32 {
        self.state.lock().active_transfers
    }
}

impl Default for BandwidthEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BandwidthEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BandwidthEstimator")
            .field("active_transfers", &state.active_transfers)
            .field("estimate", &state.estimate)
            .field("cap", &state.cap)
            .finish()
    }
}

impl TransferListener for BandwidthEstimator {
    fn on_transfer_start(&self) {
        let mut state = self.state.lock();
        if state.active_transfers == 0 {
            state.window_start_ms = self.clock.elapsed_ms();
        }
        state.active_transfers += 1;
    }

    fn on_bytes_transferred(&self, bytes: usize) {
        let mut state = self.state.lock();
        state.bytes_accumulated = state.bytes_accumulated.saturating_add(bytes as u64);
    }

    fn on_transfer_end(&self) {
        let sample = {
            let mut state = self.state.lock();
            assert!(
                state.active_transfers > 0,
                "on_transfer_end called without a matching on_transfer_start"
            );

            let now = self.clock.elapsed_ms();
            let elapsed_ms = now.saturating_sub(state.window_start_ms);
            let mut sample = None;

            if elapsed_ms > 0 {
                let bytes = state.bytes_accumulated;
                let bits_per_second = bytes.saturating_mul(8000) / elapsed_ms;
                let weight = (bytes as f64).sqrt() as u32;
                state.window.add_sample(weight, bits_per_second as f64);

                let median = state.window.percentile(0.5);
                state.estimate = if median.is_nan() {
                    BandwidthEstimate::NoEstimate
                } else {
                    BandwidthEstimate::Bitrate(median as u64)
                };

                sample = Some(BandwidthSample {
                    elapsed_ms,
                    bytes,
                    estimate: state.estimate.capped(state.cap),
                });
            }

            state.active_transfers -= 1;
            if state.active_transfers > 0 {
                // Remaining transfers continue in a fresh window
                state.window_start_ms = now;
            }
            state.bytes_accumulated = 0;
            sample
        };

        if let Some(sample) = sample {
            trace!(
                elapsed_ms = sample.elapsed_ms,
                bytes = sample.bytes,
                estimate = ?sample.estimate,
                "Bandwidth sample"
            );
            if let Some(listener) = &self.listener {
                listener.on_bandwidth_sample(sample);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct ManualClock(AtomicU64);

    impl ManualClock {
        fn set(&self, ms: u64) {
            self.0.store(ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn elapsed_ms(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<BandwidthSample>>);

    impl BandwidthSampleListener for Recorder {
        fn on_bandwidth_sample(&self, sample: BandwidthSample) {
            self.0.lock().push(sample);
        }
    }

    fn estimator() -> (Arc<ManualClock>, BandwidthEstimator) {
        let clock = Arc::new(ManualClock::default());
        let estimator = BandwidthEstimator::with_clock(clock.clone(), DEFAULT_MAX_WEIGHT);
        (clock, estimator)
    }

    fn transfer(
        clock: &ManualClock,
        estimator: &BandwidthEstimator,
        from: u64,
        to: u64,
        bytes: usize,
    ) {
        clock.set(from);
        estimator.on_transfer_start();
        estimator.on_bytes_transferred(bytes);
        clock.set(to);
        estimator.on_transfer_end();
    }

    #[test]
    fn test_no_estimate_before_first_sample() {
        let (_, estimator) = estimator();
        assert_eq!(estimator.estimate(), BandwidthEstimate::NoEstimate);
    }

    #[test]
    fn test_zero_elapsed_produces_no_estimate() {
        let (clock, estimator) = estimator();
        transfer(&clock, &estimator, 100, 100, 50_000);
        assert_eq!(estimator.estimate(), BandwidthEstimate::NoEstimate);
        assert_eq!(estimator.active_transfers(), 0);
    }

    #[test]
    fn test_single_transfer_bitrate() {
        let (clock, estimator) = estimator();
        transfer(&clock, &estimator, 0, 1000, 250_000);
        assert_eq!(estimator.estimate(), BandwidthEstimate::Bitrate(2_000_000));
    }

    #[test]
    fn test_cap_limits_published_estimate() {
        let (clock, estimator) = estimator();
        transfer(&clock, &estimator, 0, 1000, 250_000);
        estimator.set_cap(500_000);
        assert_eq!(estimator.estimate(), BandwidthEstimate::Bitrate(500_000));
        estimator.set_cap(u64::MAX);
        assert_eq!(estimator.estimate(), BandwidthEstimate::Bitrate(2_000_000));
    }

    #[test]
    fn test_nested_start_keeps_window_origin() {
        let (clock, estimator) = estimator();
        clock.set(0);
        estimator.on_transfer_start();
        clock.set(400);
        estimator.on_transfer_start();
        estimator.on_bytes_transferred(125_000);
        clock.set(1000);
        estimator.on_transfer_end();
        // 125 KB over the full second since the outer start
        assert_eq!(estimator.estimate(), BandwidthEstimate::Bitrate(1_000_000));
        assert_eq!(estimator.active_transfers(), 1);

        estimator.on_bytes_transferred(125_000);
        clock.set(1500);
        estimator.on_transfer_end();
        // Second window starts when the first sample closed
        assert_eq!(estimator.estimate(), BandwidthEstimate::Bitrate(1_000_000));
        assert_eq!(estimator.active_transfers(), 0);
    }

    #[test]
    fn test_median_across_samples() {
        let (clock, estimator) = estimator();
        transfer(&clock, &estimator, 0, 1000, 100_000);
        transfer(&clock, &estimator, 1000, 2000, 100_000);
        transfer(&clock, &estimator, 2000, 3000, 400_000);
        // weights 316, 316, 632: half the total weight is reached by the second sample
        assert_eq!(estimator.estimate(), BandwidthEstimate::Bitrate(800_000));
    }

    #[test]
    fn test_listener_receives_samples() {
        let clock = Arc::new(ManualClock::default());
        let recorder = Arc::new(Recorder::default());
        let estimator = BandwidthEstimator::with_clock(clock.clone(), DEFAULT_MAX_WEIGHT)
            .with_listener(recorder.clone())
            .with_cap(1_000_000);
        transfer(&clock, &estimator, 0, 500, 250_000);

        let samples = recorder.0.lock();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].elapsed_ms, 500);
        assert_eq!(samples[0].bytes, 250_000);
        assert_eq!(samples[0].estimate, BandwidthEstimate::Bitrate(1_000_000));
    }

    #[test]
    #[should_panic(expected = "without a matching on_transfer_start")]
    fn test_unmatched_end_panics() {
        let (_, estimator) = estimator();
        estimator.on_transfer_end();
    }
}
