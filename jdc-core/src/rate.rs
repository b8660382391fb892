//! Adaptive inter-chunk pacing.
//!
//! The controller keeps an exponentially-smoothed throughput average and a
//! bounded multiplier applied to the configured base delay. Growth (×1.2)
//! and shrink (×0.8) are deliberately asymmetric: sustained noise drifts
//! the multiplier upward, pacing conservatively, and the clamp ballasts
//! the drift.

use std::time::Duration;

/// Smoothing weight kept for the running average.
const EWMA_KEEP: f64 = 0.7;
/// Weight given to the newest observation.
const EWMA_NEW: f64 = 0.3;

/// Throughput below this fraction of the average counts as a regression.
const REGRESS_FRACTION: f64 = 0.7;
/// Throughput above this fraction of the average counts as an improvement.
const IMPROVE_FRACTION: f64 = 1.2;

const MULTIPLIER_FLOOR: f64 = 0.1;
const MULTIPLIER_CEIL: f64 = 10.0;

/// Rate-responsive delay controller for the sending loop.
#[derive(Debug, Clone)]
pub struct RateController {
    adaptive: bool,
    min_delay: Duration,
    max_delay: Duration,
    avg_rate: f64,
    multiplier: f64,
}

impl RateController {
    pub fn new(adaptive: bool, min_delay: Duration, max_delay: Duration) -> Self {
        Self { adaptive, min_delay, max_delay, avg_rate: 0.0, multiplier: 1.0 }
    }

    /// Record one chunk's observed throughput.
    pub fn observe(&mut self, bytes: u64, elapsed: Duration) {
        if !self.adaptive || bytes == 0 {
            return;
        }
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let current = bytes as f64 / secs;

        if self.avg_rate == 0.0 {
            self.avg_rate = current;
            return;
        }

        if current < REGRESS_FRACTION * self.avg_rate {
            self.multiplier *= 1.2;
        } else if current > IMPROVE_FRACTION * self.avg_rate {
            self.multiplier *= 0.8;
        }
        self.multiplier = self.multiplier.clamp(MULTIPLIER_FLOOR, MULTIPLIER_CEIL);

        self.avg_rate = EWMA_KEEP * self.avg_rate + EWMA_NEW * current;
    }

    /// Pacing delay for the next chunk. Passes `base` through verbatim
    /// when adaptive mode is off.
    pub fn delay(&self, base: Duration) -> Duration {
        if !self.adaptive {
            return base;
        }
        base.mul_f64(self.multiplier).clamp(self.min_delay, self.max_delay)
    }

    /// Smoothed throughput in bytes/second, zero until the first sample.
    pub fn average_rate(&self) -> u64 {
        self.avg_rate as u64
    }

    #[cfg(test)]
    fn multiplier(&self) -> f64 {
        self.multiplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> RateController {
        RateController::new(true, Duration::from_millis(1), Duration::from_millis(500))
    }

    #[test]
    fn non_adaptive_passes_base_through() {
        let ctl = RateController::new(false, Duration::from_millis(50), Duration::from_millis(60));
        // No clamping either: verbatim.
        assert_eq!(ctl.delay(Duration::from_millis(5)), Duration::from_millis(5));
        assert_eq!(ctl.delay(Duration::from_secs(2)), Duration::from_secs(2));
    }

    #[test]
    fn first_sample_seeds_average() {
        let mut ctl = controller();
        ctl.observe(1_000_000, Duration::from_secs(1));
        assert_eq!(ctl.average_rate(), 1_000_000);
        assert_eq!(ctl.multiplier(), 1.0);
    }

    #[test]
    fn regression_backs_off() {
        let mut ctl = controller();
        ctl.observe(1_000_000, Duration::from_secs(1));
        // Well below 0.7 × avg.
        ctl.observe(100_000, Duration::from_secs(1));
        assert!(ctl.multiplier() > 1.0);
    }

    #[test]
    fn improvement_tightens() {
        let mut ctl = controller();
        ctl.observe(1_000_000, Duration::from_secs(1));
        // Well above 1.2 × avg.
        ctl.observe(5_000_000, Duration::from_secs(1));
        assert!(ctl.multiplier() < 1.0);
    }

    #[test]
    fn steady_throughput_leaves_multiplier_alone() {
        let mut ctl = controller();
        ctl.observe(1_000_000, Duration::from_secs(1));
        ctl.observe(1_000_000, Duration::from_secs(1));
        assert_eq!(ctl.multiplier(), 1.0);
    }

    #[test]
    fn multiplier_stays_bounded() {
        // P7: any observation sequence keeps the multiplier in [0.1, 10.0].
        let mut ctl = controller();
        ctl.observe(1_000_000, Duration::from_secs(1));
        for _ in 0..200 {
            ctl.observe(1, Duration::from_secs(1));
        }
        assert!(ctl.multiplier() <= MULTIPLIER_CEIL);

        let mut ctl = controller();
        ctl.observe(1, Duration::from_secs(1));
        for _ in 0..200 {
            ctl.observe(u64::MAX / 2, Duration::from_secs(1));
        }
        assert!(ctl.multiplier() >= MULTIPLIER_FLOOR);
    }

    #[test]
    fn delay_respects_bounds() {
        let mut ctl = controller();
        ctl.observe(1_000_000, Duration::from_secs(1));
        for _ in 0..200 {
            ctl.observe(1, Duration::from_secs(1));
        }
        let d = ctl.delay(Duration::from_millis(100));
        assert!(d >= Duration::from_millis(1) && d <= Duration::from_millis(500));

        // Even a zero base lands inside the configured window.
        let d = ctl.delay(Duration::ZERO);
        assert!(d >= Duration::from_millis(1));
    }

    #[test]
    fn zero_elapsed_ignored() {
        let mut ctl = controller();
        ctl.observe(1_000_000, Duration::ZERO);
        assert_eq!(ctl.average_rate(), 0);
    }
}
