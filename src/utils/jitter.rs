//! Randomized timing.
//!
//! Every pause the watcher takes is drawn from a range so that repeated
//! visits do not share an identical timing fingerprint. Tests build an
//! instant [`Pacing`] so none of these pauses actually wait.

use std::time::Duration;

use crate::models::CrawlerConfig;

/// A closed range of seconds from which pauses are sampled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SecondsRange {
    pub min: f64,
    pub max: f64,
}

impl SecondsRange {
    pub const ZERO: Self = Self { min: 0.0, max: 0.0 };

    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Multiply both bounds, used for linearly growing backoff.
    pub fn scaled(self, factor: f64) -> Self {
        Self::new(self.min * factor, self.max * factor)
    }

    /// Draw a duration uniformly from the range.
    pub fn sample(self) -> Duration {
        let secs = if self.max > self.min {
            rand::random_range(self.min..=self.max)
        } else {
            self.min
        };
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Sleep for a sampled duration.
    pub async fn pause(self) {
        let duration = self.sample();
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Draw a timeout within `base_ms +/- jitter_ms`.
pub fn roll_timeout(base_ms: u64, jitter_ms: u64) -> Duration {
    let low = base_ms.saturating_sub(jitter_ms).max(1);
    let high = base_ms.saturating_add(jitter_ms).max(low);
    Duration::from_millis(rand::random_range(low..=high))
}

/// All randomized pauses used by the pipeline.
#[derive(Debug, Clone)]
pub struct Pacing {
    /// Before simulating interaction on a freshly loaded page
    pub pre_interaction: SecondsRange,
    /// After moving the pointer
    pub pointer: SecondsRange,
    /// After scrolling
    pub scroll: SecondsRange,
    /// After hovering a link
    pub hover: SecondsRange,
    /// Once the listing container appeared, before reading it
    pub settle: SecondsRange,
    /// Before each listing element is parsed
    pub per_element: SecondsRange,
    /// Between consecutive URLs of one cycle
    pub between_urls: SecondsRange,
    /// Backoff for attempt 1; attempt `n` uses `n` times these bounds
    pub backoff_step: SecondsRange,
    /// Whole seconds slept between cycles
    pub min_wait_secs: u64,
    pub max_wait_secs: u64,
    /// Extra +/- jitter added to the cycle sleep
    pub cycle_jitter_secs: f64,
    /// Sleep after a cycle aborted on a storage failure
    pub recovery: SecondsRange,
}

impl Pacing {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            min_wait_secs: config.min_wait_secs,
            max_wait_secs: config.max_wait_secs,
            ..Self::default()
        }
    }

    /// No pauses at all.
    pub fn instant() -> Self {
        Self {
            pre_interaction: SecondsRange::ZERO,
            pointer: SecondsRange::ZERO,
            scroll: SecondsRange::ZERO,
            hover: SecondsRange::ZERO,
            settle: SecondsRange::ZERO,
            per_element: SecondsRange::ZERO,
            between_urls: SecondsRange::ZERO,
            backoff_step: SecondsRange::ZERO,
            min_wait_secs: 0,
            max_wait_secs: 0,
            cycle_jitter_secs: 0.0,
            recovery: SecondsRange::ZERO,
        }
    }

    /// Sleep between cycles: a whole-second draw plus jitter, floored at the
    /// minimum wait.
    pub fn cycle_sleep(&self) -> Duration {
        let min = self.min_wait_secs;
        let max = self.max_wait_secs.max(min);
        let base = rand::random_range(min..=max) as f64;
        let jitter = if self.cycle_jitter_secs > 0.0 {
            rand::random_range(-self.cycle_jitter_secs..=self.cycle_jitter_secs)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + jitter).max(min as f64))
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            pre_interaction: SecondsRange::new(1.0, 3.0),
            pointer: SecondsRange::new(0.1, 0.3),
            scroll: SecondsRange::new(0.5, 1.5),
            hover: SecondsRange::new(0.2, 0.5),
            settle: SecondsRange::new(0.5, 1.5),
            per_element: SecondsRange::new(0.1, 0.3),
            between_urls: SecondsRange::new(2.0, 5.0),
            backoff_step: SecondsRange::new(5.0, 10.0),
            min_wait_secs: 45,
            max_wait_secs: 90,
            cycle_jitter_secs: 5.0,
            recovery: SecondsRange::new(30.0, 60.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_stays_within_bounds() {
        let range = SecondsRange::new(0.5, 1.5);
        for _ in 0..100 {
            let d = range.sample().as_secs_f64();
            assert!((0.5..=1.5).contains(&d), "{d} out of range");
        }
        assert_eq!(SecondsRange::ZERO.sample(), Duration::ZERO);
    }

    #[test]
    fn backoff_bounds_grow_linearly() {
        let step = Pacing::default().backoff_step;
        assert_eq!(step.scaled(3.0), SecondsRange::new(15.0, 30.0));
    }

    #[test]
    fn timeout_is_rolled_within_jitter() {
        for _ in 0..100 {
            let ms = roll_timeout(5000, 1000).as_millis();
            assert!((4000..=6000).contains(&ms));
        }
        let short = roll_timeout(500, 1000).as_millis();
        assert!((1..=1500).contains(&short));
    }

    #[test]
    fn cycle_sleep_is_floored_at_min_wait() {
        let pacing = Pacing::default();
        for _ in 0..200 {
            let secs = pacing.cycle_sleep().as_secs_f64();
            assert!(secs >= 45.0, "{secs} below floor");
            assert!(secs <= 95.0, "{secs} above ceiling");
        }
    }

    #[test]
    fn instant_pacing_never_sleeps() {
        let pacing = Pacing::instant();
        assert_eq!(pacing.cycle_sleep(), Duration::ZERO);
        assert_eq!(pacing.between_urls.sample(), Duration::ZERO);
    }
}
