//! Rolling throughput window and ETA formatting.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// How far back progress samples are kept.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Maximum number of samples retained inside the window.
pub const MAX_RATE_SAMPLES: usize = 10;

/// Rolling window of `(instant, migrated_records)` samples.
///
/// The rate is the slope between the oldest and newest sample still inside
/// the window, so a stall shows up within one window length.
#[derive(Debug, Clone)]
pub struct RateWindow {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    max_samples: usize,
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new(RATE_WINDOW, MAX_RATE_SAMPLES)
    }
}

impl RateWindow {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            window,
            max_samples: max_samples.max(2),
        }
    }

    /// Record the cumulative migrated count observed at `now`.
    pub fn record(&mut self, now: Instant, migrated: u64) {
        self.samples.push_back((now, migrated));

        while let Some(&(oldest, _)) = self.samples.front() {
            if now.duration_since(oldest) > self.window || self.samples.len() > self.max_samples {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn records_per_second(&self) -> f64 {
        let (Some(&(t0, n0)), Some(&(t1, n1))) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = t1.duration_since(t0).as_secs_f64();
        if elapsed <= 0.0 || n1 <= n0 {
            return 0.0;
        }
        (n1 - n0) as f64 / elapsed
    }

    /// Time to migrate `remaining` more records at the current rate.
    /// `None` when the rate is zero.
    pub fn estimate_remaining(&self, remaining: u64) -> Option<Duration> {
        let rate = self.records_per_second();
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs((remaining as f64 / rate).ceil() as u64))
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

/// Render a duration as `45s`, `2m 5s` or `1h 3m`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}
