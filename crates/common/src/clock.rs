//! Clock and timing utilities for analysis runs.
//!
//! Every run is anchored to a monotonic epoch captured when the run starts.
//! This module provides utilities for:
//! - Measuring the wall-clock duration of a run
//! - Formatting processing times for the report
//! - Throttling periodic progress logging

use std::time::{Duration, Instant};

/// A run clock providing monotonic elapsed time relative to the moment an
/// analysis run started.
#[derive(Debug, Clone)]
pub struct RunClock {
    /// The instant the run started.
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339 string).
    epoch_wall: String,
}

impl RunClock {
    /// Create a new run clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Time elapsed since the run started.
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Seconds elapsed since the run started.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Nanoseconds elapsed since the run started.
    pub fn elapsed_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Wall-clock time at run start.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Format a duration the way reports carry it: seconds, two decimals, `s` suffix.
pub fn format_processing_time(duration: Duration) -> String {
    format!("{:.2}s", duration.as_secs_f64())
}

/// Parse a `"1.42s"` processing time back into a duration.
pub fn parse_processing_time(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().strip_suffix('s')?.parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::from_nanos((secs * 1e9).round() as u64))
}

/// Rate limiter for periodic progress reporting.
#[derive(Debug)]
pub struct ProgressTicker {
    interval_ns: u64,
    last_tick_ns: Option<u64>,
}

impl ProgressTicker {
    /// Create a ticker firing at most once per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ns: interval.as_nanos() as u64,
            last_tick_ns: None,
        }
    }

    /// Check if enough time has passed for the next tick.
    /// Returns true and updates internal state if ready.
    /// The first call always returns true.
    pub fn should_tick(&mut self, current_ns: u64) -> bool {
        match self.last_tick_ns {
            None => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            Some(last) if current_ns >= last + self.interval_ns => {
                self.last_tick_ns = Some(current_ns);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_elapsed() {
        let clock = RunClock::start();
        assert!(clock.elapsed_ns() < 1_000_000_000);
        assert!(!clock.epoch_wall().is_empty());
    }

    #[test]
    fn test_processing_time_format() {
        assert_eq!(format_processing_time(Duration::from_millis(1420)), "1.42s");
        assert_eq!(
            parse_processing_time("1.42s"),
            Some(Duration::from_millis(1420))
        );
        assert_eq!(parse_processing_time("1.42"), None);
    }

    #[test]
    fn test_progress_ticker() {
        let mut ticker = ProgressTicker::new(Duration::from_secs(1));
        assert!(ticker.should_tick(0)); // first tick always fires
        assert!(!ticker.should_tick(500_000_000));
        assert!(ticker.should_tick(1_000_000_000));
    }
}
