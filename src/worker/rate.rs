//! Transfer rate limiting against `trl_per_process`.

use std::time::{Duration, Instant};

use crate::util::clk_tck;

/// How long to pause after `bytes` were moved in `elapsed` so that the
/// throughput stays at or below `limit` bytes per second. Delays shorter
/// than one clock tick are not worth a sleep.
pub fn required_delay(bytes: u64, limit: i64, elapsed: Duration, tick: Duration) -> Duration {
    if limit <= 0 || bytes == 0 {
        return Duration::ZERO;
    }
    let expected = Duration::from_secs_f64(bytes as f64 / limit as f64);
    match expected.checked_sub(elapsed) {
        Some(d) if d >= tick => d,
        _ => Duration::ZERO,
    }
}

pub struct RateLimiter {
    window_start: Instant,
    bytes: u64,
    tick: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            window_start: Instant::now(),
            bytes: 0,
            tick: Duration::from_secs_f64(1.0 / clk_tck() as f64),
        }
    }

    /// Account `n` bytes and sleep if the current window is ahead of `limit`.
    /// The limit is re-read by the caller for every block because
    /// `trl_per_process` changes whenever a peer slot starts or stops.
    pub fn throttle(&mut self, n: u64, limit: i64) -> Duration {
        self.bytes += n;
        let elapsed = self.window_start.elapsed();
        let d = required_delay(self.bytes, limit, elapsed, self.tick);
        if !d.is_zero() {
            std::thread::sleep(d);
        }
        if elapsed >= Duration::from_secs(1) {
            self.window_start = Instant::now();
            self.bytes = 0;
        }
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_keeps_throughput_below_limit() {
        let tick = Duration::from_millis(10);
        assert_eq!(required_delay(1000, 0, Duration::ZERO, tick), Duration::ZERO);
        assert_eq!(
            required_delay(1000, 1000, Duration::from_millis(200), tick),
            Duration::from_millis(800)
        );
        assert_eq!(required_delay(1000, 1000, Duration::from_millis(995), tick), Duration::ZERO);
        assert_eq!(required_delay(10, 1000, Duration::from_secs(1), tick), Duration::ZERO);
    }
}
