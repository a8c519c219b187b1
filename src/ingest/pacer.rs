//! Frame-rate pacing for the reader loop.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Pacer {
    period: Duration,
    backlog: u64,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self { period, backlog: 0 }
    }

    /// Saturates to `Duration::MAX` when the period cannot be represented.
    pub fn from_rate(frames_per_second: f64) -> Self {
        Self::new(Duration::try_from_secs_f64(frames_per_second.recip()).unwrap_or(Duration::MAX))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleep owed after an iteration that took `elapsed`. Never negative; an
    /// iteration that overran its period adds to the backlog instead.
    pub fn sleep_for(&mut self, elapsed: Duration) -> Duration {
        if elapsed > self.period {
            self.backlog += 1;
        }
        self.period.saturating_sub(elapsed)
    }

    /// Number of iterations that took longer than one period.
    pub fn backlog(&self) -> u64 {
        self.backlog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleeps_remainder_of_period() {
        let mut pacer = Pacer::from_rate(10.0);
        assert_eq!(pacer.sleep_for(Duration::from_millis(30)), Duration::from_millis(70));
        assert_eq!(pacer.sleep_for(Duration::from_millis(100)), Duration::ZERO);
        assert_eq!(pacer.backlog(), 0);
    }

    #[test]
    fn test_overload_accumulates_backlog() {
        let mut pacer = Pacer::from_rate(10.0);
        let mut last = 0;
        for _ in 0..5 {
            assert_eq!(pacer.sleep_for(Duration::from_millis(150)), Duration::ZERO);
            assert!(pacer.backlog() > last);
            last = pacer.backlog();
        }
        assert_eq!(pacer.backlog(), 5);
    }

    #[test]
    fn test_tiny_rate_saturates() {
        let mut pacer = Pacer::from_rate(1e-30);
        assert_eq!(pacer.period(), Duration::MAX);
        assert_eq!(pacer.sleep_for(Duration::from_secs(1)), Duration::MAX - Duration::from_secs(1));
        assert_eq!(pacer.backlog(), 0);
    }
}
