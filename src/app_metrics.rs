use std::time::{Duration, Instant};
use tracing::info;

/// Traffic counters for the bridge, logged and reset periodically
pub struct AppMetrics {
    /// Number of CAN frames received from the active transport
    pub frames_received: u64,
    /// Number of candump lines that yielded no frame
    pub lines_dropped: u64,
    /// Number of frames dropped as echoes of our own transmissions
    pub self_filtered: u64,
    /// Number of envelopes pushed to the upward consumer
    pub envelopes_emitted: u64,
    /// Number of outbound messages transmitted
    pub messages_sent: u64,
    /// Number of outbound messages rejected or failed
    pub send_errors: u64,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self {
            frames_received: 0,
            lines_dropped: 0,
            self_filtered: 0,
            envelopes_emitted: 0,
            messages_sent: 0,
            send_errors: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// One info line with every counter
    pub fn log(&self) {
        info!(
            "[Metrics] CAN frames: {}, dropped lines: {}, self-filtered: {}, emitted: {}, sent: {}, send errors: {}",
            self.frames_received,
            self.lines_dropped,
            self.self_filtered,
            self.envelopes_emitted,
            self.messages_sent,
            self.send_errors
        );
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Rate limiter for [`AppMetrics::log`]
pub struct MetricsLogger {
    last_log: Instant,
    log_interval: Duration,
}

impl MetricsLogger {
    pub fn new(log_interval: Duration) -> Self {
        Self {
            last_log: Instant::now(),
            log_interval,
        }
    }

    /// Logs and resets the counters once `log_interval` has passed since the
    /// previous report. Returns true when a report was written.
    pub fn check_and_log(&mut self, metrics: &mut AppMetrics) -> bool {
        if self.last_log.elapsed() >= self.log_interval {
            metrics.log();
            metrics.reset();
            self.last_log = Instant::now();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_all_counters() {
        let mut metrics = AppMetrics::new();
        metrics.frames_received = 100;
        metrics.lines_dropped = 3;
        metrics.self_filtered = 7;
        metrics.envelopes_emitted = 90;
        metrics.messages_sent = 10;
        metrics.send_errors = 2;

        metrics.reset();

        assert_eq!(metrics.frames_received, 0);
        assert_eq!(metrics.lines_dropped, 0);
        assert_eq!(metrics.self_filtered, 0);
        assert_eq!(metrics.envelopes_emitted, 0);
        assert_eq!(metrics.messages_sent, 0);
        assert_eq!(metrics.send_errors, 0);
    }

    #[test]
    fn test_logger_reports_once_per_interval() {
        let mut logger = MetricsLogger::new(Duration::from_millis(50));
        let mut metrics = AppMetrics::new();

        metrics.frames_received = 4;
        assert!(!logger.check_and_log(&mut metrics));
        assert_eq!(metrics.frames_received, 4);

        std::thread::sleep(Duration::from_millis(60));
        assert!(logger.check_and_log(&mut metrics));
        assert_eq!(metrics.frames_received, 0);

        // Interval restarts after a report
        assert!(!logger.check_and_log(&mut metrics));
    }
}
