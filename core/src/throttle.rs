//! Keeps a failure that repeats every tick from flooding the log.

use std::time::{Duration, Instant};

/// Admits identical consecutive messages at most twice per window. Any
/// different message resets the window.
pub struct LogThrottle {
    window: Duration,
    last: Option<Repeat>,
}

struct Repeat {
    message: String,
    since: Instant,
    admitted: u32,
}

impl LogThrottle {
    pub fn new(window: Duration) -> LogThrottle {
        LogThrottle { window, last: None }
    }

    /// Returns true when the message should actually be logged.
    pub fn admit(&mut self, message: &str) -> bool {
        self.admit_at(message, Instant::now())
    }

    fn admit_at(&mut self, message: &str, now: Instant) -> bool {
        if let Some(repeat) = &mut self.last {
            if repeat.message == message && now.duration_since(repeat.since) < self.window {
                repeat.admitted += 1;
                return repeat.admitted <= 2;
            }
        }
        self.last = Some(Repeat {
            message: message.to_string(),
            since: now,
            admitted: 1,
        });
        true
    }
}

impl Default for LogThrottle {
    fn default() -> LogThrottle {
        LogThrottle::new(Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn third_repeat_is_suppressed() {
        let mut throttle = LogThrottle::default();
        let t0 = Instant::now();
        assert!(throttle.admit_at("RetroArch not responding", t0));
        assert!(throttle.admit_at("RetroArch not responding", t0 + Duration::from_secs(1)));
        assert!(!throttle.admit_at("RetroArch not responding", t0 + Duration::from_secs(2)));
        assert!(!throttle.admit_at("RetroArch not responding", t0 + Duration::from_secs(59)));
    }

    #[test]
    fn window_expiry_readmits() {
        let mut throttle = LogThrottle::default();
        let t0 = Instant::now();
        for i in 0..3 {
            throttle.admit_at("stuck", t0 + Duration::from_secs(i));
        }
        assert!(throttle.admit_at("stuck", t0 + Duration::from_secs(61)));
    }

    #[test]
    fn a_different_message_resets_the_window() {
        let mut throttle = LogThrottle::default();
        let t0 = Instant::now();
        assert!(throttle.admit_at("a", t0));
        assert!(throttle.admit_at("a", t0));
        assert!(!throttle.admit_at("a", t0));
        assert!(throttle.admit_at("b", t0));
        assert!(throttle.admit_at("a", t0 + Duration::from_secs(1)));
    }
}
