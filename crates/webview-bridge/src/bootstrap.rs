//! Content-side bootstrap script and the rate limiter for re-injecting it.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::codec;

const SCRIPT: &str = include_str!("../assets/bridge.js");

/// The bundled content-side half of the bridge.
pub fn script() -> &'static str {
    SCRIPT
}

/// `script` as one quoted indirect-eval expression, for hosts that accept a single
/// expression only.
pub fn wrapped_script(script: &str) -> String {
    format!("(0, eval)({});", codec::quote_js_string(script))
}

#[derive(Debug, Default)]
struct Attempts {
    last_attempt: Option<Instant>,
    last_url: Option<String>,
}

/// Bookkeeping for fallback injection.
///
/// An attempt is allowed when none has been made since the last reset, when the document
/// URL changed, or when `interval` has elapsed since the previous one.
#[derive(Debug)]
pub struct BootstrapTracker {
    interval: Duration,
    attempts: Mutex<Attempts>,
}

impl BootstrapTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            attempts: Mutex::new(Attempts::default()),
        }
    }

    /// Claims an attempt for `url` at `now` if the rate limit allows one.
    pub fn try_claim(&self, url: &str, now: Instant) -> bool {
        let mut attempts = self.attempts.lock();
        let allowed = match attempts.last_attempt {
            None => true,
            Some(_) if attempts.last_url.as_deref() != Some(url) => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if allowed {
            attempts.last_attempt = Some(now);
            attempts.last_url = Some(url.to_string());
        }
        allowed
    }

    /// Records an injection made outside the fallback path.
    pub fn record(&self, url: &str, now: Instant) {
        let mut attempts = self.attempts.lock();
        attempts.last_attempt = Some(now);
        attempts.last_url = Some(url.to_string());
    }

    pub fn reset(&self) {
        *self.attempts.lock() = Attempts::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_script_installs_receive_function() {
        assert!(script().contains(crate::protocol::RECEIVE_FN));
        assert!(script().contains(crate::protocol::NAME));
        assert!(wrapped_script("1 + 1").starts_with("(0, eval)(\"1 + 1\")"));
    }

    #[test]
    fn attempts_are_rate_limited_per_url() {
        let tracker = BootstrapTracker::new(Duration::from_millis(500));
        let start = Instant::now();

        assert!(tracker.try_claim("app://index", start));
        assert!(!tracker.try_claim("app://index", start + Duration::from_millis(100)));
        assert!(tracker.try_claim("app://other", start + Duration::from_millis(200)));
        assert!(!tracker.try_claim("app://other", start + Duration::from_millis(600)));
        assert!(tracker.try_claim("app://other", start + Duration::from_millis(700)));

        tracker.reset();
        assert!(tracker.try_claim("app://other", start + Duration::from_millis(701)));
    }
}
