use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Trips after `threshold` consecutive failures and refuses calls for
/// `cooldown` before allowing a probe through again. Mirrors the
/// `is_circuit_open`/`record_success`/`record_failure` trio from the
/// upstream resolver this crate replaces.
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    failures: AtomicU32,
    open: AtomicBool,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            failures: AtomicU32::new(0),
            open: AtomicBool::new(false),
            opened_at: Mutex::new(None),
        }
    }

    pub fn is_open(&self) -> bool {
        if !self.open.load(Ordering::Acquire) {
            return false;
        }
        let mut opened_at = self.opened_at.lock().unwrap();
        if let Some(at) = *opened_at {
            if at.elapsed() > self.cooldown {
                self.open.store(false, Ordering::Release);
                self.failures.store(0, Ordering::Release);
                *opened_at = None;
                return false;
            }
        }
        true
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        self.open.store(false, Ordering::Release);
    }

    pub fn record_failure(&self) {
        let count = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.threshold {
            self.open.store(true, Ordering::Release);
            *self.opened_at.lock().unwrap() = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(!breaker.is_open());
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert!(!breaker.is_open());
    }
}
