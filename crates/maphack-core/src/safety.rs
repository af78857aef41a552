//! Runtime mode, circuit breaker and log throttling.
//!
//! Everything invasive funnels through these gates: mutations are off until
//! explicitly enabled, and repeated failures trip a breaker that stays
//! tripped for the life of the process.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use tracing::{error, info, warn};

use crate::clock;

/// Whether game-state mutations are permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum RuntimeMode {
    ReadOnlySafe,
    ActiveMutation,
}

impl RuntimeMode {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => RuntimeMode::ActiveMutation,
            _ => RuntimeMode::ReadOnlySafe,
        }
    }
}

static MODE: AtomicU32 = AtomicU32::new(0);

pub fn runtime_mode() -> RuntimeMode {
    RuntimeMode::from_raw(MODE.load(Ordering::Acquire))
}

pub fn set_runtime_mode(mode: RuntimeMode) {
    let previous = MODE.swap(mode as u32, Ordering::AcqRel);
    if previous != mode as u32 {
        info!("runtime mode switched to {mode}");
    }
}

pub fn is_active_mutation_enabled() -> bool {
    runtime_mode() == RuntimeMode::ActiveMutation
}

/// True (and logs, throttled) when the current mode blocks mutations.
pub fn mutation_blocked(caller: &'static str) -> bool {
    if is_active_mutation_enabled() {
        return false;
    }
    static LIMITER: LogLimiter = LogLimiter::new();
    if LIMITER.should_log(5000) {
        warn!("[{caller}] blocked by runtime mode: {}", runtime_mode());
    }
    true
}

/// Rate limiter for repetitive log lines.
pub struct LogLimiter {
    last_ms: AtomicU64,
}

impl LogLimiter {
    pub const fn new() -> Self {
        Self {
            last_ms: AtomicU64::new(0),
        }
    }

    pub fn should_log(&self, interval_ms: u64) -> bool {
        self.should_log_at(interval_ms, clock::now_ms())
    }

    fn should_log_at(&self, interval_ms: u64, now: u64) -> bool {
        let last = self.last_ms.load(Ordering::Relaxed);
        // First call always logs.
        if last != 0 && now.wrapping_sub(last) < interval_ms {
            return false;
        }
        self.last_ms
            .compare_exchange(last, now.max(1), Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

impl Default for LogLimiter {
    fn default() -> Self {
        Self::new()
    }
}

const CIRCUIT_WINDOW_MS: u64 = 10_000;
const CIRCUIT_MAX_STRIKES: u32 = 6;

/// Strike-counting breaker: enough failures inside a sliding window trip it
/// for good.
pub struct CircuitBreaker {
    name: &'static str,
    tripped: AtomicBool,
    window_start_ms: AtomicU64,
    strikes: AtomicU32,
    strike_log: LogLimiter,
    tripped_log: LogLimiter,
}

impl CircuitBreaker {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            tripped: AtomicBool::new(false),
            window_start_ms: AtomicU64::new(0),
            strikes: AtomicU32::new(0),
            strike_log: LogLimiter::new(),
            tripped_log: LogLimiter::new(),
        }
    }

    pub fn record_strike(&self, reason: &str) {
        self.record_strike_at(reason, clock::now_ms());
    }

    fn record_strike_at(&self, reason: &str, now: u64) {
        if self.tripped.load(Ordering::Acquire) {
            return;
        }
        let window_start = self.window_start_ms.load(Ordering::Relaxed);
        if window_start == 0 || now.wrapping_sub(window_start) > CIRCUIT_WINDOW_MS {
            self.window_start_ms.store(now.max(1), Ordering::Relaxed);
            self.strikes.store(0, Ordering::Relaxed);
        }
        let strikes = self.strikes.fetch_add(1, Ordering::Relaxed) + 1;
        if strikes >= CIRCUIT_MAX_STRIKES {
            self.tripped.store(true, Ordering::Release);
            error!("[{}] circuit breaker tripped ({reason})", self.name);
        } else if self.strike_log.should_log_at(3000, now) {
            warn!(
                "[{}] circuit strike {strikes}/{CIRCUIT_MAX_STRIKES} ({reason})",
                self.name
            );
        }
    }

    /// True when tripped; logs the skip, throttled.
    pub fn is_tripped(&self) -> bool {
        self.is_tripped_at(clock::now_ms())
    }

    fn is_tripped_at(&self, now: u64) -> bool {
        if !self.tripped.load(Ordering::Acquire) {
            return false;
        }
        if self.tripped_log.should_log_at(5000, now) {
            warn!("[{}] circuit breaker active, skipping call", self.name);
        }
        true
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_mode_default_and_round_trip() {
        let _guard = testing::set_mode_for_test(runtime_mode());
        set_runtime_mode(RuntimeMode::ActiveMutation);
        assert!(is_active_mutation_enabled());
        set_runtime_mode(RuntimeMode::ReadOnlySafe);
        assert!(!is_active_mutation_enabled());
        assert!(mutation_blocked("test"));
    }

    #[test]
    fn test_runtime_mode_names() {
        assert_eq!(RuntimeMode::ReadOnlySafe.to_string(), "read_only_safe");
        assert_eq!(RuntimeMode::ActiveMutation.to_string(), "active_mutation");
    }

    #[test]
    fn test_log_limiter_throttles() {
        let limiter = LogLimiter::new();
        assert!(limiter.should_log_at(3000, 10));
        assert!(!limiter.should_log_at(3000, 11));
        assert!(!limiter.should_log_at(3000, 3009));
        assert!(limiter.should_log_at(3000, 3010));
    }

    #[test]
    fn test_breaker_trips_after_six_strikes_in_window() {
        let breaker = CircuitBreaker::new("test");
        for n in 0..5 {
            breaker.record_strike_at("x", 100 + n);
            assert!(!breaker.is_tripped_at(200));
        }
        breaker.record_strike_at("x", 105);
        assert!(breaker.is_tripped_at(200));
    }

    #[test]
    fn test_breaker_window_resets_strikes() {
        let breaker = CircuitBreaker::new("test");
        for n in 0..5 {
            breaker.record_strike_at("x", 100 + n);
        }
        // Past the window, the count starts over.
        breaker.record_strike_at("x", 100 + CIRCUIT_WINDOW_MS + 1);
        assert!(!breaker.is_tripped_at(100 + CIRCUIT_WINDOW_MS + 2));
    }

    #[test]
    fn test_breaker_trip_is_permanent() {
        let breaker = CircuitBreaker::new("test");
        for _ in 0..CIRCUIT_MAX_STRIKES {
            breaker.record_strike_at("x", 50);
        }
        assert!(breaker.is_tripped_at(1_000_000));
        breaker.record_strike_at("x", 2_000_000);
        assert!(breaker.is_tripped_at(2_000_001));
    }
}
