use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Monotonic time source used for all duration arithmetic in the engine.
///
/// The engine never reads wall-clock time directly; everything that needs
/// "now" receives an `Arc<dyn Clock>` from the composition root so tests can
/// drive time by hand.
pub trait Clock: Send + Sync {
    /// Milliseconds elapsed on a monotonic clock.
    fn now_ms(&self) -> i64;
}

/// Production clock anchored to process start.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        self.origin.elapsed().as_millis() as i64
    }
}

/// Manually advanced clock for tests.
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
