use std::sync::atomic::{AtomicI64, Ordering};

/// A manually-advanced clock for tests that need deterministic timestamps —
/// retry backoff, wedge-detection sampling, report intervals — without
/// sleeping real wall-clock time.
pub struct FakeClock {
    now_ns: AtomicI64,
}

impl FakeClock {
    pub fn new(start_ns: i64) -> Self {
        FakeClock {
            now_ns: AtomicI64::new(start_ns),
        }
    }

    pub fn now_ns(&self) -> i64 {
        self.now_ns.load(Ordering::SeqCst)
    }

    pub fn advance_ns(&self, delta_ns: i64) {
        self.now_ns.fetch_add(delta_ns, Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(0)
    }
}
