use std::fmt::Debug;
use std::time::UNIX_EPOCH;

/// Source of wall-clock time for the sampler.
///
/// Reservoir windows, quota expiry and cache expiry are all computed from
/// this clock, which lets tests pin the current second.
pub trait Clock: Debug + Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// [`Clock`] backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        opentelemetry::time::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            // a clock set before the epoch reads as the epoch
            .unwrap_or(0)
    }
}

#[cfg(any(test, feature = "testing"))]
pub use mock::MockClock;

#[cfg(any(test, feature = "testing"))]
mod mock {
    use super::Clock;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Manually driven [`Clock`]. Clones share the same time.
    #[derive(Clone, Debug, Default)]
    pub struct MockClock {
        millis: Arc<AtomicU64>,
    }

    impl MockClock {
        /// Creates a clock reading `millis` milliseconds since the epoch.
        pub fn new(millis: u64) -> Self {
            MockClock {
                millis: Arc::new(AtomicU64::new(millis)),
            }
        }

        /// Sets the current time.
        pub fn set_millis(&self, millis: u64) {
            self.millis.store(millis, Ordering::SeqCst);
        }

        /// Moves the clock forward.
        pub fn advance(&self, by: Duration) {
            self.millis
                .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
        }
    }

    impl Clock for MockClock {
        fn now_millis(&self) -> u64 {
            self.millis.load(Ordering::SeqCst)
        }
    }
}
