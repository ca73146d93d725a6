use time::OffsetDateTime;

/// Source of "now" for token issuance and expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[cfg(test)]
pub use self::mock::MockClock;

#[cfg(test)]
mod mock {
    use std::sync::{Arc, Mutex};

    use time::{Duration, OffsetDateTime};

    use super::Clock;

    /// Manually driven clock; clones share the same instant.
    #[derive(Debug, Clone)]
    pub struct MockClock(Arc<Mutex<OffsetDateTime>>);

    impl MockClock {
        pub fn new() -> Self {
            // Truncate to whole seconds: JWT timestamps have second precision.
            let now = OffsetDateTime::now_utc();
            let now = now.replace_nanosecond(0).unwrap_or(now);
            Self(Arc::new(Mutex::new(now)))
        }

        pub fn advance(&self, by: Duration) {
            let mut guard = self.0.lock().unwrap();
            *guard += by;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> OffsetDateTime {
            *self.0.lock().unwrap()
        }
    }
}
