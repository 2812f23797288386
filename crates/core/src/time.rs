use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

/// Source of "now" for server timestamps and cooldown checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Clock {
    /// Wall-clock time.
    #[default]
    System,
    /// Frozen at an instant until advanced.
    Fixed(DateTime<Utc>),
}

impl Clock {
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(t) => *t,
        }
    }

    /// Move a fixed clock forward. No effect on `Clock::System`.
    pub fn advance(&mut self, delta: Duration) {
        if let Clock::Fixed(t) = self {
            *t += delta;
        }
    }
}

/// A `Clock` shared between clones of a store, so a test can move time for
/// every handle at once.
#[derive(Debug, Clone, Default)]
pub struct SharedClock {
    inner: Arc<Mutex<Clock>>,
}

impl SharedClock {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            inner: Arc::new(Mutex::new(clock)),
        }
    }

    // `Clock` is `Copy`, so a poisoned lock still holds a usable value.
    fn with<T>(&self, f: impl FnOnce(&mut Clock) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *guard)
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.with(|clock| clock.now())
    }

    pub fn set(&self, clock: Clock) {
        self.with(|current| *current = clock);
    }

    pub fn advance(&self, delta: Duration) {
        self.with(|clock| clock.advance(delta));
    }
}

/// Deterministic timestamp for tests (2023-11-14T22:13:20Z).
pub const FIXED_TEST_TIMESTAMP: i64 = 1_700_000_000;

/// Returns a deterministic `DateTime<Utc>` for tests.
///
/// # Panics
///
/// Panics if the fixed timestamp cannot be represented.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(FIXED_TEST_TIMESTAMP, 0)
        .expect("fixed timestamp should be valid")
}

/// Returns a `Clock` fixed at the deterministic test timestamp.
#[must_use]
pub fn fixed_clock() -> Clock {
    Clock::fixed(fixed_now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances() {
        let mut clock = fixed_clock();
        clock.advance(Duration::seconds(11));
        assert_eq!(clock.now(), fixed_now() + Duration::seconds(11));
    }

    #[test]
    fn system_clock_ignores_advance() {
        let mut clock = Clock::System;
        clock.advance(Duration::days(365));
        assert_eq!(clock, Clock::System);
        assert!(clock.now() < Utc::now() + Duration::days(1));
    }

    #[test]
    fn shared_clock_moves_every_handle() {
        let clock = SharedClock::new(fixed_clock());
        let other = clock.clone();
        other.advance(Duration::seconds(3));
        assert_eq!(clock.now(), fixed_now() + Duration::seconds(3));

        clock.set(Clock::fixed(fixed_now()));
        assert_eq!(other.now(), fixed_now());
    }
}
