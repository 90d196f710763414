use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Source of the instants a benchmark run is measured against.
///
/// The runner never reads the process clock directly; it asks the time source
/// it was handed. Production code passes [`SystemClock`], tests pass a
/// [`ManualClock`] and move it forward explicitly.
pub trait TimeSource: Send + Sync {
    /// Current instant. Never goes backwards.
    fn now(&self) -> Instant;

    /// Elapsed time between `earlier` and the clock's current instant.
    /// Saturates to zero rather than going negative.
    fn since(&self, earlier: Instant) -> Duration;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn since(&self, earlier: Instant) -> Duration {
        Instant::now().saturating_duration_since(earlier)
    }
}

/// A clock that only moves when told to.
///
/// Shared behind an `Arc` so a fake transport can advance it between events
/// while the runner reads it.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(instant: Instant) -> Self {
        Self {
            current: Mutex::new(instant),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Instant {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn since(&self, earlier: Instant) -> Duration {
        (**self).since(earlier)
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn since(&self, earlier: Instant) -> Duration {
        (**self).since(earlier)
    }
}
