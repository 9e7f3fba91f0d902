//! Phase Timers
//!
//! Wall-clock timing for compaction phases.

use std::time::{Duration, Instant};

/// GcTimer - wall clock of a whole cycle
pub struct GcTimer {
    start: Instant,
}

impl GcTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds since `new`, fractional
    pub fn elapsed_ms(&self) -> f64 {
        duration_ms(self.start.elapsed())
    }
}

/// Milliseconds of `duration` as recorded in `CycleStats`
pub fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

impl Default for GcTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped timer for automatic timing
///
/// Runs `callback` with the elapsed time when dropped.
pub struct ScopedTimer<'a> {
    start: Instant,
    callback: Option<Box<dyn FnOnce(Duration) + 'a>>,
}

impl<'a> ScopedTimer<'a> {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Duration) + 'a,
    {
        Self {
            start: Instant::now(),
            callback: Some(Box::new(callback)),
        }
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            callback(self.start.elapsed());
        }
    }
}
