//! Deadline arithmetic for channel housekeeping.
//!
//! These functions only look at timestamps; the channel decides what to do
//! with the answer (resend, probe, close).

/// Millisecond value returned when no deadline is configured.
pub const NO_DEADLINE: i64 = i64::MAX;

/// State of one timer relative to "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// The interval has elapsed.
    Due,
    /// The interval elapses after this many more milliseconds.
    Wait(i64),
}

/// Checks whether `interval` has elapsed since `since`.
///
/// Returns `None` for a disabled (non-positive) interval.
pub fn check(since: i64, now: i64, interval: i64) -> Option<Check> {
    if interval <= 0 {
        return None;
    }
    let elapsed = now.saturating_sub(since);
    if elapsed >= interval {
        Some(Check::Due)
    } else {
        Some(Check::Wait(interval - elapsed))
    }
}

/// Tracks the nearest of several deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextCall(i64);

impl Default for NextCall {
    fn default() -> Self {
        NextCall(NO_DEADLINE)
    }
}

impl NextCall {
    /// Considers a deadline `millis` from now.
    pub fn within(&mut self, millis: i64) {
        self.0 = self.0.min(millis.max(0));
    }

    pub fn millis(self) -> i64 {
        self.0
    }
}
