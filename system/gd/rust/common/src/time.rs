//! Wall clock abstraction. Persisted reject windows are stored as epoch milliseconds.

/// Source of the current wall-clock time in milliseconds since the epoch.
pub trait Clock {
    fn now_millis(&self) -> i64;
}
