use chrono::{DateTime, SubsecRound, Utc};

/// Source of every timestamp the engine persists. Database defaults are never used, so that expiry cut-offs and
/// retry back-off compare values produced by the same clock.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        // Postgres keeps microseconds. Truncating here keeps values identical after a round trip.
        Utc::now().trunc_subsecs(6)
    }
}
