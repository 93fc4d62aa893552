use chrono::Utc;

/// Injectable time source for the partition writer.
///
/// Production code uses [`SystemClock`]; tests drive a manual clock to step
/// through rotation and backoff windows deterministically.
pub trait Clock {
    /// Current time in epoch millis.
    fn millis(&self) -> i64;
}

/// [`Clock`] backed by the system wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}
