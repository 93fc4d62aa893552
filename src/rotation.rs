//! Rotation decisions: size, record-time and scheduled wall-clock rotation.

use chrono::{LocalResult, TimeZone, Timelike};
use chrono_tz::Tz;
use log::trace;

/// Evaluates the three rotation predicates for one partition writer.
///
/// Timers are refreshed only on entry to rotation (and on tail flush), keeping
/// the ordering between decision and action stable.
#[derive(Debug)]
pub(crate) struct RotationEvaluator {
    flush_size: i32,
    rotate_interval_ms: i64,
    rotate_schedule_interval_ms: i64,
    timezone: Option<Tz>,
    last_rotate: Option<i64>,
    next_scheduled_rotate: Option<i64>,
}

impl RotationEvaluator {
    pub(crate) fn new(
        flush_size: i32,
        rotate_interval_ms: i64,
        rotate_schedule_interval_ms: i64,
        timezone: Option<Tz>,
    ) -> Self {
        Self {
            flush_size,
            rotate_interval_ms,
            rotate_schedule_interval_ms,
            timezone,
            last_rotate: None,
            next_scheduled_rotate: None,
        }
    }

    /// Refreshes both timers. `rotate_timestamp` is `now` for wall-clock
    /// timing, the current record's extracted timestamp otherwise (absent when
    /// there is no current record).
    pub(crate) fn refresh(&mut self, now: i64, rotate_timestamp: Option<i64>) {
        self.last_rotate = rotate_timestamp;
        if self.rotate_interval_ms > 0 {
            trace!(
                "Updated last rotation timer; next record-time rotation in {}ms",
                self.rotate_interval_ms
            );
        }
        if self.rotate_schedule_interval_ms > 0 {
            if let Some(tz) = &self.timezone {
                self.next_scheduled_rotate = Some(next_time_adjusted_by_day(
                    now,
                    self.rotate_schedule_interval_ms,
                    tz,
                ));
                trace!(
                    "Updated scheduled rotation timer; next rotation at {:?}",
                    self.next_scheduled_rotate
                );
            }
        }
    }

    /// Whether any of the size, record-time or scheduled predicates holds.
    /// Seeds `last_rotate` from the first observed record timestamp.
    pub(crate) fn should_rotate(
        &mut self,
        record_counter: i32,
        current_timestamp: Option<i64>,
        now: i64,
    ) -> bool {
        if let Some(ts) = current_timestamp {
            if self.last_rotate.is_none() {
                self.last_rotate = Some(ts);
            }
        }

        let periodic_rotation = self.rotate_interval_ms > 0
            && match (current_timestamp, self.last_rotate) {
                (Some(current), Some(last)) => current - last >= self.rotate_interval_ms,
                _ => false,
            };
        let scheduled_rotation = self.rotate_schedule_interval_ms > 0
            && matches!(self.next_scheduled_rotate, Some(next) if now >= next);
        let message_size_rotation = record_counter >= self.flush_size;

        trace!(
            "Should apply record-time rotation (rotateIntervalMs: '{}', lastRotate: '{:?}', timestamp: '{:?}')? {}",
            self.rotate_interval_ms,
            self.last_rotate,
            current_timestamp,
            periodic_rotation
        );
        trace!(
            "Should apply scheduled rotation (rotateScheduleIntervalMs: '{}', nextScheduledRotate: '{:?}', now: '{}')? {}",
            self.rotate_schedule_interval_ms,
            self.next_scheduled_rotate,
            now,
            scheduled_rotation
        );
        trace!(
            "Should apply size-based rotation (count {} >= flush size {})? {}",
            record_counter,
            self.flush_size,
            message_size_rotation
        );

        periodic_rotation || scheduled_rotation || message_size_rotation
    }
}

/// Aligns `now` forward to the next multiple of `period_ms` counted from the
/// start of the current day in `tz`, so scheduled rotations fire at fixed
/// times within each calendar day instead of drifting.
pub(crate) fn next_time_adjusted_by_day(now: i64, period_ms: i64, tz: &Tz) -> i64 {
    let local = match tz.timestamp_millis_opt(now) {
        LocalResult::Single(dt) => dt,
        _ => return now + period_ms,
    };
    let midnight = local
        .with_hour(0)
        .and_then(|dt| dt.with_minute(0))
        .and_then(|dt| dt.with_second(0))
        .and_then(|dt| dt.with_nanosecond(0));
    let start_of_day = match midnight {
        Some(dt) => dt.timestamp_millis(),
        None => return now + period_ms,
    };
    let period_offset = ((now - start_of_day) / period_ms + 1) * period_ms;
    start_of_day + period_offset
}
