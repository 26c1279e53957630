//! Wall-clock access.
//!
//! Day boundaries are local calendar dates, never elapsed durations, so the
//! engine asks a [`Clock`] for "now" in the user's local offset. Tests and
//! hosts that replay events inject a [`FixedClock`].

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, TimeZone, Utc};

/// Source of the current local time.
pub trait Clock: Send + Sync {
    /// Current instant in the local offset.
    fn now(&self) -> DateTime<FixedOffset>;

    /// Today's local calendar date.
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Milliseconds since the Unix epoch.
    fn epoch_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }

    /// Milliseconds from now until the next local midnight.
    fn millis_until_next_midnight(&self) -> i64 {
        millis_until_next_midnight(&self.now())
    }
}

/// The host's local time zone, via [`chrono::Local`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }

    fn millis_until_next_midnight(&self) -> i64 {
        // Use the real zone rather than a fixed offset so DST transitions
        // between now and midnight are accounted for.
        millis_until_next_midnight(&Local::now())
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<FixedOffset>>,
}

impl FixedClock {
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Noon UTC on `date`.
    pub fn on(date: NaiveDate) -> Self {
        Self::new(noon_utc(date))
    }

    pub fn set(&self, now: DateTime<FixedOffset>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Jump to noon UTC on `date`.
    pub fn set_date(&self, date: NaiveDate) {
        self.set(noon_utc(date));
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn noon_utc(date: NaiveDate) -> DateTime<FixedOffset> {
    let noon = date.and_hms_opt(12, 0, 0).unwrap_or_default();
    Utc.from_utc_datetime(&noon).fixed_offset()
}

/// Milliseconds from `now` to the start of the next calendar day in `now`'s
/// time zone.
///
/// When a DST jump skips local midnight, the first valid instant after it
/// counts as the start of the day.
pub fn millis_until_next_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> i64 {
    let tz = now.timezone();
    let Some(mut candidate) = now
        .date_naive()
        .succ_opt()
        .and_then(|tomorrow| tomorrow.and_hms_opt(0, 0, 0))
    else {
        return Duration::days(1).num_milliseconds();
    };

    // Offsets change in steps of at least 15 minutes; a gap never exceeds a day.
    for _ in 0..=96 {
        if let Some(start) = tz.from_local_datetime(&candidate).earliest() {
            return start.signed_duration_since(now).num_milliseconds();
        }
        candidate += Duration::minutes(15);
    }
    Duration::days(1).num_milliseconds()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    #[test]
    fn one_hour_before_midnight() {
        assert_eq!(
            millis_until_next_midnight(&at("2024-01-02T23:00:00+02:00")),
            3_600_000
        );
    }

    #[test]
    fn exactly_midnight_waits_a_full_day() {
        assert_eq!(
            millis_until_next_midnight(&at("2024-01-02T00:00:00-05:00")),
            86_400_000
        );
    }

    #[test]
    fn sub_second_precision_is_kept() {
        assert_eq!(
            millis_until_next_midnight(&at("2024-01-02T23:59:59.250+00:00")),
            750
        );
    }

    #[test]
    fn year_end_rolls_into_new_year() {
        assert_eq!(
            millis_until_next_midnight(&at("2024-12-31T12:00:00+00:00")),
            12 * 3_600_000
        );
    }

    #[test]
    fn today_uses_local_offset_not_utc() {
        // 23:30 in UTC-05:00 is already the next day in UTC.
        let clock = FixedClock::new(at("2024-01-02T23:30:00-05:00"));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
    }

    #[test]
    fn fixed_clock_moves_only_when_told() {
        let clock = FixedClock::on(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(clock.today().to_string(), "2024-01-02");

        clock.advance(Duration::hours(13));
        assert_eq!(clock.today().to_string(), "2024-01-03");

        clock.set_date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(clock.today().to_string(), "2024-02-29");
        assert_eq!(clock.millis_until_next_midnight(), 12 * 3_600_000);
    }
}
