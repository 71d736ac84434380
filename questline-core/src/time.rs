//! Time utilities: installation-timezone local days and trigger times.

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;

/// Parse an IANA timezone like "America/Chicago".
pub fn parse_timezone(tz: &str) -> Result<Tz> {
    tz.parse()
        .map_err(|_| anyhow::anyhow!("invalid timezone: {tz}"))
}

/// Parse a "HH:MM" trigger time.
pub fn parse_hhmm(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| anyhow::anyhow!("invalid time '{s}' (expected HH:MM): {e}"))
}

/// The calendar day `now` falls on in `tz`.
pub fn local_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// Wall-clock time of `now` in `tz`.
pub fn local_time(now: DateTime<Utc>, tz: Tz) -> NaiveTime {
    now.with_timezone(&tz).time()
}

/// Day of week with 0 = Sunday .. 6 = Saturday.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}
