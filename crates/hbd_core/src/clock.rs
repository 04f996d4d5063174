//! crates/hbd_core/src/clock.rs
//!
//! Wall-clock access and the timezone arithmetic behind reminder times.
//!
//! Reminder times are stored as a UTC time-of-day. Converting a local `HH:MM`
//! needs a concrete date to pick the right UTC offset (daylight saving), so
//! every conversion is anchored to a date and the date is dropped afterwards.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, Offset, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::sync::Mutex;

use crate::error::CoreError;

/// Source of "now". Injected so tests can pin the date.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that returns a settable instant.
#[derive(Debug)]
pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.0.lock() {
            *guard = now;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.0.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

//=========================================================================================
// Parsing
//=========================================================================================

pub fn parse_timezone(name: &str) -> Result<Tz, CoreError> {
    name.parse::<Tz>()
        .map_err(|_| CoreError::Validation(format!("Invalid timezone '{}'", name)))
}

/// Parses `HH:MM` (24-hour).
pub fn parse_hh_mm(value: &str) -> Result<NaiveTime, CoreError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| CoreError::Validation(format!("Invalid reminder time '{}', expected HH:MM", value)))
}

pub fn format_hh_mm(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Drops seconds and sub-seconds.
pub fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time)
}

/// The current calendar date in `tz`.
pub fn today_in(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

//=========================================================================================
// Normalization
//=========================================================================================

/// Converts a local time-of-day in `tz` on `anchor` to a UTC time-of-day.
///
/// A local time that falls in a DST gap is moved forward by one hour; an
/// ambiguous local time (DST fold) resolves to the earlier instant.
pub fn local_to_utc_time(local: NaiveTime, tz: Tz, anchor: NaiveDate) -> Result<NaiveTime, CoreError> {
    let naive = anchor.and_time(truncate_to_minute(local));
    let resolved = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => match tz.from_local_datetime(&(naive + Duration::hours(1))) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(earliest, _) => earliest,
            LocalResult::None => {
                return Err(CoreError::Validation(format!(
                    "Reminder time {} does not exist in {} on {}",
                    format_hh_mm(local),
                    tz.name(),
                    anchor
                )))
            }
        },
    };
    Ok(truncate_to_minute(resolved.with_timezone(&Utc).time()))
}

/// Converts a stored UTC time-of-day back to local time in `tz` on `anchor`
/// (a UTC calendar date).
pub fn utc_to_local_time(utc: NaiveTime, tz: Tz, anchor: NaiveDate) -> NaiveTime {
    let instant = Utc.from_utc_datetime(&anchor.and_time(utc));
    instant.with_timezone(&tz).time()
}

/// Normalizes a caller-supplied `HH:MM` in zone `timezone`, anchored to
/// today's date in that zone.
pub fn normalize_reminder_time(
    hh_mm: &str,
    timezone: &str,
    now: DateTime<Utc>,
) -> Result<NaiveTime, CoreError> {
    let tz = parse_timezone(timezone)?;
    let local = parse_hh_mm(hh_mm)?;
    local_to_utc_time(local, tz, today_in(tz, now))
}

/// Renders a stored UTC time-of-day as `HH:MM` local time as of `now`.
pub fn localize_reminder_time(
    utc: NaiveTime,
    timezone: &str,
    now: DateTime<Utc>,
) -> Result<String, CoreError> {
    let tz = parse_timezone(timezone)?;
    Ok(format_hh_mm(utc_to_local_time(utc, tz, now.date_naive())))
}

/// Moves a stored UTC time-of-day from zone `from` to zone `to`, keeping the
/// local wall-clock time. Both conversions use today's date in `from`.
pub fn rezone_reminder_time(
    utc: NaiveTime,
    from: &str,
    to: &str,
    now: DateTime<Utc>,
) -> Result<NaiveTime, CoreError> {
    let from_tz = parse_timezone(from)?;
    let to_tz = parse_timezone(to)?;
    let offset = from_tz.offset_from_utc_datetime(&now.naive_utc()).fix();
    let (local, _) = utc.overflowing_add_signed(Duration::seconds(i64::from(offset.local_minus_utc())));
    local_to_utc_time(local, to_tz, today_in(from_tz, now))
}
