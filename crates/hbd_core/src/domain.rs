//! crates/hbd_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{Datelike, NaiveDate, NaiveTime};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

/// A registered identity. Every sensitive field is either a lookup hash or
/// ciphertext under the master key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email_lookup_hash: String,
    pub secret_lookup_hash: String,
    pub encrypted_secret: Option<String>,
    pub encrypted_contact_token: String,
    pub encrypted_contact_id: String,
    /// Time-of-day in UTC, minute precision.
    pub reminder_time_utc: NaiveTime,
    /// IANA zone name.
    pub timezone: String,
}

/// A partial update to an identity record. `None` leaves a field untouched.
/// Values are already hashed/encrypted/normalized by the issuer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub email_lookup_hash: Option<String>,
    pub secret_lookup_hash: Option<String>,
    /// `Some(None)` clears a retained secret.
    pub encrypted_secret: Option<Option<String>>,
    pub encrypted_contact_token: Option<String>,
    pub encrypted_contact_id: Option<String>,
    pub reminder_time_utc: Option<NaiveTime>,
    pub timezone: Option<String>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the update to a record in place.
    pub fn apply(self, user: &mut User) {
        if let Some(v) = self.email_lookup_hash {
            user.email_lookup_hash = v;
        }
        if let Some(v) = self.secret_lookup_hash {
            user.secret_lookup_hash = v;
        }
        if let Some(v) = self.encrypted_secret {
            user.encrypted_secret = v;
        }
        if let Some(v) = self.encrypted_contact_token {
            user.encrypted_contact_token = v;
        }
        if let Some(v) = self.encrypted_contact_id {
            user.encrypted_contact_id = v;
        }
        if let Some(v) = self.reminder_time_utc {
            user.reminder_time_utc = v;
        }
        if let Some(v) = self.timezone {
            user.timezone = v;
        }
    }
}

/// A dated entry owned by one identity, e.g. a friend's birthday.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub label: String,
    pub date: BirthDate,
}

impl DateRecord {
    /// `(label, date)` is the natural key of a record within one owner.
    pub fn same_entry(&self, label: &str, date: &BirthDate) -> bool {
        self.label == label && self.date == *date
    }
}

//=========================================================================================
// BirthDate
//=========================================================================================

/// A calendar date whose year may be unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BirthDate {
    pub year: Option<i32>,
    pub month: u32,
    pub day: u32,
}

impl BirthDate {
    pub fn new(year: Option<i32>, month: u32, day: u32) -> Result<Self, CoreError> {
        let valid = match year {
            Some(y) => NaiveDate::from_ymd_opt(y, month, day).is_some(),
            // 2000 is a leap year, so Feb 29 is accepted when the year is unknown.
            None => NaiveDate::from_ymd_opt(2000, month, day).is_some(),
        };
        if !valid {
            return Err(CoreError::Validation(format!(
                "Invalid date: month {} day {}",
                month, day
            )));
        }
        Ok(Self { year, month, day })
    }

    /// True when this date falls on the same month and day as `today`.
    pub fn is_anniversary(&self, today: NaiveDate) -> bool {
        self.month == today.month() && self.day == today.day()
    }

    /// Age reached on `today`, or `None` when the year is unknown or is the
    /// current year.
    pub fn age_on(&self, today: NaiveDate) -> Option<i32> {
        let year = self.year?;
        if year == today.year() {
            return None;
        }
        let mut age = today.year() - year;
        if (today.month(), today.day()) < (self.month, self.day) {
            age -= 1;
        }
        Some(age)
    }
}

impl FromStr for BirthDate {
    type Err = CoreError;

    /// Accepts `YYYY-MM-DD`, the legacy `0000-MM-DD` unknown-year form, and `MM-DD`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::Validation(format!("Invalid date '{}', expected YYYY-MM-DD", s));
        let parts: Vec<&str> = s.trim().split('-').collect();
        let (year, month, day) = match parts.as_slice() {
            [y, m, d] if y.len() == 4 => {
                let y: i32 = y.parse().map_err(|_| invalid())?;
                (if y == 0 { None } else { Some(y) }, *m, *d)
            }
            [m, d] => (None, *m, *d),
            _ => return Err(invalid()),
        };
        let month: u32 = month.parse().map_err(|_| invalid())?;
        let day: u32 = day.parse().map_err(|_| invalid())?;
        Self::new(year, month, day)
    }
}

impl fmt::Display for BirthDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year.unwrap_or(0), self.month, self.day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn age_counts_completed_years() {
        let date: BirthDate = "2000-01-01".parse().unwrap();
        assert_eq!(date.age_on(ymd(2024, 1, 1)), Some(24));
        assert_eq!(date.age_on(ymd(2023, 12, 31)), Some(23));
    }

    #[test]
    fn unknown_or_current_year_has_no_age() {
        let unknown: BirthDate = "0000-03-14".parse().unwrap();
        assert_eq!(unknown.year, None);
        assert_eq!(unknown.age_on(ymd(2024, 3, 14)), None);

        let this_year: BirthDate = "2024-03-14".parse().unwrap();
        assert_eq!(this_year.age_on(ymd(2024, 3, 14)), None);
    }

    #[test]
    fn parses_short_form_and_renders_sentinel() {
        let date: BirthDate = "02-29".parse().unwrap();
        assert_eq!(date, BirthDate { year: None, month: 2, day: 29 });
        assert_eq!(date.to_string(), "0000-02-29");
        assert_eq!("1990-07-04".parse::<BirthDate>().unwrap().to_string(), "1990-07-04");
    }

    #[test]
    fn rejects_impossible_dates() {
        assert!("2023-02-29".parse::<BirthDate>().is_err());
        assert!("2023-13-01".parse::<BirthDate>().is_err());
        assert!("2023/01/01".parse::<BirthDate>().is_err());
        assert!("yesterday".parse::<BirthDate>().is_err());
    }

    #[test]
    fn anniversary_ignores_year() {
        let date: BirthDate = "2021-06-15".parse().unwrap();
        assert!(date.is_anniversary(ymd(2024, 6, 15)));
        assert!(!date.is_anniversary(ymd(2024, 6, 16)));
    }

    #[test]
    fn update_applies_only_present_fields() {
        let mut user = User {
            id: Uuid::new_v4(),
            email_lookup_hash: "e".into(),
            secret_lookup_hash: "s".into(),
            encrypted_secret: Some("x".into()),
            encrypted_contact_token: "t".into(),
            encrypted_contact_id: "c".into(),
            reminder_time_utc: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            timezone: "UTC".into(),
        };
        let update = UserUpdate {
            timezone: Some("Europe/Madrid".into()),
            encrypted_secret: Some(None),
            ..Default::default()
        };
        assert!(!update.is_empty());
        update.apply(&mut user);
        assert_eq!(user.timezone, "Europe/Madrid");
        assert_eq!(user.encrypted_secret, None);
        assert_eq!(user.email_lookup_hash, "e");
    }
}
