//! Timestamp normalization into the reference zone
//!
//! The upstream API mixes bare dates, offset date-times with and without a
//! colon in the offset, and `Z`-suffixed UTC. Everything is turned into a
//! `DateTime<Tz>` in one fixed reference zone so points compare and bucket
//! into calendar days consistently.

use crate::error::{HelmiError, Result};
use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike,
};
use chrono_tz::Tz;

/// The utility's home jurisdiction
pub const DEFAULT_REFERENCE_ZONE: Tz = chrono_tz::Europe::Helsinki;

/// Parses upstream timestamp text into reference-zone instants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeNormalizer {
    zone: Tz,
}

impl Default for TimeNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_ZONE)
    }
}

impl TimeNormalizer {
    pub const fn new(zone: Tz) -> Self {
        Self { zone }
    }

    /// Reference zone
    pub const fn zone(&self) -> Tz {
        self.zone
    }

    /// Parse any accepted shape into an instant in the reference zone.
    ///
    /// Bare dates and offset-less date-times are read as wall-clock time in
    /// the reference zone; inputs with an offset are converted into it.
    pub fn parse(&self, text: &str) -> Result<DateTime<Tz>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(HelmiError::invalid_timestamp(text));
        }

        if !trimmed.contains('T') {
            let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .map_err(|_| HelmiError::invalid_timestamp(text))?;
            return self.from_local(date.and_time(NaiveTime::MIN), text);
        }

        if let Some(dt) = parse_with_offset(trimmed) {
            return Ok(dt.with_timezone(&self.zone));
        }

        let naive = trimmed
            .parse::<NaiveDateTime>()
            .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M"))
            .map_err(|_| HelmiError::invalid_timestamp(text))?;
        self.from_local(naive, text)
    }

    /// Parse and render as ISO-8601 with the reference-zone offset, the form
    /// the metering API expects for `start`/`end`
    pub fn normalize(&self, text: &str) -> Result<String> {
        Ok(self.parse(text)?.to_rfc3339())
    }

    /// Express an instant from any zone in the reference zone
    pub fn localize<Z: TimeZone>(&self, instant: &DateTime<Z>) -> DateTime<Tz> {
        instant.with_timezone(&self.zone)
    }

    fn from_local(&self, naive: NaiveDateTime, original: &str) -> Result<DateTime<Tz>> {
        // A wall-clock time inside a DST gap does not exist
        self.zone
            .from_local_datetime(&naive)
            .earliest()
            .ok_or_else(|| HelmiError::invalid_timestamp(original))
    }
}

/// Truncate to the start of the hour
pub fn floor_to_hour(instant: DateTime<Tz>) -> DateTime<Tz> {
    let extra = Duration::seconds(i64::from(instant.minute() * 60 + instant.second()))
        + Duration::nanoseconds(i64::from(instant.nanosecond()));
    instant - extra
}

fn parse_with_offset(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = insert_offset_colon(text);
    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Some(dt);
    }
    // RFC 3339 requires seconds; ISO-8601 allows `HH:MM` only
    let text = if let Some(stripped) = text.strip_suffix('Z') {
        format!("{stripped}+00:00")
    } else {
        text
    };
    DateTime::parse_from_str(&text, "%Y-%m-%dT%H:%M%:z").ok()
}

/// `+0200` becomes `+02:00`; any other text is returned unchanged
fn insert_offset_colon(text: &str) -> String {
    let Some(split) = text.len().checked_sub(5) else {
        return text.to_string();
    };
    if !text.is_char_boundary(split) {
        return text.to_string();
    }
    let (head, tail) = text.split_at(split);
    let mut chars = tail.chars();
    if let Some(sign @ ('+' | '-')) = chars.next()
        && chars.as_str().bytes().all(|b| b.is_ascii_digit())
    {
        let digits = chars.as_str();
        format!("{head}{sign}{}:{}", &digits[..2], &digits[2..])
    } else {
        text.to_string()
    }
}
