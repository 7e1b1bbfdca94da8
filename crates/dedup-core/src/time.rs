//! Lenient timestamp parsing for values sent by the remote store and by
//! callers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Parse an RFC 3339 timestamp, a zone-less `YYYY-MM-DDTHH:MM:SS[.f]` read
/// as UTC, or a bare `YYYY-MM-DD` date placed at `time_of_day`.
pub fn parse_timestamp(s: &str, time_of_day: NaiveTime) -> Option<DateTime<Utc>> {
  let s = s.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
    return Some(dt.with_timezone(&Utc));
  }
  if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
    return Some(dt.and_utc());
  }
  NaiveDate::parse_from_str(s, "%Y-%m-%d")
    .ok()
    .map(|date| date.and_time(time_of_day).and_utc())
}

/// The last representable microsecond of a day.
pub fn end_of_day() -> NaiveTime {
  NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn accepts_rfc3339_naive_and_date_forms() {
    let expected = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
    assert_eq!(
      parse_timestamp("2024-01-15T11:30:00+01:00", NaiveTime::MIN),
      Some(expected)
    );
    assert_eq!(
      parse_timestamp("2024-01-15T10:30:00", NaiveTime::MIN),
      Some(expected)
    );
    assert_eq!(
      parse_timestamp("2024-01-15", NaiveTime::MIN),
      Some(Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap())
    );
  }

  #[test]
  fn bare_date_takes_time_of_day() {
    let end = parse_timestamp("2024-01-15", end_of_day()).unwrap();
    assert_eq!(end.to_rfc3339(), "2024-01-15T23:59:59.999999+00:00");
  }

  #[test]
  fn garbage_is_rejected() {
    assert!(parse_timestamp("soon", NaiveTime::MIN).is_none());
    assert!(parse_timestamp("", NaiveTime::MIN).is_none());
  }
}
