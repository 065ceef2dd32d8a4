use chrono::{
    DateTime, Datelike, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike,
    format::{Item, StrftimeItems},
};

use crate::{
    error::{EvalError, EvalResult},
    value::{Map, Value},
};

/// Format used when no explicit format string is given.
pub(crate) const DEFAULT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Naive formats tried, in order, when text carries no explicit offset.
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

pub(crate) fn now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

/// Interprets a wall-clock time in the local timezone.
fn to_local(naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
}

/// Parses the ISO-8601 shapes commonly found in state attributes.
pub(crate) fn parse_datetime(text: &str) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(dt);
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return to_local(naive);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .and_then(to_local)
}

/// Checks a user supplied strftime format so formatting never hits an invalid item.
fn strftime_items(format: &str) -> EvalResult<Vec<Item<'_>>> {
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(EvalError::invalid_argument(
            "strftime",
            format!("invalid format string \"{}\"", format),
        ));
    }
    Ok(items)
}

pub(crate) fn format(dt: &DateTime<FixedOffset>, format: &str) -> EvalResult<String> {
    let items = strftime_items(format)?;
    Ok(dt.format_with_items(items.into_iter()).to_string())
}

/// Parses `text` with a strftime format, falling back to ISO-8601 forms.
pub(crate) fn strptime(text: &str, format: &str) -> EvalResult<DateTime<FixedOffset>> {
    strftime_items(format)?;
    if let Ok(dt) = DateTime::parse_from_str(text, format) {
        return Ok(dt);
    }
    let naive = NaiveDateTime::parse_from_str(text, format).ok().or_else(|| {
        NaiveDate::parse_from_str(text, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
    });
    naive
        .and_then(to_local)
        .or_else(|| parse_datetime(text))
        .ok_or_else(|| {
            EvalError::invalid_argument(
                "strptime",
                format!("\"{}\" does not match format \"{}\"", text, format),
            )
        })
}

/// A datetime from a Unix timestamp in seconds.
pub(crate) fn from_timestamp(seconds: f64, local: bool) -> Option<DateTime<FixedOffset>> {
    if !seconds.is_finite() {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, reason = "checked to be finite")]
    let millis = (seconds * 1000.0).round() as i64;
    let utc = DateTime::from_timestamp_millis(millis)?;
    Some(if local {
        utc.with_timezone(&Local).fixed_offset()
    } else {
        utc.fixed_offset()
    })
}

/// Unix timestamp in (fractional) seconds.
pub(crate) fn timestamp(dt: &DateTime<FixedOffset>) -> f64 {
    #[allow(clippy::cast_precision_loss, reason = "template numbers are f64")]
    let millis = dt.timestamp_millis() as f64;
    millis / 1000.0
}

pub(crate) fn add_millis(dt: &DateTime<FixedOffset>, millis: f64) -> EvalResult<DateTime<FixedOffset>> {
    let out_of_range = || EvalError::invalid_argument("datetime arithmetic", "result out of range");
    if !millis.is_finite() {
        return Err(out_of_range());
    }
    #[allow(clippy::cast_possible_truncation, reason = "checked to be finite")]
    let delta = TimeDelta::try_milliseconds(millis.round() as i64).ok_or_else(out_of_range)?;
    dt.checked_add_signed(delta).ok_or_else(out_of_range)
}

/// Milliseconds between two datetimes.
pub(crate) fn diff_millis(a: &DateTime<FixedOffset>, b: &DateTime<FixedOffset>) -> f64 {
    #[allow(clippy::cast_precision_loss, reason = "template numbers are f64")]
    let millis = a.signed_duration_since(*b).num_milliseconds() as f64;
    millis
}

/// Monday is 0.
pub(crate) fn weekday(dt: &DateTime<FixedOffset>) -> u32 {
    dt.weekday().num_days_from_monday()
}

/// Today at a `hh:mm[:ss]` wall-clock time, in the offset of `now`.
pub(crate) fn today_at(now: &DateTime<FixedOffset>, time: &str) -> EvalResult<DateTime<FixedOffset>> {
    let invalid = || EvalError::invalid_argument("today_at", format!("invalid time \"{}\"", time));
    let mut parts = time.trim().split(':');
    let mut next_part = || -> EvalResult<u32> {
        match parts.next() {
            Some(part) => part.trim().parse().map_err(|_| invalid()),
            None => Ok(0),
        }
    };
    let (hour, minute, second) = (next_part()?, next_part()?, next_part()?);
    now.date_naive()
        .and_hms_opt(hour, minute, second)
        .and_then(|naive| naive.and_local_timezone(*now.offset()).single())
        .ok_or_else(invalid)
}

fn field_u32(field: &str, value: &Value) -> EvalResult<u32> {
    match value.as_number() {
        Some(n) if n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX) => {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, reason = "range checked")]
            let n = n as u32;
            Ok(n)
        }
        _ => Err(EvalError::invalid_argument(
            "replace",
            format!("{} must be a non-negative integer", field),
        )),
    }
}

/// `dt.replace(hour=0, minute=0)`: returns a copy with the named fields changed.
pub(crate) fn replace(dt: &DateTime<FixedOffset>, fields: &Map) -> EvalResult<DateTime<FixedOffset>> {
    let mut result = *dt;
    for (field, value) in fields {
        let n = field_u32(field, value)?;
        let updated = match field.as_str() {
            "year" => i32::try_from(n).ok().and_then(|year| result.with_year(year)),
            "month" => result.with_month(n),
            "day" => result.with_day(n),
            "hour" => result.with_hour(n),
            "minute" => result.with_minute(n),
            "second" => result.with_second(n),
            "microsecond" => result.with_nanosecond(n.saturating_mul(1000)),
            _ => {
                return Err(EvalError::invalid_argument(
                    "replace",
                    format!("unknown field \"{}\"", field),
                ));
            }
        };
        result = updated.ok_or_else(|| {
            EvalError::invalid_argument("replace", format!("{} out of range", field))
        })?;
    }
    Ok(result)
}

/// Named attributes readable on a datetime.
pub(crate) fn component(dt: &DateTime<FixedOffset>, name: &str) -> Option<Value> {
    let value = match name {
        "year" => Value::from(dt.year()),
        "month" => Value::from(dt.month()),
        "day" => Value::from(dt.day()),
        "hour" => Value::from(dt.hour()),
        "minute" => Value::from(dt.minute()),
        "second" => Value::from(dt.second()),
        "microsecond" => Value::from(dt.timestamp_subsec_micros()),
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(text: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(text).unwrap()
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_parse_datetime_forms() {
        assert_eq!(
            parse_datetime("2024-03-01T10:20:30+02:00"),
            Some(fixed("2024-03-01T10:20:30+02:00"))
        );
        assert!(parse_datetime("2024-03-01 10:20:30").is_some());
        assert!(parse_datetime("2024-03-01").is_some());
        assert!(parse_datetime("yesterday").is_none());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_format_rejects_invalid_items() {
        let dt = fixed("2024-03-01T10:20:30+00:00");
        assert_eq!(format(&dt, "%H:%M").unwrap(), "10:20");
        assert!(format(&dt, "%Q").is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_strptime_with_offset() {
        let dt = strptime("2024-03-01 10:20 +0100", "%Y-%m-%d %H:%M %z").unwrap();
        assert_eq!(dt, fixed("2024-03-01T10:20:00+01:00"));
        assert!(strptime("nonsense", "%Y").is_err());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_timestamp_round_trip_utc() {
        let dt = from_timestamp(86_400.5, false).unwrap();
        assert_eq!(dt, fixed("1970-01-02T00:00:00.500+00:00"));
        assert!((timestamp(&dt) - 86_400.5).abs() < f64::EPSILON);
        assert!(from_timestamp(f64::NAN, true).is_none());
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_arithmetic_and_weekday() {
        let dt = fixed("2024-03-04T00:00:00+00:00");
        assert_eq!(weekday(&dt), 0);
        let later = add_millis(&dt, 90_000.0).unwrap();
        assert_eq!(diff_millis(&later, &dt), 90_000.0);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_today_at_and_replace() {
        let now = fixed("2024-03-04T15:00:00+05:00");
        let at = today_at(&now, "07:30").unwrap();
        assert_eq!(at, fixed("2024-03-04T07:30:00+05:00"));
        assert!(today_at(&now, "xx").is_err());

        let mut fields = Map::new();
        fields.insert("hour".to_string(), Value::from(1));
        fields.insert("minute".to_string(), Value::from(0));
        assert_eq!(replace(&now, &fields).unwrap(), fixed("2024-03-04T01:00:00+05:00"));
        fields.insert("month".to_string(), Value::from(13));
        assert!(replace(&now, &fields).is_err());
    }
}
