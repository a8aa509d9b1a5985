//! Lenient parsers shared by coercion and casting. None of them fail loudly:
//! anything that does not parse comes back as `None`.

use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use crate::record::Value;

const DATETIME_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"),
    format_description!("[year]-[month]-[day]T[hour]:[minute]"),
    format_description!("[year]-[month]-[day] [hour]:[minute]"),
    format_description!("[year]/[month]/[day] [hour]:[minute]:[second]"),
    format_description!("[year]/[month]/[day] [hour]:[minute]"),
];

const DATE_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!("[year]-[month]-[day]"),
    format_description!("[year]/[month]/[day]"),
];

const TIME_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!("[hour]:[minute]:[second].[subsecond]"),
    format_description!("[hour]:[minute]:[second]"),
    format_description!("[hour]:[minute]"),
];

/// Parse a timestamp. An explicit offset yields `TimestampTz`, otherwise `Timestamp`.
pub fn parse_datetime(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(ts) = OffsetDateTime::parse(text, &Rfc3339) {
        return Some(Value::TimestampTz(ts));
    }
    for format in DATETIME_FORMATS {
        if let Ok(ts) = PrimitiveDateTime::parse(text, format) {
            return Some(Value::Timestamp(ts));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = Date::parse(text, format) {
            return Some(Value::Timestamp(date.midnight()));
        }
    }
    None
}

/// Parse a time of day, accepting a full timestamp as well.
pub fn parse_time(text: &str) -> Option<Time> {
    let trimmed = text.trim();
    for format in TIME_FORMATS {
        if let Ok(time) = Time::parse(trimmed, format) {
            return Some(time);
        }
    }
    parse_datetime(trimmed).and_then(|v| split_datetime(&v)).map(|(_, t)| t)
}

/// Local date and time of day of a timestamp value.
pub fn split_datetime(value: &Value) -> Option<(Date, Time)> {
    match value {
        Value::Timestamp(ts) => Some((ts.date(), ts.time())),
        Value::TimestampTz(ts) => Some((ts.date(), ts.time())),
        Value::Date(d) => Some((*d, Time::MIDNIGHT)),
        _ => None,
    }
}

/// Coerce any value to a timestamp value, or `None`.
pub fn to_datetime(value: &Value) -> Option<Value> {
    match value {
        Value::Timestamp(_) | Value::TimestampTz(_) => Some(value.clone()),
        Value::Date(d) => Some(Value::Timestamp(d.midnight())),
        Value::Text(s) => parse_datetime(s),
        _ => None,
    }
}

/// Numeric view of a value; text is trimmed before parsing.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Float(f) if !f.is_nan() => Some(*f),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Text(s) => s.trim().parse::<f64>().ok().filter(|f| !f.is_nan()),
        _ => None,
    }
}

/// Integral numeric view within `[min, max]`; fractional values are rejected.
pub fn to_integer(value: &Value, min: i64, max: i64) -> Option<i64> {
    if let Value::Int(n) = value {
        return (min..=max).contains(n).then_some(*n);
    }
    if let Value::Text(s) = value
        && let Ok(n) = s.trim().parse::<i64>()
    {
        return (min..=max).contains(&n).then_some(n);
    }
    let f = to_number(value)?;
    // i64 covers [-2^63, 2^63); `as` would saturate anything outside it.
    if f.fract() != 0.0 || !(-I64_BOUND..I64_BOUND).contains(&f) {
        return None;
    }
    let n = f as i64;
    (min..=max).contains(&n).then_some(n)
}

const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Python-style truthiness of a raw value.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Text(s) => !s.is_empty(),
        Value::Int(n) => *n != 0,
        Value::Float(f) => *f != 0.0,
        Value::Bool(b) => *b,
        _ => true,
    }
}

/// Parse boolean tokens; anything else is `None`.
pub fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Int(0) => Some(false),
        Value::Int(1) => Some(true),
        Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, time};

    #[test]
    fn parses_offset_and_naive_timestamps() {
        assert_eq!(
            parse_datetime("2023-05-10T14:23:11-03:00"),
            Some(Value::TimestampTz(datetime!(2023-05-10 14:23:11 -03:00)))
        );
        assert_eq!(
            parse_datetime("2023-05-10 14:23:11"),
            Some(Value::Timestamp(datetime!(2023-05-10 14:23:11)))
        );
        assert_eq!(
            parse_datetime("2023-05-10"),
            Some(Value::Timestamp(datetime!(2023-05-10 0:00)))
        );
        assert_eq!(parse_datetime("yesterday"), None);
        assert_eq!(parse_datetime(""), None);
    }

    #[test]
    fn parses_times() {
        assert_eq!(parse_time("08:15:00"), Some(time!(8:15)));
        assert_eq!(parse_time("08:15"), Some(time!(8:15)));
        assert_eq!(parse_time("2023-05-10T14:23:11Z"), Some(time!(14:23:11)));
        assert_eq!(parse_time("quarter past"), None);
    }

    #[test]
    fn integers_reject_fractions_and_out_of_range() {
        assert_eq!(to_integer(&Value::Text(" 3 ".into()), i64::MIN, i64::MAX), Some(3));
        assert_eq!(to_integer(&Value::Text("3.0".into()), i64::MIN, i64::MAX), Some(3));
        assert_eq!(to_integer(&Value::Text("3.5".into()), i64::MIN, i64::MAX), None);
        assert_eq!(to_integer(&Value::Int(40_000), i16::MIN as i64, i16::MAX as i64), None);
        assert_eq!(to_integer(&Value::Text("NaN".into()), i64::MIN, i64::MAX), None);
        assert_eq!(
            to_integer(&Value::Text("9223372036854775808".into()), i64::MIN, i64::MAX),
            None
        );
        assert_eq!(to_integer(&Value::Float(9.3e18), i64::MIN, i64::MAX), None);
        assert_eq!(
            to_integer(&Value::Float(-9_223_372_036_854_775_808.0), i64::MIN, i64::MAX),
            Some(i64::MIN)
        );
        assert_eq!(to_integer(&Value::Float(32_768.0), i16::MIN as i64, i16::MAX as i64), None);
    }

    #[test]
    fn truthiness_follows_raw_value() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&Value::Text(String::new())));
        assert!(truthy(&Value::Text("false".into())));
        assert!(!truthy(&Value::Int(0)));
    }

    #[test]
    fn bool_tokens() {
        assert_eq!(parse_bool(&Value::Text("Yes".into())), Some(true));
        assert_eq!(parse_bool(&Value::Text("0".into())), Some(false));
        assert_eq!(parse_bool(&Value::Text("maybe".into())), None);
    }
}
