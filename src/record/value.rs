use serde_json::Value as JsonValue;
use std::fmt;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

/// A single cell. `Null` is the only "no value" representation past the caster.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(Date),
    Time(Time),
    Timestamp(PrimitiveDateTime),
    TimestampTz(OffsetDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null, or a float that carries no number.
    pub fn is_missing(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render as text; `None` for `Null`.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Text(_) => "text",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Int(n) => JsonValue::from(*n),
            Value::Float(f) if f.is_finite() => JsonValue::from(*f),
            Value::Float(_) => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            other => JsonValue::String(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(s) => f.write_str(s),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Date(d) => {
                let text = d
                    .format(format_description!("[year]-[month]-[day]"))
                    .map_err(|_| fmt::Error)?;
                f.write_str(&text)
            }
            Value::Time(t) => {
                let text = t
                    .format(format_description!("[hour]:[minute]:[second]"))
                    .map_err(|_| fmt::Error)?;
                f.write_str(&text)
            }
            Value::Timestamp(ts) => {
                let text = ts
                    .format(format_description!(
                        "[year]-[month]-[day]T[hour]:[minute]:[second]"
                    ))
                    .map_err(|_| fmt::Error)?;
                f.write_str(&text)
            }
            Value::TimestampTz(ts) => {
                let text = ts.format(&Rfc3339).map_err(|_| fmt::Error)?;
                f.write_str(&text)
            }
        }
    }
}
