use serde::Serialize;
use std::collections::BTreeMap;
use time::{PrimitiveDateTime, UtcOffset};

use super::DestinationSchema;
use crate::coerce::parse;
use crate::record::{RecordSet, Value};

/// Conversion applied to a column, chosen from its destination `data_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CastRule {
    SmallInt,
    Integer,
    BigInt,
    Float,
    Text,
    Bool,
    Date,
    Time,
    TimeTz,
    Timestamp,
    TimestampTz,
    /// Types with no native rendering (`USER-DEFINED`, arrays, json); left untouched.
    Passthrough,
}

impl CastRule {
    pub fn from_data_type(data_type: &str) -> Self {
        match data_type.trim().to_ascii_lowercase().as_str() {
            "smallint" | "int2" => CastRule::SmallInt,
            "integer" | "int" | "int4" => CastRule::Integer,
            "bigint" | "int8" => CastRule::BigInt,
            "real" | "double precision" | "numeric" | "decimal" | "float4" | "float8" => {
                CastRule::Float
            }
            "character varying" | "varchar" | "text" | "character" | "char" | "bpchar" => {
                CastRule::Text
            }
            "boolean" | "bool" => CastRule::Bool,
            "date" => CastRule::Date,
            "time without time zone" | "time" => CastRule::Time,
            "time with time zone" | "timetz" => CastRule::TimeTz,
            "timestamp without time zone" | "timestamp" => CastRule::Timestamp,
            "timestamp with time zone" | "timestamptz" => CastRule::TimestampTz,
            _ => CastRule::Passthrough,
        }
    }

    /// Cast one value. Anything that does not convert becomes `Null`.
    pub fn apply(self, value: Value) -> Value {
        if value.is_missing() {
            return Value::Null;
        }
        match self {
            CastRule::SmallInt => int_within(&value, i16::MIN as i64, i16::MAX as i64),
            CastRule::Integer => int_within(&value, i32::MIN as i64, i32::MAX as i64),
            CastRule::BigInt => int_within(&value, i64::MIN, i64::MAX),
            CastRule::Float => parse::to_number(&value).map_or(Value::Null, Value::Float),
            CastRule::Text => value.to_text().map_or(Value::Null, Value::Text),
            CastRule::Bool => parse::parse_bool(&value).map_or(Value::Null, Value::Bool),
            CastRule::Date => parse::to_datetime(&value)
                .as_ref()
                .and_then(parse::split_datetime)
                .map_or(Value::Null, |(d, _)| Value::Date(d)),
            CastRule::Time | CastRule::TimeTz => match value {
                Value::Time(_) => value,
                Value::Text(s) => parse::parse_time(&s).map_or(Value::Null, Value::Time),
                other => parse::split_datetime(&other).map_or(Value::Null, |(_, t)| Value::Time(t)),
            },
            CastRule::Timestamp => match parse::to_datetime(&value) {
                Some(Value::TimestampTz(ts)) => {
                    Value::Timestamp(PrimitiveDateTime::new(ts.date(), ts.time()))
                }
                Some(other) => other,
                None => Value::Null,
            },
            CastRule::TimestampTz => match parse::to_datetime(&value) {
                Some(Value::Timestamp(ts)) => Value::TimestampTz(ts.assume_offset(UtcOffset::UTC)),
                Some(other) => other,
                None => Value::Null,
            },
            CastRule::Passthrough => value,
        }
    }
}

fn int_within(value: &Value, min: i64, max: i64) -> Value {
    parse::to_integer(value, min, max).map_or(Value::Null, Value::Int)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CastColumn {
    pub column: String,
    pub rule: CastRule,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CastReport {
    pub cast: Vec<CastColumn>,
    /// Non-null values that did not convert and became null, per column.
    pub nulled: BTreeMap<String, usize>,
    /// Non-nullable destination columns that still hold nulls.
    pub null_violations: Vec<String>,
}

/// Cast every non-auto destination column present in `set` to its destination
/// type, then normalize every remaining NaN to `Null`.
pub fn cast(mut set: RecordSet, schema: &DestinationSchema) -> (RecordSet, CastReport) {
    let mut report = CastReport::default();

    for column in schema.required() {
        if !set.has_column(&column.name) {
            continue;
        }
        let rule = column.rule();
        if rule == CastRule::Passthrough {
            tracing::debug!(
                "Cast: column '{}' of type '{}' passed through",
                column.name,
                column.data_type
            );
        }
        let mut nulled = 0usize;
        set.map_column(&column.name, |value| {
            let was_present = !value.is_missing();
            let out = rule.apply(value);
            if was_present && out.is_null() {
                nulled += 1;
            }
            out
        });
        if nulled > 0 {
            tracing::warn!(
                "Cast: {} value(s) in '{}' did not convert to {} and were nulled",
                nulled,
                column.name,
                column.data_type
            );
            report.nulled.insert(column.name.clone(), nulled);
        }
        report.cast.push(CastColumn {
            column: column.name.clone(),
            rule,
        });
    }

    let columns: Vec<String> = set.columns().to_vec();
    for name in &columns {
        set.map_column(name, |value| if value.is_missing() { Value::Null } else { value });
    }

    for column in schema.required().filter(|c| !c.nullable) {
        let has_null = set
            .column_values(&column.name)
            .is_some_and(|values| values.iter().any(|v| v.is_null()));
        if has_null {
            report.null_violations.push(column.name.clone());
        }
    }
    if !report.null_violations.is_empty() {
        tracing::warn!(
            "Cast: non-nullable column(s) still hold nulls: {:?}",
            report.null_violations
        );
    }

    tracing::info!(
        "Cast: {} column(s) cast, {} with nulled values",
        report.cast.len(),
        report.nulled.len()
    );
    (set, report)
}
