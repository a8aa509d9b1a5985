//! Semantic typing of raw attribute columns.
//!
//! Three passes, in order: composite-text cleaning, type application, and
//! date/time derivation from the raw timestamp. Cleaning has to run first so
//! that a value like `"3 - heavily infested"` reaches the `int` parser as `"3"`.

pub mod parse;

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::{SemanticType, TableMapping};
use crate::error::CoercionError;
use crate::record::{RecordSet, Value};

/// Column holding the raw feature timestamp.
pub const TIMESTAMP_COLUMN: &str = "when";
pub const DATE_COLUMN: &str = "date";
pub const TIME_COLUMN: &str = "time";

/// Column types, composite-text columns, and the timestamp to split.
#[derive(Debug, Clone, Default)]
pub struct CoercionPlan {
    pub types: IndexMap<String, SemanticType>,
    pub clean_columns: Vec<String>,
    pub timestamp_column: Option<String>,
}

impl CoercionPlan {
    pub fn from_mapping(mapping: &TableMapping, timestamp_column: &str) -> Self {
        Self {
            types: mapping.coercion_types().into_iter().collect(),
            clean_columns: mapping.clean_columns.clone(),
            timestamp_column: Some(timestamp_column.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CoerceReport {
    pub cleaned: Vec<String>,
    pub coerced: BTreeMap<String, Vec<String>>,
    /// Non-null cells that failed to parse and became null, per column.
    pub failed_cells: BTreeMap<String, usize>,
    /// Declared columns absent from the record set.
    pub skipped: Vec<String>,
    pub derived: Vec<String>,
}

/// Keep the first hyphen-separated token, trimmed. Non-text values pass through.
pub fn clean_text(value: Value) -> Value {
    match value {
        Value::Text(s) => {
            let first = s.split('-').next().unwrap_or_default().trim().to_string();
            Value::Text(first)
        }
        other => other,
    }
}

/// Apply one semantic type to one value. Unparseable input becomes `Null`.
pub fn coerce_value(value: Value, ty: SemanticType) -> Value {
    if value.is_null() && ty != SemanticType::Bool {
        return Value::Null;
    }
    match ty {
        SemanticType::Datetime => parse::to_datetime(&value).unwrap_or(Value::Null),
        SemanticType::Int => parse::to_integer(&value, i64::MIN, i64::MAX)
            .map_or(Value::Null, Value::Int),
        SemanticType::Float => parse::to_number(&value).map_or(Value::Null, Value::Float),
        SemanticType::Time => match &value {
            Value::Time(_) => value,
            Value::Text(s) => parse::parse_time(s).map_or(Value::Null, Value::Time),
            other => parse::split_datetime(other).map_or(Value::Null, |(_, t)| Value::Time(t)),
        },
        SemanticType::Bool => Value::Bool(parse::truthy(&value)),
        SemanticType::String => value.to_text().map_or(Value::Null, Value::Text),
    }
}

/// Run cleaning, type application, and date/time derivation.
pub fn coerce(
    mut set: RecordSet,
    plan: &CoercionPlan,
) -> Result<(RecordSet, CoerceReport), CoercionError> {
    let mut report = CoerceReport::default();

    let raw_timestamps: Option<Vec<Value>> = plan
        .timestamp_column
        .as_deref()
        .and_then(|c| set.column_values(c))
        .map(|values| values.into_iter().cloned().collect());

    for column in &plan.clean_columns {
        if set.map_column(column, clean_text) {
            tracing::debug!("Coerce: cleaned column '{}'", column);
            report.cleaned.push(column.clone());
        } else {
            tracing::warn!("Coerce: column '{}' not found for cleaning, skipping", column);
        }
    }

    for (column, ty) in &plan.types {
        if raw_timestamps.is_some() && is_derived(column) {
            tracing::debug!("Coerce: '{}' is derived from the timestamp, not typed", column);
            continue;
        }
        let mut failed = 0usize;
        let applied = set.map_column(column, |value| {
            let was_present = !value.is_missing();
            let coerced = coerce_value(value, *ty);
            if was_present && coerced.is_null() {
                failed += 1;
            }
            coerced
        });
        if !applied {
            tracing::debug!("Coerce: declared column '{}' not present, skipping", column);
            report.skipped.push(column.clone());
            continue;
        }
        if failed > 0 {
            tracing::warn!(
                "Coerce: {} value(s) in '{}' did not parse as {} and were nulled",
                failed,
                column,
                ty.label()
            );
            report.failed_cells.insert(column.clone(), failed);
        }
        report
            .coerced
            .entry(ty.label().to_string())
            .or_default()
            .push(column.clone());
    }

    if let Some(raw) = raw_timestamps {
        let (dates, times) = derive_date_time(&raw)?;
        set.set_column(DATE_COLUMN, dates);
        set.set_column(TIME_COLUMN, times);
        report.derived = vec![DATE_COLUMN.to_string(), TIME_COLUMN.to_string()];
    } else if let Some(column) = &plan.timestamp_column {
        tracing::warn!("Coerce: timestamp column '{}' not present, no date/time derived", column);
    }

    tracing::info!(
        "Coerce: cleaned {} column(s), typed {} column(s), skipped {}",
        report.cleaned.len(),
        report.coerced.values().map(Vec::len).sum::<usize>(),
        report.skipped.len()
    );
    Ok((set, report))
}

fn is_derived(column: &str) -> bool {
    column == DATE_COLUMN || column == TIME_COLUMN
}

fn derive_date_time(raw: &[Value]) -> Result<(Vec<Value>, Vec<Value>), CoercionError> {
    let mut dates = Vec::with_capacity(raw.len());
    let mut times = Vec::with_capacity(raw.len());
    for (row, value) in raw.iter().enumerate() {
        if value.is_missing() {
            dates.push(Value::Null);
            times.push(Value::Null);
            continue;
        }
        let (date, time) = parse::to_datetime(value)
            .as_ref()
            .and_then(parse::split_datetime)
            .ok_or_else(|| CoercionError::Timestamp {
                row,
                value: value.to_string(),
            })?;
        dates.push(Value::Date(date));
        times.push(Value::Time(time));
    }
    Ok((dates, times))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{Geometry, Point};
    use time::macros::{date, time};

    fn set(columns: &[&str], rows: Vec<Vec<Value>>) -> RecordSet {
        let mut set = RecordSet::new(columns.iter().map(|c| c.to_string()).collect());
        for values in rows {
            set.push(Geometry::Point(Point::new(0.0, 0.0)), values);
        }
        set
    }

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn plan(types: &[(&str, SemanticType)], clean: &[&str], ts: Option<&str>) -> CoercionPlan {
        CoercionPlan {
            types: types.iter().map(|(c, t)| (c.to_string(), *t)).collect(),
            clean_columns: clean.iter().map(|c| c.to_string()).collect(),
            timestamp_column: ts.map(str::to_string),
        }
    }

    #[test]
    fn cleaning_recovers_leading_code_and_is_idempotent() {
        let once = clean_text(text("3 - heavily infested"));
        assert_eq!(once, text("3"));
        assert_eq!(clean_text(once.clone()), once);
        assert_eq!(clean_text(Value::Null), Value::Null);
        assert_eq!(clean_text(text("  B  ")), text("B"));
    }

    #[test]
    fn cleaning_runs_before_int_coercion() {
        let input = set(&["risco"], vec![vec![text("3 - heavily infested")], vec![text("x")]]);
        let (out, report) = coerce(
            input,
            &plan(&[("risco", SemanticType::Int)], &["risco"], None),
        )
        .unwrap();
        assert_eq!(out.value(0, "risco"), Some(&Value::Int(3)));
        assert_eq!(out.value(1, "risco"), Some(&Value::Null));
        assert_eq!(report.failed_cells.get("risco"), Some(&1));
        assert_eq!(report.cleaned, vec!["risco"]);
    }

    #[test]
    fn unparseable_values_become_null_for_every_parsed_type() {
        for ty in [
            SemanticType::Int,
            SemanticType::Float,
            SemanticType::Datetime,
            SemanticType::Time,
        ] {
            assert_eq!(coerce_value(text("not a value"), ty), Value::Null, "{ty:?}");
        }
    }

    #[test]
    fn applies_each_semantic_type() {
        assert_eq!(coerce_value(text("2.5"), SemanticType::Float), Value::Float(2.5));
        assert_eq!(
            coerce_value(text("2023-05-10T14:23:11"), SemanticType::Time),
            Value::Time(time!(14:23:11))
        );
        assert_eq!(coerce_value(text("anything"), SemanticType::Bool), Value::Bool(true));
        assert_eq!(coerce_value(Value::Null, SemanticType::Bool), Value::Bool(false));
        assert_eq!(coerce_value(Value::Int(7), SemanticType::String), text("7"));
        assert_eq!(coerce_value(Value::Null, SemanticType::String), Value::Null);
    }

    #[test]
    fn declared_but_absent_columns_are_skipped() {
        let input = set(&["a"], vec![vec![text("1")]]);
        let (_, report) = coerce(input, &plan(&[("b", SemanticType::Int)], &[], None)).unwrap();
        assert_eq!(report.skipped, vec!["b"]);
    }

    #[test]
    fn derives_local_date_and_time_from_raw_timestamp() {
        let input = set(
            &["when"],
            vec![vec![text("2023-05-10T23:30:00-03:00")], vec![Value::Null]],
        );
        // A datetime declaration must not hide the raw value from derivation.
        let (out, report) = coerce(
            input,
            &plan(&[("when", SemanticType::Datetime)], &[], Some("when")),
        )
        .unwrap();
        assert_eq!(out.value(0, "date"), Some(&Value::Date(date!(2023 - 05 - 10))));
        assert_eq!(out.value(0, "time"), Some(&Value::Time(time!(23:30))));
        assert_eq!(out.value(1, "date"), Some(&Value::Null));
        assert_eq!(report.derived, vec!["date", "time"]);
    }

    #[test]
    fn declared_derived_columns_are_neither_typed_nor_skipped() {
        let input = set(&["when"], vec![vec![text("2023-05-10T08:15:00")]]);
        let (out, report) = coerce(
            input,
            &plan(
                &[("date", SemanticType::Datetime), ("time", SemanticType::Time)],
                &[],
                Some("when"),
            ),
        )
        .unwrap();
        assert!(report.skipped.is_empty());
        assert!(report.coerced.is_empty());
        assert_eq!(out.value(0, "date"), Some(&Value::Date(date!(2023 - 05 - 10))));
        assert_eq!(out.value(0, "time"), Some(&Value::Time(time!(8:15))));
    }

    #[test]
    fn declared_date_without_timestamp_is_skipped() {
        let input = set(&["a"], vec![vec![text("1")]]);
        let (_, report) =
            coerce(input, &plan(&[("date", SemanticType::Datetime)], &[], Some("when"))).unwrap();
        assert_eq!(report.skipped, vec!["date"]);
        assert!(report.derived.is_empty());
    }

    #[test]
    fn out_of_range_integers_become_null() {
        assert_eq!(
            coerce_value(text("9223372036854775808"), SemanticType::Int),
            Value::Null
        );
        assert_eq!(
            coerce_value(text("9223372036854775807"), SemanticType::Int),
            Value::Int(i64::MAX)
        );
    }

    #[test]
    fn unparseable_raw_timestamp_is_a_hard_error() {
        let input = set(&["when"], vec![vec![text("2023-05-10")], vec![text("garbage")]]);
        let err = coerce(input, &plan(&[], &[], Some("when"))).unwrap_err();
        assert!(matches!(err, CoercionError::Timestamp { row: 1, .. }));
    }
}
