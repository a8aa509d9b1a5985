//! Reconciliation of a mapped record set against the live destination schema.

mod cast;

pub use cast::{CastColumn, CastReport, CastRule, cast};

use serde::Serialize;

use crate::error::ValidationError;
use crate::record::RecordSet;

/// Columns the destination fills itself; never required, never cast.
pub const AUTO_COLUMNS: &[&str] = &["id", "created_at", "updated_at", "geom"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationColumn {
    pub name: String,
    /// `information_schema.columns.data_type`, e.g. `integer` or `USER-DEFINED`.
    pub data_type: String,
    /// Underlying type name, e.g. `int4` or `geometry`.
    pub udt_name: String,
    pub nullable: bool,
}

impl DestinationColumn {
    pub fn new(name: &str, data_type: &str, nullable: bool) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            udt_name: data_type.to_string(),
            nullable,
        }
    }

    pub fn is_auto(&self) -> bool {
        AUTO_COLUMNS.contains(&self.name.as_str())
    }

    pub fn rule(&self) -> CastRule {
        CastRule::from_data_type(&self.data_type)
    }
}

/// Column catalog of one destination table, in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DestinationSchema {
    pub table: String,
    pub columns: Vec<DestinationColumn>,
}

impl DestinationSchema {
    pub fn column(&self, name: &str) -> Option<&DestinationColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Destination columns the record set has to supply.
    pub fn required(&self) -> impl Iterator<Item = &DestinationColumn> {
        self.columns.iter().filter(|c| !c.is_auto())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub table: String,
    /// Required columns found in the record set, in destination order.
    pub present: Vec<String>,
    /// Required columns absent from the record set, in destination order.
    pub missing: Vec<String>,
    /// Record set columns the destination does not know, in record order.
    pub extra: Vec<String>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.missing.is_empty()
    }

    /// Turn a failed report into a hard error.
    pub fn reconcile(&self) -> Result<(), ValidationError> {
        if self.passed() {
            Ok(())
        } else {
            Err(ValidationError::MissingColumns {
                table: self.table.clone(),
                missing: self.missing.clone(),
            })
        }
    }
}

/// Compare the record set's columns with what the destination requires.
pub fn validate(set: &RecordSet, schema: &DestinationSchema) -> ValidationReport {
    let mut report = ValidationReport {
        table: schema.table.clone(),
        ..ValidationReport::default()
    };
    for column in schema.required() {
        if set.has_column(&column.name) {
            report.present.push(column.name.clone());
        } else {
            report.missing.push(column.name.clone());
        }
    }
    report.extra = set
        .columns()
        .iter()
        .filter(|c| schema.column(c).is_none())
        .cloned()
        .collect();

    if !report.extra.is_empty() {
        tracing::info!(
            "Validate: {} column(s) not in '{}' will be excluded: {:?}",
            report.extra.len(),
            schema.table,
            report.extra
        );
    }
    if report.passed() {
        tracing::info!(
            "Validate: '{}' passed, {} column(s) present",
            schema.table,
            report.present.len()
        );
    } else {
        tracing::warn!(
            "Validate: '{}' is missing required column(s): {:?}",
            schema.table,
            report.missing
        );
    }
    report
}
