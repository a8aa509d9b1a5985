use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_DB_SCHEMA: &str = "public";

/// Declarative column mapping for every known destination table.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(transparent)]
pub struct SchemaMapping {
    pub tables: BTreeMap<String, TableMapping>,
}

impl SchemaMapping {
    /// Load a mapping document (JSON or YAML, by extension).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MappingNotFound(path.to_path_buf()));
        }
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .build()
            .map_err(|source| ConfigError::MappingInvalid {
                path: path.to_path_buf(),
                source,
            })?;
        let mapping: SchemaMapping =
            settings
                .try_deserialize()
                .map_err(|source| ConfigError::MappingInvalid {
                    path: path.to_path_buf(),
                    source,
                })?;
        mapping.normalized()
    }

    /// Parse a mapping document held in memory.
    pub fn from_str_format(text: &str, format: ::config::FileFormat) -> Result<Self, ConfigError> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from_str(text, format))
            .build()
            .map_err(|source| ConfigError::MappingInvalid {
                path: "<inline>".into(),
                source,
            })?;
        let mapping: SchemaMapping =
            settings
                .try_deserialize()
                .map_err(|source| ConfigError::MappingInvalid {
                    path: "<inline>".into(),
                    source,
                })?;
        mapping.normalized()
    }

    /// Lowercase column names, fold "None"/empty db columns into `None`, reject duplicates.
    fn normalized(mut self) -> Result<Self, ConfigError> {
        for (table, spec) in self.tables.iter_mut() {
            let mut seen = HashSet::new();
            for entry in spec.mappings.iter_mut() {
                entry.source_column = entry.source_column.trim().to_lowercase();
                entry.db_column = entry
                    .db_column
                    .take()
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty() && c != "None");
                if !seen.insert(entry.source_column.clone()) {
                    return Err(ConfigError::DuplicateSource {
                        table: table.clone(),
                        column: entry.source_column.clone(),
                    });
                }
            }
            for column in spec.clean_columns.iter_mut() {
                *column = column.trim().to_lowercase();
            }
        }
        Ok(self)
    }

    /// Look a table up by name (case-insensitive).
    pub fn table(&self, name: &str) -> Result<&TableMapping, ConfigError> {
        self.entry(name).map(|(_, spec)| spec)
    }

    /// Canonical table name and its mapping.
    pub fn entry(&self, name: &str) -> Result<(&str, &TableMapping), ConfigError> {
        self.tables
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name.trim()))
            .map(|(key, spec)| (key.as_str(), spec))
            .ok_or_else(|| ConfigError::UnknownTable {
                table: name.to_string(),
                known: self.table_names().join(", "),
            })
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct TableMapping {
    #[serde(default)]
    pub mappings: Vec<MappingEntry>,
    /// Composite "code - description" columns to reduce to their leading token.
    #[serde(default)]
    pub clean_columns: Vec<String>,
}

impl TableMapping {
    /// Semantic type per source column, in mapping order.
    pub fn coercion_types(&self) -> Vec<(String, SemanticType)> {
        self.mappings
            .iter()
            .map(|m| (m.source_column.clone(), m.data_type_source))
            .collect()
    }

    /// Distinct destination columns in mapping order.
    pub fn db_columns(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for column in self.mappings.iter().filter_map(|m| m.db_column.as_ref()) {
            if !out.contains(column) {
                out.push(column.clone());
            }
        }
        out
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MappingEntry {
    pub source_column: String,
    #[serde(default)]
    pub db_column: Option<String>,
    #[serde(default)]
    pub data_type_source: SemanticType,
    #[serde(default)]
    pub data_type_db: String,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Datetime,
    Int,
    Float,
    Time,
    Bool,
    #[default]
    #[serde(alias = "str", alias = "text")]
    String,
}

impl SemanticType {
    pub fn label(&self) -> &'static str {
        match self {
            SemanticType::Datetime => "datetime",
            SemanticType::Int => "int",
            SemanticType::Float => "float",
            SemanticType::Time => "time",
            SemanticType::Bool => "bool",
            SemanticType::String => "string",
        }
    }
}

impl FromStr for SemanticType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "datetime" => Ok(SemanticType::Datetime),
            "int" => Ok(SemanticType::Int),
            "float" => Ok(SemanticType::Float),
            "time" => Ok(SemanticType::Time),
            "bool" => Ok(SemanticType::Bool),
            "string" | "str" | "text" => Ok(SemanticType::String),
            _ => Err(format!("invalid semantic type: {value}")),
        }
    }
}

/// Options for the coerce/map half of the pipeline.
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Raw timestamp column split into `date` and `time`.
    pub timestamp_column: String,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            timestamp_column: crate::coerce::TIMESTAMP_COLUMN.to_string(),
        }
    }
}

/// Options for the validate/cast/load half of the pipeline.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub batch_size: usize,
    pub db_schema: String,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            db_schema: DEFAULT_DB_SCHEMA.to_string(),
        }
    }
}
