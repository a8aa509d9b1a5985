//! Feature extraction from survey exports.
//!
//! KML placemarks are the primary input; a delimited table with `x`/`y`
//! columns is accepted as an alternate entry point that skips the markup
//! tree entirely.

mod csv;
mod kml;

pub use self::csv::{CsvReport, read_csv};
pub use self::kml::{KML_NAMESPACE, extract, parse_kml};

use serde::Serialize;
use std::path::Path;

use crate::error::{ExtractError, PipelineError};
use crate::record::RecordSet;

/// What the extractor kept and what it skipped.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ExtractReport {
    pub namespace: String,
    pub placemarks: usize,
    pub extracted: usize,
    pub skipped_without_geometry: usize,
    pub skipped_names: Vec<Option<String>>,
    pub points: usize,
    pub linestrings: usize,
    pub polygons: usize,
}

/// Read a KML file from disk into a record set.
pub fn read_kml(path: &Path) -> Result<(RecordSet, ExtractReport), PipelineError> {
    let text = std::fs::read_to_string(path).map_err(|source| ExtractError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!("Extract: parsing {:?}", path);
    let (features, report) = parse_kml(&text)?;
    Ok((RecordSet::from(features), report))
}

/// Column names a file would produce, geometry included.
pub fn columns(path: &Path) -> Result<Vec<String>, PipelineError> {
    let set = if is_csv(path) {
        read_csv(path)?.0
    } else {
        read_kml(path)?.0
    };
    Ok(set.column_names())
}

pub fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv") || ext.eq_ignore_ascii_case("tsv"))
}
