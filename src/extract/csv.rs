use geo_types::{Geometry, Point};
use serde::Serialize;
use std::path::Path;

use crate::error::{ExtractError, PipelineError};
use crate::record::{RecordSet, Value};

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CsvReport {
    pub rows: usize,
    pub extracted: usize,
    pub skipped_without_geometry: usize,
}

/// Read a delimited table with `x`/`y` columns into a point record set.
pub fn read_csv(path: &Path) -> Result<(RecordSet, CsvReport), PipelineError> {
    let delimiter = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    };
    let reader = ::csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .map_err(ExtractError::from)?;
    tracing::info!("Extract: reading table {:?}", path);
    Ok(from_reader(reader)?)
}

fn from_reader<R: std::io::Read>(
    mut reader: ::csv::Reader<R>,
) -> Result<(RecordSet, CsvReport), ExtractError> {
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    let x = headers.iter().position(|h| h == "x");
    let y = headers.iter().position(|h| h == "y");
    let (Some(x), Some(y)) = (x, y) else {
        return Err(ExtractError::MissingCoordinateColumns);
    };

    let mut set = RecordSet::new(headers.clone());
    let mut report = CsvReport::default();
    for record in reader.records() {
        let record = record?;
        report.rows += 1;
        let coord = |i: usize| record.get(i).and_then(|s| s.trim().parse::<f64>().ok());
        let (Some(lon), Some(lat)) = (coord(x), coord(y)) else {
            tracing::warn!("Extract: row {} has no usable x/y, skipping", report.rows);
            report.skipped_without_geometry += 1;
            continue;
        };
        let values = (0..headers.len())
            .map(|i| match record.get(i) {
                Some(s) if !s.is_empty() => Value::Text(s.to_string()),
                _ => Value::Null,
            })
            .collect();
        set.push(Geometry::Point(Point::new(lon, lat)), values);
    }

    report.extracted = set.len();
    tracing::info!(
        "Extract: {} rows, {} extracted, {} skipped without geometry",
        report.rows,
        report.extracted,
        report.skipped_without_geometry
    );
    Ok((set, report))
}
