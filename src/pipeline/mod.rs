//! Stage orchestration.
//!
//! `normalize` covers the pure half (coerce, map) and `import` the half that
//! talks to a destination (describe, validate, cast, load). Both record what
//! each stage did into a [`PipelineReport`], which the caller keeps even when
//! a stage fails.

use serde::Serialize;
use std::path::Path;

use crate::coerce::{CoerceReport, CoercionPlan, coerce};
use crate::config::{LoadOptions, NormalizeOptions, SchemaMapping, TableMapping};
use crate::error::{ConfigError, PipelineError};
use crate::extract::{self, CsvReport, ExtractReport};
use crate::load::{BatchLoader, Destination, LoadReport};
use crate::mapping::{MappingReport, map_columns};
use crate::record::RecordSet;
use crate::validate::{CastReport, ValidationReport, cast, validate};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceReport {
    Kml(ExtractReport),
    Csv(CsvReport),
}

/// Diagnostics of every stage that ran, in pipeline order.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PipelineReport {
    pub table: Option<String>,
    pub source: Option<SourceReport>,
    pub coerce: Option<CoerceReport>,
    pub mapping: Option<MappingReport>,
    pub validation: Option<ValidationReport>,
    pub cast: Option<CastReport>,
    pub load: Option<LoadReport>,
}

/// Read a KML file, or a CSV/TSV file with `x`/`y` columns.
pub fn read_source(path: &Path) -> Result<(RecordSet, SourceReport), PipelineError> {
    if extract::is_csv(path) {
        let (set, report) = extract::read_csv(path)?;
        Ok((set, SourceReport::Csv(report)))
    } else {
        let (set, report) = extract::read_kml(path)?;
        Ok((set, SourceReport::Kml(report)))
    }
}

/// Coerce then map a record set for one table.
pub fn normalize(
    set: RecordSet,
    table: &TableMapping,
    options: &NormalizeOptions,
    report: &mut PipelineReport,
) -> Result<RecordSet, PipelineError> {
    tracing::info!("Pipeline: normalizing {} row(s)", set.len());
    let plan = CoercionPlan::from_mapping(table, &options.timestamp_column);
    let (set, coerce_report) = coerce(set, &plan)?;
    report.coerce = Some(coerce_report);

    let (set, mapping_report) = map_columns(set, table);
    report.mapping = Some(mapping_report);
    Ok(set)
}

/// Describe the destination, validate and cast against it, then load.
/// Nothing is written unless validation passes.
pub async fn import<D>(
    destination: &mut D,
    set: RecordSet,
    table: &str,
    options: &LoadOptions,
    report: &mut PipelineReport,
) -> Result<LoadReport, PipelineError>
where
    D: Destination + ?Sized,
{
    let schema = destination.describe(&options.db_schema, table).await?;
    if schema.is_empty() {
        return Err(ConfigError::MissingDestination {
            schema: options.db_schema.clone(),
            table: table.to_string(),
        }
        .into());
    }
    tracing::debug!(
        "Pipeline: '{}' has {} column(s)",
        table,
        schema.columns.len()
    );

    let validation = validate(&set, &schema);
    let outcome = validation.reconcile();
    report.validation = Some(validation);
    outcome?;

    let (set, cast_report) = cast(set, &schema);
    report.cast = Some(cast_report);

    let load = BatchLoader::new(options.batch_size)
        .load(destination, &options.db_schema, &schema, set)
        .await?;
    report.load = Some(load.clone());
    Ok(load)
}

/// Read and normalize a file without touching a destination. The report
/// covers every stage that ran.
pub fn preprocess(
    input: &Path,
    mapping: &SchemaMapping,
    table: &str,
    options: &NormalizeOptions,
) -> (PipelineReport, Result<RecordSet, PipelineError>) {
    let mut report = PipelineReport::default();
    let result = prepare(input, mapping, table, options, &mut report).map(|(_, set)| set);
    if let Err(e) = &result {
        tracing::warn!("Pipeline: preprocessing {:?} failed: {}", input, e);
    }
    (report, result)
}

/// Full import of one file. The report covers every stage that ran.
pub async fn run<D>(
    destination: &mut D,
    input: &Path,
    mapping: &SchemaMapping,
    table: &str,
    normalize_options: &NormalizeOptions,
    load_options: &LoadOptions,
) -> (PipelineReport, Result<LoadReport, PipelineError>)
where
    D: Destination + ?Sized,
{
    let mut report = PipelineReport::default();
    let (table, set) = match prepare(input, mapping, table, normalize_options, &mut report) {
        Ok(prepared) => prepared,
        Err(e) => return (report, Err(e)),
    };
    let result = import(destination, set, &table, load_options, &mut report).await;
    match &result {
        Ok(load) => tracing::info!("Pipeline: imported {} row(s) into '{}'", load.rows, table),
        Err(e) => tracing::warn!("Pipeline: import into '{}' failed: {}", table, e),
    }
    (report, result)
}

fn prepare(
    input: &Path,
    mapping: &SchemaMapping,
    table: &str,
    options: &NormalizeOptions,
    report: &mut PipelineReport,
) -> Result<(String, RecordSet), PipelineError> {
    let (name, table_mapping) = mapping.entry(table)?;
    report.table = Some(name.to_string());

    let (set, source) = read_source(input)?;
    report.source = Some(source);
    let set = normalize(set, table_mapping, options, report)?;
    Ok((name.to_string(), set))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MappingEntry, SemanticType};
    use crate::load::MemoryDestination;
    use crate::record::Value;
    use crate::validate::{DestinationColumn, DestinationSchema};
    use geo_types::{Geometry, Point};

    fn table() -> TableMapping {
        TableMapping {
            mappings: vec![
                MappingEntry {
                    source_column: "especie".to_string(),
                    db_column: Some("species".to_string()),
                    data_type_source: SemanticType::String,
                    data_type_db: "text".to_string(),
                },
                MappingEntry {
                    source_column: "date".to_string(),
                    db_column: Some("date".to_string()),
                    data_type_source: SemanticType::Datetime,
                    data_type_db: "date".to_string(),
                },
            ],
            clean_columns: Vec::new(),
        }
    }

    fn raw() -> RecordSet {
        let mut set = RecordSet::new(vec!["when".to_string(), "especie".to_string()]);
        set.push(
            Geometry::Point(Point::new(-48.5, -27.6)),
            vec![
                Value::Text("2023-05-10T08:00:00".into()),
                Value::Text("pinus".into()),
            ],
        );
        set
    }

    #[test]
    fn normalize_keeps_derived_columns_that_are_mapped() {
        let mut report = PipelineReport::default();
        let set = normalize(raw(), &table(), &NormalizeOptions::default(), &mut report).unwrap();
        assert_eq!(set.columns(), &["species", "date"]);
        assert!(report.coerce.is_some());
        assert_eq!(report.mapping.unwrap().dropped, vec!["when", "time"]);
    }

    #[tokio::test]
    async fn missing_destination_table_is_a_config_error() {
        let mut dest = MemoryDestination::new();
        let mut report = PipelineReport::default();
        let err = import(&mut dest, raw(), "ocorrencia", &LoadOptions::default(), &mut report)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Config(ConfigError::MissingDestination { .. })
        ));
        assert!(report.validation.is_none());
    }

    #[tokio::test]
    async fn import_loads_validated_rows() {
        let schema = DestinationSchema {
            table: "ocorrencia".to_string(),
            columns: vec![
                DestinationColumn::new("id", "integer", false),
                DestinationColumn::new("species", "text", false),
                DestinationColumn::new("date", "date", true),
            ],
        };
        let mut dest = MemoryDestination::new().with_table("public", schema);
        let mut report = PipelineReport::default();
        let set = normalize(raw(), &table(), &NormalizeOptions::default(), &mut report).unwrap();
        let load = import(&mut dest, set, "ocorrencia", &LoadOptions::default(), &mut report)
            .await
            .unwrap();
        assert_eq!(load.rows, 1);
        let stored = &dest.rows("public", "ocorrencia")[0];
        assert_eq!(stored.id, 1);
        assert!(matches!(stored.values.get("date"), Some(Value::Date(_))));
        assert!(report.cast.is_some());
    }
}
