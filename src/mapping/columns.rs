use serde::Serialize;
use std::collections::HashSet;

use crate::config::TableMapping;
use crate::record::RecordSet;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct MappingReport {
    /// Source columns mapped to no destination.
    pub removed: Vec<String>,
    /// `(source, destination)` pairs that were renamed.
    pub renamed: Vec<(String, String)>,
    /// Destination columns filled with nulls because their source was absent.
    pub created: Vec<String>,
    /// Columns dropped because nothing maps to them.
    pub dropped: Vec<String>,
}

/// Rename, drop, and create columns so the set matches `mapping`'s destination columns.
pub fn map_columns(set: RecordSet, mapping: &TableMapping) -> (RecordSet, MappingReport) {
    let mut report = MappingReport::default();
    let targets = mapping.db_columns();

    for entry in &mapping.mappings {
        if entry.db_column.is_none() && set.has_column(&entry.source_column) {
            report.removed.push(entry.source_column.clone());
        }
    }
    if !report.removed.is_empty() {
        tracing::info!("Map: columns mapped to null, removing: {:?}", report.removed);
    }

    // Resolve every output column to the input column that feeds it. A renamed
    // source takes precedence over an existing column of the destination name.
    let mut sources: Vec<Option<String>> = vec![None; targets.len()];
    for entry in &mapping.mappings {
        let Some(db_column) = &entry.db_column else {
            continue;
        };
        if !set.has_column(&entry.source_column) {
            continue;
        }
        if let Some(slot) = targets.iter().position(|t| t == db_column)
            && sources[slot].is_none()
        {
            sources[slot] = Some(entry.source_column.clone());
            if &entry.source_column != db_column {
                report
                    .renamed
                    .push((entry.source_column.clone(), db_column.clone()));
            }
        }
    }
    for (slot, target) in targets.iter().enumerate() {
        if sources[slot].is_none() {
            if set.has_column(target) && !is_source(mapping, target) {
                sources[slot] = Some(target.clone());
            } else {
                report.created.push(target.clone());
            }
        }
    }

    let used: HashSet<&str> = sources.iter().flatten().map(String::as_str).collect();
    for column in set.columns() {
        if !used.contains(column.as_str()) && !report.removed.contains(column) {
            report.dropped.push(column.clone());
        }
    }
    if !report.created.is_empty() {
        tracing::warn!("Map: creating missing columns as null: {:?}", report.created);
    }
    if !report.dropped.is_empty() {
        tracing::info!(
            "Map: dropping {} unmapped column(s): {:?}",
            report.dropped.len(),
            report.dropped
        );
    }

    let plan: Vec<(String, Option<String>)> = targets.iter().cloned().zip(sources).collect();
    let out = set.project(&plan);

    tracing::info!(
        "Map: {} column(s) out, {} renamed, {} created, {} dropped",
        out.columns().len(),
        report.renamed.len(),
        report.created.len(),
        report.dropped.len()
    );
    (out, report)
}

/// Whether `column` is itself a mapped source (and so renamed away or removed).
fn is_source(mapping: &TableMapping, column: &str) -> bool {
    mapping.mappings.iter().any(|m| m.source_column == column)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MappingEntry, SemanticType};
    use crate::record::Value;
    use geo_types::{Geometry, Point};

    fn entry(source: &str, db: Option<&str>) -> MappingEntry {
        MappingEntry {
            source_column: source.to_string(),
            db_column: db.map(str::to_string),
            data_type_source: SemanticType::String,
            data_type_db: "text".to_string(),
        }
    }

    fn input(columns: &[&str]) -> RecordSet {
        let mut set = RecordSet::new(columns.iter().map(|c| c.to_string()).collect());
        let values = columns.iter().map(|c| Value::Text(format!("v_{c}"))).collect();
        set.push(Geometry::Point(Point::new(1.0, 2.0)), values);
        set
    }

    fn mapping(entries: Vec<MappingEntry>) -> TableMapping {
        TableMapping {
            mappings: entries,
            clean_columns: Vec::new(),
        }
    }

    #[test]
    fn output_columns_equal_mapping_targets() {
        let m = mapping(vec![
            entry("especie", Some("species")),
            entry("notes", None),
            entry("zona", Some("zona")),
            entry("absent", Some("count")),
        ]);
        let (out, report) = map_columns(input(&["especie", "notes", "zona", "extra"]), &m);
        assert_eq!(out.columns(), &["species", "zona", "count"]);
        assert_eq!(out.column_names().last().map(String::as_str), Some("geometry"));
        assert_eq!(out.value(0, "species"), Some(&Value::Text("v_especie".into())));
        assert_eq!(out.value(0, "count"), Some(&Value::Null));
        assert_eq!(report.removed, vec!["notes"]);
        assert_eq!(report.created, vec!["count"]);
        assert_eq!(report.dropped, vec!["extra"]);
        assert_eq!(report.renamed, vec![("especie".to_string(), "species".to_string())]);
    }

    #[test]
    fn null_mapped_column_is_absent_from_output() {
        let m = mapping(vec![entry("notes", None), entry("name", Some("name"))]);
        let (out, _) = map_columns(input(&["name", "notes"]), &m);
        assert!(!out.has_column("notes"));
        assert_eq!(out.columns(), &["name"]);
    }

    #[test]
    fn renamed_source_wins_over_existing_destination_name() {
        let m = mapping(vec![entry("zone", Some("zona"))]);
        let (out, report) = map_columns(input(&["zona", "zone"]), &m);
        assert_eq!(out.columns(), &["zona"]);
        assert_eq!(out.value(0, "zona"), Some(&Value::Text("v_zone".into())));
        assert_eq!(report.dropped, vec!["zona"]);
    }

    #[test]
    fn unmapped_column_named_like_a_target_is_kept() {
        let m = mapping(vec![entry("absent", Some("date"))]);
        let (out, report) = map_columns(input(&["date"]), &m);
        assert_eq!(out.value(0, "date"), Some(&Value::Text("v_date".into())));
        assert!(report.created.is_empty());
    }

    #[test]
    fn geometry_survives_an_empty_mapping() {
        let (out, report) = map_columns(input(&["a", "b"]), &mapping(Vec::new()));
        assert!(out.columns().is_empty());
        assert_eq!(out.len(), 1);
        assert_eq!(report.dropped, vec!["a", "b"]);
    }
}
