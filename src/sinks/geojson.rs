use super::{DataSink, FeatureRow};
use anyhow::{Context, Result};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use serde_json::json;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::record::CRS;

/// Buffers features and writes one FeatureCollection, tagged with its CRS
/// and, when given, the destination table name.
pub struct GeoJsonSink {
    path: PathBuf,
    name: Option<String>,
    features: Vec<Feature>,
}

impl GeoJsonSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Fail on an unwritable path before any stage runs.
        File::create(path.as_ref())
            .with_context(|| format!("Failed to create {:?}", path.as_ref()))?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            name: None,
            features: Vec::new(),
        })
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

impl DataSink for GeoJsonSink {
    fn add_feature(&mut self, row: FeatureRow) -> Result<()> {
        self.features.push(Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::from(&row.geometry)),
            id: None,
            properties: Some(row.properties),
            foreign_members: None,
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let mut members = JsonObject::new();
        if let Some(name) = &self.name {
            members.insert("name".to_string(), json!(name));
        }
        members.insert(
            "crs".to_string(),
            json!({"type": "name", "properties": {"name": CRS}}),
        );
        let collection = GeoJson::FeatureCollection(FeatureCollection {
            bbox: None,
            features: std::mem::take(&mut self.features),
            foreign_members: Some(members),
        });

        let mut writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer_pretty(&mut writer, &collection)?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{Geometry, LineString, Point, Polygon};
    use serde_json::Map;
    use tempfile::NamedTempFile;

    fn row(geometry: Geometry<f64>, species: &str) -> FeatureRow {
        let mut properties = Map::new();
        properties.insert("species".to_string(), json!(species));
        properties.insert("individuos".to_string(), serde_json::Value::Null);
        FeatureRow {
            geometry,
            properties,
        }
    }

    fn read(path: &Path) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[test]
    fn writes_named_collection_with_crs() {
        let file = NamedTempFile::with_suffix(".geojson").unwrap();
        let mut sink = GeoJsonSink::new(file.path()).unwrap().with_name("ocorrencia");
        sink.add_feature(row(Geometry::Point(Point::new(-48.5, -27.6)), "pinus"))
            .unwrap();
        sink.finish().unwrap();

        let parsed = read(file.path());
        assert_eq!(parsed["type"], "FeatureCollection");
        assert_eq!(parsed["name"], "ocorrencia");
        assert_eq!(parsed["crs"]["properties"]["name"], "EPSG:4326");
        let feature = &parsed["features"][0];
        assert_eq!(feature["geometry"]["type"], "Point");
        assert_eq!(feature["properties"]["species"], "pinus");
        assert!(feature["properties"]["individuos"].is_null());
    }

    #[test]
    fn writes_every_geometry_kind() {
        let file = NamedTempFile::with_suffix(".geojson").unwrap();
        let mut sink = GeoJsonSink::new(file.path()).unwrap();
        let line = LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]);
        let ring = LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]);
        sink.add_feature(row(Geometry::Point(Point::new(0.0, 0.0)), "a")).unwrap();
        sink.add_feature(row(Geometry::LineString(line), "b")).unwrap();
        sink.add_feature(row(Geometry::Polygon(Polygon::new(ring, vec![])), "c"))
            .unwrap();
        sink.finish().unwrap();

        let parsed = read(file.path());
        let kinds: Vec<&str> = parsed["features"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["geometry"]["type"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["Point", "LineString", "Polygon"]);
    }

    #[test]
    fn empty_preview_is_still_a_collection() {
        let file = NamedTempFile::with_suffix(".geojson").unwrap();
        let mut sink = GeoJsonSink::new(file.path()).unwrap();
        sink.finish().unwrap();
        let parsed = read(file.path());
        assert!(parsed["features"].as_array().unwrap().is_empty());
        assert!(parsed.get("name").is_none());
    }
}
