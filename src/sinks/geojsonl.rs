use super::{DataSink, FeatureRow};
use anyhow::Result;
use geojson::feature::Id;
use geojson::{Feature, GeoJson};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// One feature per line, numbered by row position.
pub struct GeoJsonlSink {
    writer: BufWriter<Box<dyn Write + Send>>,
    next_id: u64,
}

impl GeoJsonlSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writer(Box::new(file)))
    }

    pub fn stdout() -> Result<Self> {
        Ok(Self::from_writer(Box::new(std::io::stdout())))
    }

    fn from_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: BufWriter::new(writer),
            next_id: 0,
        }
    }
}

impl DataSink for GeoJsonlSink {
    fn add_feature(&mut self, row: FeatureRow) -> Result<()> {
        let feature = Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::from(&row.geometry)),
            id: Some(Id::Number(self.next_id.into())),
            properties: Some(row.properties),
            foreign_members: None,
        };
        self.next_id += 1;
        serde_json::to_writer(&mut self.writer, &GeoJson::Feature(feature))?;
        writeln!(self.writer)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordSet, Value};
    use crate::sinks::write_record_set;
    use geo_types::{Geometry, Point};
    use tempfile::NamedTempFile;

    #[test]
    fn writes_one_numbered_feature_per_row() {
        let mut set = RecordSet::new(vec!["species".to_string(), "individuos".to_string()]);
        set.push(
            Geometry::Point(Point::new(1.0, 2.0)),
            vec![Value::Text("pinus".into()), Value::Int(3)],
        );
        set.push(
            Geometry::Point(Point::new(3.0, 4.0)),
            vec![Value::Null, Value::Null],
        );

        let file = NamedTempFile::with_suffix(".geojsonl").unwrap();
        let mut sink = GeoJsonlSink::new(file.path()).unwrap();
        assert_eq!(write_record_set(&mut sink, set).unwrap(), 2);

        let content = std::fs::read_to_string(file.path()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 0);
        assert_eq!(lines[0]["properties"]["individuos"], 3);
        assert_eq!(lines[1]["id"], 1);
        assert!(lines[1]["properties"]["species"].is_null());
        assert_eq!(lines[1]["geometry"]["coordinates"][0], 3.0);
    }
}
