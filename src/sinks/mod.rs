//! Preview export of a normalized record set.

use anyhow::Result;
use geo_types::Geometry;
use serde_json::Map;

pub mod geojson;
pub mod geojsonl;

pub use self::geojson::GeoJsonSink;
pub use self::geojsonl::GeoJsonlSink;

use crate::record::RecordSet;

#[derive(Clone, Debug)]
pub struct FeatureRow {
    pub geometry: Geometry<f64>,
    pub properties: Map<String, serde_json::Value>,
}

pub trait DataSink: Send {
    fn add_feature(&mut self, row: FeatureRow) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}

/// Write every row of `set` as a feature, columns as properties. Returns the row count.
pub fn write_record_set(sink: &mut dyn DataSink, set: RecordSet) -> Result<usize> {
    let columns = set.columns().to_vec();
    let mut written = 0;
    for row in set.into_rows() {
        let properties = columns
            .iter()
            .zip(&row.values)
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        sink.add_feature(FeatureRow {
            geometry: row.geometry,
            properties,
        })?;
        written += 1;
    }
    sink.finish()?;
    tracing::info!("Sink: wrote {} feature(s)", written);
    Ok(written)
}
