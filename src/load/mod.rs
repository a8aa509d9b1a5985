//! Transactional batched load into a destination table.
//!
//! Ids are assigned as `max(id) + 1 + row_offset` with `max(id)` read inside
//! the load transaction. Nothing locks the table, so two loaders running
//! against the same table at once can hand out the same ids.

mod memory;
mod postgres;

pub use memory::{MemoryDestination, StoredRow};
pub use postgres::PostgresDestination;

use async_trait::async_trait;
use geozero::{CoordDimensions, ToWkb};
use serde::Serialize;

use crate::error::LoadError;
use crate::record::{RecordSet, Value};
use crate::validate::{CastRule, DestinationSchema};

pub const ID_COLUMN: &str = "id";
pub const GEOM_COLUMN: &str = "geom";
/// SRID given to every inserted geometry.
pub const SRID: i32 = 4326;

/// A table store that can describe its tables and open a write transaction.
#[async_trait]
pub trait Destination: Send {
    /// Column catalog of `schema.table`; empty when the table does not exist.
    async fn describe(&mut self, schema: &str, table: &str)
    -> Result<DestinationSchema, LoadError>;

    async fn begin<'a>(&'a mut self) -> Result<Box<dyn LoadTransaction + 'a>, LoadError>;
}

/// One open write transaction. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait LoadTransaction: Send {
    async fn max_id(&mut self, schema: &str, table: &str) -> Result<i64, LoadError>;

    /// Insert one batch, returning the number of rows written.
    async fn insert(&mut self, batch: &LoadBatch) -> Result<u64, LoadError>;

    async fn commit(self: Box<Self>) -> Result<(), LoadError>;

    async fn rollback(self: Box<Self>) -> Result<(), LoadError>;
}

/// A data column of the insert, in destination order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadColumn {
    pub name: String,
    pub rule: CastRule,
    pub udt_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadRow {
    pub id: i64,
    /// One value per `LoadBatch::columns` entry.
    pub values: Vec<Value>,
    pub geometry_wkb_hex: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadBatch {
    pub schema: String,
    pub table: String,
    /// 1-based position of this batch within the load.
    pub index: usize,
    pub columns: Vec<LoadColumn>,
    pub rows: Vec<LoadRow>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct LoadReport {
    pub table: String,
    pub rows: usize,
    pub batches: usize,
    pub first_id: Option<i64>,
    pub last_id: Option<i64>,
}

/// Destination data columns the record set supplies: every non-auto destination
/// column present in `set`. Extras are left out.
pub fn load_columns(set: &RecordSet, schema: &DestinationSchema) -> Vec<LoadColumn> {
    schema
        .required()
        .filter(|c| set.has_column(&c.name))
        .map(|c| LoadColumn {
            name: c.name.clone(),
            rule: c.rule(),
            udt_name: c.udt_name.clone(),
        })
        .collect()
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Hex-encoded little-endian WKB of a geometry.
pub fn wkb_hex(geometry: &geo_types::Geometry<f64>) -> Result<String, geozero::error::GeozeroError> {
    let bytes = geometry.to_wkb(CoordDimensions::xy())?;
    Ok(hex::encode(bytes))
}

pub struct BatchLoader {
    batch_size: usize,
}

impl BatchLoader {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Insert every row of `set` into `schema.table` in one transaction.
    /// Any failure rolls the whole transaction back.
    pub async fn load<D>(
        &self,
        destination: &mut D,
        db_schema: &str,
        schema: &DestinationSchema,
        set: RecordSet,
    ) -> Result<LoadReport, LoadError>
    where
        D: Destination + ?Sized,
    {
        let table = schema.table.clone();
        let columns = load_columns(&set, schema);
        let indices: Vec<usize> = columns
            .iter()
            .filter_map(|c| set.column_index(&c.name))
            .collect();

        let mut prepared = Vec::with_capacity(set.len());
        for (row, record) in set.into_rows().into_iter().enumerate() {
            let hex = wkb_hex(&record.geometry).map_err(|e| LoadError::Geometry {
                row,
                message: e.to_string(),
            })?;
            let mut values = record.values;
            let picked: Vec<Value> = indices.iter().map(|&i| std::mem::take(&mut values[i])).collect();
            prepared.push((picked, hex));
        }

        if prepared.is_empty() {
            tracing::info!("Load: nothing to insert into '{}'", table);
            return Ok(LoadReport {
                table,
                ..LoadReport::default()
            });
        }

        let mut tx = destination.begin().await?;
        let outcome = self
            .insert_all(tx.as_mut(), db_schema, &table, &columns, prepared)
            .await;
        match outcome {
            Ok(report) => {
                tx.commit().await?;
                tracing::info!(
                    "Load: committed {} row(s) to '{}' in {} batch(es), ids {:?}..={:?}",
                    report.rows,
                    report.table,
                    report.batches,
                    report.first_id,
                    report.last_id
                );
                Ok(report)
            }
            Err(err) => {
                tracing::warn!("Load: rolling back '{}': {}", table, err);
                if let Err(rollback) = tx.rollback().await {
                    tracing::error!("Load: rollback failed: {}", rollback);
                }
                Err(err)
            }
        }
    }

    async fn insert_all(
        &self,
        tx: &mut (dyn LoadTransaction + '_),
        db_schema: &str,
        table: &str,
        columns: &[LoadColumn],
        prepared: Vec<(Vec<Value>, String)>,
    ) -> Result<LoadReport, LoadError> {
        let max_id = tx.max_id(db_schema, table).await?;
        tracing::debug!("Load: current max id of '{}' is {}", table, max_id);

        let total = prepared.len();
        let mut rows = prepared
            .into_iter()
            .enumerate()
            .map(|(offset, (values, geometry_wkb_hex))| LoadRow {
                id: max_id + 1 + offset as i64,
                values,
                geometry_wkb_hex,
            });

        let mut report = LoadReport {
            table: table.to_string(),
            first_id: Some(max_id + 1),
            last_id: Some(max_id + total as i64),
            ..LoadReport::default()
        };
        let mut index = 0;
        loop {
            let chunk: Vec<LoadRow> = rows.by_ref().take(self.batch_size).collect();
            if chunk.is_empty() {
                break;
            }
            index += 1;
            let batch = LoadBatch {
                schema: db_schema.to_string(),
                table: table.to_string(),
                index,
                columns: columns.to_vec(),
                rows: chunk,
            };
            let written = tx.insert(&batch).await.map_err(|e| LoadError::Batch {
                batch: index,
                message: e.to_string(),
            })?;
            tracing::debug!("Load: batch {} wrote {} row(s)", index, written);
            report.rows += batch.rows.len();
            report.batches = index;
        }
        Ok(report)
    }
}
