use async_trait::async_trait;
use std::collections::BTreeMap;

use super::{Destination, LoadBatch, LoadTransaction};
use crate::error::LoadError;
use crate::record::Value;
use crate::validate::DestinationSchema;

/// A committed row of an in-memory table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub id: i64,
    pub values: BTreeMap<String, Value>,
    pub geometry_wkb_hex: String,
}

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: DestinationSchema,
    rows: Vec<StoredRow>,
}

/// In-process destination. Enforces column existence and NOT NULL like a
/// database would, and can be told to fail a given batch.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    tables: BTreeMap<(String, String), MemoryTable>,
    fail_on_batch: Option<usize>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, db_schema: &str, schema: DestinationSchema) -> Self {
        let key = (db_schema.to_string(), schema.table.clone());
        self.tables.insert(
            key,
            MemoryTable {
                schema,
                rows: Vec::new(),
            },
        );
        self
    }

    /// Make the `batch`-th insert (1-based) of every transaction fail.
    pub fn fail_on_batch(mut self, batch: usize) -> Self {
        self.fail_on_batch = Some(batch);
        self
    }

    /// Add an already committed row with the given id and no values.
    pub fn seed(&mut self, db_schema: &str, table: &str, id: i64) {
        if let Some(t) = self.table_mut(db_schema, table) {
            t.rows.push(StoredRow {
                id,
                values: BTreeMap::new(),
                geometry_wkb_hex: String::new(),
            });
        }
    }

    pub fn rows(&self, db_schema: &str, table: &str) -> &[StoredRow] {
        self.tables
            .get(&(db_schema.to_string(), table.to_string()))
            .map(|t| t.rows.as_slice())
            .unwrap_or_default()
    }

    fn table_mut(&mut self, db_schema: &str, table: &str) -> Option<&mut MemoryTable> {
        self.tables
            .get_mut(&(db_schema.to_string(), table.to_string()))
    }
}

#[async_trait]
impl Destination for MemoryDestination {
    async fn describe(
        &mut self,
        db_schema: &str,
        table: &str,
    ) -> Result<DestinationSchema, LoadError> {
        Ok(self
            .tables
            .get(&(db_schema.to_string(), table.to_string()))
            .map(|t| t.schema.clone())
            .unwrap_or_else(|| DestinationSchema {
                table: table.to_string(),
                columns: Vec::new(),
            }))
    }

    async fn begin<'a>(&'a mut self) -> Result<Box<dyn LoadTransaction + 'a>, LoadError> {
        Ok(Box::new(MemoryTransaction {
            destination: self,
            staged: Vec::new(),
            batches: 0,
        }))
    }
}

struct MemoryTransaction<'a> {
    destination: &'a mut MemoryDestination,
    staged: Vec<((String, String), StoredRow)>,
    batches: usize,
}

#[async_trait]
impl<'a> LoadTransaction for MemoryTransaction<'a> {
    async fn max_id(&mut self, db_schema: &str, table: &str) -> Result<i64, LoadError> {
        let key = (db_schema.to_string(), table.to_string());
        let committed = self
            .destination
            .tables
            .get(&key)
            .ok_or_else(|| LoadError::Destination(format!("relation '{table}' does not exist")))?
            .rows
            .iter()
            .map(|r| r.id);
        let staged = self
            .staged
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, r)| r.id);
        Ok(committed.chain(staged).max().unwrap_or(0))
    }

    async fn insert(&mut self, batch: &LoadBatch) -> Result<u64, LoadError> {
        self.batches += 1;
        if self.destination.fail_on_batch == Some(self.batches) {
            return Err(LoadError::Destination(format!(
                "injected failure on batch {}",
                self.batches
            )));
        }
        let key = (batch.schema.clone(), batch.table.clone());
        let table = self.destination.tables.get(&key).ok_or_else(|| {
            LoadError::Destination(format!("relation '{}' does not exist", batch.table))
        })?;
        for column in &batch.columns {
            if table.schema.column(&column.name).is_none() {
                return Err(LoadError::Destination(format!(
                    "column '{}' of relation '{}' does not exist",
                    column.name, batch.table
                )));
            }
        }

        let mut staged = Vec::with_capacity(batch.rows.len());
        for row in &batch.rows {
            let values: BTreeMap<String, Value> = batch
                .columns
                .iter()
                .map(|c| c.name.clone())
                .zip(row.values.iter().cloned())
                .collect();
            for column in table.schema.required().filter(|c| !c.nullable) {
                if values.get(&column.name).is_none_or(Value::is_null) {
                    return Err(LoadError::Destination(format!(
                        "null value in column '{}' violates not-null constraint",
                        column.name
                    )));
                }
            }
            staged.push((
                key.clone(),
                StoredRow {
                    id: row.id,
                    values,
                    geometry_wkb_hex: row.geometry_wkb_hex.clone(),
                },
            ));
        }
        let written = staged.len() as u64;
        self.staged.extend(staged);
        Ok(written)
    }

    async fn commit(self: Box<Self>) -> Result<(), LoadError> {
        let this = *self;
        for (key, row) in this.staged {
            if let Some(table) = this.destination.tables.get_mut(&key) {
                table.rows.push(row);
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LoadError> {
        tracing::debug!("Load: discarding {} staged row(s)", self.staged.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::{LoadColumn, LoadRow};
    use crate::validate::{CastRule, DestinationColumn};

    fn schema() -> DestinationSchema {
        DestinationSchema {
            table: "manejo".to_string(),
            columns: vec![
                DestinationColumn::new("id", "integer", false),
                DestinationColumn::new("especie", "text", false),
            ],
        }
    }

    fn batch(columns: &[&str], value: Value) -> LoadBatch {
        LoadBatch {
            schema: "public".to_string(),
            table: "manejo".to_string(),
            index: 1,
            columns: columns
                .iter()
                .map(|c| LoadColumn {
                    name: c.to_string(),
                    rule: CastRule::Text,
                    udt_name: "text".to_string(),
                })
                .collect(),
            rows: vec![LoadRow {
                id: 1,
                values: vec![value],
                geometry_wkb_hex: String::new(),
            }],
        }
    }

    #[tokio::test]
    async fn unknown_table_describes_as_empty() {
        let mut dest = MemoryDestination::new();
        let described = dest.describe("public", "manejo").await.unwrap();
        assert!(described.is_empty());
    }

    #[tokio::test]
    async fn rows_become_visible_only_on_commit() {
        let mut dest = MemoryDestination::new().with_table("public", schema());
        let mut tx = dest.begin().await.unwrap();
        tx.insert(&batch(&["especie"], Value::Text("pinus".into())))
            .await
            .unwrap();
        assert_eq!(tx.max_id("public", "manejo").await.unwrap(), 1);
        tx.commit().await.unwrap();
        assert_eq!(dest.rows("public", "manejo").len(), 1);

        let mut tx = dest.begin().await.unwrap();
        tx.insert(&batch(&["especie"], Value::Text("acacia".into())))
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(dest.rows("public", "manejo").len(), 1);
    }

    #[tokio::test]
    async fn enforces_not_null_and_known_columns() {
        let mut dest = MemoryDestination::new().with_table("public", schema());
        let mut tx = dest.begin().await.unwrap();
        let err = tx.insert(&batch(&["especie"], Value::Null)).await.unwrap_err();
        assert!(err.to_string().contains("not-null"));
        let err = tx
            .insert(&batch(&["bogus"], Value::Text("x".into())))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }
}
