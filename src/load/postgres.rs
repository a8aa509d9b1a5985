use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Transaction};

use super::{
    Destination, GEOM_COLUMN, ID_COLUMN, LoadBatch, LoadColumn, LoadTransaction, SRID,
    qualified_name, quote_ident,
};
use crate::error::LoadError;
use crate::record::Value;
use crate::validate::{CastRule, DestinationColumn, DestinationSchema};

type Param = Box<dyn ToSql + Sync + Send>;

const DESCRIBE_SQL: &str = "SELECT column_name::text, data_type::text, udt_name::text, is_nullable::text \
     FROM information_schema.columns \
     WHERE table_schema = $1 AND table_name = $2 \
     ORDER BY ordinal_position";

/// PostGIS-enabled PostgreSQL reached over a single client connection.
pub struct PostgresDestination {
    client: Client,
}

impl PostgresDestination {
    pub async fn connect(url: &str) -> Result<Self, LoadError> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Load: connection error: {}", e);
            }
        });
        tracing::debug!("Load: connected to database");
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Destination for PostgresDestination {
    async fn describe(
        &mut self,
        db_schema: &str,
        table: &str,
    ) -> Result<DestinationSchema, LoadError> {
        let rows = self.client.query(DESCRIBE_SQL, &[&db_schema, &table]).await?;
        let columns = rows
            .iter()
            .map(|row| {
                let nullable: String = row.get(3);
                DestinationColumn {
                    name: row.get(0),
                    data_type: row.get(1),
                    udt_name: row.get(2),
                    nullable: nullable.eq_ignore_ascii_case("YES"),
                }
            })
            .collect();
        Ok(DestinationSchema {
            table: table.to_string(),
            columns,
        })
    }

    async fn begin<'a>(&'a mut self) -> Result<Box<dyn LoadTransaction + 'a>, LoadError> {
        let tx = self.client.transaction().await?;
        Ok(Box::new(PostgresTransaction { tx }))
    }
}

struct PostgresTransaction<'a> {
    tx: Transaction<'a>,
}

#[async_trait]
impl<'a> LoadTransaction for PostgresTransaction<'a> {
    async fn max_id(&mut self, db_schema: &str, table: &str) -> Result<i64, LoadError> {
        let sql = format!(
            "SELECT COALESCE(MAX({}), 0)::int8 FROM {}",
            quote_ident(ID_COLUMN),
            qualified_name(db_schema, table)
        );
        let row = self.tx.query_one(&sql, &[]).await?;
        Ok(row.get(0))
    }

    async fn insert(&mut self, batch: &LoadBatch) -> Result<u64, LoadError> {
        let (sql, params) = insert_statement(batch);
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        Ok(self.tx.execute(&sql, &refs).await?)
    }

    async fn commit(self: Box<Self>) -> Result<(), LoadError> {
        Ok(self.tx.commit().await?)
    }

    async fn rollback(self: Box<Self>) -> Result<(), LoadError> {
        Ok(self.tx.rollback().await?)
    }
}

/// Multi-row parameterised INSERT for one batch: `id`, the data columns, then `geom`.
fn insert_statement(batch: &LoadBatch) -> (String, Vec<Param>) {
    let mut names = vec![quote_ident(ID_COLUMN)];
    names.extend(batch.columns.iter().map(|c| quote_ident(&c.name)));
    names.push(quote_ident(GEOM_COLUMN));

    let width = batch.columns.len() + 2;
    let mut params: Vec<Param> = Vec::with_capacity(batch.rows.len() * width);
    let mut tuples = Vec::with_capacity(batch.rows.len());
    for row in &batch.rows {
        let mut slots = Vec::with_capacity(width);
        params.push(Box::new(row.id));
        slots.push(format!("${}::int8", params.len()));
        for (column, value) in batch.columns.iter().zip(&row.values) {
            params.push(param(column.rule, value));
            slots.push(placeholder(column, params.len()));
        }
        params.push(Box::new(row.geometry_wkb_hex.clone()));
        slots.push(format!(
            "ST_GeomFromWKB(decode(${}::text, 'hex'), {SRID})",
            params.len()
        ));
        tuples.push(format!("({})", slots.join(", ")));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified_name(&batch.schema, &batch.table),
        names.join(", "),
        tuples.join(", ")
    );
    (sql, params)
}

fn placeholder(column: &LoadColumn, n: usize) -> String {
    match column.rule {
        CastRule::SmallInt | CastRule::Integer | CastRule::BigInt => format!("${n}::int8"),
        CastRule::Float => format!("${n}::float8"),
        CastRule::Text => format!("${n}::text"),
        CastRule::Bool => format!("${n}::bool"),
        CastRule::Date => format!("${n}::date"),
        CastRule::Time | CastRule::TimeTz => format!("${n}::time"),
        CastRule::Timestamp => format!("${n}::timestamp"),
        CastRule::TimestampTz => format!("${n}::timestamptz"),
        CastRule::Passthrough => format!("CAST(${n}::text AS {})", quote_ident(&column.udt_name)),
    }
}

/// Bind a cast value as the Rust type its placeholder declares.
fn param(rule: CastRule, value: &Value) -> Param {
    match rule {
        CastRule::SmallInt | CastRule::Integer | CastRule::BigInt => Box::new(match value {
            Value::Int(n) => Some(*n),
            _ => None,
        }),
        CastRule::Float => Box::new(match value {
            Value::Float(f) if !f.is_nan() => Some(*f),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }),
        CastRule::Bool => Box::new(match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }),
        CastRule::Date => Box::new(match value {
            Value::Date(d) => Some(*d),
            _ => None,
        }),
        CastRule::Time | CastRule::TimeTz => Box::new(match value {
            Value::Time(t) => Some(*t),
            _ => None,
        }),
        CastRule::Timestamp => Box::new(match value {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }),
        CastRule::TimestampTz => Box::new(match value {
            Value::TimestampTz(ts) => Some(*ts),
            _ => None,
        }),
        CastRule::Text | CastRule::Passthrough => Box::new(value.to_text()),
    }
}
