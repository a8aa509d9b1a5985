//! In-memory tabular-geometry working set shared by every stage.
//!
//! A [`RecordSet`] keeps its geometry outside the named columns, so no stage
//! can drop or rename it. Stages take a set by value and hand a new one back.

mod value;

pub use value::Value;

use geo_types::Geometry;
use indexmap::IndexMap;

/// Coordinate reference system of every record set produced here.
pub const CRS: &str = "EPSG:4326";

/// Reserved column name used for the geometry in reports and previews.
pub const GEOMETRY_COLUMN: &str = "geometry";

/// Free-form key/value pairs of a feature, keys lowercased on insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeMap(IndexMap<String, Option<String>>);

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pair, replacing the value of an existing key in place.
    pub fn insert(&mut self, key: &str, value: Option<String>) {
        self.0.insert(key.to_lowercase(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Option<String>> {
        self.0.get(&key.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }
}

/// One parsed feature.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributedGeometry {
    pub name: Option<String>,
    pub geometry: Geometry<f64>,
    pub elevation: Option<f64>,
    pub timestamp_raw: Option<String>,
    pub attributes: AttributeMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub geometry: Geometry<f64>,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Default for RecordSet {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl RecordSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn crs(&self) -> &'static str {
        CRS
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Append a row; short rows are padded with `Value::Null`, long ones truncated.
    pub fn push(&mut self, geometry: Geometry<f64>, mut values: Vec<Value>) {
        values.resize(self.columns.len(), Value::Null);
        self.rows.push(Row { geometry, values });
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row).map(|r| &r.values[index])
    }

    /// All values of one column in row order.
    pub fn column_values(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r.values[index]).collect())
    }

    /// Add a column filled with `fill`, or overwrite an existing one with it.
    pub fn set_column(&mut self, name: &str, fill: Vec<Value>) {
        debug_assert_eq!(fill.len(), self.rows.len());
        match self.column_index(name) {
            Some(index) => {
                for (row, value) in self.rows.iter_mut().zip(fill) {
                    row.values[index] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(fill) {
                    row.values.push(value);
                }
            }
        }
    }

    pub fn add_null_column(&mut self, name: &str) {
        let fill = vec![Value::Null; self.rows.len()];
        self.set_column(name, fill);
    }

    /// Replace every value of `name` through `f`. Returns false if the column is absent.
    pub fn map_column<F>(&mut self, name: &str, mut f: F) -> bool
    where
        F: FnMut(Value) -> Value,
    {
        let Some(index) = self.column_index(name) else {
            return false;
        };
        for row in &mut self.rows {
            let value = std::mem::take(&mut row.values[index]);
            row.values[index] = f(value);
        }
        true
    }

    pub fn drop_column(&mut self, name: &str) -> bool {
        let Some(index) = self.column_index(name) else {
            return false;
        };
        self.columns.remove(index);
        for row in &mut self.rows {
            row.values.remove(index);
        }
        true
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        match self.column_index(from) {
            Some(index) => {
                self.columns[index] = to.to_string();
                true
            }
            None => false,
        }
    }

    /// Project onto `names` in the given order; names not present become null columns.
    pub fn select(self, names: &[String]) -> RecordSet {
        let plan: Vec<(String, Option<String>)> =
            names.iter().map(|n| (n.clone(), Some(n.clone()))).collect();
        self.project(&plan)
    }

    /// Build a set whose columns are the plan's output names, each fed by the
    /// named input column, or null-filled when the source is `None` or absent.
    pub fn project(self, plan: &[(String, Option<String>)]) -> RecordSet {
        let indices: Vec<Option<usize>> = plan
            .iter()
            .map(|(_, source)| source.as_deref().and_then(|s| self.column_index(s)))
            .collect();
        let rows = self
            .rows
            .into_iter()
            .map(|mut row| Row {
                values: indices
                    .iter()
                    .map(|i| i.map_or(Value::Null, |i| std::mem::take(&mut row.values[i])))
                    .collect(),
                geometry: row.geometry,
            })
            .collect();
        RecordSet {
            columns: plan.iter().map(|(name, _)| name.clone()).collect(),
            rows,
        }
    }

    /// Column names including the reserved geometry column, as reported to users.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = self.columns.clone();
        names.push(GEOMETRY_COLUMN.to_string());
        names
    }
}

impl From<Vec<AttributedGeometry>> for RecordSet {
    /// Lay features out as `name`, `elevation`, `when`, then attribute keys in
    /// first-seen order. An attribute that shares a fixed column's name replaces it.
    fn from(features: Vec<AttributedGeometry>) -> Self {
        let mut columns: IndexMap<String, ()> = IndexMap::new();
        for fixed in ["name", "elevation", crate::coerce::TIMESTAMP_COLUMN] {
            columns.insert(fixed.to_string(), ());
        }
        for feature in &features {
            for (key, _) in feature.attributes.iter() {
                columns.entry(key.to_string()).or_insert(());
            }
        }
        let names: Vec<String> = columns.into_keys().collect();

        let mut set = RecordSet::new(names);
        for feature in features {
            let mut values = vec![
                feature.name.map_or(Value::Null, Value::Text),
                feature.elevation.map_or(Value::Null, Value::Float),
                feature.timestamp_raw.map_or(Value::Null, Value::Text),
            ];
            values.resize(set.columns.len(), Value::Null);
            for (key, value) in feature.attributes.iter() {
                if let Some(index) = set.column_index(key) {
                    values[index] = value.map_or(Value::Null, |v| Value::Text(v.to_string()));
                }
            }
            set.rows.push(Row {
                geometry: feature.geometry,
                values,
            });
        }
        set
    }
}
