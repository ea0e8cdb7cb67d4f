//! Record <-> row mapping
//!
//! Records are plain serde types. Each record declares its columns once; rows
//! are JSON maps keyed by bind name, so the filter compiler and the store see
//! one flat shape regardless of how the record nests its sub-records.

use std::sync::OnceLock;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::column::{ColumnSet, ColumnType};
use crate::errors::{DalError, DalResult};

/// One row keyed by bind name
pub type Row = Map<String, Value>;

/// Storage slot for a record's lazily built column set
pub type DeclaredColumns = OnceLock<Result<ColumnSet, String>>;

/// Build a record's column set once and hand out the shared reference
pub fn declare(
    cell: &'static DeclaredColumns,
    init: impl FnOnce() -> DalResult<ColumnSet>,
) -> DalResult<&'static ColumnSet> {
    cell.get_or_init(|| init().map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| DalError::internal(format!("column declaration: {}", e)))
}

/// A record stored in one table
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Storage table name
    fn table_name() -> &'static str;

    /// Declared columns
    fn columns() -> DalResult<&'static ColumnSet>;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    fn cloud_id(&self) -> Option<&str> {
        None
    }

    fn name(&self) -> Option<&str> {
        None
    }

    /// JSON sub-paths callers may filter on, in addition to the columns
    fn extra_rule_fields() -> Vec<(String, ColumnType)> {
        Vec::new()
    }

    /// Checked before any insert statement is issued
    fn validate_insert(&self) -> DalResult<()> {
        let columns = Self::columns()?;
        columns.validate_insert(&columns.encode(self)?)
    }

    /// Checked before any update statement is issued
    fn validate_update(&self) -> DalResult<()> {
        let columns = Self::columns()?;
        columns.validate_update(&columns.encode(self)?)
    }

    /// Stored columns `validate_stored` needs to see, by storage name
    fn stored_check_fields() -> &'static [&'static str] {
        &[]
    }

    /// Checked against every row an update matched, inside the update
    /// transaction and before the UPDATE runs. `stored` is keyed by bind name.
    fn validate_stored(&self, _stored: &Row) -> DalResult<()> {
        Ok(())
    }
}

impl ColumnSet {
    /// Serialize a record into a row holding every declared column
    pub fn encode<R: Serialize>(&self, record: &R) -> DalResult<Row> {
        let value = serde_json::to_value(record)
            .map_err(|e| DalError::validation(format!("encode record: {}", e)))?;
        let Value::Object(object) = value else {
            return Err(DalError::internal("record must serialize to an object"));
        };

        let mut row = Row::new();
        for d in self.descriptors() {
            let value = lookup_path(&object, &d.bind_name)
                .cloned()
                .unwrap_or(Value::Null);
            row.insert(d.bind_name.clone(), value);
        }
        Ok(row)
    }

    /// Turn stored values back into their semantic JSON shape
    pub fn normalize(&self, row: Row) -> Row {
        row.into_iter()
            .map(|(key, value)| {
                let value = match self.descriptors().iter().find(|d| d.bind_name == key) {
                    Some(d) => from_storage(d.column_type, value),
                    None => value,
                };
                (key, value)
            })
            .collect()
    }

    /// Decode a stored row into a record
    pub fn decode<R: DeserializeOwned>(&self, row: Row) -> DalResult<R> {
        let mut root = Map::new();
        for (key, value) in self.normalize(row) {
            insert_path(&mut root, &key, value);
        }
        serde_json::from_value(Value::Object(root))
            .map_err(|e| DalError::internal(format!("decode row: {}", e)))
    }
}

fn from_storage(column_type: ColumnType, value: Value) -> Value {
    match (column_type, value) {
        (ColumnType::Boolean, Value::Number(n)) => Value::Bool(n.as_i64().unwrap_or(0) != 0),
        (ColumnType::Json, Value::String(text)) => {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        }
        (_, value) => value,
    }
}

fn lookup_path<'a>(object: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = object.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn insert_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            root.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = root
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                insert_path(child, rest, value);
            }
        }
    }
}
