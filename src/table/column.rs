//! Column descriptors and column sets
//!
//! A `ColumnSet` is the whitelist and type map of one storage table. It is
//! declared once, merged from base and extension descriptors, and read-only
//! afterwards.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::constraint::Constraint;
use super::{CREATED_AT, ID, UPDATED_AT};
use crate::binds::placeholder_base;
use crate::errors::{DalError, DalResult};

/// Semantic type of a column, used for filter value checks and row decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Text
    String,
    /// Integer or floating point
    Numeric,
    /// Stored as 0/1
    Boolean,
    /// RFC 3339 text
    Time,
    /// JSON document stored as text
    Json,
}

impl ColumnType {
    /// Returns the type name for error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Numeric => "numeric",
            ColumnType::Boolean => "boolean",
            ColumnType::Time => "time",
            ColumnType::Json => "json",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Field name to semantic type, consumed by the filter compiler
pub type ColumnTypes = BTreeMap<String, ColumnType>;

/// One declared column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Column name in storage
    pub storage_name: String,

    /// Name in the record's serialized form; dotted for embedded sub-records
    pub bind_name: String,

    /// Semantic type
    pub column_type: ColumnType,

    /// Declarative constraints checked by the record validation hooks
    pub constraint: Constraint,
}

impl ColumnDescriptor {
    /// Create a column whose bind name equals its storage name
    pub fn new(storage_name: impl Into<String>, column_type: ColumnType) -> Self {
        let storage_name = storage_name.into();
        Self {
            bind_name: storage_name.clone(),
            storage_name,
            column_type,
            constraint: Constraint::default(),
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::String)
    }

    pub fn numeric(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Numeric)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Boolean)
    }

    pub fn time(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Time)
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Json)
    }

    /// Bind under a different name than the storage column
    pub fn bind_as(mut self, bind_name: impl Into<String>) -> Self {
        self.bind_name = bind_name.into();
        self
    }

    /// Must be non-blank on insert
    pub fn required(mut self) -> Self {
        self.constraint.required = true;
        self
    }

    /// Maximum character length of a string value
    pub fn max_len(mut self, max_len: usize) -> Self {
        self.constraint.max_len = Some(max_len);
        self
    }

    /// Must be blank in update payloads
    pub fn immutable(mut self) -> Self {
        self.constraint.immutable = true;
        self
    }

    /// Placeholder name used in INSERT/UPDATE statements
    pub fn placeholder(&self) -> String {
        placeholder_base(&self.bind_name)
    }

    /// Whether this column is stamped by the store rather than bound
    pub fn is_now_stamped(&self) -> bool {
        self.storage_name == CREATED_AT || self.storage_name == UPDATED_AT
    }
}

/// Ordered, deduplicated columns of one table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSet {
    descriptors: Vec<ColumnDescriptor>,
}

impl ColumnSet {
    /// Build a set from declarations
    pub fn new(descriptors: impl IntoIterator<Item = ColumnDescriptor>) -> DalResult<Self> {
        Self::merge(None, descriptors)
    }

    /// Merge extension descriptors onto an optional base set.
    ///
    /// Declaration order is kept. A storage name declared twice is a
    /// configuration bug and fails the merge.
    pub fn merge(
        base: Option<&ColumnSet>,
        descriptors: impl IntoIterator<Item = ColumnDescriptor>,
    ) -> DalResult<Self> {
        let pattern = identifier_pattern()?;
        let mut merged = base.map(|b| b.descriptors.clone()).unwrap_or_default();
        let mut seen: HashSet<String> = merged.iter().map(|d| d.storage_name.clone()).collect();

        for descriptor in descriptors {
            if !pattern.is_match(&descriptor.storage_name) {
                return Err(DalError::internal(format!(
                    "invalid storage column name: {:?}",
                    descriptor.storage_name
                )));
            }
            if !descriptor.bind_name.split('.').all(|seg| pattern.is_match(seg)) {
                return Err(DalError::internal(format!(
                    "invalid bind name: {:?}",
                    descriptor.bind_name
                )));
            }
            if !seen.insert(descriptor.storage_name.clone()) {
                return Err(DalError::internal(format!(
                    "duplicate column: {}",
                    descriptor.storage_name
                )));
            }
            merged.push(descriptor);
        }

        Ok(Self { descriptors: merged })
    }

    /// Re-bind every column under `prefix.` for an embedded sub-record
    pub fn with_prefix(&self, prefix: &str) -> DalResult<Self> {
        let rebound = self.descriptors.iter().map(|d| {
            let mut d = d.clone();
            d.bind_name = format!("{}.{}", prefix, d.bind_name);
            d
        });
        Self::new(rebound)
    }

    pub fn descriptors(&self) -> &[ColumnDescriptor] {
        &self.descriptors
    }

    pub fn get(&self, storage_name: &str) -> Option<&ColumnDescriptor> {
        self.descriptors.iter().find(|d| d.storage_name == storage_name)
    }

    pub fn has(&self, storage_name: &str) -> bool {
        self.get(storage_name).is_some()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Field to type map for whitelist and value checks
    pub fn types(&self) -> ColumnTypes {
        self.descriptors
            .iter()
            .map(|d| (d.storage_name.clone(), d.column_type))
            .collect()
    }

    /// Columns written by an INSERT, optionally without the primary id
    pub fn insert_columns(&self, include_id: bool) -> impl Iterator<Item = &ColumnDescriptor> {
        self.descriptors
            .iter()
            .filter(move |d| include_id || d.storage_name != ID)
    }

    /// `id, name, ...` for an INSERT column list
    pub fn insert_columns_expr(&self, include_id: bool) -> String {
        self.insert_columns(include_id)
            .map(|d| d.storage_name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `:id, :name, ..., now(), now()` for a single-row INSERT
    pub fn insert_values_expr(&self, include_id: bool) -> String {
        self.insert_columns(include_id)
            .map(|d| {
                if d.is_now_stamped() {
                    "now()".to_string()
                } else {
                    format!(":{}", d.placeholder())
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// SELECT list for all columns or a subset of storage names.
    ///
    /// Columns whose bind name differs from the storage name are aliased,
    /// e.g. `vendor AS 'spec.vendor'`.
    pub fn select_expr(&self, fields: &[String]) -> DalResult<String> {
        let selected: Vec<&ColumnDescriptor> = if fields.is_empty() {
            self.descriptors.iter().collect()
        } else {
            fields
                .iter()
                .map(|f| {
                    self.get(f).ok_or_else(|| {
                        DalError::invalid_parameter(format!("unknown select field: {}", f))
                    })
                })
                .collect::<DalResult<_>>()?
        };

        Ok(selected
            .iter()
            .map(|d| {
                if d.bind_name == d.storage_name {
                    d.storage_name.clone()
                } else {
                    format!("{} AS '{}'", d.storage_name, d.bind_name)
                }
            })
            .collect::<Vec<_>>()
            .join(", "))
    }
}

/// Pattern every storage name and bind-name segment must match
pub(crate) fn identifier_pattern() -> DalResult<&'static Regex> {
    static PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$"))
        .as_ref()
        .map_err(|e| DalError::internal(format!("identifier pattern: {}", e)))
}
