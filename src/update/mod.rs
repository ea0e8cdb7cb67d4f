//! # Update Compiler
//!
//! Turns a partially populated record into the SET clause of an UPDATE.
//!
//! A column is written when the caller marked it blanked (clear it even
//! though its value is empty) or when its value is non-blank. Ignored columns
//! are never written, whatever their value. Immutable columns can not be
//! blanked. `updated_at = now()` is always appended when the table declares
//! it.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::binds::Binds;
use crate::errors::{DalError, DalResult};
use crate::table::{
    is_blank, ColumnSet, Row, CREATED_AT, CREATOR, ID, TENANT_ID, UPDATED_AT,
};

/// Per-call column inclusion rules, by storage name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldOptions {
    blanked: BTreeSet<String>,
    ignored: BTreeSet<String>,
}

impl Default for FieldOptions {
    /// Ignores the primary key, creator, timestamps and tenant
    fn default() -> Self {
        Self::new().add_ignored_fields([ID, CREATOR, CREATED_AT, UPDATED_AT, TENANT_ID])
    }
}

impl FieldOptions {
    /// Options that ignore nothing
    pub fn new() -> Self {
        Self {
            blanked: BTreeSet::new(),
            ignored: BTreeSet::new(),
        }
    }

    /// Columns to write even when their value is blank
    pub fn add_blanked_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blanked.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Columns never written
    pub fn add_ignored_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn is_blanked(&self, field: &str) -> bool {
        self.blanked.contains(field)
    }

    pub fn is_ignored(&self, field: &str) -> bool {
        self.ignored.contains(field)
    }
}

/// Compiled assignments without the `SET` keyword
#[derive(Debug, Clone, PartialEq)]
pub struct SetClause {
    expr: String,
    binds: Binds,
}

impl SetClause {
    /// Assignment list, e.g. `name = :name, updated_at = now()`
    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn binds(&self) -> &Binds {
        &self.binds
    }

    pub fn into_parts(self) -> (String, Binds) {
        (self.expr, self.binds)
    }

    /// `SET <expr>`
    pub fn sql(&self) -> String {
        format!("SET {}", self.expr)
    }
}

/// Compile the SET clause for a record
pub fn rearrange<R: Serialize>(
    columns: &ColumnSet,
    record: &R,
    opts: &FieldOptions,
) -> DalResult<SetClause> {
    rearrange_row(columns, &columns.encode(record)?, opts)
}

/// Compile the SET clause for an already encoded row
pub fn rearrange_row(columns: &ColumnSet, row: &Row, opts: &FieldOptions) -> DalResult<SetClause> {
    if let Some(unknown) = opts.blanked.iter().find(|f| !columns.has(f)) {
        return Err(DalError::invalid_parameter(format!(
            "blanked field {} is not a column",
            unknown
        )));
    }
    if let Some(frozen) = opts.blanked.iter().find(|f| {
        !opts.is_ignored(f) && columns.get(f).is_some_and(|d| d.constraint.immutable)
    }) {
        return Err(DalError::validation(format!("{} can not be updated", frozen)));
    }

    let mut binds = Binds::new();
    let mut assignments = Vec::new();

    for d in columns.descriptors() {
        if opts.is_ignored(&d.storage_name) || d.storage_name == UPDATED_AT {
            continue;
        }

        let value = row.get(&d.bind_name).cloned().unwrap_or_default();
        if !opts.is_blanked(&d.storage_name) && is_blank(&value) {
            continue;
        }

        let name = binds.bind(&d.placeholder(), value);
        assignments.push(format!("{} = :{}", d.storage_name, name));
    }

    if assignments.is_empty() {
        return Err(DalError::invalid_parameter(
            "no field to update, all fields are blank or ignored",
        ));
    }

    if columns.has(UPDATED_AT) {
        assignments.push(format!("{} = now()", UPDATED_AT));
    }

    Ok(SetClause {
        expr: assignments.join(", "),
        binds,
    })
}
