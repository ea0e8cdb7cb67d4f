//! Statement model
//!
//! Statements stay structured until the store renders them, so modifiers
//! (tenant scoping) can add columns and predicates without parsing SQL.

use serde_json::Value;

use crate::binds::Binds;
use crate::errors::{DalError, DalResult};
use crate::filter::WhereClause;
use crate::table::{ColumnSet, Row};

/// Result column holding the group value of a grouped count
pub const GROUP_FIELD: &str = "group_field";

/// Result column holding a count
pub const COUNT_FIELD: &str = "count";

/// One INSERT column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertColumn {
    pub storage_name: String,
    pub placeholder: String,
    /// Rendered as `now()` instead of a bind
    pub now: bool,
}

/// Multi-row INSERT
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<InsertColumn>,
    /// Values keyed by placeholder
    pub rows: Vec<Row>,
}

impl Insert {
    /// INSERT over a column set, optionally leaving out the primary id
    pub fn new(table: impl Into<String>, columns: &ColumnSet, include_id: bool) -> Self {
        Self {
            table: table.into(),
            columns: columns
                .insert_columns(include_id)
                .map(|d| InsertColumn {
                    storage_name: d.storage_name.clone(),
                    placeholder: d.placeholder(),
                    now: d.is_now_stamped(),
                })
                .collect(),
            rows: Vec::new(),
        }
    }

    /// Add a row encoded by bind name
    pub fn push_row(&mut self, columns: &ColumnSet, row: &Row) {
        let values = columns
            .descriptors()
            .iter()
            .filter_map(|d| {
                row.get(&d.bind_name)
                    .map(|v| (d.placeholder(), v.clone()))
            })
            .collect();
        self.rows.push(values);
    }

    /// Write `value` into `storage_name` for every row, adding the column
    /// if the table did not declare it
    pub fn set_column(&mut self, storage_name: &str, value: Value) {
        let placeholder = match self.columns.iter().find(|c| c.storage_name == storage_name) {
            Some(column) => column.placeholder.clone(),
            None => {
                self.columns.push(InsertColumn {
                    storage_name: storage_name.to_string(),
                    placeholder: storage_name.to_string(),
                    now: false,
                });
                storage_name.to_string()
            }
        };

        for row in &mut self.rows {
            row.insert(placeholder.clone(), value.clone());
        }
    }
}

/// SELECT with optional page tail
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub fields: String,
    pub filter: WhereClause,
    /// `ORDER BY ... LIMIT ... OFFSET ...`
    pub tail: String,
}

/// COUNT, optionally grouped by one column
#[derive(Debug, Clone, PartialEq)]
pub struct Count {
    pub table: String,
    pub filter: WhereClause,
    pub group_by: Option<String>,
}

/// UPDATE; the filter's binds also hold the SET values
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub set: String,
    pub filter: WhereClause,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub filter: WhereClause,
}

/// A statement ready for a modifier or the store
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Insert(Insert),
    Select(Select),
    Count(Count),
    Update(Update),
    Delete(Delete),
}

impl Statement {
    pub fn table(&self) -> &str {
        match self {
            Statement::Insert(s) => &s.table,
            Statement::Select(s) => &s.table,
            Statement::Count(s) => &s.table,
            Statement::Update(s) => &s.table,
            Statement::Delete(s) => &s.table,
        }
    }

    pub fn table_mut(&mut self) -> &mut String {
        match self {
            Statement::Insert(s) => &mut s.table,
            Statement::Select(s) => &mut s.table,
            Statement::Count(s) => &mut s.table,
            Statement::Update(s) => &mut s.table,
            Statement::Delete(s) => &mut s.table,
        }
    }

    /// WHERE clause of filtered statements
    pub fn filter_mut(&mut self) -> Option<&mut WhereClause> {
        match self {
            Statement::Insert(_) => None,
            Statement::Select(s) => Some(&mut s.filter),
            Statement::Count(s) => Some(&mut s.filter),
            Statement::Update(s) => Some(&mut s.filter),
            Statement::Delete(s) => Some(&mut s.filter),
        }
    }

    /// Rows the statement writes, for error context
    pub fn row_hint(&self) -> usize {
        match self {
            Statement::Insert(s) => s.rows.len(),
            _ => 0,
        }
    }

    /// Render SQL text and the binds it references
    pub fn render(&self) -> DalResult<(String, Binds)> {
        match self {
            Statement::Insert(s) => render_insert(s),
            Statement::Select(s) => Ok((
                join_sql([
                    format!("SELECT {} FROM {}", s.fields, s.table),
                    s.filter.sql(),
                    s.tail.clone(),
                ]),
                s.filter.binds().clone(),
            )),
            Statement::Count(s) => {
                let head = match &s.group_by {
                    Some(group) => format!(
                        "SELECT {} AS {}, COUNT(*) AS {} FROM {}",
                        group, GROUP_FIELD, COUNT_FIELD, s.table
                    ),
                    None => format!("SELECT COUNT(*) AS {} FROM {}", COUNT_FIELD, s.table),
                };
                let tail = s
                    .group_by
                    .as_ref()
                    .map(|group| format!("GROUP BY {}", group))
                    .unwrap_or_default();
                Ok((
                    join_sql([head, s.filter.sql(), tail]),
                    s.filter.binds().clone(),
                ))
            }
            Statement::Update(s) => Ok((
                join_sql([format!("UPDATE {} SET {}", s.table, s.set), s.filter.sql()]),
                s.filter.binds().clone(),
            )),
            Statement::Delete(s) => Ok((
                join_sql([format!("DELETE FROM {}", s.table), s.filter.sql()]),
                s.filter.binds().clone(),
            )),
        }
    }
}

fn render_insert(insert: &Insert) -> DalResult<(String, Binds)> {
    if insert.rows.is_empty() {
        return Err(DalError::invalid_parameter(format!(
            "insert into {} has no rows",
            insert.table
        )));
    }

    let mut binds = Binds::new();
    let values = insert
        .rows
        .iter()
        .map(|row| {
            let slots = insert
                .columns
                .iter()
                .map(|c| {
                    if c.now {
                        "now()".to_string()
                    } else {
                        let value = row.get(&c.placeholder).cloned().unwrap_or_default();
                        format!(":{}", binds.bind(&c.placeholder, value))
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", slots)
        })
        .collect::<Vec<_>>()
        .join(", ");

    let columns = insert
        .columns
        .iter()
        .map(|c| c.storage_name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    Ok((
        format!("INSERT INTO {} ({}) VALUES {}", insert.table, columns, values),
        binds,
    ))
}

fn join_sql<const N: usize>(parts: [String; N]) -> String {
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
