//! Declarative column constraints
//!
//! Structural checks (required, length) and engine invariants (immutable)
//! live in one place per column instead of per-table validation functions.

use serde_json::Value;

use super::column::ColumnSet;
use super::is_blank;
use super::record::Row;
use crate::errors::{DalError, DalResult};

/// Constraints attached to one column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Constraint {
    /// Non-blank on insert
    pub required: bool,

    /// Maximum string length in characters
    pub max_len: Option<usize>,

    /// Blank in every update payload
    pub immutable: bool,
}

impl ColumnSet {
    /// Check an encoded record about to be inserted.
    ///
    /// `id`, `creator`, `reviser` and the timestamps are filled by the engine
    /// and are not expected from the caller.
    pub fn validate_insert(&self, row: &Row) -> DalResult<()> {
        for d in self.descriptors() {
            let value = row.get(&d.bind_name).unwrap_or(&Value::Null);
            if d.constraint.required && is_blank(value) {
                return Err(DalError::validation(format!("{} is required", d.bind_name)));
            }
            check_len(&d.bind_name, d.constraint.max_len, value)?;
        }
        Ok(())
    }

    /// Check an encoded update payload
    pub fn validate_update(&self, row: &Row) -> DalResult<()> {
        for d in self.descriptors() {
            let value = row.get(&d.bind_name).unwrap_or(&Value::Null);
            if d.constraint.immutable && !is_blank(value) {
                return Err(DalError::validation(format!(
                    "{} can not be updated",
                    d.bind_name
                )));
            }
            check_len(&d.bind_name, d.constraint.max_len, value)?;
        }
        Ok(())
    }
}

fn check_len(field: &str, max_len: Option<usize>, value: &Value) -> DalResult<()> {
    if let (Some(max), Value::String(s)) = (max_len, value) {
        if s.chars().count() > max {
            return Err(DalError::validation(format!(
                "{} exceeds max length {}",
                field, max
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnDescriptor;
    use serde_json::json;

    fn set() -> ColumnSet {
        ColumnSet::new([
            ColumnDescriptor::string("id"),
            ColumnDescriptor::string("name").required().max_len(5),
            ColumnDescriptor::string("vendor").required().immutable(),
            ColumnDescriptor::string("memo"),
        ])
        .unwrap()
    }

    fn row(v: Value) -> Row {
        match v {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_required_on_insert() {
        let set = set();
        assert!(set
            .validate_insert(&row(json!({"name": "a", "vendor": "aws"})))
            .is_ok());

        let err = set
            .validate_insert(&row(json!({"name": "", "vendor": "aws"})))
            .unwrap_err();
        assert!(matches!(err, DalError::ValidationFailed(_)));
        assert!(err.to_string().contains("name is required"));
    }

    #[test]
    fn test_max_len() {
        let err = set()
            .validate_insert(&row(json!({"name": "toolong", "vendor": "aws"})))
            .unwrap_err();
        assert!(err.to_string().contains("max length 5"));
    }

    #[test]
    fn test_immutable_on_update() {
        let set = set();
        assert!(set.validate_update(&row(json!({"memo": "x"}))).is_ok());

        let err = set
            .validate_update(&row(json!({"vendor": "gcp"})))
            .unwrap_err();
        assert!(err.to_string().contains("vendor can not be updated"));
    }
}
