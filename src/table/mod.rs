//! # Column Registry
//!
//! Per-table column metadata: storage names, bind names, semantic types and
//! constraints. Built once at startup, read-only afterwards.
//!
//! The column set is the whitelist every caller-supplied field name is
//! checked against before it is interpolated into SQL.

mod column;
mod constraint;
mod record;

pub use column::{ColumnDescriptor, ColumnSet, ColumnType, ColumnTypes};
pub(crate) use column::identifier_pattern;
pub use constraint::Constraint;
pub use record::{declare, DeclaredColumns, Record, Row};

use serde_json::Value;

/// Primary key column
pub const ID: &str = "id";
/// Actor that created the row
pub const CREATOR: &str = "creator";
/// Actor that last changed the row
pub const REVISER: &str = "reviser";
/// Stamped with `now()` on insert
pub const CREATED_AT: &str = "created_at";
/// Stamped with `now()` on insert and update
pub const UPDATED_AT: &str = "updated_at";
/// Tenant scoping column
pub const TENANT_ID: &str = "tenant_id";

/// Format of Time columns as stored and compared
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Current time in storage format
pub fn now_string() -> String {
    chrono::Utc::now().format(TIME_FORMAT).to_string()
}

/// Parse an RFC 3339 time and re-render it in storage format
pub fn normalize_time(raw: &str) -> Option<String> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&chrono::Utc).format(TIME_FORMAT).to_string())
}

/// Whether a value counts as "not set" in a payload
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_blank() {
        for blank in [
            json!(null),
            json!(""),
            json!(false),
            json!(0),
            json!(0.0),
            json!([]),
            json!({}),
        ] {
            assert!(is_blank(&blank), "{} should be blank", blank);
        }
        for set in [
            json!("x"),
            json!(true),
            json!(1),
            json!(-0.5),
            json!([0]),
            json!({"a": null}),
        ] {
            assert!(!is_blank(&set), "{} should not be blank", set);
        }
    }

    #[test]
    fn test_normalize_time() {
        assert_eq!(
            normalize_time("2024-01-01T08:00:00+08:00").as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        assert_eq!(
            normalize_time("2024-01-01T00:00:00Z").as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        assert!(normalize_time("2024-01-01 00:00:00").is_none());
        assert!(normalize_time(&now_string()).is_some());
    }
}
