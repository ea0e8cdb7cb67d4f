//! # Filter Operators
//!
//! Each operator knows which values it accepts and how it renders to a
//! parameterized SQL predicate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::binds::Binds;
use crate::errors::{DalError, DalResult};
use crate::table::normalize_time;

/// Filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    /// Equals
    #[serde(rename = "eq")]
    Equal,

    /// Not equals
    #[serde(rename = "neq")]
    NotEqual,

    /// Greater than
    #[serde(rename = "gt")]
    GreaterThan,

    /// Greater than or equal
    #[serde(rename = "gte")]
    GreaterThanEqual,

    /// Less than
    #[serde(rename = "lt")]
    LessThan,

    /// Less than or equal
    #[serde(rename = "lte")]
    LessThanEqual,

    /// Value in list
    #[serde(rename = "in")]
    In,

    /// Value not in list
    #[serde(rename = "nin")]
    NotIn,

    /// Substring match, case sensitive
    #[serde(rename = "cs")]
    ContainsSensitive,

    /// Substring match, case insensitive
    #[serde(rename = "cis")]
    ContainsInsensitive,

    /// Primary key greater than, for keyset pagination
    #[serde(rename = "id_gt")]
    IdGreaterThan,

    /// JSON sub-path equals
    #[serde(rename = "json_eq")]
    JsonEqual,

    /// JSON sub-path not equals
    #[serde(rename = "json_neq")]
    JsonNotEqual,

    /// JSON sub-path in list
    #[serde(rename = "json_in")]
    JsonIn,

    /// JSON array contains value
    #[serde(rename = "json_contains")]
    JsonContains,

    /// JSON array shares at least one value with list
    #[serde(rename = "json_overlaps")]
    JsonOverlaps,

    /// JSON array length equals
    #[serde(rename = "json_length")]
    JsonLength,

    /// JSON document has path
    #[serde(rename = "json_contains_path")]
    JsonContainsPath,

    /// JSON document lacks path
    #[serde(rename = "json_not_contains_path")]
    JsonNotContainsPath,
}

impl Operator {
    /// Get the operator's wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "eq",
            Operator::NotEqual => "neq",
            Operator::GreaterThan => "gt",
            Operator::GreaterThanEqual => "gte",
            Operator::LessThan => "lt",
            Operator::LessThanEqual => "lte",
            Operator::In => "in",
            Operator::NotIn => "nin",
            Operator::ContainsSensitive => "cs",
            Operator::ContainsInsensitive => "cis",
            Operator::IdGreaterThan => "id_gt",
            Operator::JsonEqual => "json_eq",
            Operator::JsonNotEqual => "json_neq",
            Operator::JsonIn => "json_in",
            Operator::JsonContains => "json_contains",
            Operator::JsonOverlaps => "json_overlaps",
            Operator::JsonLength => "json_length",
            Operator::JsonContainsPath => "json_contains_path",
            Operator::JsonNotContainsPath => "json_not_contains_path",
        }
    }

    /// Whether the value is compared against the field's own type.
    ///
    /// Length and path operators take a number or a path instead.
    pub fn compares_field_value(&self) -> bool {
        !matches!(
            self,
            Operator::JsonLength | Operator::JsonContainsPath | Operator::JsonNotContainsPath
        )
    }

    /// Operators that only make sense on a JSON sub-path (`extension.zone`)
    fn requires_sub_path(&self) -> bool {
        matches!(
            self,
            Operator::JsonEqual | Operator::JsonNotEqual | Operator::JsonIn
        )
    }

    /// Operators addressing a whole JSON column by its path argument
    fn forbids_sub_path(&self) -> bool {
        matches!(
            self,
            Operator::JsonContainsPath | Operator::JsonNotContainsPath
        )
    }

    /// Check the field shape and value against this operator
    pub fn validate(&self, field: &str, value: &Value, max_in_limit: usize) -> DalResult<()> {
        let dotted = field.contains('.');
        if self.requires_sub_path() && !dotted {
            return Err(DalError::invalid_parameter(format!(
                "operator {} requires a json sub-path field, got {}",
                self.as_str(),
                field
            )));
        }
        if self.forbids_sub_path() && dotted {
            return Err(DalError::invalid_parameter(format!(
                "operator {} requires a json column, got {}",
                self.as_str(),
                field
            )));
        }

        match self {
            Operator::Equal
            | Operator::NotEqual
            | Operator::JsonEqual
            | Operator::JsonNotEqual
            | Operator::JsonContains => expect_basic(self, value),
            Operator::GreaterThan
            | Operator::GreaterThanEqual
            | Operator::LessThan
            | Operator::LessThanEqual => match value {
                Value::Number(_) => Ok(()),
                Value::String(s) if normalize_time(s).is_some() => Ok(()),
                _ => Err(DalError::invalid_parameter(format!(
                    "{} value should be a numeric or a time",
                    self.as_str()
                ))),
            },
            Operator::In | Operator::NotIn | Operator::JsonIn | Operator::JsonOverlaps => {
                expect_list(self, value, max_in_limit)
            }
            Operator::ContainsSensitive | Operator::ContainsInsensitive => match value {
                Value::String(s) if !s.is_empty() => Ok(()),
                _ => Err(DalError::invalid_parameter(format!(
                    "{} value should be a non-empty string",
                    self.as_str()
                ))),
            },
            Operator::IdGreaterThan => {
                if field != crate::table::ID {
                    return Err(DalError::invalid_parameter(format!(
                        "operator {} only supports the id field",
                        self.as_str()
                    )));
                }
                match value {
                    Value::String(s) if !s.is_empty() => Ok(()),
                    _ => Err(DalError::invalid_parameter("id_gt value should be an id string")),
                }
            }
            Operator::JsonLength => match value.as_u64() {
                Some(_) => Ok(()),
                None => Err(DalError::invalid_parameter(
                    "json_length value should be a non-negative integer",
                )),
            },
            Operator::JsonContainsPath | Operator::JsonNotContainsPath => match value {
                Value::String(s) if s.starts_with('$') => Ok(()),
                _ => Err(DalError::invalid_parameter(format!(
                    "{} value should be a json path like $.key",
                    self.as_str()
                ))),
            },
        }
    }

    /// Render `field op value` and bind the value.
    ///
    /// `field` must already be whitelisted; `time` marks Time columns whose
    /// values are normalized to storage format.
    pub(crate) fn render(
        &self,
        field: &str,
        value: &Value,
        time: bool,
        binds: &mut Binds,
    ) -> DalResult<String> {
        let column = column_ref(field);
        let value = if time { normalize_value(value) } else { value.clone() };

        let sql = match self {
            Operator::Equal | Operator::JsonEqual => {
                format!("{} = :{}", column, binds.bind(field, value))
            }
            Operator::NotEqual | Operator::JsonNotEqual => {
                format!("{} != :{}", column, binds.bind(field, value))
            }
            Operator::GreaterThan | Operator::IdGreaterThan => {
                format!("{} > :{}", column, binds.bind(field, value))
            }
            Operator::GreaterThanEqual => format!("{} >= :{}", column, binds.bind(field, value)),
            Operator::LessThan => format!("{} < :{}", column, binds.bind(field, value)),
            Operator::LessThanEqual => format!("{} <= :{}", column, binds.bind(field, value)),
            Operator::In | Operator::JsonIn => {
                format!("{} IN ({})", column, bind_list(field, &value, binds))
            }
            Operator::NotIn => format!("{} NOT IN ({})", column, bind_list(field, &value, binds)),
            Operator::ContainsSensitive => {
                let pattern = like_pattern(value.as_str().unwrap_or_default());
                format!(
                    "{} LIKE :{} ESCAPE '\\'",
                    column,
                    binds.bind(field, Value::String(pattern))
                )
            }
            Operator::ContainsInsensitive => {
                let pattern = like_pattern(&value.as_str().unwrap_or_default().to_lowercase());
                format!(
                    "LOWER({}) LIKE :{} ESCAPE '\\'",
                    column,
                    binds.bind(field, Value::String(pattern))
                )
            }
            Operator::JsonContains => format!(
                "EXISTS (SELECT 1 FROM {} WHERE value = :{})",
                json_each(field),
                binds.bind(field, value)
            ),
            Operator::JsonOverlaps => format!(
                "EXISTS (SELECT 1 FROM {} WHERE value IN ({}))",
                json_each(field),
                bind_list(field, &value, binds)
            ),
            Operator::JsonLength => {
                let (root, path) = split_json_field(field);
                let length = match path {
                    Some(path) => format!("json_array_length({}, '{}')", root, path),
                    None => format!("json_array_length({})", root),
                };
                format!("{} = :{}", length, binds.bind(field, value))
            }
            Operator::JsonContainsPath => {
                format!("json_type({}, :{}) IS NOT NULL", column, binds.bind(field, value))
            }
            Operator::JsonNotContainsPath => {
                format!("json_type({}, :{}) IS NULL", column, binds.bind(field, value))
            }
        };

        Ok(sql)
    }
}

fn expect_basic(op: &Operator, value: &Value) -> DalResult<()> {
    if is_basic(value) {
        Ok(())
    } else {
        Err(DalError::invalid_parameter(format!(
            "{} value should be a string, numeric or boolean",
            op.as_str()
        )))
    }
}

fn expect_list(op: &Operator, value: &Value, max_in_limit: usize) -> DalResult<()> {
    let Value::Array(items) = value else {
        return Err(DalError::invalid_parameter(format!(
            "{} value should be an array",
            op.as_str()
        )));
    };
    if items.is_empty() {
        return Err(DalError::invalid_parameter(format!(
            "{} value can not be an empty array",
            op.as_str()
        )));
    }
    if items.len() > max_in_limit {
        return Err(DalError::invalid_parameter(format!(
            "{} value has {} elements, exceeds maximum {}",
            op.as_str(),
            items.len(),
            max_in_limit
        )));
    }
    if !items.iter().all(is_basic) {
        return Err(DalError::invalid_parameter(format!(
            "{} elements should be strings, numerics or booleans",
            op.as_str()
        )));
    }
    Ok(())
}

fn is_basic(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

fn normalize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(normalize_time(s).unwrap_or_else(|| s.clone())),
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        other => other.clone(),
    }
}

fn bind_list(field: &str, value: &Value, binds: &mut Binds) -> String {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|item| format!(":{}", binds.bind(field, item.clone())))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

fn like_pattern(raw: &str) -> String {
    let escaped = raw
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Split `extension.a.b` into `extension` and `$."a"."b"`
pub(crate) fn split_json_field(field: &str) -> (&str, Option<String>) {
    match field.split_once('.') {
        None => (field, None),
        Some((root, rest)) => {
            let path = rest
                .split('.')
                .map(|seg| format!(".\"{}\"", seg))
                .collect::<String>();
            (root, Some(format!("${}", path)))
        }
    }
}

/// SQL reference for a field: plain column or JSON extraction
pub(crate) fn column_ref(field: &str) -> String {
    match split_json_field(field) {
        (root, None) => root.to_string(),
        (root, Some(path)) => format!("{}->>'{}'", root, path),
    }
}

fn json_each(field: &str) -> String {
    match split_json_field(field) {
        (root, None) => format!("json_each({})", root),
        (root, Some(path)) => format!("json_each({}, '{}')", root, path),
    }
}
