//! Compile-time filter options
//!
//! `ExprOption` is the caller-facing whitelist. `SqlWhereOption` is trusted
//! policy: index priority plus crowned rules the caller cannot override.

use serde_json::Value;

use super::expression::{AtomRule, LogicOp, Rule};
use crate::config::DalConfig;
use crate::errors::{DalError, DalResult};
use crate::table::{ColumnSet, ColumnType, ColumnTypes};

/// Whitelist and limits applied to caller expressions
#[derive(Debug, Clone, PartialEq)]
pub struct ExprOption {
    /// Fields a caller may filter on, with their semantic types
    pub rule_fields: ColumnTypes,

    /// Maximum elements in an `in`-style list
    pub max_in_limit: usize,

    /// Maximum rules per expression level
    pub max_rules_limit: usize,
}

impl ExprOption {
    pub fn new(rule_fields: ColumnTypes) -> Self {
        let defaults = DalConfig::default();
        Self {
            rule_fields,
            max_in_limit: defaults.max_in_limit,
            max_rules_limit: defaults.max_rules_limit,
        }
    }

    /// Whitelist built from a column set plus extra JSON sub-paths
    pub fn from_columns(
        columns: &ColumnSet,
        extra: impl IntoIterator<Item = (String, ColumnType)>,
        config: &DalConfig,
    ) -> Self {
        let mut rule_fields = columns.types();
        rule_fields.extend(extra);
        Self {
            rule_fields,
            max_in_limit: config.max_in_limit,
            max_rules_limit: config.max_rules_limit,
        }
    }
}

/// Trusted rules combined with the caller's expression
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrownedOption {
    /// How the crowned rules join the caller's expression
    pub op: LogicOp,

    /// Always ANDed among themselves
    pub rules: Vec<Rule>,
}

/// Trusted overlay applied when compiling a WHERE clause
#[derive(Debug, Clone, PartialEq)]
pub struct SqlWhereOption {
    /// Index-ordered fields; matching predicates are emitted first
    pub priority: Vec<String>,

    pub crowned: Option<CrownedOption>,
}

impl Default for SqlWhereOption {
    fn default() -> Self {
        Self {
            priority: DalConfig::default().priority_fields,
            crowned: None,
        }
    }
}

impl SqlWhereOption {
    pub fn new(priority: Vec<String>) -> Self {
        Self {
            priority,
            crowned: None,
        }
    }

    pub fn from_config(config: &DalConfig) -> Self {
        Self::new(config.priority_fields.clone())
    }

    /// AND a mandatory rule onto every compiled expression
    pub fn with_mandatory(mut self, rule: impl Into<Rule>) -> Self {
        self.crowned
            .get_or_insert_with(CrownedOption::default)
            .rules
            .push(rule.into());
        self
    }

    /// Shorthand for a mandatory `field = value`
    pub fn with_mandatory_eq(self, field: impl Into<String>, value: Value) -> Self {
        self.with_mandatory(AtomRule::eq(field, value))
    }

    /// Join crowned rules to the caller's expression with `op`
    pub fn with_crowned_op(mut self, op: LogicOp) -> Self {
        self.crowned.get_or_insert_with(CrownedOption::default).op = op;
        self
    }

    pub(crate) fn crowned_rules(&self) -> &[Rule] {
        self.crowned.as_ref().map_or(&[], |c| c.rules.as_slice())
    }

    pub(crate) fn crowned_op(&self) -> LogicOp {
        self.crowned.as_ref().map_or(LogicOp::And, |c| c.op)
    }

    pub fn validate(&self) -> DalResult<()> {
        if self.priority.is_empty() {
            return Err(DalError::invalid_parameter("priority fields can not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ColumnDescriptor;
    use serde_json::json;

    #[test]
    fn test_default_option_is_valid() {
        let opt = SqlWhereOption::default();
        assert_eq!(opt.priority, vec!["id", "creator", "reviser"]);
        assert!(opt.validate().is_ok());
        assert!(opt.crowned_rules().is_empty());
    }

    #[test]
    fn test_empty_priority_rejected() {
        let err = SqlWhereOption::new(Vec::new()).validate().unwrap_err();
        assert!(matches!(err, DalError::InvalidParameter(_)));
    }

    #[test]
    fn test_mandatory_rules_accumulate() {
        let opt = SqlWhereOption::default()
            .with_mandatory_eq("tenant_id", json!("t1"))
            .with_mandatory_eq("vpc_id", json!("v1"));
        assert_eq!(opt.crowned_rules().len(), 2);
        assert_eq!(opt.crowned_op(), LogicOp::And);
    }

    #[test]
    fn test_expr_option_from_columns() {
        let columns = ColumnSet::new([
            ColumnDescriptor::string("id"),
            ColumnDescriptor::json("extension"),
        ])
        .unwrap();
        let config = DalConfig {
            max_in_limit: 7,
            ..Default::default()
        };

        let opt = ExprOption::from_columns(
            &columns,
            [("extension.self_link".to_string(), ColumnType::String)],
            &config,
        );
        assert_eq!(opt.rule_fields.len(), 3);
        assert_eq!(opt.max_in_limit, 7);
        assert_eq!(
            opt.rule_fields.get("extension.self_link"),
            Some(&ColumnType::String)
        );
    }
}
