//! # Table Sharding
//!
//! Routes statements on a logical table to a physical shard table. Rules
//! are tried in order and the first match renames the statement's table.

use std::sync::Arc;

use super::modifier::StatementModifier;
use super::statement::Statement;
use crate::errors::{DalError, DalResult};
use crate::kit::Kit;
use crate::table::identifier_pattern;

/// Maps one logical table name to its shard
pub trait ShardingRule: Send + Sync {
    fn matches(&self, table: &str) -> bool;

    fn shard_name(&self, table: &str) -> String;
}

/// Appends `_<suffix>` segments to one table, e.g. `subnet` -> `subnet_2024_q1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixSharding {
    table: String,
    suffixes: Vec<String>,
}

impl SuffixSharding {
    pub fn new<I, S>(table: impl Into<String>, suffixes: I) -> DalResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rule = Self {
            table: table.into(),
            suffixes: suffixes.into_iter().map(Into::into).collect(),
        };

        let pattern = identifier_pattern()?;
        if !pattern.is_match(&rule.shard_name(&rule.table)) {
            return Err(DalError::invalid_parameter(format!(
                "invalid shard of table {}: {:?}",
                rule.table, rule.suffixes
            )));
        }
        Ok(rule)
    }
}

impl ShardingRule for SuffixSharding {
    fn matches(&self, table: &str) -> bool {
        self.table == table
    }

    fn shard_name(&self, table: &str) -> String {
        self.suffixes
            .iter()
            .fold(table.to_string(), |name, suffix| format!("{}_{}", name, suffix))
    }
}

/// Modifier applying the first matching sharding rule
#[derive(Clone, Default)]
pub struct TableSharding {
    rules: Vec<Arc<dyn ShardingRule>>,
}

impl TableSharding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: impl ShardingRule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }
}

impl StatementModifier for TableSharding {
    fn modify(&self, _kit: &Kit, stmt: &mut Statement) -> DalResult<()> {
        if let Some(rule) = self.rules.iter().find(|r| r.matches(stmt.table())) {
            let shard = rule.shard_name(stmt.table());
            *stmt.table_mut() = shard;
        }
        Ok(())
    }
}
