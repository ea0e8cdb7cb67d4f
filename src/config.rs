//! Engine Configuration
//!
//! Limits and policy shared by every DAO. Built once at process start and
//! handed to each DAO explicitly.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{DalError, DalResult};

/// Data-access engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DalConfig {
    /// Maximum page size for list calls (default: 500)
    #[serde(default = "default_max_page_limit")]
    pub max_page_limit: u32,

    /// Maximum number of elements in an `in`/`nin` value (default: 500)
    #[serde(default = "default_max_in_limit")]
    pub max_in_limit: usize,

    /// Maximum number of rules in one expression level (default: 10)
    #[serde(default = "default_max_rules_limit")]
    pub max_rules_limit: usize,

    /// Sort column used when a page omits one (default: "id")
    #[serde(default = "default_sort")]
    pub default_sort: Option<String>,

    /// Index-ordered fields placed first in WHERE clauses
    #[serde(default = "default_priority_fields")]
    pub priority_fields: Vec<String>,

    /// Statements at or above this latency are logged as slow (default: 50)
    #[serde(default = "default_slow_statement_ms")]
    pub slow_statement_ms: u64,

    /// Tenant isolation settings
    #[serde(default)]
    pub tenant: TenantConfig,
}

/// Tenant isolation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Whether tenant scoping is applied at all (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Tenant id treated as "no tenant" (default: "default")
    #[serde(default = "default_tenant_id")]
    pub default_tenant_id: String,

    /// Tables that carry a tenant_id column
    #[serde(default)]
    pub tables: Vec<String>,
}

fn default_max_page_limit() -> u32 {
    500
}

fn default_max_in_limit() -> usize {
    500
}

fn default_max_rules_limit() -> usize {
    10
}

fn default_sort() -> Option<String> {
    Some("id".to_string())
}

fn default_priority_fields() -> Vec<String> {
    vec!["id".to_string(), "creator".to_string(), "reviser".to_string()]
}

fn default_slow_statement_ms() -> u64 {
    50
}

fn default_tenant_id() -> String {
    "default".to_string()
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_tenant_id: default_tenant_id(),
            tables: Vec::new(),
        }
    }
}

impl Default for DalConfig {
    fn default() -> Self {
        Self {
            max_page_limit: default_max_page_limit(),
            max_in_limit: default_max_in_limit(),
            max_rules_limit: default_max_rules_limit(),
            default_sort: default_sort(),
            priority_fields: default_priority_fields(),
            slow_statement_ms: default_slow_statement_ms(),
            tenant: TenantConfig::default(),
        }
    }
}

impl DalConfig {
    /// Parse and validate a JSON config document
    pub fn from_json_str(raw: &str) -> DalResult<Self> {
        let config: DalConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> DalResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DalError::invalid_parameter(format!("read config {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    /// Enable tenant scoping for the given tables
    pub fn with_tenant_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tenant.enabled = true;
        self.tenant.tables = tables.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> DalResult<()> {
        if self.max_page_limit == 0 {
            return Err(DalError::invalid_parameter("max_page_limit must be positive"));
        }
        if self.max_in_limit == 0 {
            return Err(DalError::invalid_parameter("max_in_limit must be positive"));
        }
        if self.max_rules_limit == 0 {
            return Err(DalError::invalid_parameter("max_rules_limit must be positive"));
        }
        if self.priority_fields.is_empty() {
            return Err(DalError::invalid_parameter("priority_fields can not be empty"));
        }
        if self.tenant.enabled && self.tenant.default_tenant_id.is_empty() {
            return Err(DalError::invalid_parameter(
                "tenant.default_tenant_id can not be empty",
            ));
        }
        Ok(())
    }
}
