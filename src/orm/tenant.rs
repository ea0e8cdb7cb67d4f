//! # Tenant Scoping
//!
//! Injects the request's tenant into statements against tenant-scoped
//! tables. Inserts get a `tenant_id` value; every filtered statement gets a
//! trusted `tenant_id = :tenant_id` predicate ANDed on.
//!
//! Scoping is skipped when tenancy is disabled, the table is not registered,
//! or the request carries no tenant or the default tenant.

use std::collections::HashSet;

use serde_json::Value;

use super::modifier::StatementModifier;
use super::statement::Statement;
use crate::config::TenantConfig;
use crate::errors::DalResult;
use crate::kit::Kit;
use crate::table::TENANT_ID;

/// Tenant scoping modifier
#[derive(Debug, Clone)]
pub struct TenantScope {
    enabled: bool,
    default_tenant_id: String,
    tables: HashSet<String>,
}

impl TenantScope {
    pub fn new(config: &TenantConfig) -> Self {
        Self {
            enabled: config.enabled,
            default_tenant_id: config.default_tenant_id.clone(),
            tables: config.tables.iter().cloned().collect(),
        }
    }

    /// Scoping that never applies
    pub fn disabled() -> Self {
        Self::new(&TenantConfig::default())
    }

    pub fn is_scoped_table(&self, table: &str) -> bool {
        self.enabled && self.tables.contains(table)
    }

    /// Tenant to inject for this request and table, if any
    pub fn tenant_for<'k>(&self, kit: &'k Kit, table: &str) -> Option<&'k str> {
        if !self.is_scoped_table(table) {
            return None;
        }
        kit.tenant_id
            .as_deref()
            .filter(|t| !t.is_empty() && *t != self.default_tenant_id)
    }
}

impl Default for TenantScope {
    fn default() -> Self {
        Self::disabled()
    }
}

impl StatementModifier for TenantScope {
    fn modify(&self, kit: &Kit, stmt: &mut Statement) -> DalResult<()> {
        let Some(tenant) = self.tenant_for(kit, stmt.table()) else {
            return Ok(());
        };
        let tenant = Value::String(tenant.to_string());

        match stmt {
            Statement::Insert(insert) => insert.set_column(TENANT_ID, tenant),
            other => {
                if let Some(filter) = other.filter_mut() {
                    filter.and_scope(TENANT_ID, tenant);
                }
            }
        }
        Ok(())
    }
}
