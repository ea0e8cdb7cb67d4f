//! # Audit Trail
//!
//! One entry per affected record, written through the caller's executor so
//! the entry commits or rolls back with the data change it describes.
//! Audit rows are append-only; nothing here updates or deletes them.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::DalConfig;
use crate::errors::{DalError, DalResult};
use crate::filter::{compile, AtomRule, ExprOption, Expression, SqlWhereOption};
use crate::kit::Kit;
use crate::orm::{Executor, Insert, Select, Statement};
use crate::table::{declare, ColumnDescriptor, ColumnSet, DeclaredColumns};

/// Audit storage table
pub const AUDIT_TABLE: &str = "audit";

/// Mutation being audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Auto-increment key, assigned by the store
    #[serde(default)]
    pub id: i64,

    pub res_id: String,

    #[serde(default)]
    pub cloud_res_id: String,

    #[serde(default)]
    pub res_name: String,

    /// Audited table
    pub res_type: String,

    pub action: AuditAction,

    /// Acting user
    pub operator: String,

    /// Request correlation id
    pub rid: String,

    #[serde(default)]
    pub app_code: String,

    #[serde(default)]
    pub tenant_id: Option<String>,

    /// Snapshot of the change
    #[serde(default)]
    pub detail: Value,

    #[serde(default)]
    pub created_at: String,
}

impl AuditEntry {
    /// Entry for `res_id` of `res_type`, attributed to the kit's actor
    pub fn new(
        kit: &Kit,
        res_type: impl Into<String>,
        action: AuditAction,
        res_id: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            res_id: res_id.into(),
            cloud_res_id: String::new(),
            res_name: String::new(),
            res_type: res_type.into(),
            action,
            operator: kit.user.clone(),
            rid: kit.rid.clone(),
            app_code: kit.app_code.clone(),
            tenant_id: kit.tenant_id.clone(),
            detail: Value::Null,
            created_at: String::new(),
        }
    }

    pub fn with_cloud_res_id(mut self, cloud_res_id: impl Into<String>) -> Self {
        self.cloud_res_id = cloud_res_id.into();
        self
    }

    pub fn with_res_name(mut self, res_name: impl Into<String>) -> Self {
        self.res_name = res_name.into();
        self
    }

    /// Wrap the snapshot as `{"data": detail}`
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = json!({ "data": detail });
        self
    }
}

static AUDIT_COLUMNS: DeclaredColumns = DeclaredColumns::new();

/// Columns of the audit table
pub fn audit_columns() -> DalResult<&'static ColumnSet> {
    declare(&AUDIT_COLUMNS, || {
        ColumnSet::new([
            ColumnDescriptor::numeric("id"),
            ColumnDescriptor::string("res_id").required(),
            ColumnDescriptor::string("cloud_res_id"),
            ColumnDescriptor::string("res_name"),
            ColumnDescriptor::string("res_type").required(),
            ColumnDescriptor::string("action").required(),
            ColumnDescriptor::string("operator").required(),
            ColumnDescriptor::string("rid"),
            ColumnDescriptor::string("app_code"),
            ColumnDescriptor::string("tenant_id"),
            ColumnDescriptor::json("detail"),
            ColumnDescriptor::time("created_at"),
        ])
    })
}

/// Writes audit entries inside the caller's transaction
pub trait Audit: Send + Sync {
    fn record(&self, kit: &Kit, exec: &mut dyn Executor, entries: Vec<AuditEntry>)
        -> DalResult<()>;
}

/// Audit writer backed by the `audit` table
#[derive(Debug, Clone, Default)]
pub struct TableAudit;

impl TableAudit {
    pub fn new() -> Self {
        Self
    }

    /// Entries recorded for one resource, oldest first
    pub fn list_for(
        &self,
        exec: &mut dyn Executor,
        res_type: &str,
        res_id: &str,
    ) -> DalResult<Vec<AuditEntry>> {
        let columns = audit_columns()?;
        let opt = ExprOption::from_columns(columns, [], &DalConfig::default());
        let expr = Expression::all([
            AtomRule::eq("res_type", json!(res_type)),
            AtomRule::eq("res_id", json!(res_id)),
        ]);

        let rows = exec.query(&Statement::Select(Select {
            table: AUDIT_TABLE.to_string(),
            fields: columns.select_expr(&[])?,
            filter: compile(&expr, &opt, &SqlWhereOption::new(vec!["res_id".to_string()]))?,
            tail: "ORDER BY id".to_string(),
        }))?;

        rows.into_iter().map(|row| columns.decode(row)).collect()
    }
}

impl Audit for TableAudit {
    fn record(
        &self,
        kit: &Kit,
        exec: &mut dyn Executor,
        entries: Vec<AuditEntry>,
    ) -> DalResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let columns = audit_columns()?;
        let mut insert = Insert::new(AUDIT_TABLE, columns, false);
        for entry in &entries {
            let row = columns.encode(entry)?;
            columns.validate_insert(&row)?;
            insert.push_row(columns, &row);
        }

        let written = exec.execute(&Statement::Insert(insert))?;
        if written != entries.len() as u64 {
            return Err(DalError::internal(format!(
                "audit wrote {} of {} entries, rid: {}",
                written,
                entries.len(),
                kit.rid
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::{auto_txn, do_with, Orm, SqliteOrm};

    const AUDIT_DDL: &str = "CREATE TABLE audit (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        res_id TEXT NOT NULL,
        cloud_res_id TEXT,
        res_name TEXT,
        res_type TEXT NOT NULL,
        action TEXT NOT NULL,
        operator TEXT NOT NULL,
        rid TEXT,
        app_code TEXT,
        tenant_id TEXT,
        detail TEXT,
        created_at TEXT
    );";

    fn store() -> SqliteOrm {
        let orm = SqliteOrm::open_in_memory(DalConfig::default()).unwrap();
        orm.with_connection(|conn| conn.execute_batch(AUDIT_DDL)).unwrap();
        orm
    }

    #[test]
    fn test_entry_builders() {
        let kit = Kit::new("alice").with_rid("r1").with_app_code("hcm");
        let entry = AuditEntry::new(&kit, "subnet", AuditAction::Create, "00000001")
            .with_cloud_res_id("subnet-abc")
            .with_res_name("web")
            .with_detail(json!({"name": "web"}));

        assert_eq!(entry.operator, "alice");
        assert_eq!(entry.rid, "r1");
        assert_eq!(entry.app_code, "hcm");
        assert_eq!(entry.detail, json!({"data": {"name": "web"}}));
        assert_eq!(entry.action.to_string(), "create");
    }

    #[test]
    fn test_record_and_list() {
        let orm = store();
        let kit = Kit::new("alice").with_tenant("t1");
        let audit = TableAudit::new();

        auto_txn(&orm, &kit, |exec| {
            audit.record(
                &kit,
                exec,
                vec![
                    AuditEntry::new(&kit, "subnet", AuditAction::Create, "00000001")
                        .with_detail(json!({"name": "a"})),
                    AuditEntry::new(&kit, "subnet", AuditAction::Update, "00000001"),
                    AuditEntry::new(&kit, "subnet", AuditAction::Create, "00000002"),
                ],
            )
        })
        .unwrap();

        let entries =
            do_with(&orm, &kit, |exec| audit.list_for(exec, "subnet", "00000001")).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, AuditAction::Create);
        assert_eq!(entries[0].detail, json!({"data": {"name": "a"}}));
        assert_eq!(entries[0].tenant_id.as_deref(), Some("t1"));
        assert!(entries[0].id > 0);
        assert!(!entries[0].created_at.is_empty());
        assert_eq!(entries[1].action, AuditAction::Update);
    }

    #[test]
    fn test_empty_record_is_noop() {
        let orm = store();
        let kit = Kit::system();
        orm.run(&kit, &mut |exec: &mut dyn Executor| TableAudit.record(&kit, exec, Vec::new()))
            .unwrap();
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let orm = store();
        let kit = Kit::new("");
        let err = auto_txn(&orm, &kit, |exec| {
            TableAudit.record(
                &kit,
                exec,
                vec![AuditEntry::new(&kit, "subnet", AuditAction::Delete, "1")],
            )
        })
        .unwrap_err();
        assert!(matches!(err, DalError::ValidationFailed(_)));
    }
}
