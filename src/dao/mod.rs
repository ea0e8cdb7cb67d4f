//! # Table DAO
//!
//! Generic List / Count / Create / Update / Delete over one record type.
//!
//! Every mutation follows the same path: validate the payload before any
//! statement, then inside one transaction reserve ids (create), run the
//! statement, apply the zero-rows-affected policy (update/delete) and write
//! one audit entry per affected record. Any failure rolls everything back.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::error;

use crate::audit::{Audit, AuditAction, AuditEntry};
use crate::config::DalConfig;
use crate::errors::{DalError, DalResult};
use crate::filter::{compile, compile_with, ExprOption, Expression, SqlWhereOption, WhereClause};
use crate::idgen::IdGenerator;
use crate::kit::Kit;
use crate::orm::{
    auto_txn, do_with, Count, Delete, Executor, Insert, Orm, ScopedExecutor, Select, Statement,
    StatementModifier, TenantScope, Update, COUNT_FIELD, GROUP_FIELD,
};
use crate::page::{self, PageOption, PageSpec};
use crate::table::{ColumnSet, Record, Row, CREATOR, ID, REVISER};
use crate::update::{rearrange_row, FieldOptions};

/// Options of a list call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListOption {
    #[serde(default)]
    pub filter: Expression,

    pub page: PageSpec,

    /// Storage names to select; empty selects every column
    #[serde(default)]
    pub fields: Vec<String>,
}

impl ListOption {
    pub fn new(filter: Expression, page: PageSpec) -> Self {
        Self {
            filter,
            page,
            fields: Vec::new(),
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// Exactly one of a count or the matching rows
#[derive(Debug, Clone, PartialEq)]
pub enum ListResult<R> {
    Count(u64),
    Details(Vec<R>),
}

impl<R> ListResult<R> {
    pub fn count(&self) -> Option<u64> {
        match self {
            ListResult::Count(n) => Some(*n),
            ListResult::Details(_) => None,
        }
    }

    pub fn details(self) -> Option<Vec<R>> {
        match self {
            ListResult::Count(_) => None,
            ListResult::Details(rows) => Some(rows),
        }
    }
}

/// Options of a count call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountOption {
    #[serde(default)]
    pub filter: Expression,

    /// Column to group counts by
    #[serde(default)]
    pub group_by: Option<String>,
}

/// One group of a count; `value` is null for an ungrouped count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountGroup {
    pub value: Value,
    pub count: u64,
}

/// DAO over the table of `R`
pub struct TableDao<R: Record> {
    orm: Arc<dyn Orm>,
    id_gen: Arc<dyn IdGenerator>,
    audit: Arc<dyn Audit>,
    config: DalConfig,
    modifiers: Vec<Arc<dyn StatementModifier>>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> TableDao<R> {
    pub fn new(
        orm: Arc<dyn Orm>,
        id_gen: Arc<dyn IdGenerator>,
        audit: Arc<dyn Audit>,
        config: DalConfig,
    ) -> DalResult<Self> {
        config.validate()?;
        let tenant: Arc<dyn StatementModifier> = Arc::new(TenantScope::new(&config.tenant));
        Ok(Self {
            orm,
            id_gen,
            audit,
            config,
            modifiers: vec![tenant],
            _record: PhantomData,
        })
    }

    /// Add a modifier applied after tenant scoping
    pub fn with_modifier(mut self, modifier: Arc<dyn StatementModifier>) -> Self {
        self.modifiers.push(modifier);
        self
    }

    pub fn config(&self) -> &DalConfig {
        &self.config
    }

    /// Whitelist for caller filters: declared columns plus extra JSON paths
    pub fn expr_option(&self) -> DalResult<ExprOption> {
        Ok(ExprOption::from_columns(
            R::columns()?,
            R::extra_rule_fields(),
            &self.config,
        ))
    }

    fn where_option(&self, where_opt: Option<&SqlWhereOption>) -> SqlWhereOption {
        where_opt
            .cloned()
            .unwrap_or_else(|| SqlWhereOption::from_config(&self.config))
    }

    fn scoped<'a>(&'a self, kit: &'a Kit, exec: &'a mut dyn Executor) -> ScopedExecutor<'a> {
        ScopedExecutor::new(exec, kit, &self.modifiers)
    }

    fn logged<T>(&self, kit: &Kit, op: &str, result: DalResult<T>) -> DalResult<T> {
        if let Err(e) = &result {
            error!(rid = %kit.rid, table = R::table_name(), op, error = %e, "Mutation failed");
        }
        result
    }

    // ==================
    // Read
    // ==================

    /// List rows, or only their number when the page is count-only
    pub fn list(
        &self,
        kit: &Kit,
        opt: &ListOption,
        where_opt: Option<&SqlWhereOption>,
    ) -> DalResult<ListResult<R>> {
        let columns = R::columns()?;
        let page_opt = PageOption::from_config(&self.config);
        opt.page.validate(&page_opt)?;
        opt.page.validate_sort(columns)?;

        let filter = compile(&opt.filter, &self.expr_option()?, &self.where_option(where_opt))?;

        if opt.page.count {
            let stmt = Statement::Count(Count {
                table: R::table_name().to_string(),
                filter,
                group_by: None,
            });
            let rows = do_with(self.orm.as_ref(), kit, |exec| self.scoped(kit, exec).query(&stmt))?;
            return Ok(ListResult::Count(count_of(rows.first())?));
        }

        let stmt = Statement::Select(Select {
            table: R::table_name().to_string(),
            fields: columns.select_expr(&opt.fields)?,
            filter,
            tail: page::compile(&opt.page, &page_opt)?,
        });
        let rows = do_with(self.orm.as_ref(), kit, |exec| self.scoped(kit, exec).query(&stmt))?;

        rows.into_iter()
            .map(|row| columns.decode(row))
            .collect::<DalResult<Vec<R>>>()
            .map(ListResult::Details)
    }

    /// Count matching rows, optionally per value of one column
    pub fn count(
        &self,
        kit: &Kit,
        opt: &CountOption,
        where_opt: Option<&SqlWhereOption>,
    ) -> DalResult<Vec<CountGroup>> {
        let columns = R::columns()?;
        if let Some(group) = &opt.group_by {
            if !columns.has(group) {
                return Err(DalError::invalid_parameter(format!(
                    "group_by field {} is not a column",
                    group
                )));
            }
        }

        let stmt = Statement::Count(Count {
            table: R::table_name().to_string(),
            filter: compile(&opt.filter, &self.expr_option()?, &self.where_option(where_opt))?,
            group_by: opt.group_by.clone(),
        });
        let rows = do_with(self.orm.as_ref(), kit, |exec| self.scoped(kit, exec).query(&stmt))?;

        rows.iter()
            .map(|row| -> DalResult<CountGroup> {
                Ok(CountGroup {
                    value: row.get(GROUP_FIELD).cloned().unwrap_or(Value::Null),
                    count: count_of(Some(row))?,
                })
            })
            .collect()
    }

    // ==================
    // Create
    // ==================

    /// Create one record and return its id
    pub fn create(&self, kit: &Kit, record: R) -> DalResult<String> {
        self.batch_create(kit, vec![record])?
            .pop()
            .ok_or_else(|| DalError::internal("create returned no id"))
    }

    /// Create records in one transaction; ids are returned in input order
    pub fn batch_create(&self, kit: &Kit, records: Vec<R>) -> DalResult<Vec<String>> {
        let result = validate_inserts(&records).and_then(|()| {
            auto_txn(self.orm.as_ref(), kit, |exec| self.insert(kit, exec, records))
        });
        self.logged(kit, "batch_create", result)
    }

    /// Create records inside a caller's transaction
    pub fn batch_create_with_tx(
        &self,
        kit: &Kit,
        exec: &mut dyn Executor,
        records: Vec<R>,
    ) -> DalResult<Vec<String>> {
        let result = validate_inserts(&records).and_then(|()| self.insert(kit, exec, records));
        self.logged(kit, "batch_create", result)
    }

    fn insert(
        &self,
        kit: &Kit,
        exec: &mut dyn Executor,
        mut records: Vec<R>,
    ) -> DalResult<Vec<String>> {
        let columns = R::columns()?;
        let ids = self.id_gen.batch(kit, exec, R::table_name(), records.len())?;
        if ids.len() != records.len() {
            return Err(DalError::internal(format!(
                "reserved {} ids for {} records",
                ids.len(),
                records.len()
            )));
        }

        let mut insert = Insert::new(R::table_name(), columns, true);
        let mut entries = Vec::with_capacity(records.len());
        for (record, id) in records.iter_mut().zip(&ids) {
            record.set_id(id.clone());
            let mut row = columns.encode(record)?;
            stamp(columns, &mut row, CREATOR, &kit.user);
            stamp(columns, &mut row, REVISER, &kit.user);
            insert.push_row(columns, &row);

            entries.push(
                AuditEntry::new(kit, R::table_name(), AuditAction::Create, id.clone())
                    .with_cloud_res_id(record.cloud_id().unwrap_or_default())
                    .with_res_name(record.name().unwrap_or_default())
                    .with_detail(Value::Object(row)),
            );
        }

        let mut scoped = self.scoped(kit, exec);
        scoped.execute(&Statement::Insert(insert))?;
        self.audit.record(kit, &mut scoped, entries)?;

        Ok(ids)
    }

    // ==================
    // Update
    // ==================

    /// Update every row matching `filter` with the non-blank payload fields
    pub fn update(
        &self,
        kit: &Kit,
        filter: &Expression,
        payload: &R,
        opts: &FieldOptions,
        where_opt: Option<&SqlWhereOption>,
    ) -> DalResult<()> {
        let result = self
            .prepare_update(kit, filter, payload, opts, where_opt)
            .and_then(|prepared| {
                auto_txn(self.orm.as_ref(), kit, |exec| {
                    self.apply_update(kit, exec, payload, prepared)
                })
            });
        self.logged(kit, "update", result)
    }

    /// Update inside a caller's transaction
    pub fn update_with_tx(
        &self,
        kit: &Kit,
        exec: &mut dyn Executor,
        filter: &Expression,
        payload: &R,
        opts: &FieldOptions,
        where_opt: Option<&SqlWhereOption>,
    ) -> DalResult<()> {
        let result = self
            .prepare_update(kit, filter, payload, opts, where_opt)
            .and_then(|prepared| self.apply_update(kit, exec, payload, prepared));
        self.logged(kit, "update", result)
    }

    fn prepare_update(
        &self,
        kit: &Kit,
        filter: &Expression,
        payload: &R,
        opts: &FieldOptions,
        where_opt: Option<&SqlWhereOption>,
    ) -> DalResult<PreparedUpdate> {
        payload.validate_update()?;

        let columns = R::columns()?;
        let row = columns.encode(payload)?;
        let opts = opts.clone().add_ignored_fields([REVISER]);
        let (mut set, mut binds) = rearrange_row(columns, &row, &opts)?.into_parts();

        if let Some(reviser) = columns.get(REVISER) {
            let name = binds.bind(&reviser.placeholder(), json!(kit.user));
            set = format!("{}, {} = :{}", set, REVISER, name);
        }

        let detail: Map<String, Value> = binds
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();

        let filter = compile_with(
            filter,
            &self.expr_option()?,
            &self.where_option(where_opt),
            binds,
        )?;
        if filter.is_empty() {
            return Err(DalError::invalid_parameter("update requires a filter"));
        }

        Ok(PreparedUpdate {
            set,
            filter,
            detail: Value::Object(detail),
        })
    }

    fn apply_update(
        &self,
        kit: &Kit,
        exec: &mut dyn Executor,
        payload: &R,
        prepared: PreparedUpdate,
    ) -> DalResult<()> {
        let columns = R::columns()?;
        let mut scoped = self.scoped(kit, exec);

        let mut fields = identity_fields(columns);
        for f in R::stored_check_fields() {
            if !fields.iter().any(|known| known == f) {
                fields.push(f.to_string());
            }
        }
        let matched = scoped.query(&Statement::Select(Select {
            table: R::table_name().to_string(),
            fields: columns.select_expr(&fields)?,
            filter: prepared.filter.clone(),
            tail: String::new(),
        }))?;
        matched.iter().try_for_each(|row| payload.validate_stored(row))?;

        let updated = scoped.execute(&Statement::Update(Update {
            table: R::table_name().to_string(),
            set: prepared.set,
            filter: prepared.filter,
        }))?;
        if updated == 0 {
            return Err(DalError::not_found(format!(
                "no {} matched the update filter",
                R::table_name()
            )));
        }

        let entries = matched
            .iter()
            .map(|row| self.entry(kit, AuditAction::Update, columns, row, prepared.detail.clone()))
            .collect();
        self.audit.record(kit, &mut scoped, entries)
    }

    // ==================
    // Delete
    // ==================

    /// Delete every row matching `filter`
    pub fn delete(
        &self,
        kit: &Kit,
        filter: &Expression,
        where_opt: Option<&SqlWhereOption>,
    ) -> DalResult<()> {
        let result = self.prepare_delete(filter, where_opt).and_then(|filter| {
            auto_txn(self.orm.as_ref(), kit, |exec| self.apply_delete(kit, exec, filter))
        });
        self.logged(kit, "delete", result)
    }

    /// Delete inside a caller's transaction
    pub fn delete_with_tx(
        &self,
        kit: &Kit,
        exec: &mut dyn Executor,
        filter: &Expression,
        where_opt: Option<&SqlWhereOption>,
    ) -> DalResult<()> {
        let result = self
            .prepare_delete(filter, where_opt)
            .and_then(|filter| self.apply_delete(kit, exec, filter));
        self.logged(kit, "delete", result)
    }

    fn prepare_delete(
        &self,
        filter: &Expression,
        where_opt: Option<&SqlWhereOption>,
    ) -> DalResult<WhereClause> {
        let filter = compile(filter, &self.expr_option()?, &self.where_option(where_opt))?;
        if filter.is_empty() {
            return Err(DalError::invalid_parameter("delete requires a filter"));
        }
        Ok(filter)
    }

    fn apply_delete(
        &self,
        kit: &Kit,
        exec: &mut dyn Executor,
        filter: WhereClause,
    ) -> DalResult<()> {
        let columns = R::columns()?;
        let mut scoped = self.scoped(kit, exec);

        let snapshot = scoped.query(&Statement::Select(Select {
            table: R::table_name().to_string(),
            fields: columns.select_expr(&[])?,
            filter: filter.clone(),
            tail: String::new(),
        }))?;

        let deleted = scoped.execute(&Statement::Delete(Delete {
            table: R::table_name().to_string(),
            filter,
        }))?;
        if deleted == 0 {
            return Err(DalError::not_found(format!(
                "no {} matched the delete filter",
                R::table_name()
            )));
        }

        let entries = snapshot
            .into_iter()
            .map(|row| {
                let row = columns.normalize(row);
                let detail = Value::Object(row.clone());
                self.entry(kit, AuditAction::Delete, columns, &row, detail)
            })
            .collect();
        self.audit.record(kit, &mut scoped, entries)
    }

    fn entry(
        &self,
        kit: &Kit,
        action: AuditAction,
        columns: &ColumnSet,
        row: &Row,
        detail: Value,
    ) -> AuditEntry {
        AuditEntry::new(kit, R::table_name(), action, column_str(columns, row, ID))
            .with_cloud_res_id(column_str(columns, row, "cloud_id"))
            .with_res_name(column_str(columns, row, "name"))
            .with_detail(detail)
    }
}

/// Compiled update, ready to run
struct PreparedUpdate {
    set: String,
    filter: WhereClause,
    detail: Value,
}

fn validate_inserts<R: Record>(records: &[R]) -> DalResult<()> {
    if records.is_empty() {
        return Err(DalError::invalid_parameter("records to create can not be empty"));
    }
    records.iter().try_for_each(R::validate_insert)
}

/// Write `value` into a declared column of an encoded row
fn stamp(columns: &ColumnSet, row: &mut Row, storage_name: &str, value: &str) {
    if let Some(d) = columns.get(storage_name) {
        row.insert(d.bind_name.clone(), json!(value));
    }
}

/// Columns identifying a row in audit entries
fn identity_fields(columns: &ColumnSet) -> Vec<String> {
    [ID, "cloud_id", "name"]
        .into_iter()
        .filter(|f| columns.has(f))
        .map(String::from)
        .collect()
}

fn column_str(columns: &ColumnSet, row: &Row, storage_name: &str) -> String {
    columns
        .get(storage_name)
        .and_then(|d| row.get(&d.bind_name))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn count_of(row: Option<&Row>) -> DalResult<u64> {
    row.and_then(|r| r.get(COUNT_FIELD))
        .and_then(Value::as_u64)
        .ok_or_else(|| DalError::internal("count statement returned no count"))
}
