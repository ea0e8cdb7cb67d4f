//! # Unit-of-Work
//!
//! The executor seam every DAO writes through, the transaction boundary, and
//! the statement modifiers applied between them.
//!
//! `Orm::run_in_txn` is the only transaction boundary: the closure either
//! completes and the transaction commits, or any error rolls the whole
//! transaction back and is returned unchanged.

mod modifier;
mod sharding;
mod sqlite;
mod statement;
mod tenant;

pub use modifier::{ScopedExecutor, StatementModifier};
pub use sharding::{ShardingRule, SuffixSharding, TableSharding};
pub use sqlite::SqliteOrm;
pub use statement::{
    Count, Delete, Insert, InsertColumn, Select, Statement, Update, COUNT_FIELD, GROUP_FIELD,
};
pub use tenant::TenantScope;

use crate::errors::{DalError, DalResult};
use crate::kit::Kit;
use crate::table::Row;

/// Runs statements against the store
pub trait Executor {
    /// Run a statement that returns rows, keyed by result column name
    fn query(&mut self, stmt: &Statement) -> DalResult<Vec<Row>>;

    /// Run a statement and return the number of affected rows
    fn execute(&mut self, stmt: &Statement) -> DalResult<u64>;
}

/// Body run by an `Orm` with an executor bound to one connection
pub type ExecutorFn<'a> = dyn FnMut(&mut dyn Executor) -> DalResult<()> + 'a;

/// Store entry point shared by every DAO
pub trait Orm: Send + Sync {
    /// Run without an explicit transaction; each statement autocommits
    fn run(&self, kit: &Kit, op: &mut ExecutorFn<'_>) -> DalResult<()>;

    /// Run inside one transaction, committed only if `op` succeeds
    fn run_in_txn(&self, kit: &Kit, op: &mut ExecutorFn<'_>) -> DalResult<()>;
}

/// Run `f` in a transaction and return its result unchanged
pub fn auto_txn<T>(
    orm: &dyn Orm,
    kit: &Kit,
    f: impl FnOnce(&mut dyn Executor) -> DalResult<T>,
) -> DalResult<T> {
    let mut body = Some(f);
    let mut out = None;
    orm.run_in_txn(kit, &mut |exec: &mut dyn Executor| {
        let f = body
            .take()
            .ok_or_else(|| DalError::internal("transaction body invoked twice"))?;
        out = Some(f(exec)?);
        Ok(())
    })?;
    out.ok_or_else(|| DalError::internal("transaction committed without a result"))
}

/// Run `f` without a transaction
pub fn do_with<T>(
    orm: &dyn Orm,
    kit: &Kit,
    f: impl FnOnce(&mut dyn Executor) -> DalResult<T>,
) -> DalResult<T> {
    let mut body = Some(f);
    let mut out = None;
    orm.run(kit, &mut |exec: &mut dyn Executor| {
        let f = body
            .take()
            .ok_or_else(|| DalError::internal("body invoked twice"))?;
        out = Some(f(exec)?);
        Ok(())
    })?;
    out.ok_or_else(|| DalError::internal("run finished without a result"))
}
