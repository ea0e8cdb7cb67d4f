//! # SQLite Store
//!
//! `Orm` over a single rusqlite connection. Callers serialize on the
//! connection mutex; each `run_in_txn` holds it for the whole transaction.
//!
//! Statements bind only the placeholders their SQL references. Booleans are
//! stored as integers, arrays and objects as JSON text. The store registers a
//! `now()` function so statements stamp times in one format.
//!
//! A kit deadline is enforced while statements run: a progress handler
//! interrupts SQLite once it passes, and the interrupt surfaces as
//! `DeadlineExceeded`.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, ErrorCode};
use serde_json::{Number, Value};
use tracing::{debug, error, info, warn};

use super::statement::Statement;
use super::{Executor, ExecutorFn, Orm};
use crate::binds::Binds;
use crate::config::DalConfig;
use crate::errors::{DalError, DalResult};
use crate::kit::Kit;
use crate::table::{now_string, Row};

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteOrm {
    conn: Arc<Mutex<Connection>>,
    slow_statement: Duration,
}

impl SqliteOrm {
    /// Open a private in-memory database
    pub fn open_in_memory(config: DalConfig) -> DalResult<Self> {
        info!("Opening in-memory SQLite store");
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, &config)
    }

    /// Open or create a database file
    pub fn open(path: impl AsRef<Path>, config: DalConfig) -> DalResult<Self> {
        let path = path.as_ref();
        info!(path = ?path, "Opening SQLite store");
        let conn = Connection::open(path)?;
        Self::from_connection(conn, &config)
    }

    fn from_connection(conn: Connection, config: &DalConfig) -> DalResult<Self> {
        configure(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            slow_statement: Duration::from_millis(config.slow_statement_ms),
        })
    }

    /// Run a closure against the raw connection, e.g. for DDL
    pub fn with_connection<F, T>(&self, f: F) -> DalResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock();
        Ok(f(&conn)?)
    }
}

fn configure(conn: &Connection) -> rusqlite::Result<()> {
    debug!("Configuring SQLite pragmas");
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch("PRAGMA case_sensitive_like = ON;")?;
    conn.create_scalar_function("now", 0, FunctionFlags::SQLITE_UTF8, |_| Ok(now_string()))?;
    Ok(())
}

/// VM instructions between deadline checks
const DEADLINE_CHECK_OPS: i32 = 1000;

/// Interrupts statements on a connection once the kit deadline passes.
/// Dropping the guard removes the handler.
struct DeadlineGuard<'c> {
    conn: &'c Connection,
    armed: bool,
}

impl<'c> DeadlineGuard<'c> {
    fn arm(conn: &'c Connection, kit: &Kit) -> DalResult<Self> {
        let Some(deadline) = kit.deadline else {
            return Ok(Self { conn, armed: false });
        };
        conn.progress_handler(DEADLINE_CHECK_OPS, Some(move || Instant::now() >= deadline))?;
        Ok(Self { conn, armed: true })
    }
}

impl Drop for DeadlineGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.conn.progress_handler(0, None::<fn() -> bool>) {
                error!(error = %e, "Failed to remove deadline handler");
            }
        }
    }
}

impl Orm for SqliteOrm {
    fn run(&self, kit: &Kit, op: &mut ExecutorFn<'_>) -> DalResult<()> {
        let conn = self.conn.lock();
        let _deadline = DeadlineGuard::arm(&conn, kit)?;
        let mut exec = ConnExecutor {
            conn: &conn,
            kit,
            slow_statement: self.slow_statement,
        };
        op(&mut exec)
    }

    fn run_in_txn(&self, kit: &Kit, op: &mut ExecutorFn<'_>) -> DalResult<()> {
        kit.check_deadline()?;

        let mut conn = self.conn.lock();
        let tx = conn
            .transaction()
            .map_err(|e| DalError::storage("transaction", 0, e))?;

        let outcome = {
            let _deadline = DeadlineGuard::arm(&tx, kit)?;
            let mut exec = ConnExecutor {
                conn: &tx,
                kit,
                slow_statement: self.slow_statement,
            };
            op(&mut exec).and_then(|()| kit.check_deadline())
        };

        match outcome {
            Ok(()) => tx
                .commit()
                .map_err(|e| DalError::storage("transaction", 0, e)),
            Err(e) => {
                warn!(rid = %kit.rid, error = %e, "Rolling back transaction");
                if let Err(rollback) = tx.rollback() {
                    error!(rid = %kit.rid, error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// Executor bound to one connection or open transaction
struct ConnExecutor<'c> {
    conn: &'c Connection,
    kit: &'c Kit,
    slow_statement: Duration,
}

impl ConnExecutor<'_> {
    fn observe(&self, table: &str, sql: &str, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed >= self.slow_statement {
            warn!(
                rid = %self.kit.rid,
                table,
                sql,
                elapsed_ms = elapsed.as_millis() as u64,
                "Slow statement"
            );
        }
    }
}

impl Executor for ConnExecutor<'_> {
    fn query(&mut self, stmt: &Statement) -> DalResult<Vec<Row>> {
        self.kit.check_deadline()?;
        let (sql, binds) = stmt.render()?;
        let wrap = |e| statement_error(stmt, e);

        debug!(rid = %self.kit.rid, table = stmt.table(), sql = %sql, "Running query");
        let started = Instant::now();

        let mut prepared = self.conn.prepare(&sql).map_err(wrap)?;
        bind_all(&mut prepared, &binds).map_err(wrap)?;

        let names: Vec<String> = prepared
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        let mut out = Vec::new();
        let mut rows = prepared.raw_query();
        while let Some(row) = rows.next().map_err(wrap)? {
            let mut record = Row::new();
            for (i, name) in names.iter().enumerate() {
                record.insert(name.clone(), from_sql_value(row.get_ref(i).map_err(wrap)?));
            }
            out.push(record);
        }

        self.observe(stmt.table(), &sql, started);
        Ok(out)
    }

    fn execute(&mut self, stmt: &Statement) -> DalResult<u64> {
        self.kit.check_deadline()?;
        let (sql, binds) = stmt.render()?;
        let wrap = |e| statement_error(stmt, e);

        debug!(rid = %self.kit.rid, table = stmt.table(), sql = %sql, "Executing statement");
        let started = Instant::now();

        let mut prepared = self.conn.prepare(&sql).map_err(wrap)?;
        bind_all(&mut prepared, &binds).map_err(wrap)?;
        let affected = prepared.raw_execute().map_err(wrap)?;

        self.observe(stmt.table(), &sql, started);
        Ok(affected as u64)
    }
}

/// An interrupted statement ran into the deadline
fn statement_error(stmt: &Statement, e: rusqlite::Error) -> DalError {
    if e.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
        return DalError::DeadlineExceeded;
    }
    DalError::storage(stmt.table(), stmt.row_hint(), e)
}

/// Bind every value whose placeholder the statement references
fn bind_all(prepared: &mut rusqlite::Statement<'_>, binds: &Binds) -> rusqlite::Result<()> {
    for (name, value) in binds {
        if let Some(index) = prepared.parameter_index(&format!(":{}", name))? {
            prepared.raw_bind_parameter(index, to_sql_value(value))?;
        }
    }
    Ok(())
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn from_sql_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{compile, AtomRule, ExprOption, Expression, Operator, SqlWhereOption};
    use crate::orm::{do_with, Insert, Select};
    use crate::table::{ColumnDescriptor, ColumnSet};
    use serde_json::json;

    fn columns() -> ColumnSet {
        ColumnSet::new([
            ColumnDescriptor::string("id"),
            ColumnDescriptor::string("name"),
            ColumnDescriptor::boolean("is_default"),
            ColumnDescriptor::json("extension"),
            ColumnDescriptor::time("created_at"),
        ])
        .unwrap()
    }

    fn store() -> SqliteOrm {
        let orm = SqliteOrm::open_in_memory(DalConfig::default()).unwrap();
        orm.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE item (
                    id TEXT PRIMARY KEY,
                    name TEXT,
                    is_default INTEGER,
                    extension TEXT,
                    created_at TEXT
                );",
            )
        })
        .unwrap();
        orm
    }

    fn seed(orm: &SqliteOrm) {
        let columns = columns();
        let mut insert = Insert::new("item", &columns, true);
        for (id, name, ext) in [
            ("1", "Web", json!({"self_link": "a/b"})),
            ("2", "web-2", json!({"self_link": "c/d"})),
        ] {
            let row = columns
                .encode(&json!({"id": id, "name": name, "is_default": id == "1", "extension": ext}))
                .unwrap();
            insert.push_row(&columns, &row);
        }
        do_with(orm, &Kit::system(), |exec| exec.execute(&Statement::Insert(insert))).unwrap();
    }

    fn select(expr: Expression) -> Statement {
        let columns = columns();
        let opt = ExprOption::from_columns(
            &columns,
            [("extension.self_link".to_string(), crate::table::ColumnType::String)],
            &DalConfig::default(),
        );
        Statement::Select(Select {
            table: "item".into(),
            fields: columns.select_expr(&[]).unwrap(),
            filter: compile(&expr, &opt, &SqlWhereOption::default()).unwrap(),
            tail: "ORDER BY id".into(),
        })
    }

    fn query(orm: &SqliteOrm, expr: Expression) -> Vec<Row> {
        do_with(orm, &Kit::system(), |exec| exec.query(&select(expr))).unwrap()
    }

    #[test]
    fn test_round_trip_types() {
        let orm = store();
        seed(&orm);

        let rows = query(&orm, Expression::default());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["is_default"], json!(1));
        assert_eq!(rows[0]["extension"], json!(r#"{"self_link":"a/b"}"#));
        let created = rows[0]["created_at"].as_str().unwrap();
        assert!(crate::table::normalize_time(created).is_some());
    }

    #[test]
    fn test_json_path_filter() {
        let orm = store();
        seed(&orm);

        let rows = query(
            &orm,
            Expression::all([AtomRule::eq("extension.self_link", json!("c/d"))]),
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!("2"));
    }

    #[test]
    fn test_contains_is_case_sensitive() {
        let orm = store();
        seed(&orm);

        let cs = query(
            &orm,
            Expression::all([AtomRule::new(
                "name",
                Operator::ContainsSensitive,
                json!("web"),
            )]),
        );
        assert_eq!(cs.len(), 1);

        let cis = query(
            &orm,
            Expression::all([AtomRule::new(
                "name",
                Operator::ContainsInsensitive,
                json!("WEB"),
            )]),
        );
        assert_eq!(cis.len(), 2);
    }

    #[test]
    fn test_in_list_filter() {
        let orm = store();
        seed(&orm);

        let rows = query(
            &orm,
            Expression::all([AtomRule::in_list(
                "id",
                vec![json!("1"), json!("2"), json!("3")],
            )]),
        );
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_expired_deadline_rejected_before_statement() {
        let orm = store();
        let kit = Kit::system().with_deadline(Instant::now() - Duration::from_millis(1));
        let err =
            do_with(&orm, &kit, |exec| exec.query(&select(Expression::default()))).unwrap_err();
        assert!(matches!(err, DalError::DeadlineExceeded));
    }

    /// A view that counts to a hundred million, far longer than any test deadline
    fn slow_store() -> SqliteOrm {
        let orm = store();
        orm.with_connection(|conn| {
            conn.execute_batch(
                "CREATE VIEW slow AS
                 WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 100000000)
                 SELECT x FROM c;",
            )
        })
        .unwrap();
        orm
    }

    fn slow_select() -> Statement {
        Statement::Select(Select {
            table: "slow".into(),
            fields: "MAX(x) AS x".into(),
            filter: crate::filter::WhereClause::empty(),
            tail: String::new(),
        })
    }

    #[test]
    fn test_deadline_interrupts_running_statement() {
        let orm = slow_store();
        let kit = Kit::system().with_timeout(Duration::from_millis(50));

        let started = Instant::now();
        let err = do_with(&orm, &kit, |exec| exec.query(&slow_select())).unwrap_err();
        assert!(matches!(err, DalError::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_secs(5));

        // The handler is gone once the call returns
        let rows = do_with(&orm, &Kit::system(), |exec| exec.query(&select(Expression::default())))
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_interrupted_statement_rolls_back_transaction() {
        let orm = slow_store();
        let kit = Kit::system().with_timeout(Duration::from_millis(50));

        let err = crate::orm::auto_txn(&orm, &kit, |exec| {
            let columns = columns();
            let mut insert = Insert::new("item", &columns, true);
            let row = columns.encode(&json!({"id": "1", "name": "kept?"})).unwrap();
            insert.push_row(&columns, &row);
            exec.execute(&Statement::Insert(insert))?;
            exec.query(&slow_select())
        })
        .unwrap_err();
        assert!(matches!(err, DalError::DeadlineExceeded));
        assert!(query(&orm, Expression::default()).is_empty());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dal.db");

        let orm = SqliteOrm::open(&path, DalConfig::default()).unwrap();
        orm.with_connection(|conn| conn.execute_batch("CREATE TABLE t (id TEXT);"))
            .unwrap();
        drop(orm);

        let reopened = SqliteOrm::open(&path, DalConfig::default()).unwrap();
        let tables: i64 = reopened
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 't'",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(tables, 1);
    }
}
