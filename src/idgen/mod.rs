//! # Batch ID Generation
//!
//! Reserves identifiers before an INSERT is built, so record ids do not
//! depend on the store's auto-increment.
//!
//! `TableIdGenerator` keeps one counter row per resource table and advances
//! it with a compare-and-swap inside the caller's transaction: a rolled back
//! create also releases its reservation.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::config::DalConfig;
use crate::errors::{DalError, DalResult};
use crate::filter::{compile, compile_with, AtomRule, ExprOption, Expression, SqlWhereOption};
use crate::kit::Kit;
use crate::orm::{Executor, Insert, Select, Statement, Update};
use crate::table::{declare, ColumnDescriptor, ColumnSet, DeclaredColumns, Row};
use crate::update::{rearrange_row, FieldOptions};

/// Counter table
pub const ID_GENERATOR_TABLE: &str = "id_generator";

/// Largest batch one call may reserve
pub const MAX_BATCH: usize = 500;

/// Hands out unique ids for new records
pub trait IdGenerator: Send + Sync {
    /// Reserve `n` ids for `table`, in ascending order
    fn batch(&self, kit: &Kit, exec: &mut dyn Executor, table: &str, n: usize)
        -> DalResult<Vec<String>>;

    fn one(&self, kit: &Kit, exec: &mut dyn Executor, table: &str) -> DalResult<String> {
        self.batch(kit, exec, table, 1)?
            .pop()
            .ok_or_else(|| DalError::internal("id generator returned no id"))
    }
}

fn check_batch(n: usize) -> DalResult<()> {
    if n == 0 {
        return Err(DalError::invalid_parameter("id batch size must be positive"));
    }
    if n > MAX_BATCH {
        return Err(DalError::invalid_parameter(format!(
            "id batch size {} exceeds maximum {}",
            n, MAX_BATCH
        )));
    }
    Ok(())
}

static GENERATOR_COLUMNS: DeclaredColumns = DeclaredColumns::new();

fn generator_columns() -> DalResult<&'static ColumnSet> {
    declare(&GENERATOR_COLUMNS, || {
        ColumnSet::new([
            ColumnDescriptor::string("resource").required(),
            ColumnDescriptor::numeric("max_id"),
        ])
    })
}

/// Sequential 8-digit hex ids from the `id_generator` table
#[derive(Debug, Clone, Default)]
pub struct TableIdGenerator;

impl TableIdGenerator {
    pub fn new() -> Self {
        Self
    }

    fn current(
        &self,
        exec: &mut dyn Executor,
        opt: &ExprOption,
        table: &str,
    ) -> DalResult<Option<u64>> {
        let filter = compile(
            &Expression::all([AtomRule::eq("resource", json!(table))]),
            opt,
            &resource_priority(),
        )?;
        let rows = exec.query(&Statement::Select(Select {
            table: ID_GENERATOR_TABLE.to_string(),
            fields: "max_id".to_string(),
            filter,
            tail: String::new(),
        }))?;

        match rows.first().map(|row| row.get("max_id")) {
            None => Ok(None),
            Some(Some(Value::Number(n))) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| DalError::internal(format!("invalid max_id for {}", table))),
            Some(_) => Err(DalError::internal(format!("invalid max_id for {}", table))),
        }
    }
}

fn resource_priority() -> SqlWhereOption {
    SqlWhereOption::new(vec!["resource".to_string()])
}

impl IdGenerator for TableIdGenerator {
    fn batch(
        &self,
        _kit: &Kit,
        exec: &mut dyn Executor,
        table: &str,
        n: usize,
    ) -> DalResult<Vec<String>> {
        check_batch(n)?;

        let columns = generator_columns()?;
        let opt = ExprOption::from_columns(columns, [], &DalConfig::default());
        let start = match self.current(exec, &opt, table)? {
            None => {
                let mut row = Row::new();
                row.insert("resource".to_string(), json!(table));
                row.insert("max_id".to_string(), json!(n as u64));
                let mut insert = Insert::new(ID_GENERATOR_TABLE, columns, true);
                insert.push_row(columns, &row);
                exec.execute(&Statement::Insert(insert))?;
                1
            }
            Some(max_id) => {
                let mut row = Row::new();
                row.insert("max_id".to_string(), json!(max_id + n as u64));
                let (set, seed) = rearrange_row(columns, &row, &FieldOptions::new())?.into_parts();

                let swap = Expression::all([
                    AtomRule::eq("resource", json!(table)),
                    AtomRule::eq("max_id", json!(max_id)),
                ]);
                let filter = compile_with(&swap, &opt, &resource_priority(), seed)?;

                let swapped = exec.execute(&Statement::Update(Update {
                    table: ID_GENERATOR_TABLE.to_string(),
                    set,
                    filter,
                }))?;
                if swapped != 1 {
                    return Err(DalError::internal(format!(
                        "id generator for {} advanced concurrently",
                        table
                    )));
                }
                max_id + 1
            }
        };

        Ok((start..start + n as u64).map(|id| format!("{:08x}", id)).collect())
    }
}

/// Random ids for tables that need no ordering
#[derive(Debug, Clone, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn batch(
        &self,
        _kit: &Kit,
        _exec: &mut dyn Executor,
        _table: &str,
        n: usize,
    ) -> DalResult<Vec<String>> {
        check_batch(n)?;
        Ok((0..n).map(|_| Uuid::new_v4().simple().to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::{auto_txn, SqliteOrm};

    fn store() -> SqliteOrm {
        let orm = SqliteOrm::open_in_memory(DalConfig::default()).unwrap();
        orm.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE id_generator (resource TEXT PRIMARY KEY, max_id INTEGER NOT NULL);",
            )
        })
        .unwrap();
        orm
    }

    fn reserve(orm: &SqliteOrm, table: &str, n: usize) -> DalResult<Vec<String>> {
        let kit = Kit::system();
        auto_txn(orm, &kit, |exec| TableIdGenerator.batch(&kit, exec, table, n))
    }

    #[test]
    fn test_sequential_hex_ids() {
        let orm = store();
        assert_eq!(
            reserve(&orm, "subnet", 3).unwrap(),
            vec!["00000001", "00000002", "00000003"]
        );
        assert_eq!(reserve(&orm, "subnet", 2).unwrap(), vec!["00000004", "00000005"]);
        assert_eq!(reserve(&orm, "vpc", 1).unwrap(), vec!["00000001"]);
    }

    #[test]
    fn test_ids_render_as_hex() {
        let orm = store();
        let ids = reserve(&orm, "subnet", 16).unwrap();
        assert_eq!(ids[9], "0000000a");
        assert_eq!(ids[15], "00000010");
    }

    #[test]
    fn test_rolled_back_reservation_is_released() {
        let orm = store();
        let kit = Kit::system();
        let err = auto_txn(&orm, &kit, |exec| {
            TableIdGenerator.batch(&kit, exec, "subnet", 5)?;
            Err::<(), _>(DalError::validation("create failed"))
        });
        assert!(err.is_err());

        assert_eq!(reserve(&orm, "subnet", 1).unwrap(), vec!["00000001"]);
    }

    #[test]
    fn test_batch_size_bounds() {
        let orm = store();
        assert!(matches!(
            reserve(&orm, "subnet", 0),
            Err(DalError::InvalidParameter(_))
        ));
        assert!(reserve(&orm, "subnet", MAX_BATCH + 1).is_err());
    }

    #[test]
    fn test_uuid_generator() {
        let orm = store();
        let kit = Kit::system();
        let ids =
            auto_txn(&orm, &kit, |exec| UuidIdGenerator.batch(&kit, exec, "subnet", 3)).unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|id| id.len() == 32));
        assert_ne!(ids[0], ids[1]);
    }
}
