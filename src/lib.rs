//! dalcore - data-access core for cloud resource services
//!
//! Declared columns per table, compilers that turn caller filters, pages and
//! partial records into parameterized SQL, and a table DAO that runs every
//! mutation as one transaction together with its id reservation and audit
//! entries.

pub mod audit;
pub mod binds;
pub mod config;
pub mod dao;
pub mod errors;
pub mod filter;
pub mod idgen;
pub mod kit;
pub mod orm;
pub mod page;
pub mod resource;
pub mod table;
pub mod update;

pub use audit::{Audit, AuditAction, AuditEntry, TableAudit};
pub use config::{DalConfig, TenantConfig};
pub use dao::{CountGroup, CountOption, ListOption, ListResult, TableDao};
pub use errors::{DalError, DalResult};
pub use filter::{AtomRule, Expression, LogicOp, Operator, Rule, SqlWhereOption};
pub use idgen::{IdGenerator, TableIdGenerator, UuidIdGenerator};
pub use kit::Kit;
pub use orm::{
    auto_txn, do_with, Executor, Orm, SqliteOrm, StatementModifier, SuffixSharding, TableSharding,
};
pub use page::{Order, PageSpec};
pub use table::{ColumnDescriptor, ColumnSet, ColumnType, Record};
pub use update::FieldOptions;
