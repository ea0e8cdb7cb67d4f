//! # Filter Compiler
//!
//! Turns caller-supplied logical expressions into parameterized WHERE
//! clauses.
//!
//! Field names end up in SQL as raw identifiers so that JSON sub-paths such
//! as `extension.self_link` can be addressed. The whitelist check against the
//! table's column types is therefore the injection defense: no field that is
//! not declared ever reaches the SQL text. Crowned rules from
//! `SqlWhereOption` come from trusted code and skip that check.

mod compile;
mod expression;
mod operator;
mod option;

pub use compile::{compile, compile_with, WhereClause};
pub use expression::{AtomRule, Expression, LogicOp, Rule};
pub use operator::Operator;
pub use option::{CrownedOption, ExprOption, SqlWhereOption};

