//! Statement modifiers
//!
//! A modifier rewrites a statement before it reaches the store. Modifiers
//! wrap the executor, so DAOs never repeat cross-cutting predicates.

use std::sync::Arc;

use super::statement::Statement;
use super::Executor;
use crate::errors::DalResult;
use crate::kit::Kit;
use crate::table::Row;

/// Rewrites statements on their way to the store
pub trait StatementModifier: Send + Sync {
    fn modify(&self, kit: &Kit, stmt: &mut Statement) -> DalResult<()>;
}

/// Executor that applies modifiers, in order, before delegating
pub struct ScopedExecutor<'a> {
    inner: &'a mut dyn Executor,
    kit: &'a Kit,
    modifiers: &'a [Arc<dyn StatementModifier>],
}

impl<'a> ScopedExecutor<'a> {
    pub fn new(
        inner: &'a mut dyn Executor,
        kit: &'a Kit,
        modifiers: &'a [Arc<dyn StatementModifier>],
    ) -> Self {
        Self {
            inner,
            kit,
            modifiers,
        }
    }

    fn apply(&self, stmt: &Statement) -> DalResult<Statement> {
        let mut stmt = stmt.clone();
        for modifier in self.modifiers {
            modifier.modify(self.kit, &mut stmt)?;
        }
        Ok(stmt)
    }
}

impl Executor for ScopedExecutor<'_> {
    fn query(&mut self, stmt: &Statement) -> DalResult<Vec<Row>> {
        let stmt = self.apply(stmt)?;
        self.inner.query(&stmt)
    }

    fn execute(&mut self, stmt: &Statement) -> DalResult<u64> {
        let stmt = self.apply(stmt)?;
        self.inner.execute(&stmt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DalError;
    use crate::filter::WhereClause;
    use crate::orm::Delete;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        seen: Vec<String>,
    }

    impl Executor for Recorder {
        fn query(&mut self, stmt: &Statement) -> DalResult<Vec<Row>> {
            self.seen.push(stmt.render()?.0);
            Ok(Vec::new())
        }

        fn execute(&mut self, stmt: &Statement) -> DalResult<u64> {
            self.seen.push(stmt.render()?.0);
            Ok(1)
        }
    }

    struct ScopeTo(&'static str);

    impl StatementModifier for ScopeTo {
        fn modify(&self, _kit: &Kit, stmt: &mut Statement) -> DalResult<()> {
            if let Some(filter) = stmt.filter_mut() {
                filter.and_scope(self.0, json!(1));
            }
            Ok(())
        }
    }

    struct Reject;

    impl StatementModifier for Reject {
        fn modify(&self, _kit: &Kit, _stmt: &mut Statement) -> DalResult<()> {
            Err(DalError::invalid_parameter("rejected"))
        }
    }

    fn delete_all() -> Statement {
        Statement::Delete(Delete {
            table: "item".into(),
            filter: WhereClause::empty(),
        })
    }

    #[test]
    fn test_modifiers_apply_in_order() {
        let mut recorder = Recorder::default();
        let kit = Kit::system();
        let modifiers: Vec<Arc<dyn StatementModifier>> =
            vec![Arc::new(ScopeTo("a")), Arc::new(ScopeTo("b"))];

        let mut exec = ScopedExecutor::new(&mut recorder, &kit, &modifiers);
        exec.execute(&delete_all()).unwrap();

        assert_eq!(recorder.seen, vec!["DELETE FROM item WHERE (a = :a) AND (b = :b)"]);
    }

    #[test]
    fn test_modifier_error_stops_statement() {
        let mut recorder = Recorder::default();
        let kit = Kit::system();
        let modifiers: Vec<Arc<dyn StatementModifier>> = vec![Arc::new(Reject)];

        let mut exec = ScopedExecutor::new(&mut recorder, &kit, &modifiers);
        assert!(exec.query(&delete_all()).is_err());
        assert!(recorder.seen.is_empty());
    }
}
