//! # WHERE Clause Compilation
//!
//! Walks a validated expression tree and emits a parameterized predicate.
//! Every atom is parenthesized and siblings are joined by their node's
//! operator; nested groups with more than one term are parenthesized as a
//! whole. Output is a pure function of its inputs.

use serde_json::Value;

use super::expression::{Expression, LogicOp, Rule};
use super::option::{ExprOption, SqlWhereOption};
use crate::binds::Binds;
use crate::errors::DalResult;
use crate::table::{ColumnType, ColumnTypes};

/// Compiled predicate without the `WHERE` keyword
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    expr: String,
    binds: Binds,
    top_op: Option<LogicOp>,
}

impl WhereClause {
    /// Predicate that matches every row
    pub fn empty() -> Self {
        Self::default()
    }

    /// Predicate text, e.g. `(a = :a) AND (b = :b)`
    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn binds(&self) -> &Binds {
        &self.binds
    }

    pub fn into_binds(self) -> Binds {
        self.binds
    }

    pub fn is_empty(&self) -> bool {
        self.expr.is_empty()
    }

    /// `WHERE <expr>`, or nothing for the match-all predicate
    pub fn sql(&self) -> String {
        if self.expr.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.expr)
        }
    }

    /// AND a trusted `field = value` predicate onto the compiled clause
    pub fn and_scope(&mut self, field: &str, value: Value) {
        let name = self.binds.bind(field, value);
        let term = format!("({} = :{})", field, name);

        if self.expr.is_empty() {
            self.expr = term;
            self.top_op = None;
            return;
        }

        self.expr = match self.top_op {
            Some(LogicOp::Or) => format!("({}) AND {}", self.expr, term),
            _ => format!("{} AND {}", self.expr, term),
        };
        self.top_op = Some(LogicOp::And);
    }
}

/// Compile a caller expression under a trusted where option
pub fn compile(
    expr: &Expression,
    opt: &ExprOption,
    where_opt: &SqlWhereOption,
) -> DalResult<WhereClause> {
    compile_with(expr, opt, where_opt, Binds::new())
}

/// Compile continuing an existing bind namespace.
///
/// The returned clause's binds hold `seed` followed by the new values.
pub fn compile_with(
    expr: &Expression,
    opt: &ExprOption,
    where_opt: &SqlWhereOption,
    seed: Binds,
) -> DalResult<WhereClause> {
    where_opt.validate()?;
    expr.validate(opt, true)?;

    let crowned = where_opt.crowned_rules();
    for rule in crowned {
        match rule {
            Rule::Atom(atom) => atom.validate(opt, false)?,
            Rule::Expr(nested) => Expression::and([nested.clone().into()]).validate(opt, false)?,
        }
    }

    let mut renderer = Renderer {
        priority: &where_opt.priority,
        types: &opt.rule_fields,
        binds: seed,
    };

    let fragment = if crowned.is_empty() {
        let rules: Vec<&Rule> = expr.rules.iter().collect();
        renderer.solo(expr.op, &rules)?
    } else if expr.op == LogicOp::And && where_opt.crowned_op() == LogicOp::And {
        let merged: Vec<&Rule> = expr.rules.iter().chain(crowned.iter()).collect();
        renderer.solo(LogicOp::And, &merged)?
    } else {
        renderer.mixed(expr, crowned, where_opt.crowned_op())?
    };

    Ok(WhereClause {
        expr: fragment.sql,
        binds: renderer.binds,
        top_op: (fragment.terms > 1).then_some(fragment.op),
    })
}

struct Fragment {
    sql: String,
    op: LogicOp,
    terms: usize,
}

impl Fragment {
    fn grouped(&self) -> String {
        if self.terms > 1 {
            format!("({})", self.sql)
        } else {
            self.sql.clone()
        }
    }
}

struct Renderer<'a> {
    priority: &'a [String],
    types: &'a ColumnTypes,
    binds: Binds,
}

impl Renderer<'_> {
    fn solo(&mut self, op: LogicOp, rules: &[&Rule]) -> DalResult<Fragment> {
        let ordered = prioritize(rules, self.priority);
        let terms = ordered
            .into_iter()
            .map(|rule| self.term(rule))
            .collect::<DalResult<Vec<_>>>()?;

        Ok(Fragment {
            sql: terms.join(&format!(" {} ", op.as_sql())),
            op,
            terms: terms.len(),
        })
    }

    fn term(&mut self, rule: &Rule) -> DalResult<String> {
        match rule {
            Rule::Atom(atom) => {
                let time = self.types.get(&atom.field) == Some(&ColumnType::Time);
                let sql = atom.op.render(&atom.field, &atom.value, time, &mut self.binds)?;
                Ok(format!("({})", sql))
            }
            Rule::Expr(nested) => {
                let rules: Vec<&Rule> = nested.rules.iter().collect();
                Ok(self.solo(nested.op, &rules)?.grouped())
            }
        }
    }

    /// Caller expression and crowned rules joined by the crowned operator.
    /// The side holding the first priority hit is emitted first.
    fn mixed(
        &mut self,
        expr: &Expression,
        crowned: &[Rule],
        crowned_op: LogicOp,
    ) -> DalResult<Fragment> {
        let expr_rules: Vec<&Rule> = expr.rules.iter().collect();
        let crown_rules: Vec<&Rule> = crowned.iter().collect();

        let crown_first = self
            .priority
            .iter()
            .find_map(|pri| {
                if has_field(&expr_rules, pri) {
                    Some(false)
                } else if has_field(&crown_rules, pri) {
                    Some(true)
                } else {
                    None
                }
            })
            .unwrap_or(false);

        let (first, second) = if crown_first {
            let crown = self.solo(LogicOp::And, &crown_rules)?;
            let caller = self.solo(expr.op, &expr_rules)?;
            (crown, caller)
        } else {
            let caller = self.solo(expr.op, &expr_rules)?;
            let crown = self.solo(LogicOp::And, &crown_rules)?;
            (caller, crown)
        };

        match (first.terms, second.terms) {
            (0, _) => Ok(second),
            (_, 0) => Ok(first),
            _ => Ok(Fragment {
                sql: format!(
                    "{} {} {}",
                    first.grouped(),
                    crowned_op.as_sql(),
                    second.grouped()
                ),
                op: crowned_op,
                terms: 2,
            }),
        }
    }
}

fn has_field(rules: &[&Rule], field: &str) -> bool {
    rules.iter().any(|r| r.field() == Some(field))
}

/// Rules on priority fields first, in priority order, keeping repeats of one
/// field (`1 < count < 3`); the rest follow in their original order.
fn prioritize<'r>(rules: &[&'r Rule], priority: &[String]) -> Vec<&'r Rule> {
    let mut hit = vec![false; rules.len()];
    let mut arranged = Vec::with_capacity(rules.len());

    for pri in priority {
        for (idx, rule) in rules.iter().enumerate() {
            if !hit[idx] && rule.field() == Some(pri.as_str()) {
                arranged.push(*rule);
                hit[idx] = true;
            }
        }
    }

    for (idx, rule) in rules.iter().enumerate() {
        if !hit[idx] {
            arranged.push(*rule);
        }
    }

    arranged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{AtomRule, Operator};
    use serde_json::json;

    fn opt(fields: &[(&str, ColumnType)]) -> ExprOption {
        ExprOption::new(
            fields
                .iter()
                .map(|(name, typ)| (name.to_string(), *typ))
                .collect(),
        )
    }

    fn ab() -> ExprOption {
        opt(&[("a", ColumnType::Numeric), ("b", ColumnType::Numeric)])
    }

    #[test]
    fn test_and_of_two_atoms() {
        let expr = Expression::all([AtomRule::eq("a", json!(1)), AtomRule::eq("b", json!(2))]);
        let clause = compile(&expr, &ab(), &SqlWhereOption::default()).unwrap();

        assert_eq!(clause.expr(), "(a = :a) AND (b = :b)");
        assert_eq!(clause.binds().get("a"), Some(&json!(1)));
        assert_eq!(clause.binds().get("b"), Some(&json!(2)));
        assert_eq!(clause.sql(), "WHERE (a = :a) AND (b = :b)");
    }

    #[test]
    fn test_mandatory_tenant_rule() {
        let fields = opt(&[
            ("id", ColumnType::String),
            ("name", ColumnType::String),
            ("bk_biz_id", ColumnType::Numeric),
        ]);
        let expr = Expression::all([AtomRule::eq("bk_biz_id", json!(100))]);
        let where_opt = SqlWhereOption::default().with_mandatory_eq("tenant_id", json!("t1"));

        let clause = compile(&expr, &fields, &where_opt).unwrap();
        assert_eq!(
            clause.expr(),
            "(bk_biz_id = :bk_biz_id) AND (tenant_id = :tenant_id)"
        );
        let binds: Vec<(&str, &Value)> = clause.binds().iter().collect();
        assert_eq!(
            binds,
            vec![("bk_biz_id", &json!(100)), ("tenant_id", &json!("t1"))]
        );
    }

    #[test]
    fn test_empty_expression_matches_all() {
        let clause = compile(&Expression::default(), &ab(), &SqlWhereOption::default()).unwrap();
        assert!(clause.is_empty());
        assert_eq!(clause.sql(), "");
        assert!(clause.binds().is_empty());
    }

    #[test]
    fn test_empty_expression_with_mandatory_rule() {
        let where_opt = SqlWhereOption::default().with_mandatory_eq("tenant_id", json!("t1"));
        let clause = compile(&Expression::default(), &ab(), &where_opt).unwrap();
        assert_eq!(clause.expr(), "(tenant_id = :tenant_id)");

        let where_opt = where_opt.with_crowned_op(LogicOp::Or);
        let clause = compile(&Expression::default(), &ab(), &where_opt).unwrap();
        assert_eq!(clause.expr(), "(tenant_id = :tenant_id)");
    }

    #[test]
    fn test_nested_groups_keep_precedence() {
        let fields = opt(&[
            ("a", ColumnType::Numeric),
            ("b", ColumnType::Numeric),
            ("c", ColumnType::Numeric),
        ]);
        let expr = Expression::and([
            AtomRule::eq("c", json!(3)).into(),
            Expression::or([
                AtomRule::eq("a", json!(1)).into(),
                AtomRule::eq("b", json!(2)).into(),
            ])
            .into(),
        ]);

        let clause = compile(&expr, &fields, &SqlWhereOption::default()).unwrap();
        assert_eq!(clause.expr(), "(c = :c) AND ((a = :a) OR (b = :b))");
    }

    #[test]
    fn test_single_rule_group_is_not_double_wrapped() {
        let expr = Expression::and([Expression::or([AtomRule::eq("a", json!(1)).into()]).into()]);
        let clause = compile(&expr, &ab(), &SqlWhereOption::default()).unwrap();
        assert_eq!(clause.expr(), "(a = :a)");
    }

    #[test]
    fn test_priority_reorders_and_keeps_repeats() {
        let fields = opt(&[
            ("name", ColumnType::String),
            ("count", ColumnType::Numeric),
            ("id", ColumnType::String),
        ]);
        let expr = Expression::all([
            AtomRule::eq("name", json!("x")),
            AtomRule::gt("count", json!(1)),
            AtomRule::eq("id", json!("00000001")),
            AtomRule::lt("count", json!(3)),
        ]);
        let where_opt = SqlWhereOption::new(vec!["id".into(), "count".into()]);

        let clause = compile(&expr, &fields, &where_opt).unwrap();
        assert_eq!(
            clause.expr(),
            "(id = :id) AND (count > :count) AND (count < :count_2) AND (name = :name)"
        );
        assert_eq!(clause.binds().get("count_2"), Some(&json!(3)));
    }

    #[test]
    fn test_or_expression_with_crowned_and() {
        let expr = Expression::or([
            AtomRule::eq("a", json!(1)).into(),
            AtomRule::eq("b", json!(2)).into(),
        ]);
        let where_opt = SqlWhereOption::default().with_mandatory_eq("tenant_id", json!("t1"));

        let clause = compile(&expr, &ab(), &where_opt).unwrap();
        assert_eq!(
            clause.expr(),
            "((a = :a) OR (b = :b)) AND (tenant_id = :tenant_id)"
        );
    }

    #[test]
    fn test_crowned_side_first_on_priority_hit() {
        let expr = Expression::or([
            AtomRule::eq("a", json!(1)).into(),
            AtomRule::eq("b", json!(2)).into(),
        ]);
        let where_opt = SqlWhereOption::new(vec!["vpc_id".into()])
            .with_mandatory_eq("vpc_id", json!("v1"))
            .with_mandatory_eq("region", json!("r1"));

        let clause = compile(&expr, &ab(), &where_opt).unwrap();
        assert_eq!(
            clause.expr(),
            "((vpc_id = :vpc_id) AND (region = :region)) AND ((a = :a) OR (b = :b))"
        );
        let names: Vec<&str> = clause.binds().names().collect();
        assert_eq!(names, vec!["vpc_id", "region", "a", "b"]);
    }

    #[test]
    fn test_crowned_rules_bypass_whitelist_but_caller_does_not() {
        let where_opt = SqlWhereOption::default().with_mandatory_eq("tenant_id", json!("t1"));
        let caller = Expression::all([AtomRule::eq("tenant_id", json!("t2"))]);
        assert!(compile(&caller, &ab(), &where_opt).is_err());
    }

    #[test]
    fn test_invalid_where_option_rejected() {
        let expr = Expression::all([AtomRule::eq("a", json!(1))]);
        let err = compile(&expr, &ab(), &SqlWhereOption::new(Vec::new())).unwrap_err();
        assert!(matches!(err, crate::errors::DalError::InvalidParameter(_)));
    }

    #[test]
    fn test_time_values_compile_normalized() {
        let fields = opt(&[("created_at", ColumnType::Time)]);
        let expr = Expression::all([AtomRule::new(
            "created_at",
            Operator::GreaterThanEqual,
            json!("2024-03-01T10:00:00+02:00"),
        )]);
        let clause = compile(&expr, &fields, &SqlWhereOption::default()).unwrap();
        assert_eq!(clause.binds().get("created_at"), Some(&json!("2024-03-01T08:00:00Z")));
    }

    #[test]
    fn test_compile_with_seed_avoids_collisions() {
        let mut seed = Binds::new();
        seed.bind("a", json!("new"));

        let expr = Expression::all([AtomRule::eq("a", json!(1))]);
        let clause = compile_with(&expr, &ab(), &SqlWhereOption::default(), seed).unwrap();
        assert_eq!(clause.expr(), "(a = :a_2)");
        assert_eq!(clause.binds().get("a"), Some(&json!("new")));
        assert_eq!(clause.binds().get("a_2"), Some(&json!(1)));
    }

    #[test]
    fn test_and_scope() {
        let mut clause = WhereClause::empty();
        clause.and_scope("tenant_id", json!("t1"));
        assert_eq!(clause.expr(), "(tenant_id = :tenant_id)");

        let expr = Expression::or([
            AtomRule::eq("a", json!(1)).into(),
            AtomRule::eq("b", json!(2)).into(),
        ]);
        let mut clause = compile(&expr, &ab(), &SqlWhereOption::default()).unwrap();
        clause.and_scope("tenant_id", json!("t1"));
        assert_eq!(
            clause.expr(),
            "((a = :a) OR (b = :b)) AND (tenant_id = :tenant_id)"
        );

        let expr = Expression::all([AtomRule::eq("a", json!(1)), AtomRule::eq("b", json!(2))]);
        let mut clause = compile(&expr, &ab(), &SqlWhereOption::default()).unwrap();
        clause.and_scope("tenant_id", json!("t1"));
        assert_eq!(
            clause.expr(),
            "(a = :a) AND (b = :b) AND (tenant_id = :tenant_id)"
        );
    }
}
