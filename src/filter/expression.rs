//! # Filter Expression Tree
//!
//! Caller-supplied predicate trees. Wire form:
//!
//! ```json
//! {"op": "and", "rules": [
//!     {"field": "name", "op": "eq", "value": "web"},
//!     {"op": "or", "rules": [...]}
//! ]}
//! ```
//!
//! `{}` is the empty expression and matches every row.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::operator::Operator;
use super::option::ExprOption;
use crate::errors::{DalError, DalResult};
use crate::table::{identifier_pattern, ColumnType};

/// Logical operator combining sibling rules
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicOp {
    #[default]
    And,
    Or,
}

impl LogicOp {
    /// SQL keyword
    pub fn as_sql(&self) -> &'static str {
        match self {
            LogicOp::And => "AND",
            LogicOp::Or => "OR",
        }
    }
}

impl fmt::Display for LogicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

/// Basic query rule: `field op value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomRule {
    /// Field to filter on
    pub field: String,

    /// Comparison operator
    pub op: Operator,

    /// Value to compare against
    pub value: Value,
}

impl AtomRule {
    pub fn new(field: impl Into<String>, op: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, Operator::Equal, value)
    }

    pub fn neq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, Operator::NotEqual, value)
    }

    pub fn gt(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, Operator::GreaterThan, value)
    }

    pub fn lt(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, Operator::LessThan, value)
    }

    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, Operator::In, Value::Array(values))
    }

    /// Validate against the whitelist in `opt`, or only structurally when
    /// `check_fields` is false (trusted rules).
    pub fn validate(&self, opt: &ExprOption, check_fields: bool) -> DalResult<()> {
        if self.field.is_empty() {
            return Err(DalError::invalid_parameter("rule field is empty"));
        }
        if !self
            .field
            .split('.')
            .all(|seg| identifier_pattern().map_or(false, |p| p.is_match(seg)))
        {
            return Err(DalError::invalid_parameter(format!(
                "rule field {:?} is not a valid identifier",
                self.field
            )));
        }
        if self.value.is_null() {
            return Err(DalError::invalid_parameter(format!(
                "rule {} value can not be null",
                self.field
            )));
        }

        if check_fields {
            let Some(column_type) = opt.rule_fields.get(&self.field) else {
                return Err(DalError::invalid_parameter(format!(
                    "rule field {} is not allowed",
                    self.field
                )));
            };
            if self.op.compares_field_value() {
                check_field_value(&self.field, &self.value, *column_type)?;
            }
        }

        self.op.validate(&self.field, &self.value, opt.max_in_limit)
    }
}

fn check_field_value(field: &str, value: &Value, column_type: ColumnType) -> DalResult<()> {
    if let Value::Array(items) = value {
        return items
            .iter()
            .try_for_each(|item| check_field_value(field, item, column_type));
    }

    let ok = match column_type {
        ColumnType::String => value.is_string(),
        ColumnType::Numeric => value.is_number(),
        ColumnType::Boolean => value.is_boolean(),
        ColumnType::Time => value
            .as_str()
            .map_or(false, |s| crate::table::normalize_time(s).is_some()),
        ColumnType::Json => true,
    };

    if ok {
        Ok(())
    } else {
        Err(DalError::invalid_parameter(format!(
            "invalid {} value, should be a {}",
            field, column_type
        )))
    }
}

/// One entry in an expression's rule list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Rule {
    Atom(AtomRule),
    Expr(Expression),
}

impl Rule {
    /// Field of an atom rule; nested expressions have none
    pub fn field(&self) -> Option<&str> {
        match self {
            Rule::Atom(atom) => Some(&atom.field),
            Rule::Expr(_) => None,
        }
    }
}

impl From<AtomRule> for Rule {
    fn from(atom: AtomRule) -> Self {
        Rule::Atom(atom)
    }
}

impl From<Expression> for Rule {
    fn from(expr: Expression) -> Self {
        Rule::Expr(expr)
    }
}

impl<'de> Deserialize<'de> for Rule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;

        let raw = Value::deserialize(deserializer)?;
        let is_atom = ["field", "op", "value"].iter().all(|k| raw.get(k).is_some());
        let is_expr = ["op", "rules"].iter().all(|k| raw.get(k).is_some());

        if is_atom {
            serde_json::from_value(raw).map(Rule::Atom).map_err(D::Error::custom)
        } else if is_expr {
            serde_json::from_value(raw).map(Rule::Expr).map_err(D::Error::custom)
        } else {
            Err(D::Error::custom(format!("unknown expression rule type: {}", raw)))
        }
    }
}

/// Logical node over a list of rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawExpression")]
pub struct Expression {
    pub op: LogicOp,
    pub rules: Vec<Rule>,
}

#[derive(Deserialize)]
struct RawExpression {
    op: Option<LogicOp>,
    #[serde(default)]
    rules: Option<Vec<Rule>>,
}

impl TryFrom<RawExpression> for Expression {
    type Error = String;

    fn try_from(raw: RawExpression) -> Result<Self, Self::Error> {
        let rules = raw.rules.unwrap_or_default();
        match raw.op {
            Some(op) => Ok(Expression { op, rules }),
            None if rules.is_empty() => Ok(Expression::default()),
            None => Err("expression operator is empty but rules are not".to_string()),
        }
    }
}

impl Expression {
    pub fn new(op: LogicOp, rules: impl IntoIterator<Item = Rule>) -> Self {
        Self {
            op,
            rules: rules.into_iter().collect(),
        }
    }

    pub fn and(rules: impl IntoIterator<Item = Rule>) -> Self {
        Self::new(LogicOp::And, rules)
    }

    pub fn or(rules: impl IntoIterator<Item = Rule>) -> Self {
        Self::new(LogicOp::Or, rules)
    }

    /// Shorthand for `and` over atom rules
    pub fn all(atoms: impl IntoIterator<Item = AtomRule>) -> Self {
        Self::and(atoms.into_iter().map(Rule::Atom))
    }

    /// Parse the JSON wire form; malformed input is an invalid parameter
    pub fn from_json(raw: &str) -> DalResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Validate the whole tree.
    ///
    /// The top level may be empty; nested expressions may not.
    pub fn validate(&self, opt: &ExprOption, check_fields: bool) -> DalResult<()> {
        self.validate_level(opt, check_fields)
    }

    fn validate_level(&self, opt: &ExprOption, check_fields: bool) -> DalResult<()> {
        if self.rules.len() > opt.max_rules_limit {
            return Err(DalError::invalid_parameter(format!(
                "expression has {} rules, exceeds maximum {}",
                self.rules.len(),
                opt.max_rules_limit
            )));
        }

        for rule in &self.rules {
            match rule {
                Rule::Atom(atom) => atom.validate(opt, check_fields)?,
                Rule::Expr(nested) => {
                    if nested.is_empty() {
                        return Err(DalError::invalid_parameter(
                            "nested expression has no rules",
                        ));
                    }
                    nested.validate_level(opt, check_fields)?;
                }
            }
        }

        Ok(())
    }
}
