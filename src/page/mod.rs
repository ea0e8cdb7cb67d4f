//! # Page/Sort Compiler
//!
//! Turns a page spec into an `ORDER BY ... LIMIT ... OFFSET ...` fragment.
//! Count-only pages never reach this compiler; callers issue a count
//! statement from the filter output alone.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DalConfig;
use crate::errors::{DalError, DalResult};
use crate::table::{identifier_pattern, ColumnSet};

/// Largest page a caller may request unless configured otherwise
pub const DEFAULT_MAX_LIMIT: u32 = 500;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    #[serde(rename = "ASC")]
    Ascending,
    #[serde(rename = "DESC")]
    Descending,
}

impl Order {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Order::Ascending => "ASC",
            Order::Descending => "DESC",
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

/// Caller page request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageSpec {
    /// Return only the number of matching rows
    pub count: bool,

    /// Rows to skip
    pub start: i64,

    /// Rows to return
    pub limit: u32,

    /// Sort column; empty means "use the default"
    pub sort: String,

    pub order: Option<Order>,
}

impl PageSpec {
    /// A page of `limit` rows starting at `start`
    pub fn new(start: i64, limit: u32) -> Self {
        Self {
            start,
            limit,
            ..Default::default()
        }
    }

    /// A count-only page
    pub fn count_only() -> Self {
        Self {
            count: true,
            ..Default::default()
        }
    }

    pub fn with_sort(mut self, sort: impl Into<String>, order: Order) -> Self {
        self.sort = sort.into();
        self.order = Some(order);
        self
    }

    /// Parse the JSON wire form; malformed input is an invalid parameter
    pub fn from_json(raw: &str) -> DalResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn validate(&self, opt: &PageOption) -> DalResult<()> {
        if self.count {
            if self.start != 0 || self.limit != 0 || !self.sort.is_empty() || self.order.is_some() {
                return Err(DalError::invalid_parameter(
                    "page.count is enabled, start, limit, sort and order should be empty",
                ));
            }
            return Ok(());
        }

        if self.limit == 0 {
            return Err(DalError::invalid_parameter("page.limit is required"));
        }
        if self.limit > opt.max_limit {
            return Err(DalError::invalid_parameter(format!(
                "page.limit {} exceeds maximum {}",
                self.limit, opt.max_limit
            )));
        }
        if self.start < 0 {
            return Err(DalError::invalid_parameter("page.start can not be negative"));
        }
        if !self.sort.is_empty() && !identifier_pattern()?.is_match(&self.sort) {
            return Err(DalError::invalid_parameter(format!(
                "page.sort {:?} is not a valid column name",
                self.sort
            )));
        }
        Ok(())
    }

    /// Reject a sort column the table does not declare
    pub fn validate_sort(&self, columns: &ColumnSet) -> DalResult<()> {
        if !self.sort.is_empty() && !columns.has(&self.sort) {
            return Err(DalError::invalid_parameter(format!(
                "page.sort field {} is not a column",
                self.sort
            )));
        }
        Ok(())
    }
}

/// Fallback sort column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOption {
    pub field: String,
}

/// Server-side paging policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOption {
    pub max_limit: u32,
    pub default_sort: Option<SortOption>,
}

impl Default for PageOption {
    fn default() -> Self {
        Self {
            max_limit: DEFAULT_MAX_LIMIT,
            default_sort: None,
        }
    }
}

impl PageOption {
    pub fn from_config(config: &DalConfig) -> Self {
        Self {
            max_limit: config.max_page_limit,
            default_sort: config
                .default_sort
                .as_ref()
                .map(|field| SortOption { field: field.clone() }),
        }
    }

    pub fn with_default_sort(mut self, field: impl Into<String>) -> Self {
        self.default_sort = Some(SortOption { field: field.into() });
        self
    }
}

/// Compile a non-count page into its SQL tail
pub fn compile(page: &PageSpec, opt: &PageOption) -> DalResult<String> {
    page.validate(opt)?;
    if page.count {
        return Err(DalError::invalid_parameter(
            "count pages have no ORDER BY/LIMIT fragment",
        ));
    }

    let sort = if page.sort.is_empty() {
        opt.default_sort.as_ref().map(|s| s.field.as_str())
    } else {
        Some(page.sort.as_str())
    };

    let mut sql = String::new();
    if let Some(sort) = sort {
        sql.push_str("ORDER BY ");
        sql.push_str(sort);
        if let Some(order) = page.order {
            sql.push(' ');
            sql.push_str(order.as_sql());
        }
        sql.push(' ');
    }
    sql.push_str(&format!("LIMIT {} OFFSET {}", page.limit, page.start));

    Ok(sql)
}
