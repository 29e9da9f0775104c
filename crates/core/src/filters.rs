//! 出队过滤条件
//!
//! 过滤请求的形式为 `{"filters": {"and": [...], "or": [...], "not": [...]}}`，
//! 直接给出数组时等价于 `and`。每个过滤条件作用于条目的一列，
//! `data` 列可以通过 `a__b` 形式的字段路径访问嵌套值。

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::PrioritizedItem;
use crate::{SchedulerError, SchedulerResult};

/// 比较运算符，同时接受符号与单词两种写法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "==", alias = "eq")]
    Eq,
    #[serde(rename = "!=", alias = "ne")]
    Ne,
    #[serde(rename = ">", alias = "gt")]
    Gt,
    #[serde(rename = "<", alias = "lt")]
    Lt,
    #[serde(rename = ">=", alias = "gte")]
    Gte,
    #[serde(rename = "<=", alias = "lte")]
    Lte,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "starts_with")]
    StartsWith,
    #[serde(rename = "is_null")]
    IsNull,
    #[serde(rename = "is_not_null")]
    IsNotNull,
}

impl FromStr for FilterOperator {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s {
            "==" | "eq" => FilterOperator::Eq,
            "!=" | "ne" => FilterOperator::Ne,
            ">" | "gt" => FilterOperator::Gt,
            "<" | "lt" => FilterOperator::Lt,
            ">=" | "gte" => FilterOperator::Gte,
            "<=" | "lte" => FilterOperator::Lte,
            "in" => FilterOperator::In,
            "not_in" => FilterOperator::NotIn,
            "contains" => FilterOperator::Contains,
            "starts_with" => FilterOperator::StartsWith,
            "is_null" => FilterOperator::IsNull,
            "is_not_null" => FilterOperator::IsNotNull,
            other => {
                return Err(SchedulerError::validation_error(format!(
                    "不支持的过滤运算符: {other}"
                )))
            }
        };
        Ok(op)
    }
}

impl FilterOperator {
    fn apply(&self, lhs: &Value, rhs: &Value) -> bool {
        use std::cmp::Ordering;

        match self {
            FilterOperator::Eq => values_equal(lhs, rhs),
            FilterOperator::Ne => !values_equal(lhs, rhs),
            FilterOperator::Gt => compare(lhs, rhs) == Some(Ordering::Greater),
            FilterOperator::Lt => compare(lhs, rhs) == Some(Ordering::Less),
            FilterOperator::Gte => matches!(
                compare(lhs, rhs),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::Lte => {
                matches!(compare(lhs, rhs), Some(Ordering::Less | Ordering::Equal))
            }
            FilterOperator::In => match rhs {
                Value::Array(values) => values.iter().any(|v| values_equal(lhs, v)),
                _ => false,
            },
            FilterOperator::NotIn => match rhs {
                Value::Array(values) => !values.iter().any(|v| values_equal(lhs, v)),
                _ => false,
            },
            FilterOperator::Contains => match (lhs, rhs) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                (Value::Array(values), needle) => values.iter().any(|v| values_equal(v, needle)),
                _ => false,
            },
            FilterOperator::StartsWith => match (lhs, rhs) {
                (Value::String(s), Value::String(prefix)) => s.starts_with(prefix.as_str()),
                _ => false,
            },
            FilterOperator::IsNull => lhs.is_null(),
            FilterOperator::IsNotNull => !lhs.is_null(),
        }
    }
}

fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Option<std::cmp::Ordering> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// 可过滤的条目列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterColumn {
    Data,
    Hash,
    Priority,
    Id,
    SchedulerId,
}

impl FromStr for FilterColumn {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data" => Ok(FilterColumn::Data),
            "hash" => Ok(FilterColumn::Hash),
            "priority" => Ok(FilterColumn::Priority),
            "id" => Ok(FilterColumn::Id),
            "scheduler_id" => Ok(FilterColumn::SchedulerId),
            other => Err(SchedulerError::validation_error(format!(
                "不支持的过滤列: {other}"
            ))),
        }
    }
}

/// 单个过滤条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: FilterColumn,
    #[serde(default)]
    pub field: Option<String>,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

impl Filter {
    /// 以字符串形式构造过滤条件，运算符或列名未知时返回校验错误
    pub fn new(
        column: &str,
        field: Option<&str>,
        operator: &str,
        value: Value,
    ) -> SchedulerResult<Self> {
        Ok(Self {
            column: column.parse()?,
            field: field.map(str::to_string),
            operator: operator.parse()?,
            value,
        })
    }

    pub fn matches(&self, item: &PrioritizedItem) -> bool {
        // data 列只借用，字段路径在借用上逐层下探
        let column: Cow<'_, Value> = match self.column {
            FilterColumn::Data => Cow::Borrowed(&item.data),
            FilterColumn::Hash => Cow::Owned(
                item.hash
                    .as_ref()
                    .map(|h| Value::String(h.clone()))
                    .unwrap_or(Value::Null),
            ),
            FilterColumn::Priority => Cow::Owned(Value::from(item.priority)),
            FilterColumn::Id => Cow::Owned(Value::String(item.id.to_string())),
            FilterColumn::SchedulerId => Cow::Owned(Value::String(item.scheduler_id.clone())),
        };

        let lhs = match &self.field {
            Some(path) => path
                .split("__")
                .try_fold(column.as_ref(), |value, key| value.get(key)),
            None => Some(column.as_ref()),
        };

        self.operator.apply(lhs.unwrap_or(&Value::Null), &self.value)
    }
}

/// 组合方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    And,
    Or,
    Not,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FilterGroups {
    List(Vec<Filter>),
    Grouped(BTreeMap<LogicalOperator, Vec<Filter>>),
}

#[derive(Deserialize)]
struct FilterRequestRepr {
    filters: FilterGroups,
}

impl From<FilterRequestRepr> for FilterRequest {
    fn from(repr: FilterRequestRepr) -> Self {
        let filters = match repr.filters {
            FilterGroups::List(list) => BTreeMap::from([(LogicalOperator::And, list)]),
            FilterGroups::Grouped(groups) => groups,
        };
        Self { filters }
    }
}

/// 出队过滤请求
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "FilterRequestRepr")]
pub struct FilterRequest {
    pub filters: BTreeMap<LogicalOperator, Vec<Filter>>,
}

impl FilterRequest {
    /// 所有条件都必须满足
    pub fn all(filters: Vec<Filter>) -> Self {
        Self {
            filters: BTreeMap::from([(LogicalOperator::And, filters)]),
        }
    }

    pub fn with(mut self, op: LogicalOperator, filters: Vec<Filter>) -> Self {
        self.filters.entry(op).or_default().extend(filters);
        self
    }

    /// `and` 组全部满足、`or` 组至少一个满足（非空时）、`not` 组全部不满足
    pub fn matches(&self, item: &PrioritizedItem) -> bool {
        self.filters.iter().all(|(op, filters)| match op {
            LogicalOperator::And => filters.iter().all(|f| f.matches(item)),
            LogicalOperator::Or => filters.is_empty() || filters.iter().any(|f| f.matches(item)),
            LogicalOperator::Not => !filters.iter().any(|f| f.matches(item)),
        })
    }
}
