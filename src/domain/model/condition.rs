use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Selector;

/// Comparison operators used by condition evaluation.
///
/// Both the snake_case names and the symbolic/spaced forms used by
/// workflow editors are accepted.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    Contains,
    #[serde(alias = "not contains")]
    NotContains,
    #[serde(alias = "start with", alias = "starts_with")]
    StartWith,
    #[serde(alias = "end with", alias = "ends_with")]
    EndWith,
    Is,
    #[serde(alias = "is not")]
    IsNot,
    Empty,
    #[serde(alias = "not empty")]
    NotEmpty,
    In,
    #[serde(alias = "not in")]
    NotIn,
    #[serde(alias = "all of")]
    AllOf,
    #[serde(alias = "=", alias = "equals")]
    Equal,
    #[serde(alias = "≠", alias = "!=")]
    NotEqual,
    #[serde(alias = ">", alias = "greater_than")]
    GreaterThan,
    #[serde(alias = "<", alias = "less_than")]
    LessThan,
    #[serde(
        alias = "≥",
        alias = ">=",
        alias = "greater_than_or_equal",
        alias = "greater_or_equal"
    )]
    GreaterOrEqual,
    #[serde(
        alias = "≤",
        alias = "<=",
        alias = "less_than_or_equal",
        alias = "less_or_equal"
    )]
    LessOrEqual,
    #[serde(alias = "is_null")]
    Null,
    #[serde(alias = "not null", alias = "is_not_null")]
    NotNull,
    Exists,
    #[serde(alias = "not exists")]
    NotExists,
}

impl ComparisonOperator {
    /// Operators that never look at the right-hand value.
    pub fn is_unary(&self) -> bool {
        matches!(
            self,
            ComparisonOperator::Empty
                | ComparisonOperator::NotEmpty
                | ComparisonOperator::Null
                | ComparisonOperator::NotNull
                | ComparisonOperator::Exists
                | ComparisonOperator::NotExists
        )
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    #[default]
    And,
    Or,
}

/// A single comparison against a pool variable.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub variable_selector: Selector,
    pub comparison_operator: ComparisonOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(default, rename = "varType", skip_serializing_if = "Option::is_none")]
    pub var_type: Option<String>,
}

/// A named group of conditions; the case id doubles as the branch handle.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Case {
    pub case_id: String,
    #[serde(default)]
    pub logical_operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Error handling mode for iteration failures.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IterationErrorMode {
    #[default]
    Terminated,
    #[serde(alias = "remove_abnormal_output", alias = "remove-abnormal")]
    RemoveAbnormalOutput,
    #[serde(alias = "continue_on_error")]
    ContinueOnError,
}
