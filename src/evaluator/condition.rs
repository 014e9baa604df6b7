use serde::Serialize;
use serde_json::Value;

use crate::core::variable_pool::VariablePool;
use crate::domain::execution::Segment;
use crate::domain::model::{Case, ComparisonOperator, Condition, LogicalOperator};
use crate::error::{ErrorCode, ErrorContext, NodeError};

/// Handle selected when no case matches.
pub const ELSE_HANDLE: &str = "false";

/// Per-condition results of one evaluated case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseEvaluation {
    pub case_id: String,
    /// One entry per condition actually evaluated, in order.
    pub condition_results: Vec<bool>,
    pub matched: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CasesOutcome {
    pub selected: String,
    /// Cases evaluated before (and including) the selected one.
    pub evaluations: Vec<CaseEvaluation>,
}

/// Evaluate IfElse cases in order. The first matching case wins and later
/// cases are not evaluated; no match selects [`ELSE_HANDLE`].
///
/// On error the cases evaluated so far are attached to the error context
/// metadata under `evaluations`.
pub fn evaluate_cases(cases: &[Case], pool: &VariablePool) -> Result<CasesOutcome, NodeError> {
    let mut evaluations = Vec::with_capacity(cases.len());
    for case in cases {
        let evaluation = evaluate_case(case, pool).map_err(|e| {
            let message = e.to_string();
            e.with_context(
                ErrorContext::non_retryable(ErrorCode::ConditionError, message)
                    .with_metadata(serde_json::json!({ "evaluations": evaluations })),
            )
        })?;
        let matched = evaluation.matched;
        evaluations.push(evaluation);
        if matched {
            return Ok(CasesOutcome {
                selected: case.case_id.clone(),
                evaluations,
            });
        }
    }
    Ok(CasesOutcome {
        selected: ELSE_HANDLE.to_string(),
        evaluations,
    })
}

/// Evaluate a single case (AND/OR logic, short-circuiting).
pub fn evaluate_case(case: &Case, pool: &VariablePool) -> Result<CaseEvaluation, NodeError> {
    let mut condition_results = Vec::with_capacity(case.conditions.len());
    let mut matched = match case.logical_operator {
        LogicalOperator::And => true,
        LogicalOperator::Or => false,
    };
    for cond in &case.conditions {
        let result = evaluate_condition(cond, pool)?;
        condition_results.push(result);
        match case.logical_operator {
            LogicalOperator::And if !result => {
                matched = false;
                break;
            }
            LogicalOperator::Or if result => {
                matched = true;
                break;
            }
            _ => {}
        }
    }
    // An empty case never matches.
    if case.conditions.is_empty() {
        matched = false;
    }
    Ok(CaseEvaluation {
        case_id: case.case_id.clone(),
        condition_results,
        matched,
    })
}

/// Evaluate a single condition against the pool.
///
/// A missing variable compares as none. Ordering operators on a present
/// non-numeric value are an error, not `false`.
pub fn evaluate_condition(cond: &Condition, pool: &VariablePool) -> Result<bool, NodeError> {
    let none = Segment::None;
    let actual = pool.get(&cond.variable_selector).unwrap_or(&none);
    let expected = &cond.value;
    let op = cond.comparison_operator;

    let result = match op {
        // --- String/Array ---
        ComparisonOperator::Contains => eval_contains(actual, expected),
        ComparisonOperator::NotContains => !eval_contains(actual, expected),
        ComparisonOperator::StartWith => actual
            .to_display_string()
            .starts_with(&value_to_string(expected)),
        ComparisonOperator::EndWith => actual
            .to_display_string()
            .ends_with(&value_to_string(expected)),

        // --- Exact equality ---
        ComparisonOperator::Is => actual.to_display_string() == value_to_string(expected),
        ComparisonOperator::IsNot => actual.to_display_string() != value_to_string(expected),

        // --- Emptiness ---
        ComparisonOperator::Empty => actual.is_empty(),
        ComparisonOperator::NotEmpty => !actual.is_empty(),

        // --- Membership ---
        ComparisonOperator::In => eval_in(cond, actual, expected)?,
        ComparisonOperator::NotIn => !eval_in(cond, actual, expected)?,
        ComparisonOperator::AllOf => eval_all_of(cond, actual, expected)?,

        // --- Numeric ---
        ComparisonOperator::Equal
        | ComparisonOperator::NotEqual
        | ComparisonOperator::GreaterThan
        | ComparisonOperator::LessThan
        | ComparisonOperator::GreaterOrEqual
        | ComparisonOperator::LessOrEqual => eval_numeric(cond, actual, expected)?,

        // --- Null ---
        ComparisonOperator::Null | ComparisonOperator::NotExists => actual.is_none(),
        ComparisonOperator::NotNull | ComparisonOperator::Exists => !actual.is_none(),
    };
    Ok(result)
}

fn eval_numeric(cond: &Condition, actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    let op = cond.comparison_operator;
    if actual.is_none() {
        return Ok(op == ComparisonOperator::NotEqual);
    }
    let a = actual.as_f64().ok_or_else(|| {
        NodeError::ConditionError(format!(
            "{} is a {} value and cannot be compared with {:?}",
            cond.variable_selector,
            actual.type_name(),
            op
        ))
    })?;
    let b = value_to_f64(expected).ok_or_else(|| {
        NodeError::ConditionError(format!(
            "expected a number to compare {} with, got {}",
            cond.variable_selector, expected
        ))
    })?;
    Ok(match op {
        ComparisonOperator::Equal => (a - b).abs() < f64::EPSILON,
        ComparisonOperator::NotEqual => (a - b).abs() >= f64::EPSILON,
        ComparisonOperator::GreaterThan => a > b,
        ComparisonOperator::LessThan => a < b,
        ComparisonOperator::GreaterOrEqual => a >= b,
        ComparisonOperator::LessOrEqual => a <= b,
        _ => false,
    })
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn value_to_string_vec(cond: &Condition, v: &Value) -> Result<Vec<String>, NodeError> {
    match v {
        Value::Array(arr) => Ok(arr.iter().map(value_to_string).collect()),
        Value::String(s) => Ok(vec![s.clone()]),
        other => Err(NodeError::ConditionError(format!(
            "{:?} on {} needs a list value, got {}",
            cond.comparison_operator, cond.variable_selector, other
        ))),
    }
}

fn eval_contains(actual: &Segment, expected: &Value) -> bool {
    let e = value_to_string(expected);
    match actual {
        Segment::String(s) => s.contains(&e),
        Segment::ArrayString(arr) => arr.iter().any(|s| s == &e),
        Segment::Array(arr) => arr.iter().any(|s| s.to_display_string() == e),
        _ => false,
    }
}

fn eval_in(cond: &Condition, actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    let arr = value_to_string_vec(cond, expected)?;
    Ok(arr.contains(&actual.to_display_string()))
}

fn eval_all_of(cond: &Condition, actual: &Segment, expected: &Value) -> Result<bool, NodeError> {
    let expected_items = value_to_string_vec(cond, expected)?;
    let actual_items: Vec<String> = match actual.array_items() {
        Some(items) => items.iter().map(Segment::to_display_string).collect(),
        None => return Ok(false),
    };
    Ok(expected_items.iter().all(|e| actual_items.contains(e)))
}
