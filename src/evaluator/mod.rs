pub mod condition;

pub use condition::{evaluate_case, evaluate_cases, evaluate_condition, CaseEvaluation, CasesOutcome, ELSE_HANDLE};
