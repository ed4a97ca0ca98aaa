use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::problem::Problem;
use crate::workflow::engine::Execution;

#[derive(Debug)]
pub struct CancelledError;

impl fmt::Display for CancelledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "execution cancelled")
    }
}

impl std::error::Error for CancelledError {}

#[derive(Debug)]
pub struct TimeoutError {
    pub operation: String,
    pub after: Duration,
}

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} timed out after {}ms",
            self.operation,
            self.after.as_millis()
        )
    }
}

impl std::error::Error for TimeoutError {}

/// Failure of a whole workflow run. Except for `InvalidDefinition`, the
/// terminal execution record is attached so callers can still inspect the
/// trace.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid workflow definition: {}", summarize(.problems))]
    InvalidDefinition { problems: Vec<Problem> },

    #[error("{message}")]
    StepFailed {
        execution: Box<Execution>,
        message: String,
    },

    #[error("workflow '{}' cancelled", .execution.workflow_id)]
    Cancelled { execution: Box<Execution> },
}

impl WorkflowError {
    pub fn execution(&self) -> Option<&Execution> {
        match self {
            WorkflowError::InvalidDefinition { .. } => None,
            WorkflowError::StepFailed { execution, .. } | WorkflowError::Cancelled { execution } => {
                Some(execution)
            }
        }
    }

    pub fn problems(&self) -> &[Problem] {
        match self {
            WorkflowError::InvalidDefinition { problems } => problems,
            _ => &[],
        }
    }
}

fn summarize(problems: &[Problem]) -> String {
    problems
        .iter()
        .map(|problem| problem.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
