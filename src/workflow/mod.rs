//! Workflow definitions and their execution.
//!
//! A [`Workflow`] is an ordered list of typed steps plus optional success and
//! error effects. [`engine::WorkflowEngine`] runs the steps strictly in order
//! and delegates each one to [`step::StepInterpreter`].

pub mod definition;
pub mod effects;
pub mod engine;
pub mod expr;
pub mod http;
pub mod step;
pub mod template;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WorkflowError;
use crate::problem::Problem;

pub use definition::validate_workflow;
pub use effects::{DefaultEffectHandler, EffectHandler};
pub use engine::{Execution, ExecutionStatus, StepTrace, WorkflowEngine};
pub use http::{HttpClient, HttpRequest, HttpResponse, UreqHttpClient};
pub use step::{StepInterpreter, StepOutcome, StepStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    #[default]
    Manual,
    Auto,
    Cron,
    Event,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub trigger: Trigger,
    pub steps: Vec<WorkflowStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<Effect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<Effect>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl WorkflowStep {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepKind {
    Validation {
        #[serde(default)]
        rules: IndexMap<String, Rule>,
    },
    ApiCall {
        url: String,
        #[serde(default)]
        method: HttpMethod,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
    LlmTask {
        prompt: String,
    },
    Conditional {
        condition: String,
        #[serde(default)]
        then: Vec<WorkflowStep>,
        #[serde(default, rename = "else")]
        otherwise: Vec<WorkflowStep>,
    },
    Loop {
        items: String,
        #[serde(default = "default_item_variable", rename = "itemVariable")]
        item_variable: String,
        #[serde(default)]
        steps: Vec<WorkflowStep>,
    },
    Parallel {
        #[serde(default)]
        steps: Vec<WorkflowStep>,
    },
}

impl StepKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            StepKind::Validation { .. } => "validation",
            StepKind::ApiCall { .. } => "api-call",
            StepKind::LlmTask { .. } => "llm-task",
            StepKind::Conditional { .. } => "conditional",
            StepKind::Loop { .. } => "loop",
            StepKind::Parallel { .. } => "parallel",
        }
    }
}

fn default_item_variable() -> String {
    "item".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
        }
    }

    pub fn carries_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EffectKind {
    Notify,
    UpdateState,
    Navigate,
    ApiCall,
}

/// Success/error handler attached to a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    #[serde(rename = "type")]
    pub kind: EffectKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Effect {
    pub fn new(kind: EffectKind) -> Self {
        Self {
            kind,
            message: None,
            variant: None,
            path: None,
            operation: None,
            value: None,
            route: None,
            extra: Map::new(),
        }
    }

    pub fn notify(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(EffectKind::Notify)
        }
    }

    pub fn update_state(path: impl Into<String>, operation: &str, value: Value) -> Self {
        Self {
            path: Some(path.into()),
            operation: Some(operation.to_string()),
            value: Some(value),
            ..Self::new(EffectKind::UpdateState)
        }
    }
}

/// Check the shape of a workflow document, then decode it.
pub fn parse_workflow(definition: &Value) -> Result<Workflow, WorkflowError> {
    let problems = validate_workflow(definition);
    if !problems.is_empty() {
        return Err(WorkflowError::InvalidDefinition { problems });
    }
    serde_json::from_value(definition.clone()).map_err(|err| WorkflowError::InvalidDefinition {
        problems: vec![Problem::at("", "type", err.to_string())],
    })
}
