use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context as AnyhowContext, Result};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::KernelConfig;
use crate::error::CancelledError;
use crate::generator::{call_with_timeout, Generator};
use crate::logging::Logger;
use crate::path::{display_value, get_by_path, is_truthy};

use super::expr::evaluate_condition;
use super::http::{HttpClient, HttpRequest, UreqHttpClient};
use super::template::{interpolate, interpolate_condition, interpolate_value, sole_token};
use super::{HttpMethod, Rule, StepKind, WorkflowStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn success(data: Value) -> Self {
        Self {
            status: StepStatus::Success,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Error,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}

/// Executes single workflow steps against a mutable JSON context. Nested
/// steps (conditional branches, loop bodies, parallel branches) record their
/// data in the context under their own id, like top-level steps.
pub struct StepInterpreter {
    http: Arc<dyn HttpClient>,
    generator: Option<Arc<dyn Generator>>,
    http_timeout: Duration,
    llm_timeout: Option<Duration>,
    logger: Logger,
    cancelled: Arc<AtomicBool>,
}

impl Default for StepInterpreter {
    fn default() -> Self {
        Self::new(Arc::new(UreqHttpClient::new()))
    }
}

impl StepInterpreter {
    pub fn new(http: Arc<dyn HttpClient>) -> Self {
        Self {
            http,
            generator: None,
            http_timeout: Duration::from_millis(30_000),
            llm_timeout: None,
            logger: Logger::default(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_config(config: &KernelConfig, http: Arc<dyn HttpClient>, logger: &Logger) -> Self {
        let mut interpreter = Self::new(http).with_logger(logger);
        interpreter.http_timeout = config.http_timeout();
        interpreter.llm_timeout = Some(config.llm_timeout());
        interpreter
    }

    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = Some(timeout);
        self
    }

    pub fn with_logger(mut self, logger: &Logger) -> Self {
        self.logger = logger.with_tags(json!({ "component": "steps" }));
        self
    }

    /// Share an externally owned cancellation flag.
    pub fn with_cancellation(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancelled = token;
        self
    }

    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(CancelledError.into());
        }
        Ok(())
    }

    /// Run one step. Failures are reported in the outcome, never raised.
    pub fn execute_step(&self, step: &WorkflowStep, context: &mut Value) -> StepOutcome {
        self.logger.debug(
            "step started",
            Some(json!({ "stepId": step.id, "type": step.kind.type_name() })),
        );
        match self.run(step, context) {
            Ok(data) => StepOutcome::success(data),
            Err(err) => {
                self.logger.debug(
                    "step failed",
                    Some(json!({ "stepId": step.id, "error": format!("{err:#}") })),
                );
                StepOutcome::failure(format!("{err:#}"))
            }
        }
    }

    fn run(&self, step: &WorkflowStep, context: &mut Value) -> Result<Value> {
        self.ensure_not_cancelled()?;
        match &step.kind {
            StepKind::Validation { rules } => self.validation(rules, context),
            StepKind::ApiCall { url, method, body } => {
                self.api_call(url, *method, body.as_ref(), context)
            }
            StepKind::LlmTask { prompt } => self.llm_task(prompt, context),
            StepKind::Conditional {
                condition,
                then,
                otherwise,
            } => self.conditional(condition, then, otherwise, context),
            StepKind::Loop {
                items,
                item_variable,
                steps,
            } => self.repeat(items, item_variable, steps, context),
            StepKind::Parallel { steps } => self.parallel(steps, context),
        }
    }

    fn validation(&self, rules: &IndexMap<String, Rule>, context: &Value) -> Result<Value> {
        let mut violations = Vec::new();
        for (field, rule) in rules {
            let value = get_by_path(context, field).filter(|value| !value.is_null());
            let present = value.map_or(false, is_truthy);
            if rule.required && !present {
                violations.push(format!("{field} is required"));
                continue;
            }
            let Some(value) = value else {
                continue;
            };
            if let Some(pattern) = &rule.pattern {
                let matcher = Regex::new(pattern)
                    .with_context(|| format!("invalid pattern for {field}"))?;
                if !matcher.is_match(&display_value(value)) {
                    violations.push(format!("{field} does not match pattern {pattern}"));
                }
            }
            if rule.min.is_some() || rule.max.is_some() {
                match numeric(value) {
                    Some(number) => {
                        if let Some(min) = rule.min.filter(|min| number < *min) {
                            violations.push(format!("{field} must be at least {min}"));
                        }
                        if let Some(max) = rule.max.filter(|max| number > *max) {
                            violations.push(format!("{field} must be at most {max}"));
                        }
                    }
                    None => violations.push(format!("{field} must be a number")),
                }
            }
        }
        if !violations.is_empty() {
            return Err(anyhow!("Validation failed: {}", violations.join(", ")));
        }
        Ok(json!({ "valid": true }))
    }

    fn api_call(
        &self,
        url: &str,
        method: HttpMethod,
        body: Option<&Value>,
        context: &Value,
    ) -> Result<Value> {
        let url = interpolate(url, context);
        let body = body
            .filter(|_| method.carries_body())
            .map(|body| interpolate_value(body, context).to_string());
        let request = HttpRequest {
            method,
            url: url.clone(),
            body,
            timeout: self.http_timeout,
        };
        let response = self.http.send(&request)?;
        if !response.is_success() {
            return Err(anyhow!(
                "API call failed: {} {}",
                response.status,
                response.status_text
            ));
        }
        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&response.body)
            .with_context(|| format!("response from {url} is not valid JSON"))
    }

    fn llm_task(&self, prompt: &str, context: &Value) -> Result<Value> {
        let generator = self
            .generator
            .clone()
            .ok_or_else(|| anyhow!("llm-task requires a configured generator"))?;
        let prompt = interpolate(prompt, context);
        call_with_timeout("llm-task", self.llm_timeout, move || {
            generator.generate(&prompt)
        })
    }

    fn conditional(
        &self,
        condition: &str,
        then: &[WorkflowStep],
        otherwise: &[WorkflowStep],
        context: &mut Value,
    ) -> Result<Value> {
        let rendered = interpolate_condition(condition, context);
        let result = evaluate_condition(&rendered, context)?;
        let (branch, label) = if result {
            (then, "then")
        } else {
            (otherwise, "else")
        };
        if branch.is_empty() {
            return Ok(json!({ "conditionResult": result, "executed": "none" }));
        }
        let results = self.sequence(branch, context)?;
        Ok(json!({ "conditionResult": result, "branch": label, "results": results }))
    }

    fn repeat(
        &self,
        items: &str,
        item_variable: &str,
        steps: &[WorkflowStep],
        context: &Value,
    ) -> Result<Value> {
        let items_path = sole_token(items).unwrap_or(items.trim());
        let list = match get_by_path(context, items_path) {
            Some(Value::Array(list)) => list.clone(),
            _ => return Err(anyhow!("Loop items must be an array: {items_path}")),
        };
        let mut results = Vec::new();
        for (index, item) in list.into_iter().enumerate() {
            self.ensure_not_cancelled()?;
            let mut scope = context.clone();
            if let Value::Object(map) = &mut scope {
                map.insert("index".to_string(), json!(index));
                map.insert(item_variable.to_string(), item);
            }
            let data = self
                .sequence(steps, &mut scope)
                .with_context(|| format!("loop iteration {index} failed"))?;
            results.extend(data);
        }
        Ok(Value::Array(results))
    }

    fn parallel(&self, steps: &[WorkflowStep], context: &mut Value) -> Result<Value> {
        let snapshot: &Value = context;
        let outcomes: Vec<Result<Value>> = thread::scope(|scope| {
            let handles: Vec<_> = steps
                .iter()
                .map(|step| {
                    let mut branch = snapshot.clone();
                    scope.spawn(move || self.run(step, &mut branch))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(anyhow!("parallel branch panicked")))
                })
                .collect()
        });

        let mut results = Vec::with_capacity(steps.len());
        for (step, outcome) in steps.iter().zip(outcomes) {
            results.push(outcome.with_context(|| format!("parallel branch '{}' failed", step.name))?);
        }
        // Nothing is merged unless every branch succeeded.
        for (step, data) in steps.iter().zip(&results) {
            record(context, &step.id, data.clone());
        }
        Ok(Value::Array(results))
    }

    /// Run `steps` in order, recording each result under its id.
    fn sequence(&self, steps: &[WorkflowStep], context: &mut Value) -> Result<Vec<Value>> {
        let mut results = Vec::with_capacity(steps.len());
        for step in steps {
            self.ensure_not_cancelled()?;
            let data = self
                .run(step, context)
                .with_context(|| format!("step '{}' failed", step.name))?;
            record(context, &step.id, data.clone());
            results.push(data);
        }
        Ok(results)
    }
}

pub(crate) fn record(context: &mut Value, step_id: &str, data: Value) {
    if let Value::Object(map) = context {
        map.insert(step_id.to_string(), data);
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(num) => num.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::http::HttpResponse;

    fn offline() -> StepInterpreter {
        let client = |request: &HttpRequest| -> Result<HttpResponse> {
            Err(anyhow!("offline: {}", request.url))
        };
        StepInterpreter::new(Arc::new(client))
    }

    fn step(value: Value) -> WorkflowStep {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn validation_collects_every_violation() {
        let interpreter = offline();
        let mut ctx = json!({ "state": { "code": "X-1", "qty": 0 } });
        let outcome = interpreter.execute_step(
            &step(json!({
                "id": "v", "name": "Check", "type": "validation",
                "rules": {
                    "state.code": { "pattern": "^BATCH-" },
                    "state.owner": { "required": true },
                    "state.qty": { "min": 1 }
                }
            })),
            &mut ctx,
        );
        let error = outcome.error.unwrap();
        assert!(error.starts_with("Validation failed: "));
        assert!(error.contains("state.code does not match pattern ^BATCH-"));
        assert!(error.contains("state.owner is required"));
        assert!(error.contains("state.qty must be at least 1"));
    }

    #[test]
    fn validation_success_returns_valid_flag() {
        let interpreter = offline();
        let mut ctx = json!({ "state": { "code": "BATCH-7" } });
        let outcome = interpreter.execute_step(
            &step(json!({
                "id": "v", "name": "Check", "type": "validation",
                "rules": { "state.code": { "required": true, "pattern": "^BATCH-" } }
            })),
            &mut ctx,
        );
        assert_eq!(outcome, StepOutcome::success(json!({ "valid": true })));
    }

    #[test]
    fn conditional_with_empty_branch_reports_none() {
        let interpreter = offline();
        let mut ctx = json!({ "state": { "n": 1 } });
        let outcome = interpreter.execute_step(
            &step(json!({
                "id": "c", "name": "Branch", "type": "conditional",
                "condition": "{{state.n}} > 5",
                "then": [{ "id": "t", "name": "T", "type": "validation", "rules": {} }]
            })),
            &mut ctx,
        );
        assert_eq!(
            outcome.data,
            Some(json!({ "conditionResult": false, "executed": "none" }))
        );
    }

    #[test]
    fn conditional_with_unresolved_token_is_an_error() {
        let interpreter = offline();
        let mut ctx = json!({ "state": {} });
        let outcome = interpreter.execute_step(
            &step(json!({
                "id": "gate", "name": "Gate", "type": "conditional",
                "condition": "{{state.approvals}} >= 0",
                "then": [{ "id": "t", "name": "T", "type": "validation", "rules": {} }]
            })),
            &mut ctx,
        );
        assert!(!outcome.is_success());
        let error = outcome.error.unwrap();
        assert!(error.contains("invalid condition '{{state.approvals}} >= 0'"), "{error}");
        assert!(ctx.get("t").is_none());
    }

    #[test]
    fn loop_over_missing_items_fails() {
        let interpreter = offline();
        let mut ctx = json!({});
        let outcome = interpreter.execute_step(
            &step(json!({
                "id": "l", "name": "Each", "type": "loop", "items": "{{state.rows}}", "steps": []
            })),
            &mut ctx,
        );
        assert_eq!(
            outcome.error.as_deref(),
            Some("Loop items must be an array: state.rows")
        );
    }

    #[test]
    fn llm_task_without_generator_fails() {
        let interpreter = offline();
        let mut ctx = json!({});
        let outcome = interpreter.execute_step(
            &step(json!({ "id": "p", "name": "Ask", "type": "llm-task", "prompt": "hi" })),
            &mut ctx,
        );
        assert!(!outcome.is_success());
    }

    #[test]
    fn cancelled_interpreter_refuses_to_run() {
        let interpreter = offline();
        interpreter.cancellation_token().store(true, Ordering::SeqCst);
        let mut ctx = json!({});
        let outcome = interpreter.execute_step(
            &step(json!({ "id": "v", "name": "V", "type": "validation", "rules": {} })),
            &mut ctx,
        );
        assert_eq!(outcome.error.as_deref(), Some("execution cancelled"));
    }
}
