use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::KernelConfig;
use crate::error::WorkflowError;
use crate::logging::{current_timestamp, Logger};
use crate::path::uid;
use crate::store::{ExecutionStore, MemoryExecutionStore};

use super::effects::{DefaultEffectHandler, EffectHandler};
use super::step::{record, StepInterpreter, StepStatus};
use super::{parse_workflow, Effect, Workflow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTrace {
    pub step_id: String,
    pub step_name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: String,
    pub duration_ms: u64,
}

/// Record of one workflow run. `context` holds the initial context plus one
/// entry per completed step, keyed by step id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    pub steps: Vec<StepTrace>,
    pub context: Value,
    pub results: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Execution {
    fn start(workflow: &Workflow, context: Value) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        Self {
            id: uid(&format!("exec-{millis}")),
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.name.clone(),
            status: ExecutionStatus::Running,
            start_time: current_timestamp(),
            end_time: None,
            steps: Vec::new(),
            context,
            results: Map::new(),
            error: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != ExecutionStatus::Running
    }

    fn finish(&mut self, status: ExecutionStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.end_time = Some(current_timestamp());
    }
}

/// Runs workflows step by step, fail-fast, recording every execution in an
/// [`ExecutionStore`].
pub struct WorkflowEngine {
    interpreter: StepInterpreter,
    store: Arc<dyn ExecutionStore>,
    effects: Arc<dyn EffectHandler>,
    logger: Logger,
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new(StepInterpreter::default())
    }
}

impl WorkflowEngine {
    pub fn new(interpreter: StepInterpreter) -> Self {
        let logger = Logger::default();
        Self {
            interpreter,
            store: Arc::new(MemoryExecutionStore::for_executions(100)),
            effects: Arc::new(DefaultEffectHandler::new(&logger)),
            logger,
        }
    }

    pub fn from_config(config: &KernelConfig, interpreter: StepInterpreter, logger: &Logger) -> Self {
        Self::new(interpreter)
            .with_logger(logger)
            .with_store(Arc::new(MemoryExecutionStore::for_executions(
                config.history_capacity,
            )))
    }

    /// Also resets the effect handler to a [`DefaultEffectHandler`] on the
    /// new logger; call [`Self::with_effects`] afterwards to override it.
    pub fn with_logger(mut self, logger: &Logger) -> Self {
        self.logger = logger.with_tags(json!({ "component": "engine" }));
        self.effects = Arc::new(DefaultEffectHandler::new(logger));
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_effects(mut self, effects: Arc<dyn EffectHandler>) -> Self {
        self.effects = effects;
        self
    }

    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        self.interpreter.cancellation_token()
    }

    pub fn cancel(&self) {
        self.interpreter.cancellation_token().store(true, Ordering::SeqCst);
    }

    /// Parse a workflow document and execute it.
    pub fn execute_definition(
        &self,
        definition: &Value,
        initial_context: Value,
    ) -> Result<Execution, WorkflowError> {
        let workflow = parse_workflow(definition)?;
        self.execute(&workflow, initial_context)
    }

    /// Run every step in order. The first failing step ends the run: the
    /// execution is marked failed, `onError` is applied and
    /// [`WorkflowError::StepFailed`] carries the terminal record.
    pub fn execute(
        &self,
        workflow: &Workflow,
        initial_context: Value,
    ) -> Result<Execution, WorkflowError> {
        let context = match initial_context {
            Value::Object(_) => initial_context,
            Value::Null => Value::Object(Map::new()),
            other => json!({ "input": other }),
        };
        let mut execution = Execution::start(workflow, context);
        let logger = self.logger.with_tags(json!({
            "workflowId": workflow.id,
            "executionId": execution.id,
        }));
        logger.info(
            "workflow started",
            Some(json!({ "name": workflow.name, "steps": workflow.steps.len() })),
        );
        self.store.put(execution.clone());

        for step in &workflow.steps {
            if self.interpreter.is_cancelled() {
                return Err(self.cancelled(execution, &logger));
            }
            let started = Instant::now();
            let timestamp = current_timestamp();
            let outcome = self.interpreter.execute_step(step, &mut execution.context);
            let duration_ms = started.elapsed().as_millis() as u64;
            execution.steps.push(StepTrace {
                step_id: step.id.clone(),
                step_name: step.name.clone(),
                status: outcome.status,
                result: outcome.data.clone(),
                error: outcome.error.clone(),
                timestamp,
                duration_ms,
            });

            match (outcome.data, outcome.error) {
                (Some(data), None) => {
                    logger.debug(
                        "step completed",
                        Some(json!({ "stepId": step.id, "durationMs": duration_ms })),
                    );
                    record(&mut execution.context, &step.id, data.clone());
                    execution.results.insert(step.id.clone(), data);
                    self.store.put(execution.clone());
                }
                (_, error) => {
                    if self.interpreter.is_cancelled() {
                        return Err(self.cancelled(execution, &logger));
                    }
                    let error = error.unwrap_or_else(|| "unknown error".to_string());
                    let message = format!("Step {} failed: {error}", step.name);
                    execution.finish(ExecutionStatus::Failed, Some(message.clone()));
                    logger.error(
                        "workflow failed",
                        Some(json!({ "stepId": step.id, "error": error })),
                    );
                    self.apply_effect(workflow.on_error.as_ref(), &mut execution, &logger);
                    self.store.put(execution.clone());
                    return Err(WorkflowError::StepFailed {
                        execution: Box::new(execution),
                        message,
                    });
                }
            }
        }

        execution.finish(ExecutionStatus::Completed, None);
        logger.info(
            "workflow completed",
            Some(json!({ "steps": execution.steps.len() })),
        );
        self.apply_effect(workflow.on_success.as_ref(), &mut execution, &logger);
        self.store.put(execution.clone());
        Ok(execution)
    }

    pub fn get_execution(&self, id: &str) -> Option<Execution> {
        self.store.get(id)
    }

    /// Retained executions, oldest first.
    pub fn history(&self) -> Vec<Execution> {
        self.store.list()
    }

    fn cancelled(&self, mut execution: Execution, logger: &Logger) -> WorkflowError {
        execution.finish(ExecutionStatus::Failed, Some("execution cancelled".to_string()));
        logger.warn(
            "workflow cancelled",
            Some(json!({ "completedSteps": execution.steps.len() })),
        );
        self.store.put(execution.clone());
        WorkflowError::Cancelled {
            execution: Box::new(execution),
        }
    }

    fn apply_effect(&self, effect: Option<&Effect>, execution: &mut Execution, logger: &Logger) {
        let Some(effect) = effect else {
            return;
        };
        logger.debug("dispatching effect", Some(json!({ "type": effect.kind })));
        if let Err(err) = self.effects.apply(effect, &mut execution.context) {
            logger.error_with("effect handler failed", &err);
        }
    }
}
