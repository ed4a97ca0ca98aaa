use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use genstudio_kernel::generator::FnGenerator;
use genstudio_kernel::store::MemoryExecutionStore;
use genstudio_kernel::workflow::{
    Effect, ExecutionStatus, HttpRequest, HttpResponse, StepInterpreter, Workflow, WorkflowEngine,
};
use genstudio_kernel::{parse_workflow, Logger, MemorySink, WorkflowError};

fn quiet() -> Logger {
    Logger::capturing(MemorySink::new())
}

/// Answers `/double/<n>` with `2n`, `/fail` with a 500 and anything else
/// with `{"ok": true}`.
fn calculator(request: &HttpRequest) -> Result<HttpResponse> {
    if let Some((_, raw)) = request.url.split_once("/double/") {
        let n: i64 = raw.parse()?;
        return Ok(HttpResponse::ok((n * 2).to_string()));
    }
    if request.url.ends_with("/fail") {
        return Ok(HttpResponse {
            status: 500,
            status_text: "Internal Server Error".to_string(),
            body: String::new(),
        });
    }
    Ok(HttpResponse::ok(r#"{"ok": true}"#))
}

fn engine() -> WorkflowEngine {
    let interpreter = StepInterpreter::new(Arc::new(calculator)).with_logger(&quiet());
    WorkflowEngine::new(interpreter).with_logger(&quiet())
}

fn workflow(value: Value) -> Workflow {
    parse_workflow(&value).expect("workflow should parse")
}

#[test]
fn loop_collects_each_iteration_result() {
    let wf = workflow(json!({
        "id": "wf-loop", "name": "Double all",
        "steps": [{
            "id": "each", "name": "Each number", "type": "loop",
            "items": "state.numbers", "itemVariable": "n",
            "steps": [{ "id": "double", "name": "Double", "type": "api-call",
                        "url": "http://calc/double/{{n}}" }]
        }]
    }));
    let execution = engine()
        .execute(&wf, json!({ "state": { "numbers": [1, 2, 3] } }))
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.results["each"], json!([2, 4, 6]));
    assert_eq!(execution.context["each"], json!([2, 4, 6]));
    assert!(execution.context.get("n").is_none());
}

#[test]
fn conditional_runs_the_matching_branch() {
    let wf = workflow(json!({
        "id": "wf-if", "name": "Branching",
        "steps": [{
            "id": "check", "name": "Compare", "type": "conditional",
            "condition": "2 > 1",
            "then": [{ "id": "yes", "name": "Yes", "type": "api-call", "url": "http://calc/double/5" }],
            "else": [{ "id": "no", "name": "No", "type": "api-call", "url": "http://calc/fail" }]
        }]
    }));
    let execution = engine().execute(&wf, json!({})).unwrap();
    assert_eq!(
        execution.results["check"],
        json!({ "conditionResult": true, "branch": "then", "results": [10] })
    );
    assert_eq!(execution.context["yes"], json!(10));
    assert!(execution.context.get("no").is_none());
}

#[test]
fn conditions_see_earlier_step_results() {
    let wf = workflow(json!({
        "id": "wf-chain", "name": "Chain",
        "steps": [
            { "id": "first", "name": "First", "type": "api-call", "url": "http://calc/double/21" },
            { "id": "gate", "name": "Gate", "type": "conditional",
              "condition": "{{first}} === 42 && state.mode == 'live'",
              "then": [{ "id": "ok", "name": "Ok", "type": "validation", "rules": {} }] }
        ]
    }));
    let execution = engine()
        .execute(&wf, json!({ "state": { "mode": "live" } }))
        .unwrap();
    assert_eq!(execution.results["gate"]["conditionResult"], json!(true));
    assert_eq!(execution.context["ok"], json!({ "valid": true }));
}

#[test]
fn parallel_merges_branch_results_in_declaration_order() {
    let wf = workflow(json!({
        "id": "wf-par", "name": "Fan out",
        "steps": [{
            "id": "fan", "name": "Fan", "type": "parallel",
            "steps": [
                { "id": "a", "name": "A", "type": "api-call", "url": "http://calc/double/1" },
                { "id": "b", "name": "B", "type": "api-call", "url": "http://calc/double/2" },
                { "id": "c", "name": "C", "type": "api-call", "url": "http://calc/double/3" }
            ]
        }]
    }));
    let execution = engine().execute(&wf, json!({})).unwrap();
    assert_eq!(execution.results["fan"], json!([2, 4, 6]));
    assert_eq!(execution.context["b"], json!(4));
}

#[test]
fn parallel_reports_first_failing_branch() {
    let wf = workflow(json!({
        "id": "wf-par-fail", "name": "Fan out",
        "steps": [{
            "id": "fan", "name": "Fan", "type": "parallel",
            "steps": [
                { "id": "a", "name": "A", "type": "api-call", "url": "http://calc/double/1" },
                { "id": "b", "name": "B", "type": "api-call", "url": "http://calc/fail" }
            ]
        }]
    }));
    let err = engine().execute(&wf, json!({})).unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("Step Fan failed: "), "{message}");
    assert!(message.contains("parallel branch 'B' failed"));
    assert!(message.contains("API call failed: 500 Internal Server Error"));
    let execution = err.execution().unwrap();
    assert!(execution.context.get("a").is_none());
}

#[test]
fn validation_failure_lists_every_rule() {
    let wf = workflow(json!({
        "id": "wf-val", "name": "Release",
        "steps": [{
            "id": "check", "name": "Check batch", "type": "validation",
            "rules": {
                "state.batchId": { "required": true, "pattern": "^BATCH-" },
                "state.quantity": { "required": true, "min": 1, "max": 10 }
            }
        }]
    }));
    let err = engine()
        .execute(&wf, json!({ "state": { "batchId": "LOT-1", "quantity": 50 } }))
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Step Check batch failed: Validation failed: state.batchId does not match pattern ^BATCH-, state.quantity must be at most 10"
    );
}

#[test]
fn validation_reports_rules_in_declaration_order() {
    let wf = workflow(json!({
        "id": "wf-val-order", "name": "Order",
        "steps": [{
            "id": "check", "name": "Check", "type": "validation",
            "rules": {
                "state.zone": { "required": true },
                "state.amount": { "required": true }
            }
        }]
    }));
    let err = engine().execute(&wf, json!({ "state": {} })).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Step Check failed: Validation failed: state.zone is required, state.amount is required"
    );
}

#[test]
fn condition_on_a_missing_value_fails_the_step() {
    let wf = workflow(json!({
        "id": "wf-missing", "name": "Missing",
        "steps": [{
            "id": "gate", "name": "Gate", "type": "conditional",
            "condition": "{{state.approvals}} >= 0",
            "then": [{ "id": "yes", "name": "Yes", "type": "api-call", "url": "http://calc/double/1" }]
        }]
    }));
    let err = engine().execute(&wf, json!({ "state": {} })).unwrap_err();
    assert!(err.to_string().starts_with("Step Gate failed: invalid condition"), "{err}");
    let execution = err.execution().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.context.get("yes").is_none());
}

#[test]
fn first_failure_stops_the_run_and_fires_on_error() {
    let later_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&later_calls);
    let client = move |request: &HttpRequest| -> Result<HttpResponse> {
        if request.url.ends_with("/third") {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        calculator(request)
    };
    let effects_seen = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&effects_seen);
    let handler = move |effect: &Effect, _ctx: &mut Value| -> Result<()> {
        seen.lock().unwrap().push(effect.message.clone().unwrap_or_default());
        Ok(())
    };
    let engine = WorkflowEngine::new(StepInterpreter::new(Arc::new(client)).with_logger(&quiet()))
        .with_logger(&quiet())
        .with_effects(Arc::new(handler));

    let wf = workflow(json!({
        "id": "wf-fail", "name": "Fail fast",
        "steps": [
            { "id": "one", "name": "First", "type": "api-call", "url": "http://calc/double/1" },
            { "id": "two", "name": "Second", "type": "api-call", "url": "http://calc/fail" },
            { "id": "three", "name": "Third", "type": "api-call", "url": "http://calc/third" }
        ],
        "onSuccess": { "type": "notify", "message": "done" },
        "onError": { "type": "notify", "message": "broken", "variant": "error" }
    }));

    let err = engine.execute(&wf, json!({})).unwrap_err();
    let WorkflowError::StepFailed { execution, message } = err else {
        panic!("expected a step failure");
    };
    assert_eq!(message, "Step Second failed: API call failed: 500 Internal Server Error");
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.steps.len(), 2);
    assert_eq!(execution.error.as_deref(), Some(message.as_str()));
    assert!(execution.end_time.is_some());
    assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    assert_eq!(*effects_seen.lock().unwrap(), vec!["broken".to_string()]);

    let stored = engine.get_execution(&execution.id).unwrap();
    assert_eq!(stored.status, ExecutionStatus::Failed);
}

#[test]
fn on_success_can_update_state() {
    let wf = workflow(json!({
        "id": "wf-state", "name": "Counter",
        "steps": [{ "id": "calc", "name": "Calc", "type": "api-call", "url": "http://calc/double/4" }],
        "onSuccess": { "type": "update-state", "path": "state.total", "operation": "set", "value": "{{calc}}" }
    }));
    let execution = engine().execute(&wf, json!({ "state": {} })).unwrap();
    assert_eq!(execution.context["state"]["total"], json!(8));
}

#[test]
fn failing_effect_handler_does_not_change_the_outcome() {
    let handler = |_: &Effect, _: &mut Value| -> Result<()> { Err(anyhow!("handler exploded")) };
    let sink = MemorySink::new();
    let engine = WorkflowEngine::new(StepInterpreter::new(Arc::new(calculator)).with_logger(&quiet()))
        .with_logger(&Logger::capturing(sink.clone()))
        .with_effects(Arc::new(handler));
    let wf = workflow(json!({
        "id": "wf-eff", "name": "Effects",
        "steps": [{ "id": "calc", "name": "Calc", "type": "api-call", "url": "http://calc/double/1" }],
        "onSuccess": { "type": "notify", "message": "done" }
    }));
    let execution = engine.execute(&wf, json!({})).unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(sink.messages().contains(&"effect handler failed".to_string()));
}

#[test]
fn identical_runs_produce_identical_traces() {
    let wf = workflow(json!({
        "id": "wf-det", "name": "Deterministic",
        "steps": [
            { "id": "a", "name": "A", "type": "api-call", "url": "http://calc/double/{{state.seed}}" },
            { "id": "b", "name": "B", "type": "loop", "items": "state.list",
              "steps": [{ "id": "b-item", "name": "Item", "type": "api-call", "url": "http://calc/double/{{item}}" }] }
        ]
    }));
    let engine = engine();
    let context = json!({ "state": { "seed": 7, "list": [1, 5] } });
    let first = engine.execute(&wf, context.clone()).unwrap();
    let second = engine.execute(&wf, context).unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(first.results, second.results);
    assert_eq!(first.context, second.context);
    let statuses = |execution: &genstudio_kernel::Execution| {
        execution
            .steps
            .iter()
            .map(|step| (step.step_id.clone(), step.status, step.result.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(statuses(&first), statuses(&second));
}

#[test]
fn execution_ids_and_trace_shape() {
    let wf = workflow(json!({
        "id": "wf-shape", "name": "Shape",
        "steps": [{ "id": "a", "name": "A", "type": "api-call", "url": "http://calc/double/1" }]
    }));
    let execution = engine().execute(&wf, json!(null)).unwrap();
    assert!(execution.id.starts_with("exec-"));
    assert_eq!(execution.workflow_id, "wf-shape");
    let serialized = serde_json::to_value(&execution).unwrap();
    assert_eq!(serialized["status"], json!("completed"));
    assert_eq!(serialized["steps"][0]["stepId"], json!("a"));
    assert_eq!(serialized["steps"][0]["status"], json!("success"));
    assert!(serialized["steps"][0]["durationMs"].is_u64());
    assert!(serialized["startTime"].is_string());
}

#[test]
fn non_object_context_is_wrapped_as_input() {
    let wf = workflow(json!({
        "id": "wf-input", "name": "Input",
        "steps": [{ "id": "a", "name": "A", "type": "api-call", "url": "http://calc/double/{{input}}" }]
    }));
    let execution = engine().execute(&wf, json!(9)).unwrap();
    assert_eq!(execution.results["a"], json!(18));
}

#[test]
fn history_is_bounded() {
    let engine = WorkflowEngine::new(StepInterpreter::new(Arc::new(calculator)).with_logger(&quiet()))
        .with_logger(&quiet())
        .with_store(Arc::new(MemoryExecutionStore::for_executions(2)));
    let wf = workflow(json!({
        "id": "wf-hist", "name": "History",
        "steps": [{ "id": "a", "name": "A", "type": "validation", "rules": {} }]
    }));
    let first = engine.execute(&wf, json!({})).unwrap();
    let second = engine.execute(&wf, json!({})).unwrap();
    let third = engine.execute(&wf, json!({})).unwrap();
    let ids: Vec<String> = engine.history().into_iter().map(|execution| execution.id).collect();
    assert_eq!(ids, vec![second.id, third.id]);
    assert!(engine.get_execution(&first.id).is_none());
}

#[test]
fn invalid_definitions_are_rejected_before_running() {
    let engine = engine();
    let err = engine
        .execute_definition(&json!({ "id": "wf", "name": "x", "steps": [{ "id": "a" }] }), json!({}))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidDefinition { .. }));
    assert!(err.problems().iter().any(|problem| problem.path.as_deref() == Some("/steps/0")));
    assert!(engine.history().is_empty());
}

#[test]
fn llm_task_uses_the_configured_generator() {
    let generator = FnGenerator(|prompt: &str| -> Result<Value> { Ok(json!({ "echo": prompt })) });
    let interpreter = StepInterpreter::new(Arc::new(calculator))
        .with_generator(Arc::new(generator))
        .with_logger(&quiet());
    let engine = WorkflowEngine::new(interpreter).with_logger(&quiet());
    let wf = workflow(json!({
        "id": "wf-llm", "name": "Summarize",
        "steps": [{ "id": "ask", "name": "Ask", "type": "llm-task", "prompt": "summarize {{state.topic}}" }]
    }));
    let execution = engine
        .execute(&wf, json!({ "state": { "topic": "orders" } }))
        .unwrap();
    assert_eq!(execution.results["ask"], json!({ "echo": "summarize orders" }));
}

#[test]
fn cancellation_between_steps_stops_the_run() {
    let token = Arc::new(AtomicBool::new(false));
    let trigger = Arc::clone(&token);
    let client = move |request: &HttpRequest| -> Result<HttpResponse> {
        trigger.store(true, Ordering::SeqCst);
        calculator(request)
    };
    let interpreter = StepInterpreter::new(Arc::new(client))
        .with_cancellation(Arc::clone(&token))
        .with_logger(&quiet());
    let engine = WorkflowEngine::new(interpreter).with_logger(&quiet());
    let wf = workflow(json!({
        "id": "wf-cancel", "name": "Cancel",
        "steps": [
            { "id": "a", "name": "A", "type": "api-call", "url": "http://calc/double/1" },
            { "id": "b", "name": "B", "type": "api-call", "url": "http://calc/double/2" }
        ]
    }));
    let err = engine.execute(&wf, json!({})).unwrap_err();
    let WorkflowError::Cancelled { execution } = err else {
        panic!("expected cancellation");
    };
    assert_eq!(execution.steps.len(), 1);
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error.as_deref(), Some("execution cancelled"));
}

#[test]
fn cancellation_inside_a_loop_stops_iterating() {
    let calls = Arc::new(AtomicUsize::new(0));
    let token = Arc::new(AtomicBool::new(false));
    let (counter, trigger) = (Arc::clone(&calls), Arc::clone(&token));
    let client = move |request: &HttpRequest| -> Result<HttpResponse> {
        counter.fetch_add(1, Ordering::SeqCst);
        trigger.store(true, Ordering::SeqCst);
        calculator(request)
    };
    let interpreter = StepInterpreter::new(Arc::new(client))
        .with_cancellation(Arc::clone(&token))
        .with_logger(&quiet());
    let engine = WorkflowEngine::new(interpreter).with_logger(&quiet());
    let wf = workflow(json!({
        "id": "wf-cancel-loop", "name": "Cancel loop",
        "steps": [{ "id": "each", "name": "Each", "type": "loop", "items": "state.list",
                    "steps": [{ "id": "d", "name": "D", "type": "api-call", "url": "http://calc/double/{{item}}" }] }]
    }));
    let err = engine
        .execute(&wf, json!({ "state": { "list": [1, 2, 3] } }))
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Cancelled { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn pre_cancelled_engine_runs_nothing() {
    let engine = engine();
    engine.cancel();
    let wf = workflow(json!({
        "id": "wf-pre", "name": "Pre",
        "steps": [{ "id": "a", "name": "A", "type": "validation", "rules": {} }]
    }));
    let err = engine.execute(&wf, json!({})).unwrap_err();
    assert!(err.to_string().contains("cancelled"));
    assert!(err.execution().unwrap().steps.is_empty());
}
