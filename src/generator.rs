use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context as AnyhowContext, Result};
use serde_json::{json, Value};

use crate::error::TimeoutError;
use crate::spec::RepairRequest;

/// External producer of AppSpec-like JSON (an LLM client or a template
/// source). Implementations may fail; callers treat failures as data.
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<Value>;

    fn repair(&self, request: &RepairRequest) -> Result<Value> {
        let _ = request;
        Err(anyhow!("this generator does not support repair"))
    }
}

/// Closure-backed generator without repair support.
pub struct FnGenerator<F>(pub F);

impl<F> Generator for FnGenerator<F>
where
    F: Fn(&str) -> Result<Value> + Send + Sync,
{
    fn generate(&self, prompt: &str) -> Result<Value> {
        (self.0)(prompt)
    }
}

/// Run `task` on a helper thread and give up after `timeout`. The helper
/// thread is left to finish on its own; its result is discarded.
pub fn call_with_timeout<T, F>(operation: &str, timeout: Option<Duration>, task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let Some(limit) = timeout else {
        return task();
    };
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("genstudio-{operation}"))
        .spawn(move || {
            let _ = tx.send(task());
        })
        .with_context(|| format!("unable to spawn worker for {operation}"))?;
    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(TimeoutError {
            operation: operation.to_string(),
            after: limit,
        }
        .into()),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            Err(anyhow!("{operation} worker stopped without a result"))
        }
    }
}

/// Generator served over HTTP: `POST <base>/generate` with `{prompt}` and
/// `POST <base>/repair` with a [`RepairRequest`].
pub struct HttpGenerator {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpGenerator {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent,
        }
    }

    fn post(&self, route: &str, payload: Value) -> Result<Value> {
        let url = format!("{}/{route}", self.base_url);
        let response = match self.agent.post(&url).send_json(payload) {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let text = response.into_string().unwrap_or_default();
                return Err(anyhow!("generator {route} failed: HTTP {code} {text}"));
            }
            Err(err) => return Err(anyhow!("generator {route} unreachable: {err}")),
        };
        let body = response
            .into_string()
            .with_context(|| format!("unable to read generator {route} response"))?;
        serde_json::from_str(&body)
            .with_context(|| format!("generator {route} returned invalid JSON"))
    }
}

impl Generator for HttpGenerator {
    fn generate(&self, prompt: &str) -> Result<Value> {
        self.post("generate", json!({ "prompt": prompt }))
    }

    fn repair(&self, request: &RepairRequest) -> Result<Value> {
        let payload = serde_json::to_value(request)?;
        self.post("repair", payload)
    }
}
