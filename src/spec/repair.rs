use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::KernelConfig;
use crate::generator::{call_with_timeout, Generator};
use crate::logging::Logger;
use crate::problem::Problem;
use crate::store::AppStore;

use super::normalizer::fallback_spec;
use super::{is_viable, normalize, validate_spec, AppSpec};

/// Payload handed to the external repair generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairRequest {
    pub prompt: String,
    pub invalid_app_spec: Value,
    pub problems: Vec<Problem>,
}

pub trait Repairer: Send + Sync {
    fn repair(&self, request: &RepairRequest) -> Result<Value>;
}

impl<F> Repairer for F
where
    F: Fn(&RepairRequest) -> Result<Value> + Send + Sync,
{
    fn repair(&self, request: &RepairRequest) -> Result<Value> {
        (self)(request)
    }
}

/// Uses a [`Generator`]'s repair entry point as a [`Repairer`].
pub struct GeneratorRepairer(pub Arc<dyn Generator>);

impl Repairer for GeneratorRepairer {
    fn repair(&self, request: &RepairRequest) -> Result<Value> {
        self.0.repair(request)
    }
}

/// Bounded normalize → validate → repair loop.
pub struct RepairCoordinator {
    max_attempts: u32,
    timeout: Option<Duration>,
    logger: Logger,
}

impl Default for RepairCoordinator {
    fn default() -> Self {
        Self::new(2)
    }
}

impl RepairCoordinator {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            timeout: None,
            logger: Logger::default(),
        }
    }

    pub fn from_config(config: &KernelConfig, logger: &Logger) -> Self {
        Self::new(config.repair_max_attempts)
            .with_timeout(config.llm_timeout())
            .with_logger(logger)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_logger(mut self, logger: &Logger) -> Self {
        self.logger = logger.with_tags(json!({ "component": "repair" }));
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Normalize and validate `raw`, asking `repairer` for a corrected
    /// candidate while the document stays structurally invalid and attempts
    /// remain. Never fails: an unrepairable spec comes back with
    /// `status = "error"` and the accumulated problems. A schema-valid but
    /// non-viable spec is returned with a warning, not repaired.
    pub fn validate_and_repair(
        &self,
        raw: &Value,
        prompt: &str,
        repairer: Arc<dyn Repairer>,
    ) -> AppSpec {
        let mut candidate = normalize(raw);
        let mut validation = validate_spec(&candidate);
        let mut attempt_failures = Vec::new();
        let mut attempts = 0;

        while !validation.valid && attempts < self.max_attempts {
            attempts += 1;
            self.logger.warn(
                "spec failed validation, requesting repair",
                Some(json!({
                    "attempt": attempts,
                    "maxAttempts": self.max_attempts,
                    "problems": validation.problems.len(),
                })),
            );
            let request = RepairRequest {
                prompt: prompt.to_string(),
                invalid_app_spec: candidate.to_value(),
                problems: validation.problems.clone(),
            };
            let worker = Arc::clone(&repairer);
            match call_with_timeout("repair", self.timeout, move || worker.repair(&request)) {
                Ok(repaired) => {
                    candidate = normalize(&repaired);
                    validation = validate_spec(&candidate);
                    if validation.valid {
                        candidate.mode = "refined".to_string();
                        self.logger
                            .info("repair succeeded", Some(json!({ "attempt": attempts })));
                    }
                }
                Err(err) => {
                    self.logger.error_with("repair attempt failed", &err);
                    attempt_failures.push(
                        Problem::warning(format!("repair attempt {attempts} failed: {err}"))
                            .with_code("repair"),
                    );
                }
            }
        }

        if !validation.valid {
            self.logger.error(
                "repair budget exhausted, returning invalid spec",
                Some(json!({ "attempts": attempts, "problems": validation.problems.len() })),
            );
            candidate.status = "error".to_string();
            candidate.problems.extend(validation.problems);
            candidate.problems.extend(attempt_failures);
            return candidate;
        }

        let viability = is_viable(&candidate.to_value());
        if !viability.viable {
            self.logger.warn(
                "spec is valid but not viable",
                Some(json!({ "reason": viability.reason })),
            );
            candidate.problems.push(
                Problem::warning(format!("spec is not viable: {}", viability.reason))
                    .with_code("viability"),
            );
        }
        candidate
    }
}

/// Prompt → generator → repair coordinator, with an optional store for
/// accepted specs.
pub struct SpecPipeline {
    generator: Arc<dyn Generator>,
    coordinator: RepairCoordinator,
    timeout: Option<Duration>,
    logger: Logger,
    store: Option<Arc<dyn AppStore>>,
}

impl SpecPipeline {
    pub fn new(generator: Arc<dyn Generator>, coordinator: RepairCoordinator) -> Self {
        Self {
            generator,
            coordinator,
            timeout: None,
            logger: Logger::default(),
            store: None,
        }
    }

    pub fn from_config(generator: Arc<dyn Generator>, config: &KernelConfig, logger: &Logger) -> Self {
        Self::new(generator, RepairCoordinator::from_config(config, logger))
            .with_timeout(config.llm_timeout())
            .with_logger(logger)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_logger(mut self, logger: &Logger) -> Self {
        self.logger = logger.with_tags(json!({ "component": "pipeline" }));
        self
    }

    pub fn with_store(mut self, store: Arc<dyn AppStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Always returns a renderable spec. When the generator itself fails the
    /// minimal fallback layout is returned in `template` mode.
    pub fn generate(&self, prompt: &str) -> AppSpec {
        let generator = Arc::clone(&self.generator);
        let owned_prompt = prompt.to_string();
        let raw = call_with_timeout("generate", self.timeout, move || {
            generator.generate(&owned_prompt)
        });

        let spec = match raw {
            Ok(raw) => {
                let repairer: Arc<dyn Repairer> =
                    Arc::new(GeneratorRepairer(Arc::clone(&self.generator)));
                self.coordinator.validate_and_repair(&raw, prompt, repairer)
            }
            Err(err) => {
                self.logger.error_with("generation failed, using fallback layout", &err);
                let mut spec = fallback_spec();
                spec.mode = "template".to_string();
                spec.problems.push(Problem::info(format!(
                    "generation failed ({err}); using fallback layout"
                )));
                spec
            }
        };

        if let Some(store) = &self.store {
            if !spec.is_error() {
                store.put_app(spec.clone());
            }
        }
        spec
    }
}
