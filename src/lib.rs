pub mod config;
pub mod error;
pub mod generator;
pub mod logging;
pub mod path;
pub mod problem;
pub mod spec;
pub mod store;
pub mod workflow;

pub use config::KernelConfig;
pub use error::{CancelledError, TimeoutError, WorkflowError};
pub use generator::{FnGenerator, Generator, HttpGenerator};
pub use logging::{LogLevel, LogSink, Logger, MemorySink, StdioSink};
pub use problem::{format_problems, Problem, Severity};
pub use spec::{
    check_viability, is_viable, normalize, validate_spec, validate_strict, AppSpec,
    RepairCoordinator, RepairRequest, Repairer, SpecPipeline, UiNode, Validation, Viability,
};
pub use store::{AppStore, ExecutionStore, MemoryAppStore, MemoryExecutionStore, RingStore};
pub use workflow::{
    parse_workflow, validate_workflow, Effect, EffectHandler, Execution, ExecutionStatus,
    StepInterpreter, StepOutcome, Workflow, WorkflowEngine, WorkflowStep,
};
