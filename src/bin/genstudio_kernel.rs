use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use genstudio_kernel::generator::{Generator, HttpGenerator};
use genstudio_kernel::logging::{Logger, StdioSink};
use genstudio_kernel::problem::format_problems;
use genstudio_kernel::spec::{check_viability, normalize, validate_strict, SpecPipeline};
use genstudio_kernel::workflow::{StepInterpreter, UreqHttpClient, WorkflowEngine};
use genstudio_kernel::{validate_workflow, KernelConfig, WorkflowError};

#[derive(Parser, Debug)]
#[command(name = "genstudio-kernel")]
#[command(about = "Normalize, validate and repair AppSpecs; run workflows")]
struct CliOptions {
    /// Path to a kernel.toml (defaults to $GENSTUDIO_CONFIG or the user config dir)
    #[arg(long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the normalized form of an AppSpec document (JSON or YAML, '-' for stdin)
    Normalize { input: String },
    /// Normalize and validate an AppSpec document, then report viability
    Validate { input: String },
    /// Check the shape of a workflow definition
    CheckWorkflow { input: String },
    /// Execute a workflow definition
    RunWorkflow {
        input: String,
        /// Initial context document
        #[arg(long = "context")]
        context: Option<String>,
    },
    /// Generate an AppSpec from a prompt (requires generatorUrl)
    Generate {
        #[arg(long = "prompt", short = 'p')]
        prompt: String,
    },
}

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<bool> {
    let opts = CliOptions::parse();
    let config = KernelConfig::load(opts.config.as_deref())?;
    let logger = Logger::new(Arc::new(StdioSink), config.level()?);

    match opts.command {
        Command::Normalize { input } => {
            let spec = normalize(&read_document(&input)?);
            print_json(&spec.to_value())?;
            Ok(true)
        }
        Command::Validate { input } => {
            let document = normalize(&read_document(&input)?).to_value();
            let validation = validate_strict(&document);
            let viability = check_viability(&document, &validation);
            for line in format_problems(&validation.problems) {
                eprintln!("{line}");
            }
            print_json(&json!({ "validation": validation, "viability": viability }))?;
            Ok(validation.valid && viability.viable)
        }
        Command::CheckWorkflow { input } => {
            let problems = validate_workflow(&read_document(&input)?);
            for line in format_problems(&problems) {
                eprintln!("{line}");
            }
            print_json(&json!({ "valid": problems.is_empty(), "problems": problems }))?;
            Ok(problems.is_empty())
        }
        Command::RunWorkflow { input, context } => {
            let definition = read_document(&input)?;
            let initial = match context {
                Some(source) => read_document(&source)?,
                None => json!({}),
            };
            let mut interpreter =
                StepInterpreter::from_config(&config, Arc::new(UreqHttpClient::new()), &logger);
            if let Some(generator) = configured_generator(&config) {
                interpreter = interpreter.with_generator(generator);
            }
            let engine = WorkflowEngine::from_config(&config, interpreter, &logger);

            let token = engine.cancellation_token();
            ctrlc::set_handler(move || {
                token.store(true, Ordering::SeqCst);
            })?;

            match engine.execute_definition(&definition, initial) {
                Ok(execution) => {
                    print_json(&serde_json::to_value(&execution)?)?;
                    Ok(true)
                }
                Err(WorkflowError::InvalidDefinition { problems }) => {
                    for line in format_problems(&problems) {
                        eprintln!("{line}");
                    }
                    Err(anyhow!("workflow definition is invalid"))
                }
                Err(err) => {
                    if let Some(execution) = err.execution() {
                        print_json(&serde_json::to_value(execution)?)?;
                    }
                    eprintln!("{err}");
                    Ok(false)
                }
            }
        }
        Command::Generate { prompt } => {
            let generator = configured_generator(&config)
                .ok_or_else(|| anyhow!("generate requires generatorUrl in the kernel config"))?;
            let spec = SpecPipeline::from_config(generator, &config, &logger).generate(&prompt);
            print_json(&spec.to_value())?;
            Ok(!spec.is_error())
        }
    }
}

fn configured_generator(config: &KernelConfig) -> Option<Arc<dyn Generator>> {
    config
        .generator_url
        .as_ref()
        .map(|url| Arc::new(HttpGenerator::new(url.clone(), config.llm_timeout())) as Arc<dyn Generator>)
}

/// Read a JSON or YAML document from a path, or from stdin when `source`
/// is `-`.
fn read_document(source: &str) -> Result<Value> {
    let (text, origin) = if source == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read document from stdin")?;
        (buffer, "stdin".to_string())
    } else {
        let text = fs::read_to_string(source).with_context(|| format!("Unable to read {source}"))?;
        (text, source.to_string())
    };
    if text.trim().is_empty() {
        return Ok(json!({}));
    }
    if is_yaml(Path::new(source)) {
        return serde_yaml::from_str(&text).with_context(|| format!("invalid YAML in {origin}"));
    }
    serde_json::from_str(&text).or_else(|json_err| {
        serde_yaml::from_str(&text)
            .map_err(|_| anyhow!(json_err))
            .with_context(|| format!("invalid JSON in {origin}"))
    })
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
