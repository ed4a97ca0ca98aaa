use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A single finding produced by validation or viability checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl Problem {
    /// An error located at a JSON pointer. The message is prefixed with the
    /// pointer (or `root`).
    pub fn at(path: &str, code: &str, detail: impl AsRef<str>) -> Self {
        let location = if path.is_empty() { "root" } else { path };
        Self {
            severity: Severity::Error,
            message: format!("{location}: {}", detail.as_ref()),
            path: Some(path.to_string()),
            code: Some(code.to_string()),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
            path: None,
            code: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
            path: None,
            code: None,
        }
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Render problems for people: pointer separators become ` > `.
pub fn format_problems(problems: &[Problem]) -> Vec<String> {
    problems
        .iter()
        .map(|problem| {
            let text = problem.message.trim_start_matches('/').replace('/', " > ");
            let text = if text.is_empty() {
                "Unknown error".to_string()
            } else {
                text
            };
            let label = match problem.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
                Severity::Info => "info",
            };
            format!("[{label}] {text}")
        })
        .collect()
}

/// Escape a key for use as a JSON pointer segment.
pub(crate) fn pointer_segment(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

pub(crate) fn child_pointer(parent: &str, key: &str) -> String {
    format!("{parent}/{}", pointer_segment(key))
}
