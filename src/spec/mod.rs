//! The AppSpec document: a JSON description of a generated UI, plus the
//! pipeline that normalizes, validates and repairs it.
//!
//! Raw generator output goes through [`normalize`], then [`validate_strict`];
//! structurally invalid documents are handed to a [`Repairer`] by the
//! [`RepairCoordinator`], and schema-valid documents are finally checked with
//! [`is_viable`].

pub mod normalizer;
pub mod repair;
pub mod validator;
pub mod viability;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::problem::Problem;

pub use normalizer::normalize;
pub use repair::{RepairCoordinator, RepairRequest, Repairer, SpecPipeline};
pub use validator::{validate_spec, validate_strict, Validation};
pub use viability::{check_viability, is_viable, Viability};

/// Node types that count as interactive content.
pub const INTERACTIVE_TYPES: [&str; 6] = ["table", "form", "button", "input", "chart", "list"];

/// Node types accepted by the structural validator.
pub const NODE_TYPES: [&str; 15] = [
    "page", "section", "card", "grid", "tabs", "header", "text", "metric", "image", "button",
    "table", "form", "input", "chart", "list",
];

pub const STATUSES: [&str; 2] = ["ok", "error"];

pub const MODES: [&str; 4] = ["generated", "refined", "demo", "template"];

pub fn is_interactive(node_type: &str) -> bool {
    INTERACTIVE_TYPES.contains(&node_type)
}

/// One node of the UI tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub props: Map<String, Value>,
    #[serde(default)]
    pub children: Vec<UiNode>,
}

impl UiNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            props: Map::new(),
            children: Vec::new(),
        }
    }

    pub fn with_prop(mut self, key: &str, value: Value) -> Self {
        self.props.insert(key.to_string(), value);
        self
    }

    pub fn with_children(mut self, children: Vec<UiNode>) -> Self {
        self.children = children;
        self
    }

    pub fn is_interactive(&self) -> bool {
        is_interactive(&self.node_type)
    }

    /// Depth-first, pre-order visit of this node and its descendants.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a UiNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub id: String,
    pub name: String,
    pub domain: String,
    #[serde(default)]
    pub nodes: Vec<UiNode>,
}

/// A normalized AppSpec. `status` and `mode` stay plain strings so that the
/// validator can still report values outside their vocabulary; everything the
/// normalizer does not own (`state`, `dataSources`, `actions`, `workflows`,
/// unknown keys) is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSpec {
    pub status: String,
    pub version: String,
    pub mode: String,
    pub layout: Layout,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<Problem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AppSpec {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn is_error(&self) -> bool {
        self.status == "error"
    }

    pub fn node_count(&self) -> usize {
        let mut count = 0;
        for node in &self.layout.nodes {
            node.walk(&mut |_| count += 1);
        }
        count
    }

    pub fn find_node(&self, id: &str) -> Option<&UiNode> {
        let mut found = None;
        for node in &self.layout.nodes {
            node.walk(&mut |candidate| {
                if found.is_none() && candidate.id == id {
                    found = Some(candidate);
                }
            });
        }
        found
    }

    pub fn workflows(&self) -> &[Value] {
        self.extra
            .get("workflows")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
