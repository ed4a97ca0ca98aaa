use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::validator::Validation;
use super::is_interactive;

const CONTENT_PROPS: [&str; 4] = ["title", "label", "body", "text"];
const CONTAINER_TYPES: [&str; 3] = ["page", "section", "card"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viability {
    pub viable: bool,
    pub reason: String,
}

impl Viability {
    fn ok() -> Self {
        Self {
            viable: true,
            reason: "OK".to_string(),
        }
    }

    fn fail(reason: &str) -> Self {
        Self {
            viable: false,
            reason: reason.to_string(),
        }
    }
}

#[derive(Default)]
struct Walk {
    pages_have_children: bool,
    has_interactive: bool,
    has_content: bool,
}

/// Semantic completeness check. Accepts any JSON and never fails; the first
/// failing reason is reported in order: missing nodes, empty pages, no
/// interactive component, no content.
pub fn is_viable(spec: &Value) -> Viability {
    let nodes = spec
        .get("children")
        .filter(|value| value.is_array())
        .or_else(|| spec.get("layout").and_then(|layout| layout.get("nodes")));

    let Some(nodes) = nodes.and_then(Value::as_array).filter(|list| !list.is_empty()) else {
        return Viability::fail("No children nodes");
    };

    let mut state = Walk {
        pages_have_children: true,
        ..Walk::default()
    };
    walk(nodes, &mut state);

    if !state.pages_have_children {
        return Viability::fail("Page nodes missing children");
    }
    if !state.has_interactive {
        return Viability::fail("No interactive components (table/form/button/input/chart/list)");
    }
    if !state.has_content {
        return Viability::fail("All nodes are empty (no children or content)");
    }
    Viability::ok()
}

/// Viability gated on a prior structural validation.
pub fn check_viability(spec: &Value, validation: &Validation) -> Viability {
    if !validation.valid {
        return Viability::fail("validation failed");
    }
    is_viable(spec)
}

fn walk(nodes: &[Value], state: &mut Walk) {
    for node in nodes {
        let Some(map) = node.as_object() else {
            continue;
        };
        let node_type = map.get("type").and_then(Value::as_str).unwrap_or("");
        let children = map
            .get("children")
            .and_then(Value::as_array)
            .filter(|list| !list.is_empty());

        if node_type == "page" && children.is_none() {
            state.pages_have_children = false;
        }
        if is_interactive(node_type) {
            state.has_interactive = true;
        }
        if CONTAINER_TYPES.contains(&node_type) {
            if children.is_some() {
                state.has_content = true;
            }
        } else if has_content_prop(map.get("props")) {
            state.has_content = true;
        }
        if let Some(children) = children {
            walk(children, state);
        }
    }
}

fn has_content_prop(props: Option<&Value>) -> bool {
    let Some(props) = props.and_then(Value::as_object) else {
        return false;
    };
    CONTENT_PROPS.iter().any(|key| match props.get(*key) {
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Null) | Some(Value::Bool(false)) | None => false,
        Some(Value::Number(num)) => num.as_f64().map_or(false, |f| f != 0.0),
        Some(_) => true,
    })
}
