use serde_json::{json, Map, Value};

use crate::path::{display_value, uid};
use crate::problem::Problem;

use super::{AppSpec, Layout, UiNode};

const DEFAULT_STATUS: &str = "ok";
const DEFAULT_VERSION: &str = "2.0";
const DEFAULT_MODE: &str = "generated";
const DEFAULT_LAYOUT_NAME: &str = "Generated App";
const DEFAULT_DOMAIN: &str = "generic";

/// Keys owned by [`AppSpec`] fields; they never survive in `extra`.
const OWNED_KEYS: [&str; 5] = ["status", "version", "mode", "layout", "problems"];

/// Force an arbitrary JSON document into AppSpec shape.
///
/// Total and idempotent: any input yields a spec with a non-empty
/// `layout.nodes`, every node has an id, a type, object props and a children
/// list, and every page holds at least one section with interactive content.
/// Normalizing an already normalized spec changes nothing.
pub fn normalize(raw: &Value) -> AppSpec {
    let root = match raw {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    let mut extra = root.clone();
    for key in OWNED_KEYS {
        extra.remove(key);
    }

    let layout_value = root.get("layout").and_then(Value::as_object);
    let mut nodes = layout_value
        .and_then(|layout| layout.get("nodes"))
        .map(normalize_node_list)
        .unwrap_or_default();

    if nodes.is_empty() {
        if let Some(top_level) = root.get("nodes").filter(|value| value.is_array()) {
            nodes = normalize_node_list(top_level);
            extra.remove("nodes");
        }
    }

    if nodes.is_empty() {
        nodes.push(skeleton_page());
    }

    for node in nodes.iter_mut() {
        ensure_page_content(node);
    }

    let layout = Layout {
        id: layout_string(layout_value, &root, "id").unwrap_or_else(|| uid("layout")),
        name: layout_string(layout_value, &root, "name")
            .unwrap_or_else(|| DEFAULT_LAYOUT_NAME.to_string()),
        domain: layout_string(layout_value, &root, "domain")
            .unwrap_or_else(|| DEFAULT_DOMAIN.to_string()),
        nodes,
    };

    let problems = root.get("problems").map(normalize_problems).unwrap_or_default();

    AppSpec {
        status: scalar_or(root.get("status"), DEFAULT_STATUS),
        version: scalar_or(root.get("version"), DEFAULT_VERSION),
        mode: scalar_or(root.get("mode"), DEFAULT_MODE),
        layout,
        problems,
        extra,
    }
}

/// The minimal renderable spec used when nothing usable was produced.
pub fn fallback_spec() -> AppSpec {
    normalize(&Value::Null)
}

/// Keep well-formed problems; anything else is reported once as an `info`
/// problem so the list stays the only `problems` entry.
fn normalize_problems(value: &Value) -> Vec<Problem> {
    let entries = match value {
        Value::Array(items) => items.as_slice(),
        Value::Null => return Vec::new(),
        _ => std::slice::from_ref(value),
    };
    let mut problems = Vec::with_capacity(entries.len());
    let mut discarded = 0;
    for entry in entries {
        match serde_json::from_value::<Problem>(entry.clone()) {
            Ok(problem) => problems.push(problem),
            Err(_) => discarded += 1,
        }
    }
    if discarded > 0 {
        problems.push(
            Problem::info(format!("discarded {discarded} malformed problem entries"))
                .with_code("normalize"),
        );
    }
    problems
}

fn layout_string(
    layout: Option<&Map<String, Value>>,
    root: &Map<String, Value>,
    key: &str,
) -> Option<String> {
    let from_layout = layout.and_then(|map| map.get(key)).and_then(non_empty_scalar);
    // Only a synthesized layout borrows top-level id/name/domain.
    if layout.is_some() {
        return from_layout;
    }
    root.get(key).and_then(non_empty_scalar)
}

fn non_empty_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => None,
        other => Some(display_value(other)).filter(|text| !text.is_empty()),
    }
}

fn scalar_or(value: Option<&Value>, default: &str) -> String {
    value
        .and_then(non_empty_scalar)
        .unwrap_or_else(|| default.to_string())
}

fn normalize_node_list(value: &Value) -> Vec<UiNode> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(normalize_node).collect())
        .unwrap_or_default()
}

fn normalize_node(value: &Value) -> Option<UiNode> {
    let node = value.as_object()?;
    let id = node
        .get("id")
        .and_then(non_empty_scalar)
        .unwrap_or_else(|| uid("node"));
    let node_type = node
        .get("type")
        .and_then(non_empty_scalar)
        .unwrap_or_else(|| "section".to_string());
    let props = node
        .get("props")
        .and_then(Value::as_object)
        .map(normalize_props)
        .unwrap_or_default();
    let children = node
        .get("children")
        .map(normalize_node_list)
        .unwrap_or_default();
    Some(UiNode {
        id,
        node_type,
        props,
        children,
    })
}

fn normalize_props(props: &Map<String, Value>) -> Map<String, Value> {
    let mut out = props.clone();
    for key in ["title", "label"] {
        if let Some(value) = out.get_mut(key) {
            if !value.is_string() && !value.is_null() {
                *value = Value::String(stringify(value));
            }
        }
    }
    if let Some(Value::Array(columns)) = out.get_mut("columns") {
        for column in columns.iter_mut() {
            if !column.is_string() {
                *column = Value::String(column_label(column));
            }
        }
    }
    out
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn column_label(column: &Value) -> String {
    if let Value::Object(map) = column {
        for key in ["label", "title", "name", "key"] {
            if let Some(Value::String(text)) = map.get(key) {
                return text.clone();
            }
        }
    }
    display_value(column)
}

fn ensure_page_content(node: &mut UiNode) {
    if node.node_type == "page" {
        if node.children.is_empty() {
            node.children.push(default_section(Vec::new()));
        }
        match node.children.first_mut() {
            Some(first) if first.node_type == "section" => {
                ensure_interactive_children(&mut first.children);
            }
            _ => ensure_interactive_children(&mut node.children),
        }
    }
    for child in node.children.iter_mut() {
        ensure_page_content(child);
    }
}

fn ensure_interactive_children(children: &mut Vec<UiNode>) {
    if children.iter().any(UiNode::is_interactive) {
        return;
    }
    children.push(default_table());
    children.push(default_button());
}

fn default_table() -> UiNode {
    UiNode::new(uid("tbl"), "table")
        .with_prop("title", json!("Records"))
        .with_prop("columns", json!(["ID", "Name"]))
}

fn default_button() -> UiNode {
    UiNode::new(uid("btn"), "button")
        .with_prop("label", json!("Add"))
        .with_prop("variant", json!("primary"))
        .with_prop("action", json!("create"))
}

fn default_section(children: Vec<UiNode>) -> UiNode {
    UiNode::new(uid("sec"), "section")
        .with_prop("title", json!("Overview"))
        .with_children(children)
}

fn skeleton_page() -> UiNode {
    UiNode::new(uid("page"), "page")
        .with_prop("title", json!("Dashboard"))
        .with_children(vec![default_section(vec![
            default_table(),
            default_button(),
        ])])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::is_interactive;

    #[test]
    fn interactive_check_ignores_nested_descendants() {
        let page = json!({
            "type": "page",
            "children": [{ "type": "section", "children": [
                { "type": "card", "children": [{ "type": "button" }] }
            ]}]
        });
        let spec = normalize(&json!({ "nodes": [page] }));
        let section = &spec.layout.nodes[0].children[0];
        assert_eq!(section.children.len(), 3);
        assert!(is_interactive(&section.children[1].node_type));
    }

    #[test]
    fn page_without_leading_section_gets_direct_defaults() {
        let spec = normalize(&json!({ "nodes": [
            { "type": "page", "children": [{ "type": "text", "props": { "text": "hi" } }] }
        ]}));
        let kinds: Vec<&str> = spec.layout.nodes[0]
            .children
            .iter()
            .map(|n| n.node_type.as_str())
            .collect();
        assert_eq!(kinds, vec!["text", "table", "button"]);
    }

    #[test]
    fn malformed_problems_become_a_single_note() {
        let spec = normalize(&json!({ "problems": [
            { "severity": "warning", "message": "kept" },
            "loose text",
            { "message": "no severity" }
        ]}));
        assert!(!spec.extra.contains_key("problems"));
        assert_eq!(spec.problems.len(), 2);
        assert_eq!(spec.problems[0].message, "kept");
        assert_eq!(spec.problems[1].code.as_deref(), Some("normalize"));
        assert_eq!(normalize(&spec.to_value()), spec);
    }

    #[test]
    fn columns_objects_use_their_label() {
        let props = normalize_props(
            json!({ "columns": [{ "key": "id", "label": "ID" }, 3, "Name"], "title": 42 })
                .as_object()
                .unwrap(),
        );
        assert_eq!(props["columns"], json!(["ID", "3", "Name"]));
        assert_eq!(props["title"], json!("42"));
    }
}
