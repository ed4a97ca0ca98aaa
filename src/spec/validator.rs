use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::problem::{child_pointer, Problem};
use crate::workflow::definition::validate_workflow_at;

use super::{AppSpec, MODES, NODE_TYPES, STATUSES};

pub const DATA_SOURCE_TYPES: [&str; 2] = ["rest", "websocket"];
pub const HTTP_METHODS: [&str; 5] = ["GET", "POST", "PUT", "DELETE", "PATCH"];
const SEVERITIES: [&str; 3] = ["error", "warning", "info"];

/// Effects an action may chain; workflow handlers accept a narrower set.
pub const ACTION_EFFECT_TYPES: [&str; 8] = [
    "validate",
    "api-call",
    "update-state",
    "notify",
    "navigate",
    "conditional",
    "loop",
    "parallel",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    pub problems: Vec<Problem>,
}

impl Validation {
    fn from_problems(problems: Vec<Problem>) -> Self {
        Self {
            valid: problems.is_empty(),
            problems,
        }
    }
}

pub fn validate_spec(spec: &AppSpec) -> Validation {
    validate_strict(&spec.to_value())
}

/// Structural check of an AppSpec document. Every problem carries a JSON
/// pointer; the order follows document order, so the same input always
/// yields the same list.
pub fn validate_strict(spec: &Value) -> Validation {
    let mut checker = Checker::default();
    checker.root(spec);
    Validation::from_problems(checker.problems)
}

#[derive(Default)]
struct Checker {
    problems: Vec<Problem>,
    node_ids: HashSet<String>,
}

impl Checker {
    fn push(&mut self, path: &str, code: &str, detail: impl AsRef<str>) {
        self.problems.push(Problem::at(path, code, detail));
    }

    fn root(&mut self, spec: &Value) {
        let Some(root) = spec.as_object() else {
            self.push("", "type", "must be object");
            return;
        };
        for key in ["status", "version", "mode", "layout"] {
            if !root.contains_key(key) {
                self.push("", "required", format!("must have required property '{key}'"));
            }
        }
        if let Some(status) = root.get("status") {
            self.enum_string("/status", status, &STATUSES);
        }
        if let Some(version) = root.get("version") {
            self.non_empty_string("/version", version);
        }
        if let Some(mode) = root.get("mode") {
            self.enum_string("/mode", mode, &MODES);
        }
        if let Some(layout) = root.get("layout") {
            self.layout(layout);
        }
        if let Some(state) = root.get("state") {
            if !state.is_object() {
                self.push("/state", "type", "must be object");
            }
        }
        let source_ids = root
            .get("dataSources")
            .map(|sources| self.data_sources(sources))
            .unwrap_or_default();
        if let Some(actions) = root.get("actions") {
            self.actions(actions, &source_ids);
        }
        if let Some(workflows) = root.get("workflows") {
            match workflows.as_array() {
                Some(items) => {
                    for (idx, workflow) in items.iter().enumerate() {
                        let path = format!("/workflows/{idx}");
                        self.problems.extend(validate_workflow_at(workflow, &path));
                    }
                }
                None => self.push("/workflows", "type", "must be array"),
            }
        }
        if let Some(problems) = root.get("problems") {
            self.problem_list(problems);
        }
    }

    fn layout(&mut self, layout: &Value) {
        let Some(map) = layout.as_object() else {
            self.push("/layout", "type", "must be object");
            return;
        };
        for key in ["id", "name", "domain"] {
            match map.get(key) {
                Some(value) => self.string(&child_pointer("/layout", key), value),
                None => self.push(
                    "/layout",
                    "required",
                    format!("must have required property '{key}'"),
                ),
            }
        }
        match map.get("nodes") {
            Some(Value::Array(nodes)) => {
                if nodes.is_empty() {
                    self.push("/layout/nodes", "minItems", "must NOT have fewer than 1 items");
                }
                for (idx, node) in nodes.iter().enumerate() {
                    self.node(&format!("/layout/nodes/{idx}"), node);
                }
            }
            Some(_) => self.push("/layout/nodes", "type", "must be array"),
            None => self.push("/layout", "required", "must have required property 'nodes'"),
        }
    }

    fn node(&mut self, path: &str, node: &Value) {
        let Some(map) = node.as_object() else {
            self.push(path, "type", "must be object");
            return;
        };
        for key in ["id", "type", "props", "children"] {
            if !map.contains_key(key) {
                self.push(path, "required", format!("must have required property '{key}'"));
            }
        }
        if let Some(id) = map.get("id") {
            let id_path = child_pointer(path, "id");
            match id.as_str() {
                Some("") => self.push(&id_path, "minLength", "must NOT have fewer than 1 characters"),
                Some(text) => {
                    if !self.node_ids.insert(text.to_string()) {
                        self.push(&id_path, "duplicate", format!("duplicate node id '{text}'"));
                    }
                }
                None => self.push(&id_path, "type", "must be string"),
            }
        }
        if let Some(node_type) = map.get("type") {
            self.enum_string(&child_pointer(path, "type"), node_type, &NODE_TYPES);
        }
        if let Some(props) = map.get("props") {
            if !props.is_object() {
                self.push(&child_pointer(path, "props"), "type", "must be object");
            }
        }
        if let Some(children) = map.get("children") {
            let children_path = child_pointer(path, "children");
            match children.as_array() {
                Some(items) => {
                    for (idx, child) in items.iter().enumerate() {
                        self.node(&format!("{children_path}/{idx}"), child);
                    }
                }
                None => self.push(&children_path, "type", "must be array"),
            }
        }
    }

    fn data_sources(&mut self, sources: &Value) -> HashSet<String> {
        let mut ids = HashSet::new();
        let Some(items) = sources.as_array() else {
            self.push("/dataSources", "type", "must be array");
            return ids;
        };
        for (idx, source) in items.iter().enumerate() {
            let path = format!("/dataSources/{idx}");
            let Some(map) = source.as_object() else {
                self.push(&path, "type", "must be object");
                continue;
            };
            self.required_keys(&path, map, &["id", "type", "url"]);
            if let Some(id) = map.get("id") {
                self.string(&child_pointer(&path, "id"), id);
                if let Some(text) = id.as_str() {
                    if !ids.insert(text.to_string()) {
                        self.push(
                            &child_pointer(&path, "id"),
                            "duplicate",
                            format!("duplicate data source id '{text}'"),
                        );
                    }
                }
            }
            if let Some(kind) = map.get("type") {
                self.enum_string(&child_pointer(&path, "type"), kind, &DATA_SOURCE_TYPES);
            }
            if let Some(url) = map.get("url") {
                self.non_empty_string(&child_pointer(&path, "url"), url);
            }
            if let Some(methods) = map.get("methods") {
                let methods_path = child_pointer(&path, "methods");
                match methods.as_array() {
                    Some(verbs) => {
                        for (m_idx, verb) in verbs.iter().enumerate() {
                            self.enum_string(&format!("{methods_path}/{m_idx}"), verb, &HTTP_METHODS);
                        }
                    }
                    None => self.push(&methods_path, "type", "must be array"),
                }
            }
        }
        ids
    }

    fn actions(&mut self, actions: &Value, source_ids: &HashSet<String>) {
        let Some(items) = actions.as_array() else {
            self.push("/actions", "type", "must be array");
            return;
        };
        for (idx, action) in items.iter().enumerate() {
            let path = format!("/actions/{idx}");
            let Some(map) = action.as_object() else {
                self.push(&path, "type", "must be object");
                continue;
            };
            self.required_keys(&path, map, &["id", "trigger", "effects"]);
            if let Some(id) = map.get("id") {
                self.non_empty_string(&child_pointer(&path, "id"), id);
            }
            if let Some(trigger) = map.get("trigger") {
                self.non_empty_string(&child_pointer(&path, "trigger"), trigger);
            }
            if let Some(effects) = map.get("effects") {
                let effects_path = child_pointer(&path, "effects");
                match effects.as_array() {
                    Some(list) => {
                        for (e_idx, effect) in list.iter().enumerate() {
                            self.effect(&format!("{effects_path}/{e_idx}"), effect, source_ids);
                        }
                    }
                    None => self.push(&effects_path, "type", "must be array"),
                }
            }
        }
    }

    fn effect(&mut self, path: &str, effect: &Value, source_ids: &HashSet<String>) {
        let Some(map) = effect.as_object() else {
            self.push(path, "type", "must be object");
            return;
        };
        match map.get("type") {
            Some(kind) => self.enum_string(&child_pointer(path, "type"), kind, &ACTION_EFFECT_TYPES),
            None => self.push(path, "required", "must have required property 'type'"),
        }
        if let Some(source) = map.get("dataSource") {
            let source_path = child_pointer(path, "dataSource");
            match source.as_str() {
                Some(id) if !source_ids.contains(id) => self.push(
                    &source_path,
                    "reference",
                    format!("unknown data source '{id}'"),
                ),
                Some(_) => {}
                None => self.push(&source_path, "type", "must be string"),
            }
        }
    }

    fn problem_list(&mut self, problems: &Value) {
        let Some(items) = problems.as_array() else {
            self.push("/problems", "type", "must be array");
            return;
        };
        for (idx, problem) in items.iter().enumerate() {
            let path = format!("/problems/{idx}");
            let Some(map) = problem.as_object() else {
                self.push(&path, "type", "must be object");
                continue;
            };
            self.required_keys(&path, map, &["severity", "message"]);
            if let Some(severity) = map.get("severity") {
                self.enum_string(&child_pointer(&path, "severity"), severity, &SEVERITIES);
            }
            if let Some(message) = map.get("message") {
                self.string(&child_pointer(&path, "message"), message);
            }
        }
    }

    fn required_keys(&mut self, path: &str, map: &Map<String, Value>, keys: &[&str]) {
        for key in keys {
            if !map.contains_key(*key) {
                self.push(path, "required", format!("must have required property '{key}'"));
            }
        }
    }

    fn string(&mut self, path: &str, value: &Value) {
        if !value.is_string() {
            self.push(path, "type", "must be string");
        }
    }

    fn non_empty_string(&mut self, path: &str, value: &Value) {
        match value.as_str() {
            Some("") => self.push(path, "minLength", "must NOT have fewer than 1 characters"),
            Some(_) => {}
            None => self.push(path, "type", "must be string"),
        }
    }

    fn enum_string(&mut self, path: &str, value: &Value, allowed: &[&str]) {
        match value.as_str() {
            Some(text) if allowed.contains(&text) => {}
            Some(text) => self.push(
                path,
                "enum",
                format!("'{text}' must be equal to one of the allowed values: {}", allowed.join(", ")),
            ),
            None => self.push(path, "type", "must be string"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reports_nested_node_paths() {
        let spec = json!({
            "status": "ok", "version": "2.0", "mode": "generated",
            "layout": { "id": "l", "name": "n", "domain": "d", "nodes": [
                { "id": "p", "type": "page", "props": {}, "children": [
                    { "id": "w", "type": "widget", "props": [], "children": [] }
                ]}
            ]}
        });
        let result = validate_strict(&spec);
        assert!(!result.valid);
        let paths: Vec<_> = result.problems.iter().filter_map(|p| p.path.clone()).collect();
        assert_eq!(
            paths,
            vec!["/layout/nodes/0/children/0/type", "/layout/nodes/0/children/0/props"]
        );
    }

    #[test]
    fn non_object_root_is_a_single_type_problem() {
        let result = validate_strict(&json!([1, 2]));
        assert_eq!(result.problems.len(), 1);
        assert_eq!(result.problems[0].code.as_deref(), Some("type"));
    }
}
