use std::collections::HashSet;

use regex::Regex;
use serde_json::{Map, Value};

use crate::problem::{child_pointer, Problem};
use crate::spec::validator::HTTP_METHODS;

pub const STEP_TYPES: [&str; 6] = [
    "validation",
    "api-call",
    "llm-task",
    "conditional",
    "loop",
    "parallel",
];
pub const EFFECT_TYPES: [&str; 4] = ["notify", "update-state", "navigate", "api-call"];
pub const TRIGGERS: [&str; 4] = ["manual", "auto", "cron", "event"];
pub const STATE_OPERATIONS: [&str; 6] = ["set", "merge", "append", "reset", "increment", "decrement"];
const NOTIFY_VARIANTS: [&str; 4] = ["info", "success", "warning", "error"];

/// Shape check of a standalone workflow document.
pub fn validate_workflow(workflow: &Value) -> Vec<Problem> {
    validate_workflow_at(workflow, "")
}

/// Shape check of a workflow embedded at JSON pointer `base`. Step ids must
/// be unique across the whole tree since results are recorded by id.
pub fn validate_workflow_at(workflow: &Value, base: &str) -> Vec<Problem> {
    let mut checker = DefinitionChecker::default();
    checker.workflow(base, workflow);
    checker.problems
}

#[derive(Default)]
struct DefinitionChecker {
    problems: Vec<Problem>,
    step_ids: HashSet<String>,
}

impl DefinitionChecker {
    fn push(&mut self, path: &str, code: &str, detail: impl AsRef<str>) {
        self.problems.push(Problem::at(path, code, detail));
    }

    fn workflow(&mut self, path: &str, workflow: &Value) {
        let Some(map) = workflow.as_object() else {
            self.push(path, "type", "must be object");
            return;
        };
        self.required(path, map, &["id", "name", "steps"]);
        if let Some(id) = map.get("id") {
            self.non_empty_string(&child_pointer(path, "id"), id);
        }
        if let Some(name) = map.get("name") {
            self.string(&child_pointer(path, "name"), name);
        }
        if let Some(trigger) = map.get("trigger") {
            self.one_of(&child_pointer(path, "trigger"), trigger, &TRIGGERS);
        }
        if let Some(steps) = map.get("steps") {
            let steps_path = child_pointer(path, "steps");
            match steps.as_array() {
                Some(items) if items.is_empty() => {
                    self.push(&steps_path, "minItems", "must NOT have fewer than 1 items")
                }
                Some(_) => self.steps(&steps_path, steps),
                None => self.push(&steps_path, "type", "must be array"),
            }
        }
        for key in ["onSuccess", "onError"] {
            if let Some(effect) = map.get(key) {
                self.effect(&child_pointer(path, key), effect);
            }
        }
    }

    fn steps(&mut self, path: &str, steps: &Value) {
        let Some(items) = steps.as_array() else {
            self.push(path, "type", "must be array");
            return;
        };
        for (idx, step) in items.iter().enumerate() {
            self.step(&format!("{path}/{idx}"), step);
        }
    }

    fn step(&mut self, path: &str, step: &Value) {
        let Some(map) = step.as_object() else {
            self.push(path, "type", "must be object");
            return;
        };
        self.required(path, map, &["id", "name", "type"]);
        if let Some(id) = map.get("id") {
            let id_path = child_pointer(path, "id");
            self.non_empty_string(&id_path, id);
            if let Some(text) = id.as_str().filter(|text| !text.is_empty()) {
                if !self.step_ids.insert(text.to_string()) {
                    self.push(&id_path, "duplicate", format!("duplicate step id '{text}'"));
                }
            }
        }
        if let Some(name) = map.get("name") {
            self.string(&child_pointer(path, "name"), name);
        }
        let Some(kind) = map.get("type") else {
            return;
        };
        if !self.one_of(&child_pointer(path, "type"), kind, &STEP_TYPES) {
            return;
        }
        match kind.as_str().unwrap_or_default() {
            "validation" => self.validation(path, map),
            "api-call" => {
                self.required(path, map, &["url"]);
                if let Some(url) = map.get("url") {
                    self.non_empty_string(&child_pointer(path, "url"), url);
                }
                if let Some(method) = map.get("method") {
                    self.one_of(&child_pointer(path, "method"), method, &HTTP_METHODS);
                }
            }
            "llm-task" => {
                self.required(path, map, &["prompt"]);
                if let Some(prompt) = map.get("prompt") {
                    self.string(&child_pointer(path, "prompt"), prompt);
                }
            }
            "conditional" => {
                self.required(path, map, &["condition"]);
                if let Some(condition) = map.get("condition") {
                    self.non_empty_string(&child_pointer(path, "condition"), condition);
                }
                for branch in ["then", "else"] {
                    if let Some(steps) = map.get(branch) {
                        self.steps(&child_pointer(path, branch), steps);
                    }
                }
            }
            "loop" => {
                self.required(path, map, &["items", "steps"]);
                if let Some(items) = map.get("items") {
                    self.non_empty_string(&child_pointer(path, "items"), items);
                }
                if let Some(variable) = map.get("itemVariable") {
                    self.non_empty_string(&child_pointer(path, "itemVariable"), variable);
                }
                if let Some(steps) = map.get("steps") {
                    self.steps(&child_pointer(path, "steps"), steps);
                }
            }
            "parallel" => {
                self.required(path, map, &["steps"]);
                if let Some(steps) = map.get("steps") {
                    self.steps(&child_pointer(path, "steps"), steps);
                }
            }
            _ => {}
        }
    }

    fn validation(&mut self, path: &str, map: &Map<String, Value>) {
        self.required(path, map, &["rules"]);
        let Some(rules) = map.get("rules") else {
            return;
        };
        let rules_path = child_pointer(path, "rules");
        let Some(rules) = rules.as_object() else {
            self.push(&rules_path, "type", "must be object");
            return;
        };
        for (field, rule) in rules {
            let rule_path = child_pointer(&rules_path, field);
            let Some(rule) = rule.as_object() else {
                self.push(&rule_path, "type", "must be object");
                continue;
            };
            if let Some(required) = rule.get("required") {
                if !required.is_boolean() {
                    self.push(&child_pointer(&rule_path, "required"), "type", "must be boolean");
                }
            }
            if let Some(pattern) = rule.get("pattern") {
                let pattern_path = child_pointer(&rule_path, "pattern");
                match pattern.as_str() {
                    Some(text) => {
                        if let Err(err) = Regex::new(text) {
                            self.push(&pattern_path, "pattern", format!("invalid pattern: {err}"));
                        }
                    }
                    None => self.push(&pattern_path, "type", "must be string"),
                }
            }
            for bound in ["min", "max"] {
                if let Some(value) = rule.get(bound) {
                    if !value.is_number() {
                        self.push(&child_pointer(&rule_path, bound), "type", "must be number");
                    }
                }
            }
        }
    }

    fn effect(&mut self, path: &str, effect: &Value) {
        let Some(map) = effect.as_object() else {
            self.push(path, "type", "must be object");
            return;
        };
        self.required(path, map, &["type"]);
        let Some(kind) = map.get("type") else {
            return;
        };
        if !self.one_of(&child_pointer(path, "type"), kind, &EFFECT_TYPES) {
            return;
        }
        match kind.as_str().unwrap_or_default() {
            "notify" => {
                if let Some(message) = map.get("message") {
                    self.string(&child_pointer(path, "message"), message);
                }
                if let Some(variant) = map.get("variant") {
                    self.one_of(&child_pointer(path, "variant"), variant, &NOTIFY_VARIANTS);
                }
            }
            "update-state" => {
                self.required(path, map, &["path"]);
                if let Some(target) = map.get("path") {
                    self.non_empty_string(&child_pointer(path, "path"), target);
                }
                if let Some(operation) = map.get("operation") {
                    self.one_of(&child_pointer(path, "operation"), operation, &STATE_OPERATIONS);
                }
            }
            "navigate" => {
                self.required(path, map, &["route"]);
                if let Some(route) = map.get("route") {
                    self.non_empty_string(&child_pointer(path, "route"), route);
                }
            }
            _ => {}
        }
    }

    fn required(&mut self, path: &str, map: &Map<String, Value>, keys: &[&str]) {
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
            Some(text) if text.trim().is_empty() => {
                self.push(path, "minLength", "must NOT have fewer than 1 characters")
            }
            Some(_) => {}
            None => self.push(path, "type", "must be string"),
        }
    }

    fn one_of(&mut self, path: &str, value: &Value, allowed: &[&str]) -> bool {
        match value.as_str() {
            Some(text) if allowed.contains(&text) => true,
            Some(text) => {
                self.push(
                    path,
                    "enum",
                    format!("'{text}' must be equal to one of the allowed values: {}", allowed.join(", ")),
                );
                false
            }
            None => {
                self.push(path, "type", "must be string");
                false
            }
        }
    }
}
