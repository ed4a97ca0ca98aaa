use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};

use crate::path::{display_value, get_by_path};

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{(.+?)\}\}").expect("static interpolation pattern"))
}

/// Replace every `{{path}}` token with the value found at `path` in
/// `context`. Unresolved tokens are left in place.
pub fn interpolate(template: &str, context: &Value) -> String {
    render(template, context, display_value, |token| token.to_string())
}

/// Interpolation for condition expressions: values are spliced in as JSON
/// literals (strings quoted). Unresolved tokens are left in place, so the
/// condition parser rejects them.
pub fn interpolate_condition(template: &str, context: &Value) -> String {
    render(template, context, Value::to_string, |token| token.to_string())
}

fn render<F, M>(template: &str, context: &Value, resolved: F, missing: M) -> String
where
    F: Fn(&Value) -> String,
    M: Fn(&str) -> String,
{
    let replaced: Cow<'_, str> = token_pattern().replace_all(template, |caps: &Captures<'_>| {
        match get_by_path(context, &caps[1]) {
            Some(value) => resolved(value),
            None => missing(&caps[0]),
        }
    });
    replaced.into_owned()
}

/// If `text` is exactly one token, return the path inside it.
pub fn sole_token(text: &str) -> Option<&str> {
    let caps = token_pattern().captures(text)?;
    let whole = caps.get(0)?;
    if whole.start() == 0 && whole.end() == text.len() {
        caps.get(1).map(|inner| inner.as_str().trim())
    } else {
        None
    }
}

/// Interpolate every string leaf of a JSON document. A string that is a
/// single token takes the referenced value with its type intact.
pub fn interpolate_value(value: &Value, context: &Value) -> Value {
    match value {
        Value::String(text) => {
            if let Some(path) = sole_token(text) {
                if let Some(found) = get_by_path(context, path) {
                    return found.clone();
                }
            }
            Value::String(interpolate(text, context))
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| interpolate_value(item, context))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), interpolate_value(item, context));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn substitutes_resolved_tokens() {
        let ctx = json!({ "state": { "id": 42, "name": "ada" } });
        assert_eq!(
            interpolate("/users/{{state.id}}?n={{ state.name }}", &ctx),
            "/users/42?n=ada"
        );
    }

    #[test]
    fn leaves_unresolved_tokens_untouched() {
        let ctx = json!({});
        assert_eq!(interpolate("hi {{missing.path}}", &ctx), "hi {{missing.path}}");
    }

    #[test]
    fn conditions_get_json_literals() {
        let ctx = json!({ "state": { "name": "ada", "n": 3 } });
        assert_eq!(
            interpolate_condition("{{state.name}} == 'ada' && {{state.n}} > {{nope}}", &ctx),
            "\"ada\" == 'ada' && 3 > {{nope}}"
        );
    }

    #[test]
    fn single_token_leaves_keep_their_type() {
        let ctx = json!({ "state": { "items": [1, 2], "user": "ada" } });
        let body = json!({ "items": "{{state.items}}", "greeting": "hi {{state.user}}", "n": 5 });
        assert_eq!(
            interpolate_value(&body, &ctx),
            json!({ "items": [1, 2], "greeting": "hi ada", "n": 5 })
        );
    }
}
