use rand::Rng;
use serde_json::{Map, Value};

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate an identifier of the form `<prefix>-<6 base36 chars>`.
pub fn uid(prefix: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..6)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{prefix}-{suffix}")
}

/// Resolve a dot-notation path (`a.b.0.c`) against a JSON value.
pub fn get_by_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    let mut current = root;
    for part in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(part)?,
            Value::Array(arr) => {
                let idx: usize = part.parse().ok()?;
                current = arr.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

pub fn set_path_value(target: &mut Value, path: &str, new_value: Value) {
    let parts: Vec<&str> = path.split('.').filter(|part| !part.is_empty()).collect();
    let Some((last, parents)) = parts.split_last() else {
        *target = new_value;
        return;
    };
    let mut cursor = target;
    for key in parents {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        let Value::Object(map) = cursor else {
            return;
        };
        cursor = map
            .entry((*key).to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !cursor.is_object() {
        *cursor = Value::Object(Map::new());
    }
    if let Value::Object(obj) = cursor {
        obj.insert((*last).to_string(), new_value);
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(num) => num.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) => true,
        Value::Object(_) => true,
    }
}

/// Render a value the way it appears inside interpolated text.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_objects_and_indices() {
        let root = json!({ "state": { "list": [1, { "name": "x" }] } });
        assert_eq!(get_by_path(&root, "state.list.0"), Some(&json!(1)));
        assert_eq!(get_by_path(&root, "state.list.1.name"), Some(&json!("x")));
        assert_eq!(get_by_path(&root, "state.missing"), None);
        assert_eq!(get_by_path(&root, ""), None);
    }

    #[test]
    fn set_path_creates_intermediate_objects() {
        let mut root = json!({ "state": 3 });
        set_path_value(&mut root, "state.user.name", json!("ada"));
        assert_eq!(root, json!({ "state": { "user": { "name": "ada" } } }));
    }

    #[test]
    fn uid_has_prefix_and_six_char_suffix() {
        let id = uid("node");
        let suffix = id.strip_prefix("node-").unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
