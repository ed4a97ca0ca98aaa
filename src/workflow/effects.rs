use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};

use crate::logging::{LogLevel, Logger};
use crate::path::{get_by_path, set_path_value};

use super::template::{interpolate, interpolate_value};
use super::{Effect, EffectKind};

const EMPTY_NOTIFICATION: &str = "notification without message";

/// Consumer of a workflow's `onSuccess`/`onError` effect. Errors are
/// logged by the engine and never change the execution outcome.
pub trait EffectHandler: Send + Sync {
    fn apply(&self, effect: &Effect, context: &mut Value) -> Result<()>;
}

impl<F> EffectHandler for F
where
    F: Fn(&Effect, &mut Value) -> Result<()> + Send + Sync,
{
    fn apply(&self, effect: &Effect, context: &mut Value) -> Result<()> {
        (self)(effect, context)
    }
}

/// Logs notifications and navigation requests and applies `update-state`
/// to the execution context.
pub struct DefaultEffectHandler {
    logger: Logger,
}

impl Default for DefaultEffectHandler {
    fn default() -> Self {
        Self::new(&Logger::default())
    }
}

impl DefaultEffectHandler {
    pub fn new(logger: &Logger) -> Self {
        Self {
            logger: logger.with_tags(json!({ "component": "effects" })),
        }
    }
}

impl EffectHandler for DefaultEffectHandler {
    fn apply(&self, effect: &Effect, context: &mut Value) -> Result<()> {
        match effect.kind {
            EffectKind::Notify => {
                let message = effect
                    .message
                    .as_deref()
                    .map(|text| interpolate(text, context))
                    .filter(|text| !text.trim().is_empty())
                    .unwrap_or_else(|| EMPTY_NOTIFICATION.to_string());
                let variant = effect.variant.as_deref().unwrap_or("info");
                let level = match variant {
                    "error" => LogLevel::Error,
                    "warning" => LogLevel::Warn,
                    _ => LogLevel::Info,
                };
                self.logger
                    .log(level, &message, Some(json!({ "variant": variant })));
                Ok(())
            }
            EffectKind::UpdateState => {
                let path = effect
                    .path
                    .as_deref()
                    .ok_or_else(|| anyhow!("update-state effect requires a path"))?;
                let operation = effect.operation.as_deref().unwrap_or("set");
                let value = effect
                    .value
                    .as_ref()
                    .map(|value| interpolate_value(value, context));
                apply_state_update(context, path, operation, value)
            }
            EffectKind::Navigate => {
                let route = effect
                    .route
                    .as_deref()
                    .ok_or_else(|| anyhow!("navigate effect requires a route"))?;
                self.logger.info(
                    "navigation requested",
                    Some(json!({ "route": interpolate(route, context) })),
                );
                Ok(())
            }
            EffectKind::ApiCall => {
                self.logger.info(
                    "api-call effect requested",
                    Some(Value::Object(effect.extra.clone())),
                );
                Ok(())
            }
        }
    }
}

/// Apply one state operation at `path`.
pub fn apply_state_update(
    context: &mut Value,
    path: &str,
    operation: &str,
    value: Option<Value>,
) -> Result<()> {
    let current = get_by_path(context, path).cloned();
    let next = match operation {
        "set" => value.unwrap_or(Value::Null),
        "reset" => value.unwrap_or(Value::Null),
        "merge" => {
            let mut merged = match current {
                Some(Value::Object(map)) => map,
                None | Some(Value::Null) => Map::new(),
                Some(_) => return Err(anyhow!("cannot merge into non-object at {path}")),
            };
            match value {
                Some(Value::Object(extra)) => merged.extend(extra),
                _ => return Err(anyhow!("merge at {path} requires an object value")),
            }
            Value::Object(merged)
        }
        "append" => {
            let mut items = match current {
                Some(Value::Array(items)) => items,
                None | Some(Value::Null) => Vec::new(),
                Some(_) => return Err(anyhow!("cannot append to non-array at {path}")),
            };
            items.push(value.unwrap_or(Value::Null));
            Value::Array(items)
        }
        "increment" | "decrement" => {
            let base = match current {
                None | Some(Value::Null) => 0.0,
                Some(found) => found
                    .as_f64()
                    .ok_or_else(|| anyhow!("cannot {operation} non-number at {path}"))?,
            };
            let step = match value {
                None => 1.0,
                Some(found) => found
                    .as_f64()
                    .ok_or_else(|| anyhow!("{operation} at {path} requires a number"))?,
            };
            let result = if operation == "increment" {
                base + step
            } else {
                base - step
            };
            number(result)
        }
        other => return Err(anyhow!("unknown state operation '{other}'")),
    };
    set_path_value(context, path, next);
    Ok(())
}

fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;

    #[test]
    fn state_operations_update_context() {
        let mut ctx = json!({ "state": { "count": 2, "tags": ["a"], "user": { "name": "ada" } } });
        apply_state_update(&mut ctx, "state.count", "increment", None).unwrap();
        apply_state_update(&mut ctx, "state.count", "decrement", Some(json!(5))).unwrap();
        apply_state_update(&mut ctx, "state.tags", "append", Some(json!("b"))).unwrap();
        apply_state_update(&mut ctx, "state.user", "merge", Some(json!({ "role": "admin" }))).unwrap();
        apply_state_update(&mut ctx, "state.flag", "set", Some(json!(true))).unwrap();
        assert_eq!(
            ctx,
            json!({ "state": {
                "count": -2,
                "tags": ["a", "b"],
                "user": { "name": "ada", "role": "admin" },
                "flag": true
            } })
        );
    }

    #[test]
    fn rejects_unknown_operations() {
        let mut ctx = json!({});
        assert!(apply_state_update(&mut ctx, "x", "explode", None).is_err());
        assert!(apply_state_update(&mut ctx, "x", "merge", Some(json!(1))).is_err());
    }

    #[test]
    fn notify_logs_at_variant_level() {
        let sink = MemorySink::new();
        let handler = DefaultEffectHandler::new(&Logger::capturing(sink.clone()));
        let mut ctx = json!({ "state": { "name": "Batch 7" } });
        let mut effect = Effect::notify("released {{state.name}}");
        effect.variant = Some("warning".to_string());
        handler.apply(&effect, &mut ctx).unwrap();
        let entries = sink.entries();
        assert_eq!(entries[0]["level"], json!("warn"));
        assert_eq!(entries[0]["message"], json!("released Batch 7"));
    }

    #[test]
    fn notify_without_message_is_still_logged() {
        let sink = MemorySink::new();
        let handler = DefaultEffectHandler::new(&Logger::capturing(sink.clone()));
        let mut effect = Effect::new(EffectKind::Notify);
        effect.variant = Some("error".to_string());
        handler.apply(&effect, &mut json!({})).unwrap();
        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["level"], json!("error"));
        assert_eq!(entries[0]["message"], json!(EMPTY_NOTIFICATION));
        assert_eq!(entries[0]["data"]["variant"], json!("error"));
    }

    #[test]
    fn update_state_interpolates_values() {
        let handler = DefaultEffectHandler::new(&Logger::capturing(MemorySink::new()));
        let mut ctx = json!({ "fetch": { "id": 9 } });
        handler
            .apply(&Effect::update_state("state.lastId", "set", json!("{{fetch.id}}")), &mut ctx)
            .unwrap();
        assert_eq!(ctx["state"]["lastId"], json!(9));
    }
}
