use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::warn;

/// Substitutes every `{{path}}` placeholder in `s` against the run context.
/// Unresolvable paths substitute to an empty string and log a warning; a
/// missing reference never fails the run.
pub(crate) fn render_str(s: &str, ctx: &Value) -> String {
    let mut out = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let (head, tail) = rest.split_at(start);
        out.push_str(head);
        if let Some(end_rel) = tail.find("}}") {
            let (expr_with, new_rest) = tail.split_at(end_rel + 2);
            let expr = expr_with
                .trim_start_matches("{{")
                .trim_end_matches("}}")
                .trim();
            match lookup_string(expr, ctx) {
                Some(val) => out.push_str(&val),
                None => {
                    warn!(path = expr, "template path did not resolve; substituting empty");
                }
            }
            rest = new_rest;
        } else {
            out.push_str(tail);
            rest = "";
            break;
        }
    }
    out.push_str(rest);
    out
}

/// Recursively resolves template placeholders inside a structured config
/// value. A string that is exactly one placeholder resolves to the typed
/// context value, so `"{{trigger.record.Tags}}"` can yield an array.
pub(crate) fn render_value(value: &Value, ctx: &Value) -> Value {
    match value {
        Value::String(s) => {
            if let Some(expr) = sole_placeholder(s) {
                match lookup_path(expr, ctx) {
                    Some(resolved) => resolved,
                    None => {
                        warn!(path = expr, "template path did not resolve; substituting null");
                        Value::Null
                    }
                }
            } else {
                Value::String(render_str(s, ctx))
            }
        }
        Value::Array(arr) => Value::Array(arr.iter().map(|v| render_value(v, ctx)).collect()),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map.iter() {
                out.insert(k.clone(), render_value(v, ctx));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Builds the variable namespace for one run: the immutable trigger
/// snapshot under `trigger`, plus `now`. Loop bindings are layered in by
/// the executor under `loop`.
pub(crate) fn build_context(trigger_snapshot: &Value) -> Value {
    let now = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    let mut map = serde_json::Map::new();
    map.insert("trigger".to_string(), trigger_snapshot.clone());
    map.insert("now".to_string(), Value::String(now));
    Value::Object(map)
}

/// Resolves a dotted path against the context, returning the typed value.
pub(crate) fn lookup_path(path: &str, ctx: &Value) -> Option<Value> {
    let mut cur = ctx;
    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        match cur {
            Value::Object(map) => cur = map.get(part)?,
            Value::Array(arr) => {
                let idx: usize = part.parse().ok()?;
                cur = arr.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(cur.clone())
}

fn lookup_string(path: &str, ctx: &Value) -> Option<String> {
    Some(match lookup_path(path, ctx)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Returns the inner expression when the whole string is one `{{...}}`
/// placeholder and nothing else.
fn sole_placeholder(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}
