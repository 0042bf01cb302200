//! Runtime state, `${...}` interpolation, and the JSONPath subset used by
//! `out` projections (§3 "State", §4.G "Algorithmic details", §6 "Reference
//! language").

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::EngineError;

static REF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("static regex"));

/// The three-level mapping nodes interpolate their inputs against:
/// `context` and `vars` are seeded from the run request, `nodes` accumulates
/// each completed node's exposed output.
#[derive(Debug, Clone)]
pub struct State {
    /// Request-scoped context, seeded once at run start.
    pub context: Value,
    /// Request-scoped free variables, seeded once at run start.
    pub vars: Value,
    /// Exposed output of every completed node, keyed by node id.
    pub nodes: HashMap<String, Value>,
}

impl State {
    /// Build a fresh state with an empty `nodes` map.
    pub fn new(context: Value, vars: Value) -> Self {
        State { context, vars, nodes: HashMap::new() }
    }
}

fn sorted_keys_of(value: &Value) -> Vec<String> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<String> = map.keys().cloned().collect();
            keys.sort();
            keys
        }
        _ => Vec::new(),
    }
}

fn missing_reference(expr: &str, available: &[String]) -> EngineError {
    EngineError::schema_pre(format!("missing reference {expr}; available: {available:?}"))
}

/// Resolve a dotted path (`context.a.b`, `vars.x`, `<node_id>.y`) against
/// `state`.
fn resolve_expr(expr: &str, state: &State) -> Result<Value, EngineError> {
    let mut parts = expr.split('.');
    let head = parts.next().unwrap_or("");

    let mut current: Value = match head {
        "context" => state.context.clone(),
        "vars" => state.vars.clone(),
        other => state
            .nodes
            .get(other)
            .cloned()
            .ok_or_else(|| {
                let mut available: Vec<String> = state.nodes.keys().cloned().collect();
                available.sort();
                missing_reference(expr, &available)
            })?,
    };

    for part in parts {
        match current.get(part) {
            Some(next) => current = next.clone(),
            None => return Err(missing_reference(expr, &sorted_keys_of(&current))),
        }
    }

    Ok(current)
}

/// Stringify a resolved value for embedded (non-full-string) substitution.
/// Strings are inlined as-is; everything else is rendered as compact JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Recursively replace `${...}` references in `value` using `state`.
///
/// A string whose *entire* content is a single reference (`"${x}"`)
/// substitutes the raw resolved value, preserving its type. A reference
/// embedded in a larger string (`"prefix-${x}-suffix"`) substitutes the
/// stringified value.
pub fn interpolate(value: &Value, state: &State) -> Result<Value, EngineError> {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), interpolate(v, state)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(interpolate(item, state)?);
            }
            Ok(Value::Array(out))
        }
        Value::String(s) => {
            if let Some(caps) = REF_RE.captures(s) {
                let whole = caps.get(0).expect("group 0 always present");
                if whole.start() == 0 && whole.end() == s.len() {
                    return resolve_expr(&caps[1], state);
                }
            }
            let mut result = String::with_capacity(s.len());
            let mut last = 0;
            for caps in REF_RE.captures_iter(s) {
                let whole = caps.get(0).expect("group 0 always present");
                result.push_str(&s[last..whole.start()]);
                let resolved = resolve_expr(&caps[1], state)?;
                result.push_str(&stringify(&resolved));
                last = whole.end();
            }
            result.push_str(&s[last..]);
            Ok(Value::String(result))
        }
        other => Ok(other.clone()),
    }
}

/// Evaluate the small JSONPath subset used by `out` projections:
/// `$.` followed by dotted identifiers and bracketed numeric indices
/// (`$.a.b[2].c`).
pub fn extract_jsonpath(data: &Value, path: &str) -> Result<Value, EngineError> {
    let rest = path
        .strip_prefix("$.")
        .ok_or_else(|| EngineError::schema_post(format!("jsonpath must start with '$.': {path}")))?;

    let mut current = data.clone();
    for part in rest.split('.') {
        let (name, index) = match part.find('[') {
            Some(bracket) if part.ends_with(']') => {
                let name = &part[..bracket];
                let idx_str = &part[bracket + 1..part.len() - 1];
                let idx: usize = idx_str
                    .parse()
                    .map_err(|_| EngineError::schema_post(format!("invalid array index in jsonpath {path}: {idx_str}")))?;
                (name, Some(idx))
            }
            _ => (part, None),
        };

        if !name.is_empty() {
            current = current
                .get(name)
                .cloned()
                .ok_or_else(|| EngineError::schema_post(format!("missing key '{name}' in jsonpath {path}")))?;
        }
        if let Some(idx) = index {
            current = current
                .get(idx)
                .cloned()
                .ok_or_else(|| EngineError::schema_post(format!("missing index {idx} in jsonpath {path}")))?;
        }
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state_with(context: Value, vars: Value) -> State {
        State::new(context, vars)
    }

    #[test]
    fn full_string_reference_returns_raw_value() {
        let state = state_with(json!({"limit": 5}), json!({}));
        let out = interpolate(&json!("${context.limit}"), &state).unwrap();
        assert_eq!(out, json!(5));
    }

    #[test]
    fn embedded_reference_is_stringified() {
        let state = state_with(json!({"limit": 5}), json!({}));
        let out = interpolate(&json!("limit is ${context.limit} items"), &state).unwrap();
        assert_eq!(out, json!("limit is 5 items"));
    }

    #[test]
    fn node_reference_resolves_through_exposed_output() {
        let mut state = state_with(json!({}), json!({}));
        state.nodes.insert("extract".into(), json!({"summary": "hi"}));
        let out = interpolate(&json!("${extract.summary}"), &state).unwrap();
        assert_eq!(out, json!("hi"));
    }

    #[test]
    fn missing_node_reference_is_schema_error() {
        let state = state_with(json!({}), json!({}));
        let err = interpolate(&json!("${missing.field}"), &state).unwrap_err();
        assert!(err.to_string().contains("missing reference missing.field"));
    }

    #[test]
    fn missing_nested_key_is_schema_error() {
        let state = state_with(json!({"a": {"b": 1}}), json!({}));
        let err = interpolate(&json!("${context.a.c}"), &state).unwrap_err();
        assert!(err.to_string().contains("missing reference context.a.c"));
    }

    #[test]
    fn recurses_through_nested_objects_and_arrays() {
        let state = state_with(json!({"x": "y"}), json!({}));
        let input = json!({"a": ["${context.x}", {"b": "${context.x}"}]});
        let out = interpolate(&input, &state).unwrap();
        assert_eq!(out, json!({"a": ["y", {"b": "y"}]}));
    }

    #[test]
    fn jsonpath_requires_dollar_dot_prefix() {
        assert!(extract_jsonpath(&json!({"a": 1}), "a").is_err());
    }

    #[test]
    fn jsonpath_navigates_dotted_and_bracketed_segments() {
        let data = json!({"a": {"b": [1, 2, {"c": "found"}]}});
        let out = extract_jsonpath(&data, "$.a.b[2].c").unwrap();
        assert_eq!(out, json!("found"));
    }

    #[test]
    fn jsonpath_missing_key_is_schema_error() {
        let data = json!({"a": 1});
        assert!(extract_jsonpath(&data, "$.missing").is_err());
    }

    #[test]
    fn jsonpath_out_of_range_index_is_schema_error() {
        let data = json!({"a": [1, 2]});
        assert!(extract_jsonpath(&data, "$.a[5]").is_err());
    }
}
