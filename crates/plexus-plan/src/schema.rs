//! Structural JSON-Schema for a plan document (§4.A).
//!
//! This is deliberately permissive about node `inputs`/`out` shapes (those
//! are arbitrary nested JSON and a small string-keyed map respectively) and
//! strict about the envelope every plan must carry.

use once_cell::sync::Lazy;
use serde_json::{json, Value};

static PLAN_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "required": ["version", "graph"],
        "properties": {
            "version": { "type": "string" },
            "vars": { "type": "object" },
            "budget": {
                "type": "object",
                "properties": {
                    "max_tool_calls": { "type": "integer", "minimum": 0 },
                    "deadline_ms": { "type": "integer", "minimum": 0 }
                }
            },
            "execution": {
                "type": "object",
                "properties": {
                    "max_parallel": { "type": "integer", "minimum": 1 },
                    "cache_default": { "type": "boolean" },
                    "retry_default": { "$ref": "#/definitions/retry_policy" }
                }
            },
            "graph": {
                "type": "array",
                "items": { "$ref": "#/definitions/node" }
            }
        },
        "definitions": {
            "retry_policy": {
                "type": "object",
                "required": ["retries"],
                "properties": {
                    "retries": { "type": "integer", "minimum": 0 },
                    "backoff_ms": { "type": "integer", "minimum": 0 },
                    "jitter_ms": { "type": "integer", "minimum": 0 },
                    "retry_on": {
                        "type": "array",
                        "items": { "type": "string" }
                    }
                }
            },
            "node": {
                "type": "object",
                "required": ["id", "tool", "inputs"],
                "properties": {
                    "id": { "type": "string", "minLength": 1 },
                    "tool": { "type": "string", "minLength": 1 },
                    "inputs": {},
                    "needs": {
                        "type": "array",
                        "items": { "type": "string" }
                    },
                    "out": {
                        "type": "object",
                        "additionalProperties": { "type": "string" }
                    },
                    "cache": { "type": "boolean" },
                    "timeout_ms": { "type": "integer", "minimum": 0 },
                    "retry": { "$ref": "#/definitions/retry_policy" },
                    "concurrency": { "type": "integer", "minimum": 1 }
                }
            }
        }
    })
});

/// Validate `document` against the structural plan schema, returning a
/// single joined message on failure.
pub fn validate_structure(document: &Value) -> Result<(), String> {
    let compiled = jsonschema::JSONSchema::options()
        .with_draft(jsonschema::Draft::Draft7)
        .compile(&PLAN_SCHEMA)
        .expect("static plan schema is valid Draft-07");

    if let Err(errors) = compiled.validate(document) {
        let message = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
        return Err(message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_minimal_plan() {
        let doc = json!({
            "version": "1",
            "graph": [
                { "id": "a", "tool": "echo.v1", "inputs": {} }
            ]
        });
        assert!(validate_structure(&doc).is_ok());
    }

    #[test]
    fn rejects_missing_graph() {
        let doc = json!({ "version": "1" });
        assert!(validate_structure(&doc).is_err());
    }

    #[test]
    fn rejects_node_without_tool() {
        let doc = json!({
            "version": "1",
            "graph": [ { "id": "a", "inputs": {} } ]
        });
        assert!(validate_structure(&doc).is_err());
    }
}
