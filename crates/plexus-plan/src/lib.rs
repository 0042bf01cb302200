//! Plan IR parsing and validation (§4.A).
//!
//! A plan document, in YAML or JSON, is parsed into a raw [`serde_json::Value`],
//! checked against the structural schema, deserialized into a typed [`Plan`],
//! and finally checked against the semantic rules of §4.A: unique node ids,
//! known tools, an acyclic `needs` graph, and parseable retry patterns. Every
//! failure at any stage surfaces as [`EngineError::PlanSchema`].

mod schema;
mod validate;

pub use validate::validate_semantics;

use plexus_registry::Registry;
use plexus_types::{EngineError, Plan};

/// The document encoding a plan was parsed from, so callers don't need to
/// sniff file extensions themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// JSON document.
    Json,
    /// YAML document (a superset of JSON).
    Yaml,
}

/// Parse `text` as `format`, run structural schema validation, then semantic
/// validation against `registry`. This is the single entry point a caller
/// (typically the scheduler, just before preflight) needs.
pub fn load_plan(text: &str, format: Format, registry: &Registry) -> Result<Plan, EngineError> {
    let document: serde_json::Value = match format {
        Format::Json => serde_json::from_str(text)
            .map_err(|e| EngineError::PlanSchema(format!("invalid JSON: {e}")))?,
        Format::Yaml => serde_yaml::from_str(text)
            .map_err(|e| EngineError::PlanSchema(format!("invalid YAML: {e}")))?,
    };

    schema::validate_structure(&document).map_err(EngineError::PlanSchema)?;

    let plan: Plan = serde_json::from_value(document)
        .map_err(|e| EngineError::PlanSchema(format!("plan does not match expected shape: {e}")))?;

    validate::validate_semantics(&plan, registry)?;

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn registry_with_echo() -> Registry {
        let dir = TempDir::new().unwrap();
        let manifest = serde_json::json!({
            "name": "echo", "version": "v1", "kind": "http",
            "endpoint": "http://localhost:9000/tool",
            "input_schema": {"type": "object"},
            "output_schema": {"type": "object"},
            "tags": []
        });
        fs::write(dir.path().join("echo.json"), manifest.to_string()).unwrap();
        Registry::load(dir.into_path()).unwrap()
    }

    #[test]
    fn loads_valid_yaml_plan() {
        let registry = registry_with_echo();
        let yaml = r#"
version: "1"
graph:
  - id: a
    tool: echo.v1
    inputs: {}
"#;
        let plan = load_plan(yaml, Format::Yaml, &registry).unwrap();
        assert_eq!(plan.graph.len(), 1);
    }

    #[test]
    fn loads_valid_json_plan() {
        let registry = registry_with_echo();
        let json = r#"{"version":"1","graph":[{"id":"a","tool":"echo.v1","inputs":{}}]}"#;
        let plan = load_plan(json, Format::Json, &registry).unwrap();
        assert_eq!(plan.graph.len(), 1);
    }

    #[test]
    fn structural_violation_is_plan_schema_error() {
        let registry = registry_with_echo();
        let json = r#"{"version":"1"}"#;
        let err = load_plan(json, Format::Json, &registry).unwrap_err();
        assert_eq!(err.class_name(), "PlanSchemaError");
    }

    #[test]
    fn semantic_violation_is_plan_schema_error() {
        let registry = registry_with_echo();
        let json = r#"{"version":"1","graph":[{"id":"a","tool":"ghost.v1","inputs":{}}]}"#;
        let err = load_plan(json, Format::Json, &registry).unwrap_err();
        assert_eq!(err.class_name(), "PlanSchemaError");
    }

    #[test]
    fn malformed_yaml_is_rejected() {
        let registry = registry_with_echo();
        let err = load_plan(": : :", Format::Yaml, &registry).unwrap_err();
        assert_eq!(err.class_name(), "PlanSchemaError");
    }
}
