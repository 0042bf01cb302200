//! Shared input/output schema validation (§4.C).

use plexus_types::{EngineError, SchemaStage};
use serde_json::Value;

/// Validate `instance` against `schema` (compiled fresh each call; tool
/// invocation is not hot enough to justify the self-referential plumbing a
/// cached compiled validator would need). Failure becomes a
/// [`EngineError::Schema`] tagged with `stage`.
pub fn validate(schema: &Value, instance: &Value, stage: SchemaStage) -> Result<(), EngineError> {
    let compiled = jsonschema::JSONSchema::options()
        .with_draft(jsonschema::Draft::Draft7)
        .compile(schema)
        .map_err(|e| EngineError::Engine(format!("tool schema does not compile: {e}")))?;

    if let Err(errors) = compiled.validate(instance) {
        let message = errors.map(|e| e.to_string()).collect::<Vec<_>>().join("; ");
        return Err(match stage {
            SchemaStage::Pre => EngineError::schema_pre(message),
            SchemaStage::Post => EngineError::schema_post(message),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_conforming_instance() {
        let schema = json!({"type": "object", "required": ["x"], "properties": {"x": {"type": "number"}}});
        assert!(validate(&schema, &json!({"x": 1}), SchemaStage::Pre).is_ok());
    }

    #[test]
    fn rejects_nonconforming_instance_with_tagged_stage() {
        let schema = json!({"type": "object", "required": ["x"]});
        let err = validate(&schema, &json!({}), SchemaStage::Post).unwrap_err();
        match err {
            EngineError::Schema { stage, .. } => assert_eq!(stage, SchemaStage::Post),
            other => panic!("expected Schema error, got {other:?}"),
        }
    }
}
