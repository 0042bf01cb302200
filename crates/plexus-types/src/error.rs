//! Error taxonomy for the plan execution engine.
//!
//! Per the design, the seven error kinds are a flat sum type distinguished by
//! tag rather than by inheritance: retry matching and stop-reason reporting
//! both switch on the variant, never on a trait object's concrete type.

use thiserror::Error;

/// Stage at which a [`EngineError::Schema`] validation failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaStage {
    /// Input payload failed validation before the tool was invoked.
    Pre,
    /// Output payload failed validation after the tool returned.
    Post,
}

impl SchemaStage {
    /// Render as the token used in retry patterns (`PRE` / `POST`).
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaStage::Pre => "PRE",
            SchemaStage::Post => "POST",
        }
    }
}

impl std::fmt::Display for SchemaStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The full error taxonomy (§7). Every terminal or retryable failure in the
/// engine surfaces as one of these variants.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Plan structurally or semantically invalid. Never retried; surfaced.
    #[error("plan schema error: {0}")]
    PlanSchema(String),

    /// Missing or malformed manifest. Never retried; surfaced.
    #[error("registry error: {0}")]
    Registry(String),

    /// Payload failed JSON-Schema validation at a tool boundary. Retryable
    /// if the effective retry policy's patterns match.
    #[error("schema error ({stage}): {message}")]
    Schema {
        /// Validation stage.
        stage: SchemaStage,
        /// Human-readable validation failure.
        message: String,
    },

    /// Tool invocation failed (network, non-2xx, timeout). Retryable per
    /// the matcher.
    #[error("tool call error{}: {message}", status.map(|s| format!(" (status={s})")).unwrap_or_default())]
    ToolCall {
        /// HTTP-style status code, when known. `None` for network failures
        /// and in-process timeouts.
        status: Option<u16>,
        /// Response body, when the failure carried one.
        body: Option<String>,
        /// Human-readable description.
        message: String,
    },

    /// Deadline or call-count budget exceeded. Terminal; `stop_reason =
    /// "deadline"`.
    #[error("budget exceeded: {0}")]
    Budget(String),

    /// Preflight model acquisition failed. Terminal; `stop_reason =
    /// "error:Preflight"`.
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// Internal invariant breach or resume precondition violation. Terminal.
    #[error("engine error: {0}")]
    Engine(String),
}

impl EngineError {
    /// The class name used in `stop_reason = "error:<ClassName>"` and in the
    /// CLI exit-code lookup table (§6).
    pub fn class_name(&self) -> &'static str {
        match self {
            EngineError::PlanSchema(_) => "PlanSchemaError",
            EngineError::Registry(_) => "RegistryError",
            EngineError::Schema { .. } => "SchemaError",
            EngineError::ToolCall { .. } => "ToolCallError",
            EngineError::Budget(_) => "BudgetError",
            EngineError::ModelLoad(_) => "ModelLoadError",
            EngineError::Engine(_) => "EngineError",
        }
    }

    /// Operator-facing exit code, per the CLI mapping documented in §6.
    /// The CLI itself is out of scope; this is exposed so an embedder can
    /// reproduce the mapping without re-deriving it.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::Schema { .. } => 12,
            EngineError::ToolCall { .. } => 13,
            EngineError::Budget(_) => 14,
            EngineError::PlanSchema(_) | EngineError::Engine(_) => 15,
            EngineError::Registry(_) => 15,
            EngineError::ModelLoad(_) => 15,
        }
    }

    /// Shorthand constructor for a pre-invocation schema failure.
    pub fn schema_pre(message: impl Into<String>) -> Self {
        EngineError::Schema { stage: SchemaStage::Pre, message: message.into() }
    }

    /// Shorthand constructor for a post-invocation schema failure.
    pub fn schema_post(message: impl Into<String>) -> Self {
        EngineError::Schema { stage: SchemaStage::Post, message: message.into() }
    }

    /// Shorthand constructor for a network-layer tool call failure (no
    /// status code available).
    pub fn tool_call_network(message: impl Into<String>) -> Self {
        EngineError::ToolCall { status: None, body: None, message: message.into() }
    }

    /// Shorthand constructor for an HTTP-status tool call failure.
    pub fn tool_call_status(status: u16, body: impl Into<String>) -> Self {
        EngineError::ToolCall {
            status: Some(status),
            body: Some(body.into()),
            message: format!("tool returned status {status}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names_match_taxonomy() {
        assert_eq!(EngineError::PlanSchema("x".into()).class_name(), "PlanSchemaError");
        assert_eq!(EngineError::Budget("x".into()).class_name(), "BudgetError");
        assert_eq!(
            EngineError::Schema { stage: SchemaStage::Pre, message: "x".into() }.class_name(),
            "SchemaError"
        );
    }

    #[test]
    fn exit_codes_match_cli_mapping() {
        assert_eq!(EngineError::schema_pre("x").exit_code(), 12);
        assert_eq!(EngineError::tool_call_network("x").exit_code(), 13);
        assert_eq!(EngineError::Budget("x".into()).exit_code(), 14);
        assert_eq!(EngineError::PlanSchema("x".into()).exit_code(), 15);
        assert_eq!(EngineError::Engine("x".into()).exit_code(), 15);
    }

    #[test]
    fn tool_call_display_includes_status_when_present() {
        let err = EngineError::tool_call_status(503, "oops");
        assert!(err.to_string().contains("status=503"));
    }
}
