//! Remote-HTTP tool invocation (§4.C).

use std::time::Duration;

use async_trait::async_trait;
use plexus_types::{EngineError, SchemaStage, ToolManifest};
use serde_json::Value;

use crate::{schema, Tool};

/// A tool invoked as an HTTP POST carrying a JSON body, with the manifest's
/// input/output schemas enforced at each boundary.
pub struct RemoteHttpTool {
    manifest: ToolManifest,
    client: reqwest::Client,
}

impl RemoteHttpTool {
    /// Build a tool bound to `manifest`'s endpoint. Panics are avoided even
    /// if the manifest is not HTTP-kind; callers are expected to have
    /// already matched on [`ToolManifest::kind`] during preflight.
    pub fn new(manifest: ToolManifest) -> Self {
        RemoteHttpTool { manifest, client: reqwest::Client::new() }
    }
}

#[async_trait]
impl Tool for RemoteHttpTool {
    fn manifest(&self) -> &ToolManifest {
        &self.manifest
    }

    async fn invoke(&self, payload: Value, timeout: Option<Duration>) -> Result<Value, EngineError> {
        schema::validate(&self.manifest.input_schema, &payload, SchemaStage::Pre)?;

        let endpoint = self
            .manifest
            .endpoint
            .as_deref()
            .ok_or_else(|| EngineError::Engine(format!("{} has no endpoint", self.manifest.fqdn())))?;

        let mut request = self.client.post(endpoint).json(&payload);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::tool_call_network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::tool_call_status(status.as_u16(), body));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| EngineError::tool_call_network(format!("invalid JSON response: {e}")))?;

        schema::validate(&self.manifest.output_schema, &data, SchemaStage::Post)?;

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(endpoint: &str) -> ToolManifest {
        ToolManifest {
            name: "echo".into(),
            version: "v1".into(),
            kind: plexus_types::ToolKind::Http,
            endpoint: Some(endpoint.into()),
            entrypoint: None,
            model: None,
            input_schema: json!({"type": "object"}),
            output_schema: json!({"type": "object"}),
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn input_schema_violation_is_rejected_before_any_request() {
        let manifest = ToolManifest {
            input_schema: json!({"type": "object", "required": ["x"]}),
            ..manifest("http://127.0.0.1:1/unreachable")
        };
        let tool = RemoteHttpTool::new(manifest);
        let err = tool.invoke(json!({}), None).await.unwrap_err();
        assert!(matches!(err, EngineError::Schema { stage: SchemaStage::Pre, .. }));
    }

    #[tokio::test]
    async fn connection_failure_becomes_tool_call_error_without_status() {
        // Port 1 is a reserved, always-refused port; no listener will ever bind there.
        let tool = RemoteHttpTool::new(manifest("http://127.0.0.1:1/tool"));
        let err = tool.invoke(json!({}), Some(Duration::from_millis(200))).await.unwrap_err();
        match err {
            EngineError::ToolCall { status, .. } => assert_eq!(status, None),
            other => panic!("expected ToolCall error, got {other:?}"),
        }
    }
}
