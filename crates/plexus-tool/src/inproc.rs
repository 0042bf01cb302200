//! In-process tool invocation (§4.C).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use plexus_types::{EngineError, SchemaStage, ToolManifest};
use serde_json::Value;

use crate::{schema, Tool};

/// The shape an in-process entrypoint factory produces: a payload in,
/// a validated response or error out.
pub type InProcessFn =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value, EngineError>> + Send>> + Send + Sync>;

/// A tool invoked as a plain in-process async callable, with the manifest's
/// input/output schemas enforced around the call exactly as for
/// [`crate::RemoteHttpTool`].
pub struct InProcessTool {
    manifest: ToolManifest,
    entrypoint: InProcessFn,
}

impl InProcessTool {
    /// Bind `entrypoint` (typically produced by a tool factory at preflight,
    /// closing over a loaded model) to `manifest`.
    pub fn new(manifest: ToolManifest, entrypoint: InProcessFn) -> Self {
        InProcessTool { manifest, entrypoint }
    }
}

#[async_trait]
impl Tool for InProcessTool {
    fn manifest(&self) -> &ToolManifest {
        &self.manifest
    }

    async fn invoke(&self, payload: Value, timeout: Option<Duration>) -> Result<Value, EngineError> {
        schema::validate(&self.manifest.input_schema, &payload, SchemaStage::Pre)?;

        let call = (self.entrypoint)(payload);
        let data = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| EngineError::tool_call_network("in-process call timed out"))??,
            None => call.await?,
        };

        schema::validate(&self.manifest.output_schema, &data, SchemaStage::Post)?;

        Ok(data)
    }
}
