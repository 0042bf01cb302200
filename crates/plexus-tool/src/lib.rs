//! Uniform tool invocation (§4.C).
//!
//! Every tool, whatever its transport, exposes the same `invoke` contract
//! and shares the same schema-validation semantics. The scheduler holds a
//! `map<fqdn, Box<dyn Tool>>` (the "tool pool") built once at preflight.

mod http;
mod inproc;
mod schema;

pub use http::RemoteHttpTool;
pub use inproc::{InProcessFn, InProcessTool};
pub use schema::validate as validate_schema;

use std::time::Duration;

use async_trait::async_trait;
use plexus_types::{EngineError, ToolManifest};
use serde_json::Value;

/// A tool ready to be invoked, selected at preflight from its manifest's
/// `kind`.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The manifest this tool was built from.
    fn manifest(&self) -> &ToolManifest;

    /// Validate `payload`, invoke the tool, validate its response.
    ///
    /// `timeout`, when set, bounds the call itself (not schema validation);
    /// exceeding it surfaces as [`EngineError::ToolCall`] with no status.
    async fn invoke(&self, payload: Value, timeout: Option<Duration>) -> Result<Value, EngineError>;

    /// Optional preflight warmup, invoked once per tool before the first
    /// node dispatch when the scheduler's warmup flag is set (§4.G
    /// preflight). The default is a no-op; an in-process tool built by a
    /// [`ToolFactory`](../../plexus_engine/trait.ToolFactory.html) around a
    /// loaded model is the typical override point.
    async fn warmup(&self) -> Result<(), EngineError> {
        Ok(())
    }
}
