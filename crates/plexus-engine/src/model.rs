//! External collaborator interfaces for in-process tools (§6): the model
//! loader and the tool factory. Neither is implemented for a real backend
//! here (per §1 that's an external collaborator), but the traits are part
//! of the engine's public surface so an embedder can plug one in, and a
//! stub loader ships for tests (SPEC_FULL §"Supplemented features" item 4).

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use plexus_types::{EngineError, ModelDescriptor, ToolManifest};

/// Opaque handles to a loaded tokenizer and model. The engine never
/// downcasts these itself; a [`ToolFactory`] implementation that knows the
/// concrete backend does.
#[derive(Clone)]
pub struct LoadedModel {
    /// The loaded tokenizer, type-erased.
    pub tokenizer: Arc<dyn Any + Send + Sync>,
    /// The loaded model (with its adapter applied), type-erased.
    pub model: Arc<dyn Any + Send + Sync>,
}

/// Acquires the (tokenizer, model) pair named by an in-process manifest's
/// `model` descriptor (§3, §6 "Model loader").
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Resolve and load `descriptor`. A SHA mismatch or an unsupported
    /// scheme/loader must surface as [`EngineError::ModelLoad`].
    async fn load(&self, descriptor: &ModelDescriptor) -> Result<LoadedModel, EngineError>;
}

/// Builds a [`plexus_tool::Tool`] from a manifest and its preloaded model
/// (§6 "Tool factory"). Resolved at preflight by the manifest's
/// `entrypoint` string.
#[async_trait]
pub trait ToolFactory: Send + Sync {
    /// Instantiate a tool. A failure here surfaces as [`EngineError::Engine`].
    async fn build(
        &self,
        manifest: &ToolManifest,
        loaded: LoadedModel,
    ) -> Result<Arc<dyn plexus_tool::Tool>, EngineError>;
}

/// A [`ModelLoader`] that only understands `base_id == "stub"`, returning
/// dummy handles without touching any real model backend. Test tooling, not
/// a production loader (SPEC_FULL §"Supplemented features" item 4).
#[derive(Debug, Clone, Copy, Default)]
pub struct StubModelLoader;

#[async_trait]
impl ModelLoader for StubModelLoader {
    async fn load(&self, descriptor: &ModelDescriptor) -> Result<LoadedModel, EngineError> {
        if descriptor.base_id != "stub" {
            return Err(EngineError::ModelLoad(format!(
                "StubModelLoader only supports base_id \"stub\", got {:?}",
                descriptor.base_id
            )));
        }
        Ok(LoadedModel { tokenizer: Arc::new(()), model: Arc::new(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(base_id: &str) -> ModelDescriptor {
        ModelDescriptor {
            base_id: base_id.into(),
            adapter_uri: "file://adapter".into(),
            loader: "peft-lora".into(),
            quant: None,
            device_hint: None,
            revision: None,
            sha256: None,
        }
    }

    #[tokio::test]
    async fn stub_loader_accepts_stub_base_id() {
        let loader = StubModelLoader;
        assert!(loader.load(&descriptor("stub")).await.is_ok());
    }

    #[tokio::test]
    async fn stub_loader_rejects_real_base_id() {
        let loader = StubModelLoader;
        let err = loader.load(&descriptor("meta-llama/Llama-3")).await.unwrap_err();
        assert_eq!(err.class_name(), "ModelLoadError");
    }
}
