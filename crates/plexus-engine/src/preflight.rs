//! Preflight: resolve every distinct tool fqdn named by a plan into a
//! ready-to-invoke [`Tool`], before the first node is dispatched (§4.G
//! "Preflight").

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use plexus_registry::Registry;
use plexus_tool::{InProcessFn, InProcessTool, RemoteHttpTool, Tool};
use plexus_types::{EngineError, Plan, ToolKind};
use tracing::debug;

use crate::model::{LoadedModel, ModelLoader, ToolFactory};

/// `fqdn -> Tool` built once before any node runs. Exactly the "tool pool"
/// named throughout §4.G and §9.
pub type ToolPool = HashMap<String, Arc<dyn Tool>>;

/// Everything preflight needs beyond the plan and registry: the model
/// loader, the entrypoint-keyed factory table, and test/embedder-supplied
/// implementation overrides that bypass manifest resolution entirely.
pub struct PreflightInputs<'a> {
    /// Loader used for every in-process manifest's `model` descriptor.
    pub model_loader: &'a (dyn ModelLoader),
    /// Factories keyed by `manifest.entrypoint`.
    pub factories: &'a HashMap<String, Arc<dyn ToolFactory>>,
    /// `fqdn -> implementation`, short-circuiting registry resolution and
    /// model loading entirely, the §4.G "optional implementation
    /// overrides (fqdn → function)" input, also how tests swap a node's
    /// behaviour for resume scenario S5.
    pub overrides: &'a HashMap<String, InProcessFn>,
    /// Whether to call `Tool::warmup()` on every built in-process tool.
    pub warmup: bool,
}

/// Build the tool pool for every distinct `tool` fqdn referenced by `plan`.
pub async fn build_tool_pool(
    plan: &Plan,
    registry: &Registry,
    inputs: &PreflightInputs<'_>,
) -> Result<ToolPool, EngineError> {
    let mut fqdns: Vec<&str> = plan.graph.iter().map(|n| n.tool.as_str()).collect::<HashSet<_>>().into_iter().collect();
    fqdns.sort_unstable();

    let mut pool = ToolPool::new();
    for fqdn in fqdns {
        debug!(fqdn, "resolving tool for preflight");
        let tool = build_one(fqdn, registry, inputs).await?;
        if inputs.warmup {
            tool.warmup().await?;
        }
        pool.insert(fqdn.to_string(), tool);
    }
    Ok(pool)
}

async fn build_one(fqdn: &str, registry: &Registry, inputs: &PreflightInputs<'_>) -> Result<Arc<dyn Tool>, EngineError> {
    if let Some(entrypoint_fn) = inputs.overrides.get(fqdn) {
        let manifest = registry.resolve(fqdn)?;
        return Ok(Arc::new(InProcessTool::new(manifest.clone(), entrypoint_fn.clone())));
    }

    let manifest = registry.resolve(fqdn)?;
    match manifest.kind {
        ToolKind::Http => Ok(Arc::new(RemoteHttpTool::new(manifest.clone()))),
        ToolKind::Inproc => {
            let model_descriptor = manifest
                .model
                .as_ref()
                .ok_or_else(|| EngineError::Engine(format!("{fqdn} has kind inproc but no model descriptor")))?;
            let loaded: LoadedModel = inputs.model_loader.load(model_descriptor).await?;

            let entrypoint = manifest
                .entrypoint
                .as_deref()
                .ok_or_else(|| EngineError::Engine(format!("{fqdn} has kind inproc but no entrypoint")))?;
            let factory = inputs
                .factories
                .get(entrypoint)
                .ok_or_else(|| EngineError::Engine(format!("no tool factory registered for entrypoint {entrypoint:?}")))?;

            factory.build(manifest, loaded).await
        }
    }
}
