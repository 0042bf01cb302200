//! Tool manifest (§3 "Tool Manifest", §6 "Registry directory").
//!
//! A manifest declares a tool's identity, invocation kind, JSON-Schema
//! contracts, and (for in-process tools) the model it binds to. Manifests are
//! the unit the [registry](../../plexus_registry) loads from disk.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a tool is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// Remote invocation over HTTP, JSON request/response.
    Http,
    /// In-process invocation via a loaded entrypoint.
    Inproc,
}

/// Model binding for an in-process tool, carrying the adapter loader
/// parameters named in §3 and forwarded verbatim to a [`ModelLoader`]
/// implementation at preflight time.
///
/// [`ModelLoader`]: ../../plexus_engine/trait.ModelLoader.html
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Base model identifier (e.g. a HuggingFace repo id, or `"stub"` for
    /// test loaders).
    pub base_id: String,
    /// Adapter URI; scheme must be one of `hf`, `s3`, `gs`, `file`.
    pub adapter_uri: String,
    /// Adapter loading strategy. Only `"peft-lora"` is recognized today.
    pub loader: String,
    /// Optional quantization hint (`"4bit"`, `"8bit"`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quant: Option<String>,
    /// Optional device placement hint (`"auto"`, `"cpu"`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_hint: Option<String>,
    /// Optional adapter revision (branch/tag/commit).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Optional expected SHA-256 of the resolved adapter bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

const ADAPTER_URI_SCHEMES: &[&str] = &["hf", "s3", "gs", "file"];

/// Top-level tool manifest, as loaded from a single `*.json` file under the
/// registry root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifest {
    /// Tool name. Combined with `version` to form the [`fqdn`](Self::fqdn).
    pub name: String,
    /// Tool version.
    pub version: String,
    /// Invocation kind.
    pub kind: ToolKind,
    /// HTTP endpoint. Required when `kind == Http`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Entrypoint reference (module + symbol). Required when `kind ==
    /// Inproc`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    /// Model binding. Required when `kind == Inproc`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelDescriptor>,
    /// Draft-07 JSON Schema for the tool's input payload.
    pub input_schema: Value,
    /// Draft-07 JSON Schema for the tool's output payload.
    pub output_schema: Value,
    /// Free-form tags. `"side_effecting"` marks a tool whose outputs must
    /// never be cached.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ToolManifest {
    /// `"{name}.{version}"`, the key used throughout the engine.
    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.name, self.version)
    }

    /// Whether this tool is tagged `side_effecting` and must bypass the
    /// cache entirely.
    pub fn is_side_effecting(&self) -> bool {
        self.tags.iter().any(|t| t == "side_effecting")
    }

    /// `"http"` or `"inproc"`, for diagnostics and registry summaries.
    pub fn kind_str(&self) -> &'static str {
        match self.kind {
            ToolKind::Http => "http",
            ToolKind::Inproc => "inproc",
        }
    }

    /// Validate the structural invariants of §3: well-formed endpoint for
    /// HTTP tools, entrypoint + model for in-process tools, valid adapter
    /// URI scheme, and Draft-07-compilable schemas.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("manifest.name must not be empty".into());
        }
        if self.version.trim().is_empty() {
            return Err("manifest.version must not be empty".into());
        }

        match self.kind {
            ToolKind::Http => {
                let endpoint = self
                    .endpoint
                    .as_ref()
                    .ok_or_else(|| format!("http tool {} missing endpoint", self.fqdn()))?;
                let url = url::Url::parse(endpoint)
                    .map_err(|e| format!("http tool {} has invalid endpoint: {e}", self.fqdn()))?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(format!("http tool {} endpoint must be http(s)", self.fqdn()));
                }
            }
            ToolKind::Inproc => {
                if self.entrypoint.as_deref().unwrap_or("").trim().is_empty() {
                    return Err(format!("inproc tool {} missing entrypoint", self.fqdn()));
                }
                let model = self
                    .model
                    .as_ref()
                    .ok_or_else(|| format!("inproc tool {} missing model", self.fqdn()))?;
                if model.base_id.trim().is_empty() {
                    return Err(format!("inproc tool {} model.base_id must not be empty", self.fqdn()));
                }
                if model.loader.trim().is_empty() {
                    return Err(format!("inproc tool {} model.loader must not be empty", self.fqdn()));
                }
                let scheme = model
                    .adapter_uri
                    .split_once("://")
                    .map(|(s, _)| s)
                    .ok_or_else(|| {
                        format!("inproc tool {} model.adapter_uri missing scheme", self.fqdn())
                    })?;
                if !ADAPTER_URI_SCHEMES.contains(&scheme) {
                    return Err(format!(
                        "inproc tool {} model.adapter_uri scheme {scheme} not in {ADAPTER_URI_SCHEMES:?}",
                        self.fqdn()
                    ));
                }
            }
        }

        validate_draft7(&self.input_schema).map_err(|e| format!("{}: input_schema {e}", self.fqdn()))?;
        validate_draft7(&self.output_schema).map_err(|e| format!("{}: output_schema {e}", self.fqdn()))?;

        Ok(())
    }
}

/// Confirm `schema` compiles as a Draft-07 JSON Schema.
fn validate_draft7(schema: &Value) -> Result<(), String> {
    jsonschema::JSONSchema::options()
        .with_draft(jsonschema::Draft::Draft7)
        .compile(schema)
        .map(|_| ())
        .map_err(|e| format!("invalid draft-07 schema: {e}"))
}
