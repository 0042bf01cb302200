//! Shared data model and error taxonomy for the plan execution engine.
//!
//! This crate has no knowledge of the filesystem, HTTP, or the scheduler
//! loop; it only defines the shapes every other `plexus-*` crate agrees on.

pub mod canonical;
pub mod error;
pub mod manifest;
pub mod plan;
pub mod state;

pub use canonical::{canonical_json, canonical_sha256_hex, display_hash, sha256_hex};
pub use error::{EngineError, SchemaStage};
pub use manifest::{ModelDescriptor, ToolKind, ToolManifest};
pub use plan::{Budget, Execution, Node, Plan, RetryPattern, RetryPolicy};
pub use state::{extract_jsonpath, interpolate, State};
