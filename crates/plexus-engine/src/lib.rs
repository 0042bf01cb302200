//! The DAG scheduler, the heart of the Plexus plan execution engine
//! (§4.G). Given a validated [`plexus_plan::load_plan`] output, a
//! [`plexus_registry::Registry`], and a set of tool-construction
//! collaborators, [`run_plan`] drives nodes to completion under bounded
//! concurrency, with caching, retries, a wall-clock/call-count budget, and
//! crash-resume.

mod cancel;
mod metrics;
mod model;
mod node_exec;
mod preflight;
mod scheduler;

pub use cancel::CancellationToken;
pub use metrics::{NodeMetric, Summary, TimelineEvent, Totals};
pub use model::{LoadedModel, ModelLoader, StubModelLoader, ToolFactory};
pub use preflight::{PreflightInputs, ToolPool};
pub use scheduler::{run_plan, RunOptions, ToolOverrides};
