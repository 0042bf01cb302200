//! Per-run metrics, timeline, and the terminal summary (§3 "Run Artifacts",
//! §4.G "Termination").

use serde::Serialize;
use serde_json::Value;

/// Per-node outcome recorded into `metrics.json`.
#[derive(Debug, Clone, Serialize)]
pub struct NodeMetric {
    /// Node id.
    pub id: String,
    /// Tool fqdn invoked.
    pub tool: String,
    /// Whether the node ultimately succeeded.
    pub ok: bool,
    /// Number of retries actually performed.
    pub retries: u32,
    /// Wall-clock duration in milliseconds (`0` on a cache hit).
    pub ms: u64,
    /// `true` (hit), `false` (miss / not attempted), or the literal string
    /// `"bypassed:side_effect"` for side-effecting tools (§4.D).
    pub cache: Value,
    /// Error message, when the node failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One timeline entry: a human-legible trace of scheduling decisions,
/// written to `metrics.timeline.json`.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEvent {
    /// Milliseconds since the scheduler's first tick.
    pub at_ms: u64,
    /// Node id this event concerns (`None` for run-level events).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Event kind: `"ready"`, `"dispatch"`, `"cache_hit"`, `"retry"`,
    /// `"success"`, `"error"`, `"preflight"`, `"resume"`, `"done"`.
    pub event: String,
    /// Optional free-form detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Aggregate counters over a single run (§4.G).
#[derive(Debug, Clone, Default, Serialize)]
pub struct Totals {
    /// Total nodes in the plan graph.
    pub nodes: usize,
    /// Successful tool invocations made *this run* (resumed nodes don't
    /// count; cache hits don't count).
    pub tool_calls: u64,
    /// Cache hits observed this run.
    pub cache_hits: u64,
    /// Retries performed across all nodes this run.
    pub retries: u64,
    /// Sum of every node's wall-clock duration, in milliseconds.
    pub total_ms: u64,
}

/// The terminal summary `run_plan` returns alongside an optional error
/// (§4.G "Termination", SPEC_FULL's canonical `(Summary, Option<EngineError>)`
/// return shape).
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    /// The run's id.
    pub run_id: String,
    /// Whether the run completed successfully.
    pub ok: bool,
    /// `None` on success; `"deadline"`, `"error:Preflight"`, or
    /// `"error:<ClassName>"` otherwise.
    pub stop_reason: Option<String>,
    /// Aggregate counters.
    pub totals: Totals,
    /// Every on-disk artifact created this run, indexed by node id (plus
    /// `"__run__"` for plan/context/run-level files).
    pub artifacts: Value,
}
