//! Plan intermediate representation (§3 "Plan" / "Node" / "RetryPolicy").
//!
//! These types mirror the plan document's shape closely enough that
//! `serde_yaml` and `serde_json` can deserialize either encoding directly;
//! structural validation against the plan's JSON-Schema happens one layer up
//! in `plexus-plan`, before a `Plan` value is ever constructed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A retry-match pattern as it appears verbatim in a plan document, e.g.
/// `"ToolCallError:5xx"` or `"EngineError"`. Parsed into a [`RetryRule`] by
/// `plexus-retry`.
pub type RetryPattern = String;

/// `retry` block attached to a [`Node`] or to `execution.retry_default`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of additional attempts after the first.
    pub retries: u32,
    /// Base backoff in milliseconds; see `backoff_delays` in `plexus-retry`.
    #[serde(default)]
    pub backoff_ms: u64,
    /// Uniform jitter upper bound in milliseconds, added to each delay.
    #[serde(default)]
    pub jitter_ms: u64,
    /// Patterns under which a failure is retried; see §3 grammar.
    #[serde(default)]
    pub retry_on: Vec<RetryPattern>,
}

/// `budget` block on a [`Plan`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Budget {
    /// Maximum number of successful tool invocations across the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u64>,
    /// Wall-clock ceiling in milliseconds from the first scheduler tick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

/// `execution` block on a [`Plan`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Execution {
    /// Global in-flight node cap; falls back to `1` if absent everywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<u32>,
    /// Default for `node.cache` when a node doesn't set one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_default: Option<bool>,
    /// Default retry policy applied to nodes that don't set their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_default: Option<RetryPolicy>,
}

/// A single node in the plan graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique id within the plan.
    pub id: String,
    /// Tool fqdn (`name.version`) this node invokes.
    pub tool: String,
    /// Arbitrary nested JSON; may contain `${...}` references resolved
    /// against [`crate::state::State`] at invocation time.
    pub inputs: Value,
    /// Node ids that must complete successfully before this node runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs: Option<Vec<String>>,
    /// Map of exposed-name to JSONPath-subset expression projecting the
    /// tool's response. Absent means the full response is exposed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<HashMap<String, String>>,
    /// Whether this node's result may be cached; `None` defers to
    /// `execution.cache_default`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<bool>,
    /// Per-call timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Node-specific retry policy; overrides `execution.retry_default`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Per-tool concurrency limit, fixed at the tool's first sighting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,
}

impl Node {
    /// `needs`, defaulting to empty when absent.
    pub fn needs(&self) -> &[String] {
        self.needs.as_deref().unwrap_or(&[])
    }
}

/// A validated (structurally; not yet semantically) plan document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Plan schema version string.
    pub version: String,
    /// Free-form variables seeded into `state.vars`.
    #[serde(default)]
    pub vars: HashMap<String, Value>,
    /// Overall run budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
    /// The node graph, in declaration order (not execution order).
    pub graph: Vec<Node>,
    /// Execution-wide defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<Execution>,
}

impl Plan {
    /// Effective `max_parallel`: call-site override, else
    /// `execution.max_parallel`, else `1`.
    pub fn effective_max_parallel(&self, override_value: Option<u32>) -> u32 {
        override_value
            .or_else(|| self.execution.as_ref().and_then(|e| e.max_parallel))
            .unwrap_or(1)
    }

    /// Effective `cache_default` (`false` when unset anywhere).
    pub fn cache_default(&self) -> bool {
        self.execution
            .as_ref()
            .and_then(|e| e.cache_default)
            .unwrap_or(false)
    }

    /// Effective retry policy for `node`: its own, else
    /// `execution.retry_default`, else `None` (no retries).
    pub fn effective_retry<'a>(&'a self, node: &'a Node) -> Option<&'a RetryPolicy> {
        node.retry
            .as_ref()
            .or_else(|| self.execution.as_ref().and_then(|e| e.retry_default.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, needs: &[&str]) -> Node {
        Node {
            id: id.to_string(),
            tool: "verifier.v1".into(),
            inputs: Value::Null,
            needs: if needs.is_empty() { None } else { Some(needs.iter().map(|s| s.to_string()).collect()) },
            out: None,
            cache: None,
            timeout_ms: None,
            retry: None,
            concurrency: None,
        }
    }

    #[test]
    fn max_parallel_falls_back_through_override_then_execution_then_default() {
        let mut plan = Plan { version: "1".into(), vars: HashMap::new(), budget: None, graph: vec![], execution: None };
        assert_eq!(plan.effective_max_parallel(None), 1);
        plan.execution = Some(Execution { max_parallel: Some(4), cache_default: None, retry_default: None });
        assert_eq!(plan.effective_max_parallel(None), 4);
        assert_eq!(plan.effective_max_parallel(Some(8)), 8);
    }

    #[test]
    fn node_retry_overrides_execution_default() {
        let default_retry = RetryPolicy { retries: 1, backoff_ms: 10, jitter_ms: 0, retry_on: vec!["EngineError".into()] };
        let node_retry = RetryPolicy { retries: 3, backoff_ms: 20, jitter_ms: 5, retry_on: vec!["ToolCallError:5xx".into()] };

        let mut n = node("a", &[]);
        n.retry = Some(node_retry.clone());
        let plan = Plan {
            version: "1".into(),
            vars: HashMap::new(),
            budget: None,
            graph: vec![n.clone()],
            execution: Some(Execution { max_parallel: None, cache_default: None, retry_default: Some(default_retry.clone()) }),
        };
        assert_eq!(plan.effective_retry(&n), Some(&node_retry));

        let bare = node("b", &[]);
        assert_eq!(plan.effective_retry(&bare), Some(&default_retry));
    }

    #[test]
    fn node_needs_defaults_to_empty_slice() {
        assert!(node("a", &[]).needs().is_empty());
        assert_eq!(node("a", &["b", "c"]).needs(), &["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn plan_deserializes_from_yaml() {
        let yaml = r#"
version: "1"
vars:
  topic: "rust"
graph:
  - id: extract
    tool: extractor.v1
    inputs:
      text: "${vars.topic}"
  - id: verify
    tool: verifier.v1
    needs: [extract]
    inputs:
      claim: "${extract.summary}"
"#;
        let plan: Plan = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(plan.graph.len(), 2);
        assert_eq!(plan.graph[1].needs(), &["extract".to_string()]);
    }
}
