//! Single-node execution: cache lookup, the retry loop, and artifact writes
//! (§4.G steps 1–4). Everything here runs inside a spawned task; the only
//! shared mutable state it touches is the `tool_calls` counter (an atomic,
//! approximating the budget check under concurrency) and the cache/artifact
//! filesystem (both safe for concurrent writers by construction). `state`,
//! per-run metrics, and the timeline are mutated only by the scheduler's
//! main loop, after a task's outcome is joined (§5 "Shared mutable state").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use plexus_artifacts::RunArtifacts;
use plexus_cache::{cache_key, Cache, BYPASSED_SIDE_EFFECT};
use plexus_retry::{backoff_delays, RetryMatcher};
use plexus_tool::Tool;
use plexus_types::{extract_jsonpath, EngineError, Node, RetryPolicy};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::cancel::CancellationToken;

/// Everything one node's execution needs, assembled by the scheduler before
/// spawning the task.
pub struct NodeExecCtx {
    pub id: String,
    pub node: Node,
    pub tool: Arc<dyn Tool>,
    pub manifest_hash: String,
    pub is_side_effecting: bool,
    pub inputs: Value,
    pub cache_read: bool,
    pub cache_write: bool,
    pub cache: Arc<Cache>,
    pub artifacts: Arc<RunArtifacts>,
    pub retry_policy: Option<RetryPolicy>,
    pub retry_matcher: Option<RetryMatcher>,
    pub global_sem: Arc<Semaphore>,
    pub tool_sem: Arc<Semaphore>,
    pub deadline: Option<Instant>,
    pub tool_calls_counter: Arc<AtomicU64>,
    pub max_tool_calls: Option<u64>,
    pub cancel: CancellationToken,
}

/// What a node task reports back to the scheduler's main loop.
pub struct NodeOutcome {
    pub id: String,
    pub tool: String,
    pub retries: u32,
    pub ms: u64,
    pub cache_field: Value,
    pub result: Result<Value, EngineError>,
}

/// Project `data` through `out`, or return it whole when `out` is absent
/// (§3 "Exposed output").
pub(crate) fn project_out(data: &Value, out: &Option<HashMap<String, String>>) -> Result<Value, EngineError> {
    match out {
        None => Ok(data.clone()),
        Some(map) => {
            let mut projected = serde_json::Map::new();
            for (name, path) in map {
                projected.insert(name.clone(), extract_jsonpath(data, path)?);
            }
            Ok(Value::Object(projected))
        }
    }
}

fn remaining(deadline: Option<Instant>) -> Result<Option<Duration>, EngineError> {
    match deadline {
        None => Ok(None),
        Some(dl) => {
            let now = Instant::now();
            if now >= dl {
                Err(EngineError::Budget("deadline exceeded".into()))
            } else {
                Ok(Some(dl - now))
            }
        }
    }
}

/// Run one node to completion: cache lookup, then (on miss) the retry loop.
/// Returns the fully-populated [`NodeOutcome`] regardless of success or
/// failure; only a cancellation or deadline breach short-circuits early.
pub async fn execute_node(ctx: NodeExecCtx) -> NodeOutcome {
    let tool_fqdn = ctx.tool.manifest().fqdn();

    if ctx.is_side_effecting {
        let result = run_with_retries(&ctx).await;
        return finish(ctx.id, tool_fqdn, result, Value::String(BYPASSED_SIDE_EFFECT.into()));
    }

    if ctx.cache_read {
        match ctx.cache.read(&ctx.cache_key()) {
            Ok(Some(cached)) => match project_out(&cached, &ctx.node.out) {
                Ok(exposed) => {
                    return NodeOutcome {
                        id: ctx.id,
                        tool: tool_fqdn,
                        retries: 0,
                        ms: 0,
                        cache_field: Value::Bool(true),
                        result: Ok(exposed),
                    };
                }
                Err(e) => return finish(ctx.id, tool_fqdn, Err(e), Value::Bool(true)),
            },
            Ok(None) => {}
            Err(e) => return finish(ctx.id, tool_fqdn, Err(e), Value::Bool(false)),
        }
    }

    let result = run_with_retries(&ctx).await;
    finish(ctx.id, tool_fqdn, result, Value::Bool(false))
}

fn finish(id: String, tool: String, result: Result<(Value, u32, u64), EngineError>, cache_field: Value) -> NodeOutcome {
    match result {
        Ok((data, retries, ms)) => NodeOutcome { id, tool, retries, ms, cache_field, result: Ok(data) },
        Err(e) => NodeOutcome { id, tool, retries: 0, ms: 0, cache_field, result: Err(e) },
    }
}

impl NodeExecCtx {
    fn cache_key(&self) -> String {
        cache_key(
            self.tool.manifest().name.as_str(),
            self.tool.manifest().version.as_str(),
            &self.inputs,
            &self.manifest_hash,
        )
    }
}

/// The attempt loop of §4.G step 4: write the request artifact once, then
/// invoke-retry-backoff until success, budget exhaustion, or a terminal
/// (non-retryable, or exhausted) failure.
async fn run_with_retries(ctx: &NodeExecCtx) -> Result<(Value, u32, u64), EngineError> {
    ctx.artifacts.write_node_request(&ctx.id, &ctx.tool.manifest().fqdn(), &ctx.inputs)?;

    // `max_tool_calls` bounds successful node invocations (§4.G "Budget"), and
    // `totals.tool_calls` is one count per node that actually reached the
    // tool (§8 invariant 3: `tool_calls + cache_hits <= |nodes|`). The counter
    // is consulted and incremented once per node here, not once per retry
    // attempt below.
    if let Some(max) = ctx.max_tool_calls {
        if ctx.tool_calls_counter.load(Ordering::SeqCst) >= max {
            return Err(EngineError::Budget("max_tool_calls exceeded".into()));
        }
    }
    ctx.tool_calls_counter.fetch_add(1, Ordering::SeqCst);

    let retries_allowed = ctx.retry_policy.as_ref().map(|p| p.retries).unwrap_or(0);
    let delays = ctx
        .retry_policy
        .as_ref()
        .map(|p| backoff_delays(p.retries, p.backoff_ms, p.jitter_ms))
        .unwrap_or_default();

    let mut attempt: u32 = 0;
    loop {
        if ctx.cancel.is_cancelled() {
            return Err(EngineError::Engine("cancelled".into()));
        }

        let remaining_budget = remaining(ctx.deadline)?;
        let effective_timeout = match (ctx.node.timeout_ms, remaining_budget) {
            (Some(t), Some(r)) => Some(Duration::from_millis(t).min(r)),
            (Some(t), None) => Some(Duration::from_millis(t)),
            (None, Some(r)) => Some(r),
            (None, None) => None,
        };

        let _global_permit = tokio::select! {
            permit = ctx.global_sem.clone().acquire_owned() => permit.map_err(|_| EngineError::Engine("global semaphore closed".into()))?,
            _ = ctx.cancel.cancelled() => return Err(EngineError::Engine("cancelled".into())),
        };
        let _tool_permit = tokio::select! {
            permit = ctx.tool_sem.clone().acquire_owned() => permit.map_err(|_| EngineError::Engine("tool semaphore closed".into()))?,
            _ = ctx.cancel.cancelled() => return Err(EngineError::Engine("cancelled".into())),
        };

        let start = Instant::now();
        let call_result = ctx.tool.invoke(ctx.inputs.clone(), effective_timeout).await;
        let ms = start.elapsed().as_millis() as u64;
        drop(_tool_permit);
        drop(_global_permit);

        match call_result {
            Ok(data) => {
                remaining(ctx.deadline)?;
                ctx.artifacts.write_node_response(&ctx.id, &ctx.tool.manifest().fqdn(), &data, ms)?;
                if ctx.cache_write {
                    ctx.cache.write(&ctx.cache_key(), &data)?;
                }
                let exposed = project_out(&data, &ctx.node.out)?;
                return Ok((exposed, attempt, ms));
            }
            Err(err) => {
                // A call bounded by `remaining_budget` (no per-node `timeout_ms`, or a
                // longer one) that fails after the deadline has passed was cut short by
                // the run's budget, not by whatever the tool itself reports; surface that
                // as `BudgetError` the same way the post-success check above does.
                if let Err(budget_err) = remaining(ctx.deadline) {
                    ctx.artifacts.write_node_error(&ctx.id, &budget_err.to_string())?;
                    return Err(budget_err);
                }

                let retryable = ctx.retry_matcher.as_ref().map(|m| m.matches(&err)).unwrap_or(false);
                if attempt < retries_allowed && retryable {
                    let delay_ms = delays.get(attempt as usize).copied().unwrap_or(0.0) as u64;
                    warn!(id = %ctx.id, attempt, delay_ms, error = %err, "retrying node after failure");
                    sleep_bounded(delay_ms, ctx.deadline, &ctx.cancel).await?;
                    attempt += 1;
                    continue;
                }
                ctx.artifacts.write_node_error(&ctx.id, &err.to_string())?;
                return Err(err);
            }
        }
    }
}

/// Sleep `delay_ms`, bounded by the remaining deadline: if the full delay
/// would exceed it, sleep what remains and then raise `BudgetError` (§4.G
/// step 4).
async fn sleep_bounded(delay_ms: u64, deadline: Option<Instant>, cancel: &CancellationToken) -> Result<(), EngineError> {
    let full = Duration::from_millis(delay_ms);
    let bounded = match deadline {
        None => full,
        Some(dl) => {
            let now = Instant::now();
            if now >= dl {
                return Err(EngineError::Budget("deadline exceeded".into()));
            }
            full.min(dl - now)
        }
    };

    tokio::select! {
        _ = tokio::time::sleep(bounded) => {}
        _ = cancel.cancelled() => return Err(EngineError::Engine("cancelled".into())),
    }

    if bounded < full {
        return Err(EngineError::Budget("deadline exceeded during backoff".into()));
    }
    Ok(())
}
