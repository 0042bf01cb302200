//! The DAG scheduler itself (§4.G): preflight, resume, dependency
//! tracking, and the bounded-concurrency execution loop.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use plexus_artifacts::{RunArtifacts, RunInfo};
use plexus_cache::Cache;
use plexus_registry::Registry;
use plexus_retry::RetryMatcher;
use plexus_tool::InProcessFn;
use plexus_types::{canonical_sha256_hex, display_hash, interpolate, EngineError, Node, Plan, State};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::cancel::CancellationToken;
use crate::metrics::{NodeMetric, Summary, TimelineEvent, Totals};
use crate::model::{ModelLoader, ToolFactory};
use crate::node_exec::{execute_node, project_out, NodeExecCtx, NodeOutcome};
use crate::preflight::{build_tool_pool, PreflightInputs};

/// Everything `run_plan` needs beyond the plan, context, and registry.
pub struct RunOptions {
    /// Root directory runs are written under.
    pub runs_dir: std::path::PathBuf,
    /// Reuse this id if given; a fresh one is generated otherwise.
    pub run_id: Option<String>,
    /// Whether an existing `run.json` may be resumed.
    pub resume: bool,
    /// Overrides `plan.execution.max_parallel`.
    pub max_parallel: Option<u32>,
    /// Whether nodes may read from the cache.
    pub cache_read: bool,
    /// Whether nodes may write to the cache.
    pub cache_write: bool,
    /// Optional size cap for the cache root (§4.D, §9 open question).
    pub cache_max_bytes: Option<u64>,
    /// Root directory the cache is rooted at.
    pub cache_dir: std::path::PathBuf,
    /// Whether to call `Tool::warmup()` on every preflight-built tool.
    pub warmup: bool,
    /// Cooperative cancellation hook (SPEC_FULL supplemented feature 2).
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            runs_dir: std::path::PathBuf::from("./runs"),
            run_id: None,
            resume: false,
            max_parallel: None,
            cache_read: true,
            cache_write: true,
            cache_max_bytes: None,
            cache_dir: std::path::PathBuf::from("./cache"),
            warmup: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// fqdn → implementation overrides, bypassing registry/model-loading
/// resolution at preflight entirely (§4.G inputs).
pub type ToolOverrides = HashMap<String, InProcessFn>;

/// Run `plan` to completion (or to its first terminal failure), returning
/// the canonical `(Summary, Option<EngineError>)` tuple (SPEC_FULL §"Open
/// Questions resolved here").
pub async fn run_plan(
    plan: Plan,
    context: Value,
    registry: &Registry,
    model_loader: &dyn ModelLoader,
    factories: &HashMap<String, Arc<dyn ToolFactory>>,
    overrides: &ToolOverrides,
    options: RunOptions,
) -> (Summary, Option<EngineError>) {
    let artifacts = match RunArtifacts::open(&options.runs_dir, options.run_id.clone()) {
        Ok(a) => Arc::new(a),
        Err(e) => return terminal_without_artifacts(options.run_id.unwrap_or_default(), e),
    };

    info!(run_id = artifacts.run_id(), nodes = plan.graph.len(), "starting run");

    let registry_hash = registry.content_hash();
    let inputs_hash = canonical_sha256_hex(&json!({"plan": &plan, "context": &context}));

    let mut completed: HashSet<String> = HashSet::new();
    // `run_output` is injected after `inputs_hash` is computed: it's a path derived from
    // this run's directory, not part of the request, and must not perturb the resume hash.
    let mut run_context = context.clone();
    if let Value::Object(map) = &mut run_context {
        map.insert("run_output".to_string(), json!(artifacts.outputs_dir().display().to_string()));
    }
    let mut state = State::new(run_context, json!(plan.vars));
    let mut node_metrics: Vec<NodeMetric> = Vec::new();
    let mut timeline: Vec<TimelineEvent> = Vec::new();
    let run_start = Instant::now();
    let mut artifact_paths: HashMap<String, Vec<String>> = HashMap::new();
    let mut run_level_paths: Vec<String> = Vec::new();

    if artifacts.exists() {
        if !options.resume {
            return fail_fast(&artifacts, EngineError::Engine("run id exists; resume disabled".into()));
        }
        let stored = match artifacts.read_run_info() {
            Ok(Some(info)) => info,
            Ok(None) => return fail_fast(&artifacts, EngineError::Engine("run.json missing despite exists() == true".into())),
            Err(e) => return fail_fast(&artifacts, e),
        };
        if stored.inputs_hash != inputs_hash || stored.registry_hash != registry_hash {
            debug!(
                stored_inputs_hash = %display_hash(&stored.inputs_hash),
                current_inputs_hash = %display_hash(&inputs_hash),
                stored_registry_hash = %display_hash(&stored.registry_hash),
                current_registry_hash = %display_hash(&registry_hash),
                "resume hash mismatch",
            );
            return fail_fast(&artifacts, EngineError::Engine("cannot resume: plan/context or registry changed".into()));
        }
        info!(run_id = artifacts.run_id(), registry_hash = %display_hash(&registry_hash), "resuming run");
        run_level_paths.push(artifacts.root().join("plan.json").display().to_string());
        run_level_paths.push(artifacts.root().join("context.json").display().to_string());
        run_level_paths.push(artifacts.root().join("run.json").display().to_string());

        for node in &plan.graph {
            if let Ok(Some(response)) = artifacts.read_node_response(&node.id) {
                let exposed = match project_out(&response.data, &node.out) {
                    Ok(v) => v,
                    Err(e) => return fail_fast(&artifacts, e),
                };
                state.nodes.insert(node.id.clone(), exposed);
                completed.insert(node.id.clone());
                let cache_field = if is_side_effecting(registry, &node.tool) {
                    Value::String(plexus_cache::BYPASSED_SIDE_EFFECT.into())
                } else {
                    Value::Bool(false)
                };
                node_metrics.push(NodeMetric {
                    id: node.id.clone(),
                    tool: node.tool.clone(),
                    ok: true,
                    retries: 0,
                    ms: response.ms,
                    cache: cache_field,
                    error: None,
                });
                timeline.push(TimelineEvent {
                    at_ms: run_start.elapsed().as_millis() as u64,
                    node: Some(node.id.clone()),
                    event: "resumed".into(),
                    detail: None,
                });
            }
        }
    } else {
        match artifacts.write_plan(&plan) {
            Ok(path) => run_level_paths.push(path.display().to_string()),
            Err(e) => return fail_fast(&artifacts, e),
        }
        match artifacts.write_context(&context) {
            Ok(path) => run_level_paths.push(path.display().to_string()),
            Err(e) => return fail_fast(&artifacts, e),
        }
        let info = RunInfo { inputs_hash, registry_hash, created_at: chrono::Utc::now().to_rfc3339() };
        match artifacts.write_run_info(&info) {
            Ok(path) => run_level_paths.push(path.display().to_string()),
            Err(e) => return fail_fast(&artifacts, e),
        }
    }

    timeline.push(TimelineEvent { at_ms: run_start.elapsed().as_millis() as u64, node: None, event: "preflight".into(), detail: None });

    let cache = match Cache::open(&options.cache_dir, options.cache_max_bytes) {
        Ok(c) => Arc::new(c),
        Err(e) => return fail_fast(&artifacts, e),
    };

    debug!("running preflight");
    let preflight_inputs = PreflightInputs { model_loader, factories, overrides, warmup: options.warmup };
    let pool = match build_tool_pool(&plan, registry, &preflight_inputs).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "preflight failed");
            let _ = artifacts.write_preflight_error(&e.to_string());
            return build_summary(
                &artifacts,
                false,
                Some("error:Preflight".to_string()),
                Totals { nodes: plan.graph.len(), tool_calls: 0, cache_hits: 0, retries: 0, total_ms: 0 },
                &artifact_paths,
                run_level_paths,
                node_metrics,
                timeline,
                e,
            );
        }
    };
    debug!(tools = pool.len(), "preflight complete");

    let max_parallel = plan.effective_max_parallel(options.max_parallel).max(1) as usize;
    let global_sem = Arc::new(Semaphore::new(max_parallel));
    let mut tool_sems: HashMap<String, Arc<Semaphore>> = HashMap::new();
    let tool_calls_counter = Arc::new(AtomicU64::new(0));
    let deadline = plan.budget.as_ref().and_then(|b| b.deadline_ms).map(|ms| run_start + Duration::from_millis(ms));
    let max_tool_calls = plan.budget.as_ref().and_then(|b| b.max_tool_calls);

    let by_id: HashMap<String, &Node> = plan.graph.iter().map(|n| (n.id.clone(), n)).collect();
    let mut deps: HashMap<String, HashSet<String>> = plan
        .graph
        .iter()
        .map(|n| (n.id.clone(), n.needs().iter().filter(|d| !completed.contains(*d)).cloned().collect()))
        .collect();
    let mut reverse: HashMap<String, Vec<String>> = HashMap::new();
    for node in &plan.graph {
        for dep in node.needs() {
            reverse.entry(dep.clone()).or_default().push(node.id.clone());
        }
    }

    let mut ready: VecDeque<String> = plan
        .graph
        .iter()
        .filter(|n| !completed.contains(&n.id) && deps.get(&n.id).map(|d| d.is_empty()).unwrap_or(true))
        .map(|n| n.id.clone())
        .collect();

    let mut join_set: JoinSet<NodeOutcome> = JoinSet::new();
    let mut in_flight: HashSet<String> = HashSet::new();
    let mut terminal_err: Option<EngineError> = None;

    'outer: loop {
        while let Some(id) = ready.pop_front() {
            let node = by_id.get(&id).expect("ready id always resolves to a plan node");
            let tool = pool.get(&node.tool).cloned();
            let Some(tool) = tool else {
                terminal_err = Some(EngineError::Engine(format!("no tool built for {}", node.tool)));
                break 'outer;
            };

            let inputs = match interpolate(&node.inputs, &state) {
                Ok(v) => v,
                Err(e) => {
                    let _ = artifacts.write_node_error(&id, &e.to_string());
                    node_metrics.push(NodeMetric { id: id.clone(), tool: node.tool.clone(), ok: false, retries: 0, ms: 0, cache: Value::Bool(false), error: Some(e.to_string()) });
                    terminal_err = Some(e);
                    break 'outer;
                }
            };

            let manifest_hash = canonical_sha256_hex(&serde_json::to_value(tool.manifest()).expect("manifest serializes"));
            let side_effecting = tool.manifest().is_side_effecting();
            let cache_opt_in = node.cache.unwrap_or_else(|| plan.cache_default());
            let cache_read = options.cache_read && cache_opt_in && !side_effecting;
            let cache_write = options.cache_write && cache_opt_in && !side_effecting;

            let retry_policy = plan.effective_retry(node).cloned();
            let retry_matcher = match &retry_policy {
                Some(policy) => match RetryMatcher::new(&policy.retry_on) {
                    Ok(m) => Some(m),
                    Err(e) => {
                        terminal_err = Some(EngineError::Engine(format!("invalid retry pattern on node {id}: {e}")));
                        break 'outer;
                    }
                },
                None => None,
            };

            let tool_sem = tool_sems
                .entry(node.tool.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(node.concurrency.map(|c| c as usize).unwrap_or(Semaphore::MAX_PERMITS))))
                .clone();

            let ctx = NodeExecCtx {
                id: id.clone(),
                node: (*node).clone(),
                tool,
                manifest_hash,
                is_side_effecting: side_effecting,
                inputs,
                cache_read,
                cache_write,
                cache: cache.clone(),
                artifacts: artifacts.clone(),
                retry_policy,
                retry_matcher,
                global_sem: global_sem.clone(),
                tool_sem,
                deadline,
                tool_calls_counter: tool_calls_counter.clone(),
                max_tool_calls,
                cancel: options.cancel.clone(),
            };

            debug!(id = %id, tool = %node.tool, "dispatching node");
            timeline.push(TimelineEvent { at_ms: run_start.elapsed().as_millis() as u64, node: Some(id.clone()), event: "dispatch".into(), detail: None });
            in_flight.insert(id.clone());
            join_set.spawn(execute_node(ctx));
        }

        if in_flight.is_empty() {
            break;
        }

        let Some(joined) = join_set.join_next().await else { break };
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(join_err) => {
                terminal_err = Some(EngineError::Engine(format!("node task panicked: {join_err}")));
                break;
            }
        };

        in_flight.remove(&outcome.id);
        record_artifact_path(&mut artifact_paths, &outcome.id, &artifacts);

        match outcome.result {
            Ok(exposed) => {
                debug!(id = %outcome.id, retries = outcome.retries, ms = outcome.ms, "node succeeded");
                state.nodes.insert(outcome.id.clone(), exposed);
                completed.insert(outcome.id.clone());
                timeline.push(TimelineEvent {
                    at_ms: run_start.elapsed().as_millis() as u64,
                    node: Some(outcome.id.clone()),
                    event: "success".into(),
                    detail: None,
                });
                node_metrics.push(NodeMetric {
                    id: outcome.id.clone(),
                    tool: outcome.tool,
                    ok: true,
                    retries: outcome.retries,
                    ms: outcome.ms,
                    cache: outcome.cache_field,
                    error: None,
                });

                if let Some(dependents) = reverse.get(&outcome.id) {
                    for dependent in dependents {
                        if let Some(remaining_deps) = deps.get_mut(dependent) {
                            remaining_deps.remove(&outcome.id);
                            if remaining_deps.is_empty() && !completed.contains(dependent) && !in_flight.contains(dependent) {
                                ready.push_back(dependent.clone());
                            }
                        }
                    }
                }
            }
            Err(err) => {
                error!(id = %outcome.id, error = %err, "node failed terminally");
                timeline.push(TimelineEvent {
                    at_ms: run_start.elapsed().as_millis() as u64,
                    node: Some(outcome.id.clone()),
                    event: "error".into(),
                    detail: Some(err.to_string()),
                });
                node_metrics.push(NodeMetric {
                    id: outcome.id.clone(),
                    tool: outcome.tool,
                    ok: false,
                    retries: outcome.retries,
                    ms: outcome.ms,
                    cache: outcome.cache_field,
                    error: Some(err.to_string()),
                });
                terminal_err = Some(err);
                break;
            }
        }
    }

    if terminal_err.is_some() {
        ready.clear();
        join_set.shutdown().await;
    }

    let ok = terminal_err.is_none();
    let stop_reason = terminal_err.as_ref().map(stop_reason_for);
    let retries_total: u64 = node_metrics.iter().map(|m| m.retries as u64).sum();
    let cache_hits: u64 = node_metrics.iter().filter(|m| m.cache == Value::Bool(true)).count() as u64;
    let tool_calls = tool_calls_counter.load(Ordering::SeqCst);
    let total_ms: u64 = node_metrics.iter().map(|m| m.ms).sum();

    let totals = Totals { nodes: plan.graph.len(), tool_calls, cache_hits, retries: retries_total, total_ms };

    timeline.push(TimelineEvent { at_ms: run_start.elapsed().as_millis() as u64, node: None, event: "done".into(), detail: stop_reason.clone() });
    info!(run_id = artifacts.run_id(), ok, stop_reason = ?stop_reason, "run complete");

    match terminal_err {
        Some(err) => {
            let summary = build_summary(&artifacts, ok, stop_reason, totals, &artifact_paths, run_level_paths, node_metrics, timeline, err);
            (summary.0, summary.1)
        }
        None => {
            let mut run_level_paths = run_level_paths;
            if let Ok(path) = artifacts.write_metrics(&json!({"nodes": node_metrics})) {
                run_level_paths.push(path.display().to_string());
            }
            if let Ok(path) = artifacts.write_timeline(&json!({"events": timeline})) {
                run_level_paths.push(path.display().to_string());
            }
            let mut artifact_paths = artifact_paths;
            artifact_paths.insert("__run__".to_string(), run_level_paths);
            let summary = Summary {
                run_id: artifacts.run_id().to_string(),
                ok,
                stop_reason,
                totals,
                artifacts: paths_to_value(&artifact_paths),
            };
            if let Err(e) = artifacts.write_summary(&serde_json::to_value(&summary).expect("summary serializes")) {
                error!(run_id = %artifacts.run_id(), error = %e, "failed to write durable summary.json; caller still gets this in-memory summary");
            }
            (summary, None)
        }
    }
}

fn stop_reason_for(err: &EngineError) -> String {
    match err {
        EngineError::Budget(_) => "deadline".to_string(),
        other => format!("error:{}", other.class_name()),
    }
}

fn paths_to_value(paths: &HashMap<String, Vec<String>>) -> Value {
    serde_json::to_value(paths).expect("path map serializes")
}

fn record_artifact_path(paths: &mut HashMap<String, Vec<String>>, id: &str, artifacts: &RunArtifacts) {
    let node_dir = artifacts.root().join("nodes");
    let mut entries = Vec::new();
    for suffix in ["request", "response", "error"] {
        let path = node_dir.join(format!("{id}.{suffix}.json"));
        if path.is_file() {
            entries.push(path.display().to_string());
        }
    }
    if !entries.is_empty() {
        paths.insert(id.to_string(), entries);
    }
}

fn is_side_effecting(registry: &Registry, fqdn: &str) -> bool {
    registry.resolve(fqdn).map(|m| m.is_side_effecting()).unwrap_or(false)
}

fn fail_fast(artifacts: &RunArtifacts, err: EngineError) -> (Summary, Option<EngineError>) {
    let stop_reason = Some(stop_reason_for(&err));
    let summary = Summary {
        run_id: artifacts.run_id().to_string(),
        ok: false,
        stop_reason,
        totals: Totals::default(),
        artifacts: json!({}),
    };
    (summary, Some(err))
}

fn terminal_without_artifacts(run_id: String, err: EngineError) -> (Summary, Option<EngineError>) {
    let stop_reason = Some(stop_reason_for(&err));
    let summary = Summary { run_id, ok: false, stop_reason, totals: Totals::default(), artifacts: json!({}) };
    (summary, Some(err))
}

#[allow(clippy::too_many_arguments)]
fn build_summary(
    artifacts: &RunArtifacts,
    ok: bool,
    stop_reason: Option<String>,
    totals: Totals,
    artifact_paths: &HashMap<String, Vec<String>>,
    mut run_level_paths: Vec<String>,
    node_metrics: Vec<NodeMetric>,
    timeline: Vec<TimelineEvent>,
    err: EngineError,
) -> (Summary, Option<EngineError>) {
    if let Ok(path) = artifacts.write_metrics(&json!({"nodes": node_metrics})) {
        run_level_paths.push(path.display().to_string());
    }
    if let Ok(path) = artifacts.write_timeline(&json!({"events": timeline})) {
        run_level_paths.push(path.display().to_string());
    }
    let mut artifact_paths = artifact_paths.clone();
    artifact_paths.insert("__run__".to_string(), run_level_paths);
    let summary = Summary {
        run_id: artifacts.run_id().to_string(),
        ok,
        stop_reason,
        totals,
        artifacts: paths_to_value(&artifact_paths),
    };
    if let Err(e) = artifacts.write_summary(&serde_json::to_value(&summary).expect("summary serializes")) {
        error!(run_id = %artifacts.run_id(), error = %e, "failed to write durable summary.json; caller still gets this in-memory summary");
    }
    (summary, Some(err))
}
