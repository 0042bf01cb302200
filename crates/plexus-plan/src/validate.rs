//! Semantic validation of a parsed [`Plan`] (§4.A rules ii–iv).

use std::collections::{HashMap, HashSet};

use plexus_registry::Registry;
use plexus_retry::RetryMatcher;
use plexus_types::{EngineError, Plan, RetryPolicy};

/// DFS colouring used by the cycle check. `Grey` marks a node currently on
/// the recursion stack; `Black` marks one fully explored.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

/// Run every semantic rule of §4.A against `plan`, resolving tool references
/// through `registry`. All failures are reported as [`EngineError::PlanSchema`].
pub fn validate_semantics(plan: &Plan, registry: &Registry) -> Result<(), EngineError> {
    check_unique_ids(plan)?;
    check_known_tools(plan, registry)?;
    check_acyclic(plan)?;
    check_retry_patterns(plan)?;
    Ok(())
}

fn check_unique_ids(plan: &Plan) -> Result<(), EngineError> {
    let mut seen = HashSet::new();
    for node in &plan.graph {
        if !seen.insert(node.id.as_str()) {
            return Err(EngineError::PlanSchema(format!("duplicate node id {:?}", node.id)));
        }
    }
    Ok(())
}

fn check_known_tools(plan: &Plan, registry: &Registry) -> Result<(), EngineError> {
    for node in &plan.graph {
        registry
            .resolve(&node.tool)
            .map_err(|_| EngineError::PlanSchema(format!("node {:?} references unknown tool {:?}", node.id, node.tool)))?;
    }
    Ok(())
}

/// Cycle and dangling-reference detection via coloured DFS (§4.A rule iii).
fn check_acyclic(plan: &Plan) -> Result<(), EngineError> {
    let by_id: HashMap<&str, &[String]> = plan.graph.iter().map(|n| (n.id.as_str(), n.needs())).collect();

    for node in &plan.graph {
        for dep in node.needs() {
            if !by_id.contains_key(dep.as_str()) {
                return Err(EngineError::PlanSchema(format!(
                    "node {:?} needs unknown node {:?}",
                    node.id, dep
                )));
            }
        }
    }

    let mut colour: HashMap<&str, Colour> = by_id.keys().map(|id| (*id, Colour::White)).collect();

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a [String]>,
        colour: &mut HashMap<&'a str, Colour>,
    ) -> Result<(), EngineError> {
        match colour.get(id) {
            Some(Colour::Black) => return Ok(()),
            Some(Colour::Grey) => {
                return Err(EngineError::PlanSchema(format!("cycle detected at node {id:?}")));
            }
            _ => {}
        }
        colour.insert(id, Colour::Grey);
        for dep in by_id.get(id).copied().unwrap_or(&[]) {
            visit(dep.as_str(), by_id, colour)?;
        }
        colour.insert(id, Colour::Black);
        Ok(())
    }

    for id in by_id.keys() {
        visit(id, &by_id, &mut colour)?;
    }

    Ok(())
}

/// Every `retry_on` pattern in the plan, whether on a node or the execution
/// default, must parse under the §3 grammar (§4.A rule iv).
fn check_retry_patterns(plan: &Plan) -> Result<(), EngineError> {
    let validate_policy = |policy: &RetryPolicy, where_: &str| -> Result<(), EngineError> {
        RetryMatcher::new(&policy.retry_on)
            .map_err(|e| EngineError::PlanSchema(format!("{where_}: {e}")))?;
        Ok(())
    };

    if let Some(default_retry) = plan.execution.as_ref().and_then(|e| e.retry_default.as_ref()) {
        validate_policy(default_retry, "execution.retry_default")?;
    }
    for node in &plan.graph {
        if let Some(retry) = node.retry.as_ref() {
            validate_policy(retry, &format!("node {:?} retry", node.id))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_types::{Execution, Node};
    use serde_json::Value;
    use std::fs;
    use tempfile::TempDir;

    fn registry_with(fqdns: &[&str]) -> Registry {
        let dir = TempDir::new().unwrap();
        for (i, fqdn) in fqdns.iter().enumerate() {
            let (name, version) = fqdn.split_once('.').unwrap();
            let manifest = serde_json::json!({
                "name": name, "version": version, "kind": "http",
                "endpoint": "http://localhost:9000/tool",
                "input_schema": {"type": "object"},
                "output_schema": {"type": "object"},
                "tags": []
            });
            fs::write(dir.path().join(format!("m{i}.json")), manifest.to_string()).unwrap();
        }
        // leak the tempdir so the registry root stays alive for the test body
        let path = dir.into_path();
        Registry::load(path).unwrap()
    }

    fn node(id: &str, tool: &str, needs: &[&str]) -> Node {
        Node {
            id: id.into(),
            tool: tool.into(),
            inputs: Value::Null,
            needs: if needs.is_empty() { None } else { Some(needs.iter().map(|s| s.to_string()).collect()) },
            out: None,
            cache: None,
            timeout_ms: None,
            retry: None,
            concurrency: None,
        }
    }

    fn plan(graph: Vec<Node>) -> Plan {
        Plan { version: "1".into(), vars: Default::default(), budget: None, graph, execution: None }
    }

    #[test]
    fn rejects_duplicate_ids() {
        let registry = registry_with(&["echo.v1"]);
        let p = plan(vec![node("a", "echo.v1", &[]), node("a", "echo.v1", &[])]);
        assert!(validate_semantics(&p, &registry).is_err());
    }

    #[test]
    fn rejects_unknown_tool() {
        let registry = registry_with(&["echo.v1"]);
        let p = plan(vec![node("a", "missing.v1", &[])]);
        assert!(validate_semantics(&p, &registry).is_err());
    }

    #[test]
    fn rejects_dangling_need() {
        let registry = registry_with(&["echo.v1"]);
        let p = plan(vec![node("a", "echo.v1", &["ghost"])]);
        assert!(validate_semantics(&p, &registry).is_err());
    }

    #[test]
    fn rejects_cycle() {
        let registry = registry_with(&["echo.v1"]);
        let p = plan(vec![node("a", "echo.v1", &["b"]), node("b", "echo.v1", &["a"])]);
        assert!(validate_semantics(&p, &registry).is_err());
    }

    #[test]
    fn accepts_valid_dag() {
        let registry = registry_with(&["echo.v1"]);
        let p = plan(vec![node("a", "echo.v1", &[]), node("b", "echo.v1", &["a"])]);
        assert!(validate_semantics(&p, &registry).is_ok());
    }

    #[test]
    fn rejects_unknown_retry_class() {
        let registry = registry_with(&["echo.v1"]);
        let mut n = node("a", "echo.v1", &[]);
        n.retry = Some(RetryPolicy { retries: 1, backoff_ms: 0, jitter_ms: 0, retry_on: vec!["BogusError".into()] });
        assert!(validate_semantics(&plan(vec![n]), &registry).is_err());
    }

    #[test]
    fn rejects_bad_execution_default_retry_pattern() {
        let registry = registry_with(&["echo.v1"]);
        let mut p = plan(vec![node("a", "echo.v1", &[])]);
        p.execution = Some(Execution {
            max_parallel: None,
            cache_default: None,
            retry_default: Some(RetryPolicy { retries: 1, backoff_ms: 0, jitter_ms: 0, retry_on: vec!["Nope".into()] }),
        });
        assert!(validate_semantics(&p, &registry).is_err());
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let registry = registry_with(&["echo.v1"]);
        let p = plan(vec![node("a", "echo.v1", &["a"])]);
        assert!(validate_semantics(&p, &registry).is_err());
    }
}
