//! Owns the on-disk layout of a run (§3 "Run Artifacts on disk", §4.F).
//!
//! Every write in this crate is tmp-file-then-rename: a reader never
//! observes a partially written artifact. Artifacts are created by the
//! engine, mutated only by the engine, and never deleted by it; retention
//! is an operator concern.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use plexus_types::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `run.json`: the equality witness compared on resume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunInfo {
    /// SHA-256 of `canonical_json({plan, context})`.
    pub inputs_hash: String,
    /// The registry's `content_hash()` at run start.
    pub registry_hash: String,
    /// RFC 3339 timestamp of first creation.
    pub created_at: String,
}

/// `nodes/<id>.response.json` body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeResponse {
    /// Tool fqdn invoked.
    pub tool: String,
    /// The tool's validated response.
    pub data: Value,
    /// Wall-clock duration of the call, in milliseconds.
    pub ms: u64,
}

fn write_atomic_json<T: Serialize>(path: &Path, value: &T) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| EngineError::Engine(format!("cannot create {}: {e}", parent.display())))?;
    }
    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4()));
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| EngineError::Engine(format!("cannot serialize {}: {e}", path.display())))?;
    fs::write(&tmp_path, body)
        .map_err(|e| EngineError::Engine(format!("cannot write {}: {e}", tmp_path.display())))?;
    fs::rename(&tmp_path, path)
        .map_err(|e| EngineError::Engine(format!("cannot rename into {}: {e}", path.display())))?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, EngineError> {
    match fs::read_to_string(path) {
        Ok(text) => {
            let value = serde_json::from_str(&text)
                .map_err(|e| EngineError::Engine(format!("corrupt artifact {}: {e}", path.display())))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(EngineError::Engine(format!("cannot read {}: {e}", path.display()))),
    }
}

/// Owns one run's directory under `<runs>/<date>/<run_id>/`.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    root: PathBuf,
    run_id: String,
}

impl RunArtifacts {
    /// Resolve (or create) the directory for `run_id`. When `run_id` is
    /// `None`, a fresh id is generated and a directory created under
    /// today's date. When `run_id` is `Some` and a matching directory
    /// already exists under any date, it is reused (the resume path);
    /// otherwise a new one is created under today's date.
    pub fn open(runs_dir: impl AsRef<Path>, run_id: Option<String>) -> Result<Self, EngineError> {
        let runs_dir = runs_dir.as_ref();

        if let Some(run_id) = &run_id {
            if let Some(existing) = Self::find_existing(runs_dir, run_id)? {
                return Self::at(existing, run_id.clone());
            }
        }

        let run_id = run_id.unwrap_or_else(|| {
            let full = uuid::Uuid::new_v4().simple().to_string();
            full[..8].to_string()
        });
        let date = Utc::now().format("%Y-%m-%d").to_string();
        let root = runs_dir.join(date).join(&run_id);
        Self::at(root, run_id)
    }

    fn find_existing(runs_dir: &Path, run_id: &str) -> Result<Option<PathBuf>, EngineError> {
        if !runs_dir.is_dir() {
            return Ok(None);
        }
        let entries = fs::read_dir(runs_dir)
            .map_err(|e| EngineError::Engine(format!("cannot read runs dir {}: {e}", runs_dir.display())))?;
        for entry in entries {
            let entry = entry.map_err(|e| EngineError::Engine(format!("cannot read runs dir entry: {e}")))?;
            let candidate = entry.path().join(run_id);
            if candidate.is_dir() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    fn at(root: PathBuf, run_id: String) -> Result<Self, EngineError> {
        fs::create_dir_all(root.join("nodes"))
            .map_err(|e| EngineError::Engine(format!("cannot create nodes dir: {e}")))?;
        fs::create_dir_all(root.join("outputs"))
            .map_err(|e| EngineError::Engine(format!("cannot create outputs dir: {e}")))?;
        Ok(RunArtifacts { root, run_id })
    }

    /// The run's id.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The run's root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `outputs/`, exposed to nodes as `context.run_output`.
    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join("outputs")
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn node_path(&self, id: &str, suffix: &str) -> PathBuf {
        self.root.join("nodes").join(format!("{id}.{suffix}.json"))
    }

    /// Whether `run.json` already exists: the resume-vs-fresh decision
    /// point for the scheduler.
    pub fn exists(&self) -> bool {
        self.path("run.json").is_file()
    }

    /// Write `plan.json`.
    pub fn write_plan<T: Serialize>(&self, plan: &T) -> Result<PathBuf, EngineError> {
        let path = self.path("plan.json");
        write_atomic_json(&path, plan)?;
        Ok(path)
    }

    /// Write `context.json`.
    pub fn write_context(&self, context: &Value) -> Result<PathBuf, EngineError> {
        let path = self.path("context.json");
        write_atomic_json(&path, context)?;
        Ok(path)
    }

    /// Write `run.json`. Written once, at first start.
    pub fn write_run_info(&self, info: &RunInfo) -> Result<PathBuf, EngineError> {
        let path = self.path("run.json");
        write_atomic_json(&path, info)?;
        Ok(path)
    }

    /// Read back `run.json`, for the resume-hash comparison.
    pub fn read_run_info(&self) -> Result<Option<RunInfo>, EngineError> {
        read_json(&self.path("run.json"))
    }

    /// Write `nodes/<id>.request.json`.
    pub fn write_node_request(&self, id: &str, tool: &str, payload: &Value) -> Result<PathBuf, EngineError> {
        let path = self.node_path(id, "request");
        write_atomic_json(&path, &serde_json::json!({"tool": tool, "payload": payload}))?;
        Ok(path)
    }

    /// Write `nodes/<id>.response.json`.
    pub fn write_node_response(&self, id: &str, tool: &str, data: &Value, ms: u64) -> Result<PathBuf, EngineError> {
        let path = self.node_path(id, "response");
        let response = NodeResponse { tool: tool.to_string(), data: data.clone(), ms };
        write_atomic_json(&path, &response)?;
        Ok(path)
    }

    /// Read back `nodes/<id>.response.json`, for resume-time reconstruction
    /// of a completed node's exposed output.
    pub fn read_node_response(&self, id: &str) -> Result<Option<NodeResponse>, EngineError> {
        read_json(&self.node_path(id, "response"))
    }

    /// Write `nodes/<id>.error.json`.
    pub fn write_node_error(&self, id: &str, message: &str) -> Result<PathBuf, EngineError> {
        let path = self.node_path(id, "error");
        write_atomic_json(&path, &serde_json::json!({"error": message}))?;
        Ok(path)
    }

    /// Write `nodes/__preflight__.error.json`.
    pub fn write_preflight_error(&self, message: &str) -> Result<PathBuf, EngineError> {
        self.write_node_error("__preflight__", message)
    }

    /// Write `metrics.json`.
    pub fn write_metrics(&self, metrics: &Value) -> Result<PathBuf, EngineError> {
        let path = self.path("metrics.json");
        write_atomic_json(&path, metrics)?;
        Ok(path)
    }

    /// Write `metrics.timeline.json`.
    pub fn write_timeline(&self, timeline: &Value) -> Result<PathBuf, EngineError> {
        let path = self.path("metrics.timeline.json");
        write_atomic_json(&path, timeline)?;
        Ok(path)
    }

    /// Write `summary.json`.
    pub fn write_summary(&self, summary: &Value) -> Result<PathBuf, EngineError> {
        let path = self.path("summary.json");
        write_atomic_json(&path, summary)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fresh_run_creates_nodes_and_outputs_dirs() {
        let runs_dir = TempDir::new().unwrap();
        let artifacts = RunArtifacts::open(runs_dir.path(), Some("run1".into())).unwrap();
        assert!(artifacts.root().join("nodes").is_dir());
        assert!(artifacts.root().join("outputs").is_dir());
        assert!(!artifacts.exists());
    }

    #[test]
    fn resume_finds_existing_dated_directory() {
        let runs_dir = TempDir::new().unwrap();
        let first = RunArtifacts::open(runs_dir.path(), Some("run1".into())).unwrap();
        first
            .write_run_info(&RunInfo {
                inputs_hash: "a".into(),
                registry_hash: "b".into(),
                created_at: "2026-01-01T00:00:00Z".into(),
            })
            .unwrap();

        let second = RunArtifacts::open(runs_dir.path(), Some("run1".into())).unwrap();
        assert_eq!(second.root(), first.root());
        assert!(second.exists());
    }

    #[test]
    fn generated_run_id_is_eight_hex_chars() {
        let runs_dir = TempDir::new().unwrap();
        let artifacts = RunArtifacts::open(runs_dir.path(), None).unwrap();
        assert_eq!(artifacts.run_id().len(), 8);
        assert!(artifacts.run_id().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn node_response_round_trips() {
        let runs_dir = TempDir::new().unwrap();
        let artifacts = RunArtifacts::open(runs_dir.path(), Some("run1".into())).unwrap();
        artifacts.write_node_response("extract", "extractor.v1", &serde_json::json!({"ok": true}), 12).unwrap();

        let response = artifacts.read_node_response("extract").unwrap().unwrap();
        assert_eq!(response.tool, "extractor.v1");
        assert_eq!(response.ms, 12);
        assert_eq!(response.data, serde_json::json!({"ok": true}));
    }

    #[test]
    fn missing_node_response_reads_as_none() {
        let runs_dir = TempDir::new().unwrap();
        let artifacts = RunArtifacts::open(runs_dir.path(), Some("run1".into())).unwrap();
        assert!(artifacts.read_node_response("nonexistent").unwrap().is_none());
    }

    #[test]
    fn no_tmp_files_survive_a_write() {
        let runs_dir = TempDir::new().unwrap();
        let artifacts = RunArtifacts::open(runs_dir.path(), Some("run1".into())).unwrap();
        artifacts.write_metrics(&serde_json::json!({"nodes": 3})).unwrap();
        let leftovers: Vec<_> = fs::read_dir(artifacts.root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn preflight_error_is_written_under_the_preflight_marker_id() {
        let runs_dir = TempDir::new().unwrap();
        let artifacts = RunArtifacts::open(runs_dir.path(), Some("run1".into())).unwrap();
        let path = artifacts.write_preflight_error("model load failed").unwrap();
        assert!(path.ends_with("nodes/__preflight__.error.json"));
    }
}
