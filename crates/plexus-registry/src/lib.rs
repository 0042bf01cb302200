//! Tool manifest registry (§4.B).
//!
//! Loads every `*.json` manifest under a root directory, rejects the
//! invariant violations named in §3, and exposes resolution, a stable
//! content hash used as a resume precondition, and best-effort health
//! checks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use plexus_types::{canonical_json, sha256_hex, EngineError, ToolKind, ToolManifest};

/// A loaded set of tool manifests, keyed by `fqdn`.
///
/// # Examples
///
/// ```no_run
/// use plexus_registry::Registry;
///
/// let registry = Registry::load("./tools").expect("registry directory");
/// let manifest = registry.resolve("verifier.v1").expect("known tool");
/// println!("{}", manifest.kind_str());
/// ```
#[derive(Debug, Clone)]
pub struct Registry {
    root: PathBuf,
    manifests: HashMap<String, ToolManifest>,
}

impl Registry {
    /// Load every `*.json` file directly under `root` as a [`ToolManifest`].
    ///
    /// Fails with [`EngineError::Registry`] if the directory is missing, a
    /// file fails to parse, a duplicate `fqdn` is found, or a manifest fails
    /// its own [`ToolManifest::validate`].
    pub fn load(root: impl AsRef<Path>) -> Result<Self, EngineError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(EngineError::Registry(format!("registry dir {} does not exist", root.display())));
        }

        let mut manifests = HashMap::new();
        let entries = std::fs::read_dir(&root)
            .map_err(|e| EngineError::Registry(format!("cannot read registry dir {}: {e}", root.display())))?;

        for entry in entries {
            let entry = entry.map_err(|e| EngineError::Registry(format!("cannot read registry entry: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let text = std::fs::read_to_string(&path)
                .map_err(|e| EngineError::Registry(format!("cannot read manifest {}: {e}", path.display())))?;
            let manifest: ToolManifest = serde_json::from_str(&text)
                .map_err(|e| EngineError::Registry(format!("invalid manifest {}: {e}", path.display())))?;

            manifest.validate().map_err(EngineError::Registry)?;

            let fqdn = manifest.fqdn();
            if manifests.contains_key(&fqdn) {
                return Err(EngineError::Registry(format!("duplicate manifest for {fqdn}")));
            }
            manifests.insert(fqdn, manifest);
        }

        Ok(Registry { root, manifests })
    }

    /// The directory this registry was loaded from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `fqdn` to its manifest.
    pub fn resolve(&self, fqdn: &str) -> Result<&ToolManifest, EngineError> {
        self.manifests
            .get(fqdn)
            .ok_or_else(|| EngineError::Registry(format!("unknown tool {fqdn}")))
    }

    /// All known fqdns, in no particular order.
    pub fn fqdns(&self) -> impl Iterator<Item = &str> {
        self.manifests.keys().map(String::as_str)
    }

    /// `{fqdn: {"kind": "http"|"inproc"}}` summary, for diagnostics.
    pub fn summary(&self) -> HashMap<String, serde_json::Value> {
        self.manifests
            .iter()
            .map(|(fqdn, m)| (fqdn.clone(), serde_json::json!({"kind": m.kind_str()})))
            .collect()
    }

    /// SHA-256 over the sorted concatenation of every manifest's canonical
    /// JSON rendering. Stable under file-system enumeration order and under
    /// key ordering within a manifest (§4.B, §8 invariant 2), used as an
    /// equality witness when deciding whether a run may resume.
    pub fn content_hash(&self) -> String {
        let mut rendered: Vec<String> = self
            .manifests
            .values()
            .map(|m| canonical_json(&serde_json::to_value(m).expect("manifest serializes")))
            .collect();
        rendered.sort();
        sha256_hex(rendered.join("\n").as_bytes())
    }

    /// Best-effort `GET <endpoint>/health` for every HTTP tool; in-process
    /// tools are reported healthy unconditionally. Network failures count
    /// as unhealthy rather than propagating; this check is diagnostic, not
    /// part of any control-flow decision, and is never retried.
    pub async fn health(&self, base_url: Option<&str>) -> HashMap<String, bool> {
        let client = reqwest::Client::new();
        let mut results = HashMap::new();

        for (fqdn, manifest) in &self.manifests {
            let healthy = match (manifest.kind, &manifest.endpoint) {
                (ToolKind::Http, Some(endpoint)) => {
                    let url = match base_url {
                        Some(base) => endpoint.replacen("http://localhost", base.trim_end_matches('/'), 1),
                        None => endpoint.clone(),
                    };
                    probe_health(&client, &url).await
                }
                _ => true,
            };
            results.insert(fqdn.clone(), healthy);
        }

        results
    }
}

async fn probe_health(client: &reqwest::Client, endpoint: &str) -> bool {
    let url = format!("{}/health", endpoint.trim_end_matches('/'));
    match client.get(&url).timeout(std::time::Duration::from_secs(2)).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            tracing::debug!(endpoint = %url, error = %e, "health probe failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, filename: &str, json: &serde_json::Value) {
        fs::write(dir.join(filename), serde_json::to_string_pretty(json).unwrap()).unwrap();
    }

    fn http_manifest_json(name: &str) -> serde_json::Value {
        serde_json::json!({
            "name": name,
            "version": "v1",
            "kind": "http",
            "endpoint": "http://localhost:9001/tool",
            "input_schema": {"type": "object"},
            "output_schema": {"type": "object"},
            "tags": []
        })
    }

    #[test]
    fn loads_manifests_and_resolves_by_fqdn() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), "verifier.json", &http_manifest_json("verifier"));

        let registry = Registry::load(dir.path()).unwrap();
        assert!(registry.resolve("verifier.v1").is_ok());
        assert!(registry.resolve("missing.v1").is_err());
    }

    #[test]
    fn rejects_duplicate_fqdn() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), "a.json", &http_manifest_json("verifier"));
        write_manifest(dir.path(), "b.json", &http_manifest_json("verifier"));

        assert!(Registry::load(dir.path()).is_err());
    }

    #[test]
    fn rejects_missing_directory() {
        assert!(Registry::load("/nonexistent/registry/path").is_err());
    }

    #[test]
    fn content_hash_stable_under_key_reordering_within_a_manifest() {
        let dir_a = TempDir::new().unwrap();
        write_manifest(dir_a.path(), "verifier.json", &http_manifest_json("verifier"));

        let dir_b = TempDir::new().unwrap();
        let reordered = serde_json::json!({
            "tags": [],
            "output_schema": {"type": "object"},
            "input_schema": {"type": "object"},
            "endpoint": "http://localhost:9001/tool",
            "kind": "http",
            "version": "v1",
            "name": "verifier"
        });
        write_manifest(dir_b.path(), "verifier.json", &reordered);

        let hash_a = Registry::load(dir_a.path()).unwrap().content_hash();
        let hash_b = Registry::load(dir_b.path()).unwrap().content_hash();
        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn content_hash_stable_under_filesystem_enumeration_order() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), "a.json", &http_manifest_json("alpha"));
        write_manifest(dir.path(), "b.json", &http_manifest_json("beta"));
        let first = Registry::load(dir.path()).unwrap().content_hash();

        // Reload; HashMap iteration order differs across process runs, but
        // the hash is computed over a sorted rendering regardless.
        let second = Registry::load(dir.path()).unwrap().content_hash();
        assert_eq!(first, second);
    }

    #[test]
    fn summary_reports_kind_per_fqdn() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), "verifier.json", &http_manifest_json("verifier"));
        let registry = Registry::load(dir.path()).unwrap();
        let summary = registry.summary();
        assert_eq!(summary.get("verifier.v1").unwrap(), &serde_json::json!({"kind": "http"}));
    }

    #[tokio::test]
    async fn health_reports_unhealthy_on_connection_failure() {
        let dir = TempDir::new().unwrap();
        write_manifest(dir.path(), "verifier.json", &http_manifest_json("verifier"));
        let registry = Registry::load(dir.path()).unwrap();

        let results = registry.health(None).await;
        assert_eq!(results.get("verifier.v1"), Some(&false));
    }
}
