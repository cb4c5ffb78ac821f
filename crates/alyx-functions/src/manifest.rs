use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// The function manifest (YAML) recognized keys (§6): `name, runtime, entry,
/// timeout, memory, env, build:{command,args,watch[],output}, input_schema,
/// sample_input, description, enabled`. Unknown keys are rejected, matching
/// the manifest contract's `deny_unknown_fields`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub name: Option<String>,
    pub runtime: Option<String>,
    pub entry: Option<String>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub memory: Option<u64>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub build: Option<BuildStep>,
    #[serde(default)]
    pub input_schema: Option<Json>,
    #[serde(default)]
    pub sample_input: Option<Json>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BuildStep {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub watch: Vec<String>,
    pub output: Option<String>,
}

pub const MANIFEST_FILENAMES: &[&str] = &["manifest.yaml", "manifest.yml"];

/// Parses a manifest file's contents, rejecting unknown keys (§6).
pub fn parse(contents: &str) -> anyhow::Result<Manifest> {
    Ok(serde_yaml::from_str(contents)?)
}

/// Runtime tag -> candidate entry file extensions, in the precedence order
/// used when a manifest is absent and the runtime must be inferred: compiled
/// or interpreter-native variants outrank raw TypeScript (§4.E: "compiled/JS
/// variants outrank source/TS variants when both exist").
pub const ENTRY_PRECEDENCE: &[(&str, &[&str])] = &[
    ("deno", &["js", "ts"]),
    ("bun", &["js", "ts"]),
    ("node", &["js", "mjs", "cjs", "ts"]),
    ("python", &["py"]),
    ("go", &["go"]),
];

/// Infers a runtime tag and entry filename from a directory's contents by
/// checking each runtime's candidate extensions against `index.<ext>`, in
/// extension-precedence order. Returns `None` if nothing matches.
pub fn infer_entry(dir: &std::path::Path) -> Option<(String, PathBuf)> {
    for (runtime, extensions) in ENTRY_PRECEDENCE {
        for ext in *extensions {
            let candidate = dir.join(format!("index.{ext}"));
            if candidate.is_file() {
                return Some((runtime.to_string(), candidate));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_manifest_keys() {
        let err = parse("name: f\nruntime: node\nentry: index.js\nbogus: true\n").unwrap_err();
        assert!(err.to_string().to_lowercase().contains("bogus") || err.to_string().to_lowercase().contains("unknown"));
    }

    #[test]
    fn parses_a_minimal_manifest() {
        let manifest = parse("name: hello\nruntime: deno\nentry: index.ts\n").unwrap();
        assert_eq!(manifest.name.as_deref(), Some("hello"));
        assert!(manifest.enabled);
    }

    #[test]
    fn entry_precedence_prefers_js_over_ts_for_deno() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.ts"), "").unwrap();
        std::fs::write(dir.path().join("index.js"), "").unwrap();
        let (runtime, entry) = infer_entry(dir.path()).unwrap();
        assert_eq!(runtime, "deno");
        assert!(entry.ends_with("index.js"));
    }
}
