use std::{collections::HashMap, path::{Path, PathBuf}, time::SystemTime};

use tracing::warn;

use crate::manifest::{self, Manifest, MANIFEST_FILENAMES};

#[derive(Debug, Clone)]
pub struct FunctionRecord {
    pub name: String,
    pub runtime_tag: String,
    pub entry: PathBuf,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
    pub timeout: std::time::Duration,
    pub memory_hint: Option<u64>,
    pub build: Option<manifest::BuildStep>,
    pub input_schema: Option<serde_json::Value>,
    pub enabled: bool,
}

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Walks the functions root; for each direct subdirectory, parses an
/// optional manifest or infers the runtime/entry from file extension
/// precedence (§4.E). Directories that fail the "entry file exists" /
/// "name matches directory name" invariants are skipped with a warning
/// rather than aborting discovery for the whole registry.
pub fn discover(root: &Path) -> Vec<FunctionRecord> {
    let Ok(entries) = std::fs::read_dir(root) else {
        warn!(root = %root.display(), "functions root is not readable");
        return Vec::new();
    };

    let mut records = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(dir_name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        match discover_one(&path, dir_name) {
            Ok(record) => records.push(record),
            Err(err) => warn!(function = dir_name, %err, "skipping function directory"),
        }
    }
    records
}

fn discover_one(dir: &Path, dir_name: &str) -> anyhow::Result<FunctionRecord> {
    let manifest = read_manifest(dir)?;

    let (runtime_tag, mut entry, name) = match &manifest {
        Some(m) => {
            let runtime_tag = m.runtime.clone().ok_or_else(|| anyhow::anyhow!("manifest missing `runtime`"))?;
            let entry_rel = m.entry.clone().ok_or_else(|| anyhow::anyhow!("manifest missing `entry`"))?;
            let entry = dir.join(entry_rel);
            let name = m.name.clone().unwrap_or_else(|| dir_name.to_string());
            (runtime_tag, entry, name)
        },
        None => {
            let (runtime_tag, entry) =
                manifest::infer_entry(dir).ok_or_else(|| anyhow::anyhow!("no entry file found"))?;
            (runtime_tag, entry, dir_name.to_string())
        },
    };

    if name != dir_name {
        anyhow::bail!("manifest name `{name}` does not match directory name `{dir_name}`");
    }
    if !entry.is_file() {
        anyhow::bail!("entry file {} does not exist", entry.display());
    }

    let build = manifest.as_ref().and_then(|m| m.build.clone());
    if let Some(build) = &build {
        if let Some(output) = &build.output {
            let output_path = dir.join(output);
            if output_path.is_file() && newer_than(&output_path, &entry) {
                entry = output_path;
            }
        }
    }

    let timeout = std::time::Duration::from_secs(
        manifest.as_ref().and_then(|m| m.timeout).unwrap_or(DEFAULT_TIMEOUT_SECS),
    );

    Ok(FunctionRecord {
        name,
        runtime_tag,
        entry,
        working_dir: dir.to_path_buf(),
        env: manifest.as_ref().map(|m| m.env.clone()).unwrap_or_default(),
        timeout,
        memory_hint: manifest.as_ref().and_then(|m| m.memory),
        build,
        input_schema: manifest.as_ref().and_then(|m| m.input_schema.clone()),
        enabled: manifest.as_ref().map(|m| m.enabled).unwrap_or(true),
    })
}

fn read_manifest(dir: &Path) -> anyhow::Result<Option<Manifest>> {
    for filename in MANIFEST_FILENAMES {
        let path = dir.join(filename);
        if path.is_file() {
            let contents = std::fs::read_to_string(&path)?;
            return Ok(Some(manifest::parse(&contents)?));
        }
    }
    Ok(None)
}

fn newer_than(candidate: &Path, than: &Path) -> bool {
    let mtime = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified()).unwrap_or(SystemTime::UNIX_EPOCH);
    mtime(candidate) > mtime(than)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_manifest_declared_function() {
        let tmp = tempfile::tempdir().unwrap();
        let func_dir = tmp.path().join("hello");
        std::fs::create_dir(&func_dir).unwrap();
        std::fs::write(func_dir.join("manifest.yaml"), "name: hello\nruntime: deno\nentry: index.ts\ntimeout: 5\n")
            .unwrap();
        std::fs::write(func_dir.join("index.ts"), "").unwrap();

        let records = discover(tmp.path());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "hello");
        assert_eq!(records[0].runtime_tag, "deno");
        assert_eq!(records[0].timeout, std::time::Duration::from_secs(5));
    }

    #[test]
    fn infers_runtime_without_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let func_dir = tmp.path().join("bare");
        std::fs::create_dir(&func_dir).unwrap();
        std::fs::write(func_dir.join("index.js"), "").unwrap();

        let records = discover(tmp.path());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].runtime_tag, "deno");
    }

    #[test]
    fn name_mismatch_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let func_dir = tmp.path().join("hello");
        std::fs::create_dir(&func_dir).unwrap();
        std::fs::write(func_dir.join("manifest.yaml"), "name: other\nruntime: node\nentry: index.js\n").unwrap();
        std::fs::write(func_dir.join("index.js"), "").unwrap();

        let records = discover(tmp.path());
        assert!(records.is_empty());
    }

    #[test]
    fn build_output_newer_than_entry_is_preferred() {
        let tmp = tempfile::tempdir().unwrap();
        let func_dir = tmp.path().join("built");
        std::fs::create_dir(&func_dir).unwrap();
        std::fs::write(
            func_dir.join("manifest.yaml"),
            "name: built\nruntime: node\nentry: index.ts\nbuild:\n  command: tsc\n  output: dist/index.js\n",
        )
        .unwrap();
        std::fs::write(func_dir.join("index.ts"), "").unwrap();
        std::fs::create_dir(func_dir.join("dist")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        std::fs::write(func_dir.join("dist/index.js"), "").unwrap();

        let records = discover(tmp.path());
        assert_eq!(records.len(), 1);
        assert!(records[0].entry.ends_with("dist/index.js"));
    }
}
