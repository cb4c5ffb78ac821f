use std::collections::HashMap;

use once_cell::sync::Lazy;

/// `{command, args, extensions}` for a runtime tag, the built-in
/// `runtimes.yaml`-equivalent default table (§4.E), overridable via
/// configuration by replacing entries in a `RuntimeTable`.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub command: String,
    pub args: Vec<String>,
}

fn default_table() -> HashMap<&'static str, RuntimeConfig> {
    let mut table = HashMap::new();
    table.insert("deno", RuntimeConfig { command: "deno".into(), args: vec!["run".into(), "--allow-all".into()] });
    table.insert("node", RuntimeConfig { command: "node".into(), args: vec![] });
    table.insert("bun", RuntimeConfig { command: "bun".into(), args: vec!["run".into()] });
    table.insert("python", RuntimeConfig { command: "python3".into(), args: vec![] });
    table.insert("go", RuntimeConfig { command: "go".into(), args: vec!["run".into()] });
    table
}

static DEFAULT_TABLE: Lazy<HashMap<&'static str, RuntimeConfig>> = Lazy::new(default_table);

#[derive(Debug, Clone)]
pub struct RuntimeTable {
    overrides: HashMap<String, RuntimeConfig>,
}

impl Default for RuntimeTable {
    fn default() -> Self {
        Self { overrides: HashMap::new() }
    }
}

impl RuntimeTable {
    pub fn with_overrides(overrides: HashMap<String, RuntimeConfig>) -> Self {
        Self { overrides }
    }

    /// Resolves `{command, args}` for a runtime tag. `Err(RUNTIME_MISSING)`-
    /// shaped at call sites for unknown tags.
    pub fn resolve(&self, runtime_tag: &str) -> Option<RuntimeConfig> {
        self.overrides.get(runtime_tag).cloned().or_else(|| DEFAULT_TABLE.get(runtime_tag).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_built_in_runtimes() {
        let table = RuntimeTable::default();
        assert_eq!(table.resolve("deno").unwrap().command, "deno");
        assert!(table.resolve("ruby").is_none());
    }

    #[test]
    fn override_replaces_built_in_entry() {
        let mut overrides = HashMap::new();
        overrides.insert("node".to_string(), RuntimeConfig { command: "/opt/node/bin/node".into(), args: vec![] });
        let table = RuntimeTable::with_overrides(overrides);
        assert_eq!(table.resolve("node").unwrap().command, "/opt/node/bin/node");
    }
}
