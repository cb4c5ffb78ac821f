use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

/// Top-level Admin/Config Surface document (§4.J, §6): the full YAML
/// configuration file, validated with `deny_unknown_fields` at every level
/// so a typo in a section fails fast at startup rather than being silently
/// ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlyxConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: alyx_storage::StorageConfig,
    #[serde(default)]
    pub realtime: alyx_realtime::RealtimeConfig,
    #[serde(default)]
    pub functions: FunctionsConfig,
    #[serde(default)]
    pub events: EventsSection,
    #[serde(default)]
    pub dev: DevConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

/// The `functions {path, default_timeout}` config section (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionsConfig {
    #[serde(default = "default_functions_path")]
    pub path: String,
    /// Seconds; used when a function record does not declare its own
    /// `timeout` in its manifest.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout: u64,
}

fn default_functions_path() -> String {
    "functions".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self { path: default_functions_path(), default_timeout: default_timeout_secs() }
    }
}

impl FunctionsConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout)
    }
}

/// The `events {retention, process_interval, cleanup_interval}` config
/// section (§6). Field units are seconds, matching the durations the rest
/// of the config file uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventsSection {
    #[serde(default = "default_retention_secs")]
    pub retention: u64,
    #[serde(default = "default_process_interval_secs")]
    pub process_interval: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval: u64,
}

fn default_retention_secs() -> u64 {
    7 * 24 * 3600
}
fn default_process_interval_secs() -> u64 {
    1
}
fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            retention: default_retention_secs(),
            process_interval: default_process_interval_secs(),
            cleanup_interval: default_cleanup_interval_secs(),
        }
    }
}

impl EventsSection {
    /// Converts the config section into `alyx_events::EventsConfig`.
    /// `batch_size` isn't part of the external config surface (§6); it
    /// keeps the Event Bus's own default.
    pub fn to_events_config(&self) -> alyx_events::EventsConfig {
        alyx_events::EventsConfig {
            retention: Duration::from_secs(self.retention),
            process_interval: Duration::from_secs(self.process_interval),
            cleanup_interval: Duration::from_secs(self.cleanup_interval),
            ..Default::default()
        }
    }
}

/// The `dev {enabled, auto_generate, generate_output}` config section (§6).
/// `enabled` gates the Watcher & Hot-Reload component (§4.H: "only enabled
/// in development"); `auto_generate`/`generate_output` describe the
/// out-of-scope client-SDK generator's output location, carried through here
/// only so the config file round-trips (§1 lists the generator as an
/// external collaborator).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DevConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub auto_generate: bool,
    #[serde(default)]
    pub generate_output: Option<String>,
}

impl AlyxConfig {
    /// Reads and validates a YAML configuration file (§4.J).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        "database:\n  path: alyx.sqlite\n"
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = AlyxConfig::parse(minimal_yaml()).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path, "alyx.sqlite");
        assert!(config.realtime.enabled);
        assert_eq!(config.functions.path, "functions");
        assert!(!config.dev.enabled);
    }

    #[test]
    fn rejects_unknown_top_level_section() {
        let yaml = format!("{}\nbogus:\n  x: 1\n", minimal_yaml());
        assert!(AlyxConfig::parse(&yaml).is_err());
    }

    #[test]
    fn rejects_unknown_key_in_nested_section() {
        let yaml = format!("{}\nfunctions:\n  path: fns\n  bogus: true\n", minimal_yaml());
        assert!(AlyxConfig::parse(&yaml).is_err());
    }

    #[test]
    fn events_section_converts_seconds_to_durations() {
        let yaml = format!("{}\nevents:\n  retention: 3600\n  process_interval: 2\n  cleanup_interval: 30\n", minimal_yaml());
        let config = AlyxConfig::parse(&yaml).unwrap();
        let events_config = config.events.to_events_config();
        assert_eq!(events_config.retention, Duration::from_secs(3600));
        assert_eq!(events_config.process_interval, Duration::from_secs(2));
    }

    #[test]
    fn full_config_round_trips_through_serialize_and_parse() {
        let config = AlyxConfig::parse(minimal_yaml()).unwrap();
        let rendered = serde_yaml::to_string(&config).unwrap();
        let reparsed = AlyxConfig::parse(&rendered).unwrap();
        assert_eq!(reparsed.server.port, config.server.port);
    }
}
