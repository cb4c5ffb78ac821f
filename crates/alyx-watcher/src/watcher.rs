use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    time::Duration,
};

use alyx_functions::{FunctionRecord, FunctionRegistry};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use tracing::{info, warn};

/// Watches each function's directory and hot-reloads the registry on change
/// (§4.H). Only meant to run in `dev.enabled` mode (§6); the server decides
/// whether to spawn this at all.
pub struct Watcher {
    registry: Arc<FunctionRegistry>,
    functions_root: PathBuf,
    debounce: Duration,
    build_timeout: Duration,
}

impl Watcher {
    pub fn new(registry: Arc<FunctionRegistry>, functions_root: PathBuf) -> Self {
        Self {
            registry,
            functions_root,
            debounce: Duration::from_millis(100),
            build_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = timeout;
        self
    }

    /// Spawns the watcher on a blocking thread: `notify`'s own callback is
    /// synchronous, and the debounce loop below blocks on a std channel
    /// rather than a tokio one (§5 permits blocking per task; the runtime
    /// multiplexes other work on its remaining threads). The current tokio
    /// handle is captured so the blocking thread can still drive async
    /// rebuild/reload work.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        let handle = tokio::runtime::Handle::current();
        tokio::task::spawn_blocking(move || self.run(handle))
    }

    fn run(self, handle: tokio::runtime::Handle) {
        let (tx, rx) = mpsc::channel::<Event>();
        let mut watcher = match notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = tx.send(event);
            },
            Err(err) => warn!(%err, "function watcher reported an error"),
        }) {
            Ok(watcher) => watcher,
            Err(err) => {
                warn!(%err, "failed to start function watcher; hot-reload disabled");
                return;
            },
        };

        if let Err(err) = watcher.watch(&self.functions_root, RecursiveMode::Recursive) {
            warn!(%err, root = %self.functions_root.display(), "failed to watch functions root");
            return;
        }

        loop {
            let Ok(first) = rx.recv() else { break };
            let mut changed: HashSet<PathBuf> = first.paths.into_iter().collect();
            loop {
                match rx.recv_timeout(self.debounce) {
                    Ok(event) => changed.extend(event.paths),
                    Err(mpsc::RecvTimeoutError::Timeout) => break,
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        handle.block_on(self.handle_batch(&changed));
                        return;
                    },
                }
            }
            handle.block_on(self.handle_batch(&changed));
        }
    }

    async fn handle_batch(&self, changed: &HashSet<PathBuf>) {
        if changed.is_empty() {
            return;
        }
        let changed: Vec<PathBuf> = changed.iter().cloned().collect();
        let mut already_reloaded = HashSet::new();
        for record in self.registry.list() {
            if already_reloaded.contains(&record.name) || !affects(&record, &changed) {
                continue;
            }
            already_reloaded.insert(record.name.clone());
            self.reload_one(&record).await;
        }
    }

    async fn reload_one(&self, record: &FunctionRecord) {
        if let Some(build) = &record.build {
            if let Err(err) = crate::build::run(build, &record.working_dir, self.build_timeout).await {
                warn!(function = %record.name, %err, "function build failed; keeping previous registry entry");
                return;
            }
        }

        let fresh = alyx_functions::discover(&self.functions_root).into_iter().find(|r| r.name == record.name);
        match fresh {
            Some(fresh) => {
                info!(function = %record.name, "hot-reloaded function");
                self.registry.swap_one(fresh);
            },
            None => warn!(function = %record.name, "function directory disappeared after rebuild; keeping previous entry"),
        }
    }
}

/// Whether a batch of changed paths touches `record`'s directory: for
/// functions with a build step, only paths matching `build.watch` globs
/// count; otherwise, only the entry file itself triggers a direct reload
/// (§4.H: "for functions without a build step, changes to the entry file
/// directly reload").
fn affects(record: &FunctionRecord, changed: &[PathBuf]) -> bool {
    changed.iter().any(|path| {
        if !path.starts_with(&record.working_dir) {
            return false;
        }
        match &record.build {
            Some(build) if !build.watch.is_empty() => build.watch.iter().any(|pattern| glob_matches(record, pattern, path)),
            _ => path == &record.entry,
        }
    })
}

fn glob_matches(record: &FunctionRecord, pattern: &str, path: &Path) -> bool {
    let full_pattern = record.working_dir.join(pattern);
    match glob::Pattern::new(&full_pattern.to_string_lossy()) {
        Ok(pattern) => pattern.matches_path(path),
        Err(err) => {
            warn!(function = %record.name, pattern, %err, "invalid build.watch glob pattern");
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn record(working_dir: PathBuf, entry: PathBuf, build: Option<alyx_functions::BuildStep>) -> FunctionRecord {
        FunctionRecord {
            name: "f".to_string(),
            runtime_tag: "node".to_string(),
            entry,
            working_dir,
            env: HashMap::new(),
            timeout: Duration::from_secs(30),
            memory_hint: None,
            build,
            input_schema: None,
            enabled: true,
        }
    }

    #[test]
    fn without_build_step_only_entry_file_change_affects() {
        let dir = PathBuf::from("/functions/f");
        let entry = dir.join("index.js");
        let rec = record(dir.clone(), entry.clone(), None);
        assert!(affects(&rec, &[entry.clone()]));
        assert!(!affects(&rec, &[dir.join("readme.md")]));
    }

    #[test]
    fn with_build_step_glob_pattern_matches_watch_globs() {
        let dir = PathBuf::from("/functions/f");
        let entry = dir.join("index.ts");
        let build = alyx_functions::BuildStep {
            command: "tsc".to_string(),
            args: vec![],
            watch: vec!["src/**/*.ts".to_string()],
            output: Some("dist/index.js".to_string()),
        };
        let rec = record(dir.clone(), entry, Some(build));
        assert!(affects(&rec, &[dir.join("src/handler.ts")]));
        assert!(!affects(&rec, &[dir.join("dist/index.js")]));
    }

    #[test]
    fn changes_outside_working_dir_never_affect() {
        let dir = PathBuf::from("/functions/f");
        let entry = dir.join("index.js");
        let rec = record(dir, entry, None);
        assert!(!affects(&rec, &[PathBuf::from("/functions/other/index.js")]));
    }
}
