use std::{collections::HashMap, path::Path, sync::Arc};

use parking_lot::RwLock;
use tracing::info;

use crate::discovery::{self, FunctionRecord};

/// Name -> record map with atomic whole-map swap, so the Watcher can replace
/// a single rebuilt entry without readers ever observing a half-updated
/// registry (§4.H).
#[derive(Default)]
pub struct FunctionRegistry {
    records: RwLock<HashMap<String, Arc<FunctionRecord>>>,
}

impl FunctionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Discovers functions under `root` and replaces the entire map.
    pub fn reload(&self, root: &Path) {
        let records = discovery::discover(root);
        let map = records.into_iter().map(|r| (r.name.clone(), Arc::new(r))).collect();
        info!(root = %root.display(), "function registry reloaded");
        *self.records.write() = map;
    }

    /// Atomically swaps in a single rebuilt record (the Watcher's
    /// "on success swaps the registry entry atomically" contract, §4.H).
    pub fn swap_one(&self, record: FunctionRecord) {
        self.records.write().insert(record.name.clone(), Arc::new(record));
    }

    pub fn get(&self, name: &str) -> Option<Arc<FunctionRecord>> {
        self.records.read().get(name).cloned()
    }

    pub fn list(&self) -> Vec<Arc<FunctionRecord>> {
        self.records.read().values().cloned().collect()
    }
}
