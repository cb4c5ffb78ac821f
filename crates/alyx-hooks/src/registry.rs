use std::sync::Arc;

use alyx_base::pattern_matches;
use parking_lot::RwLock;

use crate::types::{Hook, HookMode};

/// Declared hooks, in declaration order. Reload replaces the whole list
/// (hooks are immutable per-id and removed when their owning manifest is
/// removed, §3 Subscription).
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<Hook>>>,
}

impl HookRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn install(&self, hooks: Vec<Hook>) {
        *self.hooks.write() = hooks.into_iter().map(Arc::new).collect();
    }

    pub fn all(&self) -> Vec<Arc<Hook>> {
        self.hooks.read().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        let hooks = self.hooks.read();
        let mut types: Vec<String> = hooks.iter().map(|h| h.event_type.clone()).collect();
        types.sort();
        types.dedup();
        types
    }

    /// Hooks of `mode` matching `(event_type, source, action)`, ordered by
    /// descending priority, stable in declaration order on ties (§4.F
    /// "Dispatch ordering").
    pub fn matching(&self, event_type: &str, source: &str, action: &str, mode: HookMode) -> Vec<Arc<Hook>> {
        let mut matched: Vec<Arc<Hook>> = self
            .hooks
            .read()
            .iter()
            .filter(|h| h.mode == mode)
            .filter(|h| pattern_matches(&h.event_type, &h.source, &h.action, event_type, source, action))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.priority.cmp(&a.priority));
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OnFailure;

    fn hook(id: &str, priority: i32, mode: HookMode) -> Hook {
        Hook {
            id: id.to_string(),
            event_type: "http".to_string(),
            source: "*".to_string(),
            action: "*".to_string(),
            target: crate::types::HookTarget::Function { name: "f".to_string() },
            mode,
            priority,
            on_failure: OnFailure::Ignore,
            max_retries: 0,
            timeout: std::time::Duration::from_secs(1),
        }
    }

    #[test]
    fn matching_sorts_by_descending_priority_stable_on_ties() {
        let registry = HookRegistry::new();
        registry.install(vec![
            hook("a", 5, HookMode::Async),
            hook("b", 10, HookMode::Async),
            hook("c", 10, HookMode::Async),
        ]);
        let matched = registry.matching("http", "users", "create", HookMode::Async);
        let ids: Vec<&str> = matched.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn mode_filters_out_the_other_mode() {
        let registry = HookRegistry::new();
        registry.install(vec![hook("sync1", 0, HookMode::Sync)]);
        assert!(registry.matching("http", "users", "create", HookMode::Async).is_empty());
        assert_eq!(registry.matching("http", "users", "create", HookMode::Sync).len(), 1);
    }
}
