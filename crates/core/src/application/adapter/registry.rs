// Adapter registry: the only dispatch point from target id to behavior

use super::targets::{ChatGpt, DeepSeek, Doubao, Kimi, Perplexity};
use super::TargetAdapter;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn TargetAdapter>>,
}

impl AdapterRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Every supported target
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Perplexity));
        registry.register(Arc::new(ChatGpt));
        registry.register(Arc::new(DeepSeek));
        registry.register(Arc::new(Kimi));
        registry.register(Arc::new(Doubao));
        registry
    }

    /// Supported targets restricted to `ids`; unknown ids are returned
    pub fn restricted_to(ids: &[String]) -> (Self, Vec<String>) {
        let all = Self::with_defaults();
        let mut registry = Self::new();
        let mut unknown = Vec::new();
        for id in ids {
            match all.get(id) {
                Some(adapter) => registry.register(adapter),
                None => unknown.push(id.clone()),
            }
        }
        (registry, unknown)
    }

    pub fn register(&mut self, adapter: Arc<dyn TargetAdapter>) {
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    pub fn get(&self, target_id: &str) -> Option<Arc<dyn TargetAdapter>> {
        self.adapters.get(target_id).cloned()
    }

    pub fn contains(&self, target_id: &str) -> bool {
        self.adapters.contains_key(target_id)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_all_targets() {
        let registry = AdapterRegistry::with_defaults();
        assert_eq!(
            registry.ids(),
            vec!["chatgpt", "deepseek", "doubao", "kimi", "perplexity"]
        );
        for id in registry.ids() {
            let adapter = registry.get(&id).unwrap();
            let profile = adapter.profile();
            assert!(profile.entry_url.starts_with("https://"), "{}", id);
            assert!(profile.entry_url.contains(profile.host), "{}", id);
            assert!(!profile.input.is_empty(), "{}", id);
            assert!(!profile.submit.is_empty(), "{}", id);
            assert!(!profile.response_selectors.is_empty(), "{}", id);
        }
    }

    #[test]
    fn test_restricted_reports_unknown() {
        let (registry, unknown) =
            AdapterRegistry::restricted_to(&["kimi".to_string(), "bard".to_string()]);
        assert_eq!(registry.ids(), vec!["kimi"]);
        assert_eq!(unknown, vec!["bard"]);
    }
}
