//! Source registry for managing the enabled adapters.
//!
//! Adapters are kept in priority order. A lower priority number means a more
//! trusted source: it wins display-name ties in the normalizer and version
//! ties in the resolver.

use std::sync::Arc;

use super::{SourceAdapter, SourceId};

struct Entry {
    adapter: Arc<dyn SourceAdapter>,
    priority: u32,
}

/// Registry of source adapters, ordered by priority.
#[derive(Default)]
pub struct SourceRegistry {
    entries: Vec<Entry>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter with a priority.
    ///
    /// If an adapter with the same id is already registered, it is replaced.
    /// Equal priorities keep registration order.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>, priority: u32) {
        let id = adapter.id();
        self.entries.retain(|e| e.adapter.id() != id);
        let pos = self
            .entries
            .iter()
            .position(|e| e.priority > priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, Entry { adapter, priority });
    }

    /// Get a registered adapter by id.
    pub fn get(&self, id: &SourceId) -> Option<&Arc<dyn SourceAdapter>> {
        self.entries
            .iter()
            .find(|e| &e.adapter.id() == id)
            .map(|e| &e.adapter)
    }

    pub fn priority_of(&self, id: &SourceId) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| &e.adapter.id() == id)
            .map(|e| e.priority)
    }

    /// Adapters, most trusted first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn SourceAdapter>> {
        self.entries.iter().map(|e| &e.adapter)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ApplyChannel, MockSourceAdapter};

    fn make_mock_adapter(id: &'static str, channel: &'static str) -> Arc<dyn SourceAdapter> {
        let mut mock = MockSourceAdapter::new();
        mock.expect_id().returning(move || SourceId::new(id));
        mock.expect_channel().returning(move || ApplyChannel::new(channel));
        Arc::new(mock)
    }

    fn ids(registry: &SourceRegistry) -> Vec<String> {
        registry.iter().map(|a| a.id().to_string()).collect()
    }

    #[test]
    fn test_registry_new() {
        let registry = SourceRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_registry_orders_by_priority() {
        let mut registry = SourceRegistry::new();
        registry.register(make_mock_adapter("registry", "registry"), 3);
        registry.register(make_mock_adapter("winget", "winget"), 1);
        registry.register(make_mock_adapter("chocolatey", "chocolatey"), 2);

        assert_eq!(ids(&registry), vec!["winget", "chocolatey", "registry"]);
        assert_eq!(registry.priority_of(&"chocolatey".into()), Some(2));
        assert_eq!(registry.priority_of(&"scoop".into()), None);
    }

    #[test]
    fn test_equal_priorities_keep_registration_order() {
        let mut registry = SourceRegistry::new();
        registry.register(make_mock_adapter("b", "b"), 1);
        registry.register(make_mock_adapter("a", "a"), 1);
        assert_eq!(ids(&registry), vec!["b", "a"]);
    }

    #[test]
    fn test_registry_register_replaces() {
        let mut registry = SourceRegistry::new();
        registry.register(make_mock_adapter("winget", "winget"), 1);
        registry.register(make_mock_adapter("winget", "winget"), 5); // Replace

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.priority_of(&"winget".into()), Some(5));
    }

    #[test]
    fn test_get() {
        let mut registry = SourceRegistry::new();
        registry.register(make_mock_adapter("winget", "winget"), 1);

        assert_eq!(registry.get(&"winget".into()).unwrap().id().as_str(), "winget");
        assert!(registry.get(&"chocolatey".into()).is_none());
    }
}
