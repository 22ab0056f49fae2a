//! Plugin Registry - 플러그인 진입점 팩토리
//!
//! 번들이 선언한 진입점을 정적으로 등록한다. 활성화할 때마다 새 인스턴스를 만든다.

use super::traits::Plugin;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// 플러그인 ID → 팩토리
#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 팩토리 등록 (같은 ID는 교체)
    pub fn register<F>(&mut self, plugin_id: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        let plugin_id = plugin_id.into();
        if self.factories.contains_key(&plugin_id) {
            warn!("Replacing plugin factory for {}", plugin_id);
        }
        debug!("Registered plugin factory: {}", plugin_id);
        self.factories.insert(plugin_id, Arc::new(factory));
    }

    /// 빌더 형태 등록
    pub fn with<F>(mut self, plugin_id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        self.register(plugin_id, factory);
        self
    }

    /// 새 인스턴스
    pub fn create(&self, plugin_id: &str) -> Option<Arc<dyn Plugin>> {
        self.factories.get(plugin_id).map(|factory| factory())
    }

    pub fn contains(&self, plugin_id: &str) -> bool {
        self.factories.contains_key(plugin_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginContext;
    use async_trait::async_trait;
    use eterm_foundation::Result;

    struct Nop;

    #[async_trait]
    impl Plugin for Nop {
        async fn activate(&self, _ctx: PluginContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_factories_create_fresh_instances() {
        let registry = PluginRegistry::new().with("nop", || Arc::new(Nop) as Arc<dyn Plugin>);

        let a = registry.create("nop").unwrap();
        let b = registry.create("nop").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(registry.create("missing").is_none());
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["nop"]);
    }
}
