//! Handler Table - 같은 프로세스 안 서비스 핸들러
//!
//! `(pluginId, serviceName)` → 핸들러. 전역이 아니라 소유자가 주입해서 쓴다
//! (앱 측은 `ServiceDirectory`, Host 측은 `HostRuntime`이 하나씩 가진다).

use eterm_foundation::{Error, Result};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

pub type ServiceHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// 표시용 키 `"pluginId.serviceName"`
pub fn service_key(plugin_id: &str, service_name: &str) -> String {
    format!("{}.{}", plugin_id, service_name)
}

#[derive(Default)]
pub struct HandlerTable {
    handlers: Mutex<HashMap<(String, String), ServiceHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 핸들러 등록 (같은 키는 교체)
    pub fn register<F, Fut>(&self, plugin_id: &str, service_name: &str, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.insert(
            plugin_id,
            service_name,
            Arc::new(move |params| Box::pin(handler(params))),
        );
    }

    pub fn insert(&self, plugin_id: &str, service_name: &str, handler: ServiceHandler) {
        debug!("Handler registered: {}", service_key(plugin_id, service_name));
        self.handlers
            .lock()
            .insert((plugin_id.to_string(), service_name.to_string()), handler);
    }

    pub fn get(&self, plugin_id: &str, service_name: &str) -> Option<ServiceHandler> {
        self.handlers
            .lock()
            .get(&(plugin_id.to_string(), service_name.to_string()))
            .cloned()
    }

    pub fn contains(&self, plugin_id: &str, service_name: &str) -> bool {
        self.get(plugin_id, service_name).is_some()
    }

    /// 플러그인의 모든 핸들러 제거
    pub fn remove_plugin(&self, plugin_id: &str) -> usize {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(owner, _), _| owner != plugin_id);
        before - handlers.len()
    }

    /// 핸들러 실행 (락은 조회 동안만 잡는다)
    pub async fn call(&self, plugin_id: &str, service_name: &str, params: Value) -> Result<Value> {
        let handler = self.get(plugin_id, service_name).ok_or_else(|| {
            Error::ServiceNotFound(service_key(plugin_id, service_name))
        })?;
        handler(params).await
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_call_and_remove_plugin() {
        let table = HandlerTable::new();
        table.register("dict", "lookup", |params| async move {
            Ok(json!({ "word": params["word"], "found": true }))
        });
        table.register("dict", "stats", |_| async { Ok(json!(3)) });
        table.register("other", "lookup", |_| async { Ok(Value::Null) });

        let result = table.call("dict", "lookup", json!({"word": "ko"})).await.unwrap();
        assert_eq!(result["found"], true);

        assert_eq!(table.remove_plugin("dict"), 2);
        let err = table.call("dict", "lookup", Value::Null).await.unwrap_err();
        assert!(matches!(err, Error::ServiceNotFound(key) if key == "dict.lookup"));
        assert!(table.contains("other", "lookup"));
    }

    #[test]
    fn test_keys_do_not_collide_on_dots() {
        let table = HandlerTable::new();
        table.register("a.b", "c", |_| async { Ok(json!(1)) });
        assert!(!table.contains("a", "b.c"));
    }
}
