//! Service Directory - 플러그인 간 서비스 라우팅
//!
//! `"pluginId.serviceName"` → 실행 위치. main 플러그인 서비스는 `HandlerTable`에서 바로 실행하고,
//! isolated 플러그인 서비스는 Host로 `serviceCall` 요청을 전달해 응답/에러를 그대로 돌려준다.
//! `core` 네임스페이스는 주입된 `CoreServices`로 간다.

use super::core::{self, CoreServices, CORE_NAMESPACE};
use super::handlers::{service_key, HandlerTable};
use crate::ipc::{Envelope, HostLink, MessageType};
use crate::plugin::RunMode;
use eterm_foundation::{capability_tokens as tokens, CapabilityChecker, Error, Result};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// 디렉토리 항목 (명시적 등록으로만 생긴다)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntry {
    pub plugin_id: String,
    pub service_name: String,
    pub run_mode: RunMode,
}

impl ServiceEntry {
    pub fn key(&self) -> String {
        service_key(&self.plugin_id, &self.service_name)
    }
}

pub struct ServiceDirectory {
    capabilities: Arc<CapabilityChecker>,
    handlers: Arc<HandlerTable>,
    entries: RwLock<HashMap<(String, String), ServiceEntry>>,

    /// 로더가 알려 준 플러그인별 실행 위치
    plugin_modes: RwLock<HashMap<String, RunMode>>,

    host: RwLock<Option<Arc<dyn HostLink>>>,
    core: RwLock<Option<Arc<dyn CoreServices>>>,
}

impl ServiceDirectory {
    pub fn new(capabilities: Arc<CapabilityChecker>) -> Self {
        Self {
            capabilities,
            handlers: Arc::new(HandlerTable::new()),
            entries: RwLock::new(HashMap::new()),
            plugin_modes: RwLock::new(HashMap::new()),
            host: RwLock::new(None),
            core: RwLock::new(None),
        }
    }

    pub fn with_core(self, core: Arc<dyn CoreServices>) -> Self {
        self.set_core(core);
        self
    }

    pub fn set_core(&self, core: Arc<dyn CoreServices>) {
        *self.core.write() = Some(core);
    }

    /// isolated 서비스 전달 경로
    pub fn attach_host(&self, host: Arc<dyn HostLink>) {
        *self.host.write() = Some(host);
    }

    pub fn handlers(&self) -> &Arc<HandlerTable> {
        &self.handlers
    }

    // ========================================================================
    // Plugin lifecycle
    // ========================================================================

    pub fn register_plugin(&self, plugin_id: &str, run_mode: RunMode) {
        self.plugin_modes
            .write()
            .insert(plugin_id.to_string(), run_mode);
    }

    /// 플러그인의 모든 항목과 핸들러 제거 (언로드 시)
    pub fn unregister_plugin(&self, plugin_id: &str) {
        self.plugin_modes.write().remove(plugin_id);
        let removed = {
            let mut entries = self.entries.write();
            let before = entries.len();
            entries.retain(|(owner, _), _| owner != plugin_id);
            before - entries.len()
        };
        self.handlers.remove_plugin(plugin_id);
        if removed > 0 {
            debug!("Dropped {} services of {}", removed, plugin_id);
        }
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// 서비스 등록 (`service.register` 필요)
    pub fn register(&self, plugin_id: &str, service_name: &str) -> Result<ServiceEntry> {
        self.capabilities
            .check_token(plugin_id, tokens::SERVICE_REGISTER)?;
        if service_name.is_empty() {
            return Err(Error::InvalidParams("service name must not be empty".into()));
        }

        let run_mode = self
            .plugin_modes
            .read()
            .get(plugin_id)
            .copied()
            .ok_or_else(|| Error::UnknownPlugin(plugin_id.to_string()))?;

        let entry = ServiceEntry {
            plugin_id: plugin_id.to_string(),
            service_name: service_name.to_string(),
            run_mode,
        };
        self.entries.write().insert(
            (plugin_id.to_string(), service_name.to_string()),
            entry.clone(),
        );
        info!("Service registered: {} ({})", entry.key(), run_mode);
        Ok(entry)
    }

    /// main 플러그인 서비스 등록 + 핸들러 설치
    pub fn register_handler<F, Fut>(
        &self,
        plugin_id: &str,
        service_name: &str,
        handler: F,
    ) -> Result<ServiceEntry>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let entry = self.register(plugin_id, service_name)?;
        self.handlers.register(plugin_id, service_name, handler);
        Ok(entry)
    }

    pub fn entry(&self, plugin_id: &str, service_name: &str) -> Option<ServiceEntry> {
        self.entries
            .read()
            .get(&(plugin_id.to_string(), service_name.to_string()))
            .cloned()
    }

    /// 등록된 항목 (키 순)
    pub fn entries(&self) -> Vec<ServiceEntry> {
        let mut entries: Vec<ServiceEntry> = self.entries.read().values().cloned().collect();
        entries.sort_by_key(ServiceEntry::key);
        entries
    }

    // ========================================================================
    // Call
    // ========================================================================

    /// 서비스 호출
    ///
    /// 호출자가 있으면 `service.call`을 요구한다. 항목이 없으면 `ServiceNotFound`,
    /// main 항목인데 핸들러가 아직 없으면 `NotImplemented`.
    pub async fn call(
        &self,
        caller: Option<&str>,
        target: &str,
        service_name: &str,
        params: Value,
    ) -> Result<Value> {
        if let Some(caller) = caller {
            self.capabilities.check_token(caller, tokens::SERVICE_CALL)?;
        }

        if target == CORE_NAMESPACE {
            let core = self.core.read().clone();
            return core::dispatch(core.as_deref(), service_name, &params).await;
        }

        let entry = self
            .entry(target, service_name)
            .ok_or_else(|| Error::ServiceNotFound(service_key(target, service_name)))?;

        match entry.run_mode {
            RunMode::Main => {
                let handler = self.handlers.get(target, service_name).ok_or_else(|| {
                    Error::NotImplemented(format!("{} has no handler yet", entry.key()))
                })?;
                handler(params).await
            }
            RunMode::Isolated => {
                let host = self.host.read().clone().ok_or(Error::HostNotRunning)?;
                let mut request = Envelope::new(MessageType::ServiceCall)
                    .with("targetPluginId", target)
                    .with("serviceName", service_name)
                    .with("params", params);
                request.plugin_id = caller.map(str::to_string);

                debug!("Forwarding {} to host", entry.key());
                let response = host.request(request).await?;
                Ok(response.result_value())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{Connection, ConnectionOptions, MessageHandler, Router};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    fn directory() -> (Arc<CapabilityChecker>, ServiceDirectory) {
        let checker = Arc::new(CapabilityChecker::new());
        let directory = ServiceDirectory::new(Arc::clone(&checker));
        (checker, directory)
    }

    #[tokio::test]
    async fn test_main_service_round_trip() {
        let (checker, directory) = directory();
        checker.register("dict", [tokens::SERVICE_REGISTER]);
        checker.register("reader", [tokens::SERVICE_CALL]);
        directory.register_plugin("dict", RunMode::Main);

        directory
            .register_handler("dict", "lookup", |params| async move {
                Ok(json!({ "definition": format!("def of {}", params["word"].as_str().unwrap_or("")) }))
            })
            .unwrap();

        let result = directory
            .call(Some("reader"), "dict", "lookup", json!({"word": "cat"}))
            .await
            .unwrap();
        assert_eq!(result["definition"], "def of cat");
    }

    #[tokio::test]
    async fn test_registration_requires_capability() {
        let (checker, directory) = directory();
        checker.register("plain", Vec::<String>::new());
        directory.register_plugin("plain", RunMode::Main);

        let err = directory.register("plain", "x").unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        let err = directory.register("ghost", "x").unwrap_err();
        assert!(matches!(err, Error::UnknownPlugin(_)));
        assert!(directory.entries().is_empty());
    }

    #[tokio::test]
    async fn test_call_errors() {
        let (checker, directory) = directory();
        checker.register("dict", [tokens::SERVICE_REGISTER]);
        checker.register("mute", Vec::<String>::new());
        directory.register_plugin("dict", RunMode::Main);
        directory.register("dict", "lookup").unwrap();

        let err = directory
            .call(None, "dict", "lookup", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));

        let err = directory
            .call(None, "dict", "missing", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceNotFound(key) if key == "dict.missing"));

        let err = directory
            .call(Some("mute"), "dict", "lookup", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_unregister_drops_entries() {
        let (checker, directory) = directory();
        checker.register("dict", [tokens::SERVICE_REGISTER]);
        directory.register_plugin("dict", RunMode::Main);
        directory
            .register_handler("dict", "lookup", |_| async { Ok(Value::Null) })
            .unwrap();

        directory.unregister_plugin("dict");
        assert!(directory.entries().is_empty());
        assert!(directory.handlers().is_empty());
        let err = directory
            .call(None, "dict", "lookup", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceNotFound(_)));
    }

    struct Silent;

    #[async_trait]
    impl MessageHandler for Silent {
        async fn handle(&self, _conn: Arc<Connection>, _message: Envelope) -> Option<Envelope> {
            None
        }
    }

    #[tokio::test]
    async fn test_isolated_service_forwarded() {
        let (checker, directory) = directory();
        checker.register("ocr", [tokens::SERVICE_REGISTER]);
        directory.register_plugin("ocr", RunMode::Isolated);
        directory.register("ocr", "recognize").unwrap();

        // Host 쪽: serviceCall을 받아 payload를 되돌려준다
        let host_router = Router::new("host").route(MessageType::ServiceCall, |msg| async move {
            Ok(json!({
                "target": msg.require_str("targetPluginId")?,
                "service": msg.require_str("serviceName")?,
                "echo": msg.get("params").cloned().unwrap_or(Value::Null),
            }))
        });
        let (a, b) = tokio::io::duplex(64 * 1024);
        let _host = {
            let host = Connection::start(a, Arc::new(host_router), ConnectionOptions::new("host"));
            host.send_handshake(Envelope::host_handshake()).await.unwrap();
            host
        };
        let app = Connection::start(b, Arc::new(Silent), ConnectionOptions::new("app"));
        app.send_handshake(Envelope::app_handshake()).await.unwrap();
        app.wait_for_handshake(Duration::from_secs(1)).await.unwrap();
        directory.attach_host(app);

        let result = directory
            .call(None, "ocr", "recognize", json!({"image": 7}))
            .await
            .unwrap();
        assert_eq!(
            result,
            json!({"target": "ocr", "service": "recognize", "echo": {"image": 7}})
        );
    }

    #[tokio::test]
    async fn test_isolated_without_host() {
        let (checker, directory) = directory();
        checker.register("ocr", [tokens::SERVICE_REGISTER]);
        directory.register_plugin("ocr", RunMode::Isolated);
        directory.register("ocr", "recognize").unwrap();

        let err = directory
            .call(None, "ocr", "recognize", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HostNotRunning));
    }
}
