//! Host Runtime - Host 프로세스 쪽 메시지 처리
//!
//! 앱이 보낸 `activate`/`deactivate`/`commandInvoke`/`pluginRequest`/`serviceCall`/`event`를
//! isolated 플러그인 인스턴스로 전달한다. 플러그인 컨텍스트의 채널은 앱으로 가는 연결 자체라서,
//! 플러그인이 보내는 특권 메시지는 앱 라우터의 권한 게이트를 지난다.

use crate::ipc::{Connection, Envelope, MessageHandler, MessageType};
use crate::plugin::{Plugin, PluginContext, PluginRegistry};
use crate::service::HandlerTable;
use async_trait::async_trait;
use eterm_foundation::{Error, Result};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Host 측 플러그인 실행기
pub struct HostRuntime {
    registry: PluginRegistry,
    instances: RwLock<BTreeMap<String, Arc<dyn Plugin>>>,

    /// Host 안에서 제공되는 서비스 핸들러
    handlers: Arc<HandlerTable>,
}

impl HostRuntime {
    pub fn new(registry: PluginRegistry) -> Self {
        Self {
            registry,
            instances: RwLock::new(BTreeMap::new()),
            handlers: Arc::new(HandlerTable::new()),
        }
    }

    /// 활성화된 플러그인 ID
    pub fn active(&self) -> Vec<String> {
        self.instances.read().keys().cloned().collect()
    }

    pub fn handlers(&self) -> &Arc<HandlerTable> {
        &self.handlers
    }

    fn instance(&self, plugin_id: &str) -> Result<Arc<dyn Plugin>> {
        self.instances
            .read()
            .get(plugin_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("plugin {} is not active in host", plugin_id)))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// 활성화. 같은 ID가 이미 있으면 (앱 재연결 후 재활성화) 교체한다.
    async fn activate(&self, conn: Arc<Connection>, message: &Envelope) -> Result<Value> {
        let plugin_id = message.require_plugin()?;
        let plugin = self.registry.create(plugin_id).ok_or_else(|| {
            Error::NotFound(format!("no entry point registered for {}", plugin_id))
        })?;

        let previous = self.instances.write().remove(plugin_id);
        if let Some(previous) = previous {
            debug!("Replacing active instance of {}", plugin_id);
            if let Err(e) = previous.deactivate().await {
                warn!("Deactivating previous {} failed: {}", plugin_id, e);
            }
            self.handlers.remove_plugin(plugin_id);
        }

        let ctx = PluginContext::new(plugin_id, conn, Arc::clone(&self.handlers));
        if let Err(e) = plugin.activate(ctx).await {
            self.handlers.remove_plugin(plugin_id);
            return Err(e);
        }

        self.instances
            .write()
            .insert(plugin_id.to_string(), plugin);
        let bundle = message.opt_str("bundlePath").unwrap_or("-");
        info!("Activated {} from {}", plugin_id, bundle);
        Ok(json!({ "activated": plugin_id }))
    }

    async fn deactivate(&self, message: &Envelope) -> Result<Value> {
        let plugin_id = message.require_plugin()?;
        let removed = self.instances.write().remove(plugin_id);
        let Some(plugin) = removed else {
            return Ok(json!({ "deactivated": false }));
        };
        self.handlers.remove_plugin(plugin_id);
        plugin.deactivate().await?;
        info!("Deactivated {}", plugin_id);
        Ok(json!({ "deactivated": true }))
    }

    // ========================================================================
    // Calls
    // ========================================================================

    async fn invoke_command(&self, message: &Envelope) -> Result<Value> {
        let plugin = self.instance(message.require_plugin()?)?;
        let command_id = message.require_str("commandId")?;
        let args = message.get("args").cloned().unwrap_or(Value::Null);
        plugin.invoke_command(command_id, args).await
    }

    async fn plugin_request(&self, message: &Envelope) -> Result<Value> {
        let plugin = self.instance(message.require_plugin()?)?;
        let request_type = message.require_str("requestType")?;
        let payload = message.get("payload").cloned().unwrap_or(Value::Null);
        plugin.handle_request(request_type, payload).await
    }

    async fn service_call(&self, message: &Envelope) -> Result<Value> {
        let target = message.require_str("targetPluginId")?;
        let service_name = message.require_str("serviceName")?;
        let params = message.get("params").cloned().unwrap_or(Value::Null);
        self.handlers.call(target, service_name, params).await
    }

    async fn deliver_event(&self, message: &Envelope) {
        let Some(plugin_id) = message.plugin_id.as_deref() else {
            warn!("Event without subscriber id dropped");
            return;
        };
        let Some(event) = message.opt_str("event") else {
            warn!("Event for {} without name dropped", plugin_id);
            return;
        };
        match self.instance(plugin_id) {
            Ok(plugin) => {
                let data = message.get("data").cloned().unwrap_or(Value::Null);
                plugin.on_event(event, data).await;
            }
            Err(_) => debug!("Event {} for inactive {} dropped", event, plugin_id),
        }
    }
}

#[async_trait]
impl MessageHandler for HostRuntime {
    async fn handle(&self, conn: Arc<Connection>, message: Envelope) -> Option<Envelope> {
        let outcome = match message.kind {
            MessageType::Activate => self.activate(conn, &message).await,
            MessageType::Deactivate => self.deactivate(&message).await,
            MessageType::CommandInvoke => self.invoke_command(&message).await,
            MessageType::PluginRequest => self.plugin_request(&message).await,
            MessageType::ServiceCall => self.service_call(&message).await,
            MessageType::Event => {
                self.deliver_event(&message).await;
                return None;
            }
            kind if kind.is_request() => Err(Error::NotImplemented(format!(
                "host does not handle {}",
                kind
            ))),
            kind => {
                debug!("Host ignored {}", kind);
                return None;
            }
        };

        Some(match outcome {
            Ok(result) => Envelope::response_to(&message, result),
            Err(e) => {
                debug!("{} failed in host: {}", message.kind, e);
                Envelope::error_from(&message, &e)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{ConnectionOptions, Router};
    use eterm_foundation::{capability_tokens as tokens, CapabilityChecker, ErrorCode};
    use parking_lot::Mutex;
    use std::time::Duration;

    /// 활성화 때 서비스를 제공하고 명령/요청/이벤트를 기록한다
    #[derive(Default)]
    struct Greeter {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Plugin for Greeter {
        async fn activate(&self, ctx: PluginContext) -> Result<()> {
            ctx.provide_service("greet", |params| async move {
                let name = params["name"].as_str().unwrap_or("world").to_string();
                Ok(json!(format!("hello {}", name)))
            })
            .await
        }

        async fn invoke_command(&self, command_id: &str, args: Value) -> Result<Value> {
            Ok(json!({ "ran": command_id, "args": args }))
        }

        async fn on_event(&self, event: &str, _payload: Value) {
            self.events.lock().push(event.to_string());
        }
    }

    /// 앱 쪽: registerService만 허용하는 라우터
    fn app_router(checker: Arc<CapabilityChecker>) -> Router {
        Router::new("app")
            .with_capabilities(checker)
            .route(MessageType::RegisterService, |msg| async move {
                Ok(json!({ "registered": msg.require_str("name")? }))
            })
    }

    async fn connected(
        runtime: Arc<HostRuntime>,
        checker: Arc<CapabilityChecker>,
    ) -> Arc<Connection> {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let app = Connection::start(a, Arc::new(app_router(checker)), ConnectionOptions::new("app"));
        let host = Connection::start(b, runtime, ConnectionOptions::new("host"));
        app.send_handshake(Envelope::app_handshake()).await.unwrap();
        host.send_handshake(Envelope::host_handshake()).await.unwrap();
        app.wait_for_handshake(Duration::from_secs(1)).await.unwrap();
        app
    }

    fn runtime_with_greeter() -> (Arc<HostRuntime>, Arc<Greeter>) {
        let greeter = Arc::new(Greeter::default());
        let shared = Arc::clone(&greeter);
        let registry = PluginRegistry::new().with("greeter", move || {
            Arc::clone(&shared) as Arc<dyn Plugin>
        });
        (Arc::new(HostRuntime::new(registry)), greeter)
    }

    #[tokio::test]
    async fn test_activate_registers_service_through_app_gate() {
        let checker = Arc::new(CapabilityChecker::new());
        checker.register("greeter", [tokens::SERVICE_REGISTER]);
        let (runtime, _) = runtime_with_greeter();
        let app = connected(Arc::clone(&runtime), checker).await;

        app.request(Envelope::new(MessageType::Activate).with_plugin("greeter"))
            .await
            .unwrap();
        assert_eq!(runtime.active(), vec!["greeter"]);

        let reply = app
            .request(
                Envelope::new(MessageType::ServiceCall)
                    .with("targetPluginId", "greeter")
                    .with("serviceName", "greet")
                    .with("params", json!({ "name": "eterm" })),
            )
            .await
            .unwrap();
        assert_eq!(reply.result_value(), json!("hello eterm"));
    }

    #[tokio::test]
    async fn test_activation_denied_without_capability() {
        let checker = Arc::new(CapabilityChecker::new());
        checker.register("greeter", Vec::<String>::new());
        let (runtime, _) = runtime_with_greeter();
        let app = connected(Arc::clone(&runtime), checker).await;

        let err = app
            .request(Envelope::new(MessageType::Activate).with_plugin("greeter"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::PermissionDenied);
        assert!(runtime.active().is_empty());
        assert!(runtime.handlers().is_empty());
    }

    #[tokio::test]
    async fn test_commands_events_and_deactivate() {
        let checker = Arc::new(CapabilityChecker::new());
        checker.register("greeter", [tokens::SERVICE_REGISTER]);
        let (runtime, greeter) = runtime_with_greeter();
        let app = connected(Arc::clone(&runtime), checker).await;
        app.request(Envelope::new(MessageType::Activate).with_plugin("greeter"))
            .await
            .unwrap();

        let reply = app
            .request(
                Envelope::new(MessageType::CommandInvoke)
                    .with_plugin("greeter")
                    .with("commandId", "wave")
                    .with("args", json!([1, 2])),
            )
            .await
            .unwrap();
        assert_eq!(reply.result_value()["ran"], "wave");

        app.send(
            Envelope::new(MessageType::Event)
                .with_plugin("greeter")
                .with("event", "focus")
                .with("data", Value::Null),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*greeter.events.lock(), vec!["focus"]);

        let reply = app
            .request(Envelope::new(MessageType::Deactivate).with_plugin("greeter"))
            .await
            .unwrap();
        assert_eq!(reply.result_value()["deactivated"], true);
        assert!(runtime.handlers().is_empty());

        let err = app
            .request(
                Envelope::new(MessageType::CommandInvoke)
                    .with_plugin("greeter")
                    .with("commandId", "wave"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_unknown_entry_point_and_unhandled_request() {
        let (runtime, _) = runtime_with_greeter();
        let app = connected(runtime, Arc::new(CapabilityChecker::new())).await;

        let err = app
            .request(Envelope::new(MessageType::Activate).with_plugin("ghost"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err = app
            .request(Envelope::new(MessageType::RegisterService).with("name", "x"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotImplemented);
    }
}
