//! Plugin traits - 핵심 플러그인 인터페이스
//!
//! main 플러그인과 isolated 플러그인은 같은 `Plugin` trait을 구현한다. 차이는 컨텍스트의 채널뿐:
//! main 플러그인의 메시지는 앱 라우터로 바로, isolated 플러그인의 메시지는 소켓을 건너 앱 라우터로 간다.
//! 어느 쪽이든 같은 권한 게이트를 지난다.

use crate::ipc::{Connection, Envelope, MessageType, Router};
use crate::service::HandlerTable;
use async_trait::async_trait;
use eterm_foundation::{Error, Result};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

// ============================================================================
// PluginChannel - 플러그인 → 앱 방향 메시지 통로
// ============================================================================

#[async_trait]
pub trait PluginChannel: Send + Sync {
    /// fire-and-forget (거부되면 에러)
    async fn post(&self, message: Envelope) -> Result<()>;

    /// 요청 → 결과 값
    async fn call(&self, message: Envelope) -> Result<Value>;
}

/// main 플러그인: 같은 프로세스의 앱 라우터
#[async_trait]
impl PluginChannel for Router {
    async fn post(&self, message: Envelope) -> Result<()> {
        match self.dispatch(message).await {
            Some(reply) => reply.into_result().map(|_| ()),
            None => Ok(()),
        }
    }

    async fn call(&self, message: Envelope) -> Result<Value> {
        match self.dispatch(message).await {
            Some(reply) => Ok(reply.into_result()?.result_value()),
            None => Ok(Value::Null),
        }
    }
}

/// isolated 플러그인: Host → 앱 연결
#[async_trait]
impl PluginChannel for Connection {
    async fn post(&self, message: Envelope) -> Result<()> {
        self.send(message).await
    }

    async fn call(&self, message: Envelope) -> Result<Value> {
        Ok(self.request(message).await?.result_value())
    }
}

// ============================================================================
// PluginContext - 플러그인에 제공되는 컨텍스트
// ============================================================================

/// 플러그인이 앱과 상호작용하는 인터페이스
///
/// 모든 메시지에 자기 플러그인 ID가 붙는다.
#[derive(Clone)]
pub struct PluginContext {
    plugin_id: String,
    channel: Arc<dyn PluginChannel>,

    /// 이 프로세스의 서비스 핸들러 테이블
    handlers: Arc<HandlerTable>,
}

impl PluginContext {
    pub fn new(
        plugin_id: impl Into<String>,
        channel: Arc<dyn PluginChannel>,
        handlers: Arc<HandlerTable>,
    ) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            channel,
            handlers,
        }
    }

    pub fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    fn message(&self, kind: MessageType) -> Envelope {
        Envelope::new(kind).with_plugin(self.plugin_id.as_str())
    }

    // ========================================================================
    // 이벤트
    // ========================================================================

    /// 이벤트 발행 (구독한 플러그인에게만 전달)
    pub async fn emit(&self, event: &str, data: Value) -> Result<()> {
        self.channel
            .post(
                self.message(MessageType::Emit)
                    .with("event", event)
                    .with("data", data),
            )
            .await
    }

    // ========================================================================
    // 터미널 / UI (권한 필요)
    // ========================================================================

    /// 터미널 입력 쓰기 (`terminal.write`)
    pub async fn write_terminal(&self, terminal_id: i64, data: &str) -> Result<()> {
        self.channel
            .post(
                self.message(MessageType::WriteTerminal)
                    .with("terminalId", terminal_id)
                    .with("data", data),
            )
            .await
    }

    /// UI 제어 메시지 (`setTabTitle`, `showBubble`, ...)
    pub async fn ui(&self, kind: MessageType, payload: Value) -> Result<()> {
        if !kind.is_ui_control() {
            return Err(Error::InvalidParams(format!("{} is not a UI control", kind)));
        }
        self.channel
            .post(self.message(kind).with_payload(payload))
            .await
    }

    pub async fn set_tab_title(&self, terminal_id: i64, title: &str) -> Result<()> {
        self.ui(
            MessageType::SetTabTitle,
            serde_json::json!({ "terminalId": terminal_id, "title": title }),
        )
        .await
    }

    pub async fn update_view_model(&self, view_model: Value) -> Result<()> {
        self.channel
            .post(
                self.message(MessageType::UpdateViewModel)
                    .with("viewModel", view_model),
            )
            .await
    }

    // ========================================================================
    // 서비스
    // ========================================================================

    /// 서비스 제공 (`service.register`)
    ///
    /// 디렉토리 등록이 성공해야 핸들러가 설치된다.
    pub async fn provide_service<F, Fut>(&self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.channel
            .call(self.message(MessageType::RegisterService).with("name", name))
            .await?;
        self.handlers.register(&self.plugin_id, name, handler);
        Ok(())
    }

    /// 다른 플러그인(또는 `core`)의 서비스 호출 (`service.call`)
    pub async fn call_service(&self, target: &str, name: &str, params: Value) -> Result<Value> {
        self.channel
            .call(
                self.message(MessageType::ServiceCall)
                    .with("targetPluginId", target)
                    .with("serviceName", name)
                    .with("params", params),
            )
            .await
    }
}

// ============================================================================
// Plugin Trait - 모든 플러그인이 구현해야 하는 인터페이스
// ============================================================================

/// 플러그인 트레이트
///
/// 인스턴스는 `PluginRegistry`의 팩토리로 만든다 (클래스 이름 조회 없음).
#[async_trait]
pub trait Plugin: Send + Sync {
    /// 활성화. 컨텍스트는 비활성화까지 보관해도 된다.
    async fn activate(&self, ctx: PluginContext) -> Result<()>;

    async fn deactivate(&self) -> Result<()> {
        Ok(())
    }

    /// 매니페스트 `commands`에 선언한 명령 실행
    async fn invoke_command(&self, command_id: &str, _args: Value) -> Result<Value> {
        Err(Error::NotImplemented(format!("command {}", command_id)))
    }

    /// 앱이 보낸 플러그인 전용 요청
    async fn handle_request(&self, request_type: &str, _payload: Value) -> Result<Value> {
        Err(Error::NotImplemented(format!("request {}", request_type)))
    }

    /// 구독한 이벤트 수신
    async fn on_event(&self, _event: &str, _payload: Value) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use eterm_foundation::{capability_tokens as tokens, CapabilityChecker};
    use parking_lot::Mutex;

    fn gated_router(checker: Arc<CapabilityChecker>, seen: Arc<Mutex<Vec<Envelope>>>) -> Router {
        let ui_seen = Arc::clone(&seen);
        Router::new("app")
            .with_capabilities(checker)
            .route(MessageType::WriteTerminal, move |msg| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push(msg);
                    Ok(Value::Null)
                }
            })
            .route(MessageType::SetTabTitle, move |msg| {
                let seen = Arc::clone(&ui_seen);
                async move {
                    seen.lock().push(msg);
                    Ok(Value::Null)
                }
            })
            .route(MessageType::RegisterService, |msg| async move {
                Ok(Value::String(msg.require_str("name")?.to_string()))
            })
    }

    #[tokio::test]
    async fn test_context_messages_pass_the_gate() {
        let checker = Arc::new(CapabilityChecker::new());
        checker.register("writer", [tokens::TERMINAL_WRITE]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let router = Arc::new(gated_router(Arc::clone(&checker), Arc::clone(&seen)));

        let ctx = PluginContext::new("writer", router, Arc::new(HandlerTable::new()));
        ctx.write_terminal(3, "ls\n").await.unwrap();

        let err = ctx.set_tab_title(3, "build").await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].plugin_id.as_deref(), Some("writer"));
        assert_eq!(seen[0].opt_str("data"), Some("ls\n"));
    }

    #[tokio::test]
    async fn test_provide_service_installs_handler_only_when_allowed() {
        let checker = Arc::new(CapabilityChecker::new());
        checker.register("provider", [tokens::SERVICE_REGISTER]);
        checker.register("plain", Vec::<String>::new());
        let router = Arc::new(gated_router(checker, Arc::new(Mutex::new(Vec::new()))));
        let handlers = Arc::new(HandlerTable::new());

        let provider = PluginContext::new("provider", router.clone(), Arc::clone(&handlers));
        provider
            .provide_service("echo", |params| async move { Ok(params) })
            .await
            .unwrap();
        assert!(handlers.contains("provider", "echo"));

        let plain = PluginContext::new("plain", router, Arc::clone(&handlers));
        assert!(plain
            .provide_service("echo", |params| async move { Ok(params) })
            .await
            .is_err());
        assert!(!handlers.contains("plain", "echo"));
    }

    #[tokio::test]
    async fn test_ui_rejects_non_ui_kinds() {
        let router = Arc::new(Router::new("app"));
        let ctx = PluginContext::new("p", router, Arc::new(HandlerTable::new()));
        let err = ctx
            .ui(MessageType::Activate, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }
}
