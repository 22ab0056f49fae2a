//! Message Router - 메시지 타입별 디스패치 테이블
//!
//! 특권 타입(UI 제어, 터미널 쓰기, 서비스 등록/호출)은 핸들러 실행 전에
//! `CapabilityChecker`를 거친다. 거부는 연결을 끊지 않고 고정 코드의 `error` 엔벨로프로 돌려준다.
//!
//! 라우트는 연결을 모른다. 소켓에서 온 메시지(`MessageHandler`)와 같은 프로세스의 main 플러그인이
//! 보낸 메시지(`dispatch`)가 같은 게이트와 테이블을 지난다.

use super::connection::{Connection, MessageHandler};
use super::message::{Envelope, MessageType};
use async_trait::async_trait;
use eterm_foundation::{required_capability, CapabilityChecker, Error, ErrorCode, Result};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

type RouteFn = Arc<dyn Fn(Envelope) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

pub struct Router {
    label: String,
    capabilities: Option<Arc<CapabilityChecker>>,
    routes: HashMap<MessageType, RouteFn>,
}

impl Router {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            capabilities: None,
            routes: HashMap::new(),
        }
    }

    /// 권한 게이트 설치 (없으면 모든 메시지 통과)
    pub fn with_capabilities(mut self, checker: Arc<CapabilityChecker>) -> Self {
        self.capabilities = Some(checker);
        self
    }

    /// 라우트 등록 (같은 타입은 교체)
    ///
    /// 요청 타입이면 `Ok(value)`가 `response` payload가 되고, fire-and-forget 타입이면 버려진다.
    pub fn route<F, Fut>(mut self, kind: MessageType, f: F) -> Self
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.routes
            .insert(kind, Arc::new(move |message| Box::pin(f(message))));
        self
    }

    /// 여러 타입에 같은 핸들러 등록
    pub fn route_all<F, Fut>(mut self, kinds: &[MessageType], f: F) -> Self
    where
        F: Fn(Envelope) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        for kind in kinds {
            self = self.route(*kind, f.clone());
        }
        self
    }

    pub fn handles(&self, kind: MessageType) -> bool {
        self.routes.contains_key(&kind)
    }

    /// 권한 판정
    ///
    /// 호출자가 없는 `serviceCall`은 통과 (호출자가 있을 때만 `service.call` 필요).
    fn authorize(&self, message: &Envelope) -> Result<()> {
        let Some(checker) = &self.capabilities else {
            return Ok(());
        };
        let Some(token) = required_capability(message.kind.as_str()) else {
            return Ok(());
        };
        match message.plugin_id.as_deref() {
            Some(plugin_id) => checker.check_token(plugin_id, token),
            None if message.kind == MessageType::ServiceCall => Ok(()),
            None => Err(Error::UnknownPlugin(format!(
                "{} without pluginId",
                message.kind
            ))),
        }
    }

    /// 게이트 → 라우트 → 응답/에러 엔벨로프
    ///
    /// fire-and-forget 메시지가 성공하면 None.
    pub async fn dispatch(&self, message: Envelope) -> Option<Envelope> {
        let kind = message.kind;

        if let Err(e) = self.authorize(&message) {
            warn!(
                "[{}] {} from {} rejected: {}",
                self.label,
                kind,
                message.plugin_id.as_deref().unwrap_or("<none>"),
                e
            );
            return Some(Envelope::error_from(&message, &e));
        }

        let Some(route) = self.routes.get(&kind).cloned() else {
            if kind.is_request() {
                return Some(Envelope::error_to(
                    &message,
                    ErrorCode::NotImplemented,
                    format!("no handler for {}", kind),
                ));
            }
            debug!("[{}] no route for {}, dropped", self.label, kind);
            return None;
        };

        // 응답 헤더만 보존 (payload는 핸들러로 이동)
        let header = Envelope {
            kind,
            plugin_id: message.plugin_id.clone(),
            correlation_id: message.correlation_id.clone(),
            payload: Map::new(),
        };

        match route(message).await {
            Ok(value) if kind.is_request() => Some(Envelope::response_to(&header, value)),
            Ok(_) => None,
            Err(e) => {
                warn!(
                    "[{}] {} from {} failed: {}",
                    self.label,
                    kind,
                    header.plugin_id.as_deref().unwrap_or("<none>"),
                    e
                );
                Some(Envelope::error_from(&header, &e))
            }
        }
    }
}

#[async_trait]
impl MessageHandler for Router {
    async fn handle(&self, _conn: Arc<Connection>, message: Envelope) -> Option<Envelope> {
        self.dispatch(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::connection::ConnectionOptions;
    use eterm_foundation::capability_tokens as tokens;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Silent;

    #[async_trait]
    impl MessageHandler for Silent {
        async fn handle(&self, _conn: Arc<Connection>, _message: Envelope) -> Option<Envelope> {
            None
        }
    }

    async fn connect(router: Router) -> Arc<Connection> {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let host = Connection::start(a, Arc::new(Silent), ConnectionOptions::new("host"));
        let app = Connection::start(b, Arc::new(router), ConnectionOptions::new("app"));
        host.send_handshake(Envelope::host_handshake()).await.unwrap();
        app.send_handshake(Envelope::app_handshake()).await.unwrap();
        host.wait_for_handshake(Duration::from_secs(1)).await.unwrap();
        app.wait_for_handshake(Duration::from_secs(1)).await.unwrap();
        host
    }

    #[tokio::test]
    async fn test_unrouted_request_not_implemented() {
        let host = connect(Router::new("app")).await;
        let err = host
            .request(Envelope::new(MessageType::CommandInvoke))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
    }

    #[tokio::test]
    async fn test_privileged_request_gated() {
        let checker = Arc::new(CapabilityChecker::new());
        checker.register("granted", [tokens::SERVICE_REGISTER]);
        checker.register("plain", Vec::<String>::new());

        let router = Router::new("app")
            .with_capabilities(Arc::clone(&checker))
            .route(MessageType::RegisterService, |msg| async move {
                Ok(Value::String(msg.require_str("name")?.to_string()))
            });
        let host = connect(router).await;

        let ok = host
            .request(
                Envelope::new(MessageType::RegisterService)
                    .with_plugin("granted")
                    .with("name", "echo"),
            )
            .await
            .unwrap();
        assert_eq!(ok.result_value(), Value::String("echo".into()));

        let denied = host
            .request(
                Envelope::new(MessageType::RegisterService)
                    .with_plugin("plain")
                    .with("name", "echo"),
            )
            .await
            .unwrap_err();
        assert!(matches!(denied, Error::PermissionDenied(_)));

        let unknown = host
            .request(
                Envelope::new(MessageType::RegisterService)
                    .with_plugin("ghost")
                    .with("name", "echo"),
            )
            .await
            .unwrap_err();
        assert!(matches!(unknown, Error::UnknownPlugin(_)));
    }

    #[tokio::test]
    async fn test_denied_ui_control_never_reaches_handler() {
        let checker = Arc::new(CapabilityChecker::new());
        checker.register("a", [tokens::UI_BUBBLE]);

        let writes = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&writes);
        let router = Router::new("app")
            .with_capabilities(checker)
            .route(MessageType::WriteTerminal, move |msg| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push(msg.require_str("data")?.to_string());
                    Ok(Value::Null)
                }
            });
        let host = connect(router).await;

        host.send(
            Envelope::new(MessageType::WriteTerminal)
                .with_plugin("a")
                .with("terminalId", 1)
                .with("data", "rm -rf /\n"),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(writes.lock().is_empty());
    }

    #[tokio::test]
    async fn test_in_process_dispatch_uses_same_gate() {
        let checker = Arc::new(CapabilityChecker::new());
        checker.register("a", [tokens::TERMINAL_WRITE]);
        checker.register("b", Vec::<String>::new());

        let router = Router::new("app")
            .with_capabilities(checker)
            .route(MessageType::WriteTerminal, |_msg| async { Ok(Value::Null) });

        let allowed = router
            .dispatch(Envelope::new(MessageType::WriteTerminal).with_plugin("a"))
            .await;
        assert!(allowed.is_none());

        let denied = router
            .dispatch(Envelope::new(MessageType::WriteTerminal).with_plugin("b"))
            .await
            .unwrap();
        assert_eq!(denied.kind, MessageType::Error);
        assert_eq!(denied.opt_str("code"), Some("PERMISSION_DENIED"));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_error_envelope() {
        let router = Router::new("app").route(MessageType::PluginRequest, |msg| async move {
            msg.require_str("requestType")?;
            Ok(Value::Null)
        });
        let host = connect(router).await;

        let err = host
            .request(Envelope::new(MessageType::PluginRequest).with_plugin("a"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams(_)));
    }
}
