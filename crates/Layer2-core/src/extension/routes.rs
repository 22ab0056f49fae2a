//! 앱 쪽 메시지 라우트
//!
//! Host 연결과 main 플러그인 컨텍스트가 같은 라우터를 쓴다.

use crate::ipc::{MessageType, Router};
use crate::plugin::EventHub;
use crate::service::ServiceDirectory;
use crate::ui::{Coordinator, UiCommand};
use eterm_foundation::{CapabilityChecker, Error};
use serde_json::{json, Value};
use std::sync::Arc;

/// `UiBridge::apply`로 가는 UI 제어 타입 (`writeTerminal` 제외)
pub const UI_COMMANDS: [MessageType; 12] = [
    MessageType::SetTabDecoration,
    MessageType::ClearTabDecoration,
    MessageType::SetTabTitle,
    MessageType::ClearTabTitle,
    MessageType::ShowBottomDock,
    MessageType::HideBottomDock,
    MessageType::ToggleBottomDock,
    MessageType::ShowInfoPanel,
    MessageType::HideInfoPanel,
    MessageType::ShowBubble,
    MessageType::ExpandBubble,
    MessageType::RemoveBubble,
];

/// 권한 게이트가 걸린 앱 라우터
pub fn app_router(
    capabilities: Arc<CapabilityChecker>,
    services: Arc<ServiceDirectory>,
    events: Arc<EventHub>,
    coordinator: Coordinator,
) -> Router {
    let ui = coordinator.clone();
    let terminal = coordinator.clone();
    let view_model = coordinator;
    let register = Arc::clone(&services);

    Router::new("app")
        .with_capabilities(capabilities)
        // UI 제어: payload는 해석하지 않고 그대로 넘긴다
        .route_all(&UI_COMMANDS, move |msg| {
            let coordinator = ui.clone();
            async move {
                let command = UiCommand {
                    plugin_id: msg.require_plugin()?.to_string(),
                    kind: msg.kind,
                    payload: msg.payload,
                };
                coordinator.run(move |c| c.ui.apply(command)).await??;
                Ok(Value::Null)
            }
        })
        .route(MessageType::WriteTerminal, move |msg| {
            let coordinator = terminal.clone();
            async move {
                let terminal_id = msg
                    .get("terminalId")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| Error::InvalidParams("writeTerminal requires 'terminalId'".into()))?;
                let data = msg.require_str("data")?.to_string();
                coordinator
                    .run(move |c| c.terminal.write_terminal(terminal_id, &data))
                    .await??;
                Ok(Value::Null)
            }
        })
        .route(MessageType::UpdateViewModel, move |msg| {
            let coordinator = view_model.clone();
            async move {
                let plugin_id = msg.require_plugin()?.to_string();
                let model = msg.get("viewModel").cloned().unwrap_or(Value::Null);
                coordinator
                    .run(move |c| c.ui.update_view_model(&plugin_id, model))
                    .await??;
                Ok(Value::Null)
            }
        })
        .route(MessageType::Emit, move |msg| {
            let events = Arc::clone(&events);
            async move {
                let event = msg.require_str("event")?;
                let data = msg.get("data").cloned().unwrap_or(Value::Null);
                let delivered = events
                    .publish(event, data, msg.plugin_id.as_deref())
                    .await;
                Ok(json!({ "delivered": delivered }))
            }
        })
        .route(MessageType::ServiceCall, move |msg| {
            let services = Arc::clone(&services);
            async move {
                let target = msg.require_str("targetPluginId")?;
                let service_name = msg.require_str("serviceName")?;
                let params = msg.get("params").cloned().unwrap_or(Value::Null);
                services
                    .call(msg.plugin_id.as_deref(), target, service_name, params)
                    .await
            }
        })
        .route(MessageType::RegisterService, move |msg| {
            let services = Arc::clone(&register);
            async move {
                let entry = services.register(msg.require_plugin()?, msg.require_str("name")?)?;
                Ok(serde_json::to_value(entry)?)
            }
        })
}
