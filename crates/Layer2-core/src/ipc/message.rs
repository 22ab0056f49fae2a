//! IPC 메시지 엔벨로프
//!
//! 와이어 포맷: `{type, pluginId?, correlationId?, payload}` (camelCase JSON)

use eterm_foundation::{Error, ErrorCode, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 프로토콜 버전 (handshake payload에 실림)
pub const PROTOCOL_VERSION: u32 = 1;

// ============================================================================
// MessageType - 닫힌 메시지 타입 집합
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    // 연결
    Handshake,

    // 요청 (response/error 응답 필요)
    Activate,
    Deactivate,
    CommandInvoke,
    PluginRequest,
    ServiceCall,
    RegisterService,

    // 뷰 모델
    UpdateViewModel,

    // UI 제어
    SetTabDecoration,
    ClearTabDecoration,
    SetTabTitle,
    ClearTabTitle,
    WriteTerminal,
    ShowBottomDock,
    HideBottomDock,
    ToggleBottomDock,
    ShowInfoPanel,
    HideInfoPanel,
    ShowBubble,
    ExpandBubble,
    RemoveBubble,

    // 이벤트
    Emit,
    Event,

    // 응답
    Response,
    Error,
}

impl MessageType {
    /// 와이어 이름 (권한 테이블의 작업 이름과 동일)
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::CommandInvoke => "commandInvoke",
            Self::PluginRequest => "pluginRequest",
            Self::ServiceCall => "serviceCall",
            Self::RegisterService => "registerService",
            Self::UpdateViewModel => "updateViewModel",
            Self::SetTabDecoration => "setTabDecoration",
            Self::ClearTabDecoration => "clearTabDecoration",
            Self::SetTabTitle => "setTabTitle",
            Self::ClearTabTitle => "clearTabTitle",
            Self::WriteTerminal => "writeTerminal",
            Self::ShowBottomDock => "showBottomDock",
            Self::HideBottomDock => "hideBottomDock",
            Self::ToggleBottomDock => "toggleBottomDock",
            Self::ShowInfoPanel => "showInfoPanel",
            Self::HideInfoPanel => "hideInfoPanel",
            Self::ShowBubble => "showBubble",
            Self::ExpandBubble => "expandBubble",
            Self::RemoveBubble => "removeBubble",
            Self::Emit => "emit",
            Self::Event => "event",
            Self::Response => "response",
            Self::Error => "error",
        }
    }

    /// response/error 응답이 필요한 요청 타입
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Self::Activate
                | Self::Deactivate
                | Self::CommandInvoke
                | Self::PluginRequest
                | Self::ServiceCall
                | Self::RegisterService
        )
    }

    /// 응답 타입
    pub fn is_reply(self) -> bool {
        matches!(self, Self::Response | Self::Error)
    }

    /// UI 제어 타입 (모두 fire-and-forget)
    pub fn is_ui_control(self) -> bool {
        matches!(
            self,
            Self::SetTabDecoration
                | Self::ClearTabDecoration
                | Self::SetTabTitle
                | Self::ClearTabTitle
                | Self::WriteTerminal
                | Self::ShowBottomDock
                | Self::HideBottomDock
                | Self::ToggleBottomDock
                | Self::ShowInfoPanel
                | Self::HideInfoPanel
                | Self::ShowBubble
                | Self::ExpandBubble
                | Self::RemoveBubble
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// IPC 메시지 엔벨로프
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            plugin_id: None,
            correlation_id: None,
            payload: Map::new(),
        }
    }

    /// 앱 측 handshake: `{protocolVersion, appPid}`
    pub fn app_handshake() -> Self {
        Self::new(MessageType::Handshake)
            .with("protocolVersion", PROTOCOL_VERSION)
            .with("appPid", std::process::id())
    }

    /// Host 측 handshake: `{protocolVersion, hostPid}`
    pub fn host_handshake() -> Self {
        Self::new(MessageType::Handshake)
            .with("protocolVersion", PROTOCOL_VERSION)
            .with("hostPid", std::process::id())
    }

    /// 빌더: 플러그인 ID
    pub fn with_plugin(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin_id = Some(plugin_id.into());
        self
    }

    /// 빌더: payload 필드 추가
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// 빌더: payload 통째로 교체 (객체가 아니면 `result` 키 아래로)
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = into_map(payload);
        self
    }

    /// 요청에 대한 성공 응답
    pub fn response_to(request: &Envelope, result: Value) -> Self {
        Self {
            kind: MessageType::Response,
            plugin_id: request.plugin_id.clone(),
            correlation_id: request.correlation_id.clone(),
            payload: into_map(result),
        }
    }

    /// 요청에 대한 에러 응답
    pub fn error_to(request: &Envelope, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind: MessageType::Error,
            plugin_id: request.plugin_id.clone(),
            correlation_id: request.correlation_id.clone(),
            payload: error_payload(code.as_str(), &message.into()),
        }
    }

    /// 에러 타입을 그대로 와이어 에러로
    pub fn error_from(request: &Envelope, error: &Error) -> Self {
        Self::error_to(request, error.code(), error.wire_message())
    }

    // ========================================================================
    // Payload 접근
    // ========================================================================

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// 필수 문자열 파라미터 (없으면 INVALID_PARAMS)
    pub fn require_str(&self, key: &str) -> Result<&str> {
        self.payload
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidParams(format!("{} requires '{}'", self.kind, key)))
    }

    /// 선택 문자열 파라미터
    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// 필수 pluginId
    pub fn require_plugin(&self) -> Result<&str> {
        self.plugin_id
            .as_deref()
            .ok_or_else(|| Error::InvalidParams(format!("{} requires pluginId", self.kind)))
    }

    /// payload를 Value 객체로
    pub fn payload_value(&self) -> Value {
        Value::Object(self.payload.clone())
    }

    /// `result` 키가 있으면 그 값, 없으면 payload 전체
    pub fn result_value(&self) -> Value {
        match self.payload.get("result") {
            Some(v) if self.payload.len() == 1 => v.clone(),
            _ => self.payload_value(),
        }
    }

    /// error 엔벨로프면 타입 있는 에러로 변환
    pub fn into_result(self) -> Result<Envelope> {
        if self.kind != MessageType::Error {
            return Ok(self);
        }
        let code = self
            .payload
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or(ErrorCode::InternalError.as_str())
            .to_string();
        let message = self
            .payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Err(Error::from_wire(&code, message))
    }
}

fn error_payload(code: &str, message: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("code".to_string(), Value::String(code.to_string()));
    map.insert("message".to_string(), Value::String(message.to_string()));
    map
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    }
}
