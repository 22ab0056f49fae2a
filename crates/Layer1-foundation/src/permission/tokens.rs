//! 권한 토큰 정의
//!
//! 각 특권 작업은 정확히 하나의 토큰에 매핑된다. 작업 이름은 IPC 메시지 타입의
//! 와이어 이름(camelCase)과 같다.

pub const TERMINAL_WRITE: &str = "terminal.write";
pub const UI_TAB_DECORATION: &str = "ui.tabDecoration";
pub const UI_TAB_TITLE: &str = "ui.tabTitle";
pub const UI_BOTTOM_DOCK: &str = "ui.bottomDock";
pub const UI_INFO_PANEL: &str = "ui.infoPanel";
pub const UI_BUBBLE: &str = "ui.bubble";
pub const SERVICE_REGISTER: &str = "service.register";
pub const SERVICE_CALL: &str = "service.call";

/// 작업 → 권한 토큰 고정 테이블
const OPERATION_TABLE: &[(&str, &str)] = &[
    ("writeTerminal", TERMINAL_WRITE),
    ("setTabDecoration", UI_TAB_DECORATION),
    ("clearTabDecoration", UI_TAB_DECORATION),
    ("setTabTitle", UI_TAB_TITLE),
    ("clearTabTitle", UI_TAB_TITLE),
    ("showBottomDock", UI_BOTTOM_DOCK),
    ("hideBottomDock", UI_BOTTOM_DOCK),
    ("toggleBottomDock", UI_BOTTOM_DOCK),
    ("showInfoPanel", UI_INFO_PANEL),
    ("hideInfoPanel", UI_INFO_PANEL),
    ("showBubble", UI_BUBBLE),
    ("expandBubble", UI_BUBBLE),
    ("removeBubble", UI_BUBBLE),
    ("registerService", SERVICE_REGISTER),
    ("serviceCall", SERVICE_CALL),
];

/// 작업에 필요한 권한 토큰 (특권 작업이 아니면 None)
pub fn required_capability(operation: &str) -> Option<&'static str> {
    OPERATION_TABLE
        .iter()
        .find(|(op, _)| *op == operation)
        .map(|(_, token)| *token)
}

/// 알려진 모든 토큰
pub fn all() -> Vec<&'static str> {
    let mut tokens: Vec<_> = OPERATION_TABLE.iter().map(|(_, t)| *t).collect();
    tokens.sort_unstable();
    tokens.dedup();
    tokens
}
