//! 앱이 구현하는 UI / 터미널 협력자 인터페이스
//!
//! 코어는 UI 선언이나 UI 제어 payload를 해석하지 않는다. 받은 그대로 넘긴다.

use crate::ipc::MessageType;
use eterm_foundation::Result;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;

/// UI 제어 메시지 하나 (`setTabTitle`, `showBubble`, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct UiCommand {
    pub plugin_id: String,
    pub kind: MessageType,
    pub payload: Map<String, Value>,
}

/// 매니페스트 UI 선언(사이드바 탭, 명령, 메뉴, 독, 패널, 슬롯) 부착/회수
pub trait UiRegistry: Send + Sync {
    fn attach(&self, plugin_id: &str, declarations: &Map<String, Value>) -> Result<()>;

    fn retract(&self, plugin_id: &str);
}

pub trait UiBridge: Send + Sync {
    fn apply(&self, command: UiCommand) -> Result<()>;

    fn update_view_model(&self, plugin_id: &str, view_model: Value) -> Result<()>;
}

pub trait TerminalBridge: Send + Sync {
    fn write_terminal(&self, terminal_id: i64, data: &str) -> Result<()>;
}

/// 코디네이터가 소유하는 협력자 묶음
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn UiRegistry>,
    pub ui: Arc<dyn UiBridge>,
    pub terminal: Arc<dyn TerminalBridge>,
}

impl Collaborators {
    pub fn new(
        registry: Arc<dyn UiRegistry>,
        ui: Arc<dyn UiBridge>,
        terminal: Arc<dyn TerminalBridge>,
    ) -> Self {
        Self {
            registry,
            ui,
            terminal,
        }
    }

    /// 화면 없이 호출만 기록하는 협력자
    pub fn headless() -> (Self, Arc<Headless>) {
        let headless = Arc::new(Headless::default());
        let collaborators = Self::new(
            Arc::clone(&headless) as Arc<dyn UiRegistry>,
            Arc::clone(&headless) as Arc<dyn UiBridge>,
            Arc::clone(&headless) as Arc<dyn TerminalBridge>,
        );
        (collaborators, headless)
    }
}

// ============================================================================
// Headless
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum UiCall {
    Attach {
        plugin_id: String,
        blocks: Vec<String>,
    },
    Retract {
        plugin_id: String,
    },
    Command(UiCommand),
    ViewModel {
        plugin_id: String,
        view_model: Value,
    },
    Terminal {
        terminal_id: i64,
        data: String,
    },
}

/// 호출 기록기 (헤드리스 실행, 진단)
#[derive(Debug, Default)]
pub struct Headless {
    calls: Mutex<Vec<UiCall>>,
}

impl Headless {
    pub fn calls(&self) -> Vec<UiCall> {
        self.calls.lock().clone()
    }

    /// 터미널에 쓰인 데이터만
    pub fn terminal_writes(&self) -> Vec<(i64, String)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                UiCall::Terminal { terminal_id, data } => Some((*terminal_id, data.clone())),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: UiCall) {
        self.calls.lock().push(call);
    }
}

impl UiRegistry for Headless {
    fn attach(&self, plugin_id: &str, declarations: &Map<String, Value>) -> Result<()> {
        let mut blocks: Vec<String> = declarations.keys().cloned().collect();
        blocks.sort();
        self.record(UiCall::Attach {
            plugin_id: plugin_id.to_string(),
            blocks,
        });
        Ok(())
    }

    fn retract(&self, plugin_id: &str) {
        self.record(UiCall::Retract {
            plugin_id: plugin_id.to_string(),
        });
    }
}

impl UiBridge for Headless {
    fn apply(&self, command: UiCommand) -> Result<()> {
        self.record(UiCall::Command(command));
        Ok(())
    }

    fn update_view_model(&self, plugin_id: &str, view_model: Value) -> Result<()> {
        self.record(UiCall::ViewModel {
            plugin_id: plugin_id.to_string(),
            view_model,
        });
        Ok(())
    }
}

impl TerminalBridge for Headless {
    fn write_terminal(&self, terminal_id: i64, data: &str) -> Result<()> {
        self.record(UiCall::Terminal {
            terminal_id,
            data: data.to_string(),
        });
        Ok(())
    }
}
