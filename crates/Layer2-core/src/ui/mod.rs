//! UI / 터미널 협력자
//!
//! - `bridge`: 앱이 구현하는 `UiRegistry`, `UiBridge`, `TerminalBridge`
//! - `coordinator`: 협력자 호출을 하나의 태스크로 마샬링

mod bridge;
mod coordinator;

pub use bridge::{
    Collaborators, Headless, TerminalBridge, UiBridge, UiCall, UiCommand, UiRegistry,
};
pub use coordinator::Coordinator;
