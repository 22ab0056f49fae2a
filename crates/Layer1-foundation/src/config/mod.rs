//! Config - 확장 호스트 설정 관리
//!
//! - `extension.rs` - ExtensionConfig / HostConfig / RestartPolicyConfig

mod extension;

pub use extension::{
    ExtensionConfig, HostConfig, RestartPolicyConfig, ENV_HOST_EXECUTABLE, ENV_HOST_SOCKET,
    ENV_PARENT_PID, ENV_PLUGIN_DEV_DIR, EXTENSION_CONFIG_FILE,
};
