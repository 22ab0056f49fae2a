//! # eterm-foundation
//!
//! Foundation layer for the ETerm extension host:
//! - Error: 에러 분류와 IPC 와이어 에러 코드
//! - Permission: 권한 토큰 테이블 + CapabilityChecker
//! - Storage: JsonStore (설정, 플러그인 상태 파일)
//! - Config: ExtensionConfig / HostConfig
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  eterm-core (Loader / Supervisor / Transport / Services) │
//! │                     │                                   │
//! │          ┌──────────┼──────────┐                        │
//! │          ▼          ▼          ▼                        │
//! │   CapabilityChecker  Config   JsonStore                 │
//! │                     │                                   │
//! │                 Error / ErrorCode                       │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod permission;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, ErrorCode, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{
    ExtensionConfig, HostConfig, RestartPolicyConfig, ENV_HOST_EXECUTABLE, ENV_HOST_SOCKET,
    ENV_PARENT_PID, ENV_PLUGIN_DEV_DIR, EXTENSION_CONFIG_FILE,
};

// ============================================================================
// Permission (권한 시스템)
// ============================================================================
pub use permission::{required_capability, tokens as capability_tokens, CapabilityChecker};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::JsonStore;
