//! eterm-core: Extension Host Core for ETerm
//!
//! Layer2 - 앱과 Host 프로세스 사이의 확장 서브시스템
//!
//! # 주요 모듈
//!
//! - `ipc`: 길이 프레이밍 소켓 전송, 요청/응답 상관, 권한 게이트 라우터
//! - `host`: Host Supervisor (감지/시작/재시작), Host 측 플러그인 런타임
//! - `plugin`: 매니페스트, 발견, 의존성 해석, 로더, 이벤트 허브
//! - `service`: 플러그인 간 서비스 디렉토리와 `core` 네임스페이스
//! - `ui`: 앱이 구현하는 UI/터미널 협력자와 코디네이터
//! - `extension`: 위 구성요소를 조립한 `ExtensionHost`
//!
//! # 사용 예시
//!
//! ```ignore
//! use eterm_core::{ExtensionHost, PluginRegistry};
//! use eterm_foundation::ExtensionConfig;
//!
//! let host = ExtensionHost::builder(ExtensionConfig::load()?)
//!     .plugins(PluginRegistry::new().with("com.eterm.clock", || Arc::new(Clock::default())))
//!     .build()?;
//!
//! // immediate 플러그인 로드, background는 별도 태스크
//! let (report, background) = host.start().await;
//!
//! // 명령 실행 (main이면 직접, isolated면 Host로)
//! host.invoke_command("com.eterm.clock", "now", json!({})).await?;
//!
//! host.shutdown().await;
//! ```

pub mod host;
pub mod ipc;
pub mod plugin;
pub mod service;
pub mod ui;

#[cfg(unix)]
pub mod extension;

// Re-exports: IPC
pub use ipc::{Connection, ConnectionOptions, Envelope, HostLink, MessageHandler, MessageType, Router};

// Re-exports: Host
pub use host::{EmbeddedLauncher, HostLauncher, HostRuntime, ProcessLauncher};
#[cfg(unix)]
pub use host::{HostProcessState, HostSupervisor};

// Re-exports: Plugin
pub use plugin::{
    EventHub, LoadPriority, Plugin, PluginContext, PluginLoader, PluginManifest, PluginRegistry,
    PluginRuntimeState, PluginStatus, PluginVersion, RunMode,
};

// Re-exports: Service
pub use service::{CoreServices, ServiceDirectory};

// Re-exports: UI
pub use ui::{Collaborators, Coordinator, TerminalBridge, UiBridge, UiRegistry};

// Re-exports: Extension
#[cfg(unix)]
pub use extension::{ExtensionHost, ExtensionHostBuilder};
