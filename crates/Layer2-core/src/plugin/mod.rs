//! # Plugin System
//!
//! 확장 플러그인의 발견, 의존성 해석, 활성화, 비활성화
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       PluginLoader                          │
//! │  PluginDiscovery → resolve() → 레이어별 동시 활성화          │
//! │        │                              │                     │
//! │        ▼                              ▼                     │
//! │  PluginManifest            ┌──────────┴──────────┐          │
//! │  PluginStateStore          │ main      isolated  │          │
//! │                            │ Registry  HostLink  │          │
//! │                            └─────────────────────┘          │
//! │  CapabilityChecker · ServiceDirectory · EventHub · UI       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 실행 위치
//!
//! 1. **main**: 앱 프로세스 안에서 `PluginRegistry` 팩토리로 생성
//! 2. **isolated** (기본): Host 프로세스에서 실행, 소켓 너머로 `activate` 요청

mod discovery;
mod events;
mod loader;
mod manifest;
mod registry;
mod resolver;
mod state;
mod store;
mod traits;

pub use discovery::{
    DiscoveredPlugin, DiscoveryFailure, DiscoveryReport, PluginDiscovery, MANIFEST_FILE,
};
pub use events::{EventHub, PublishedEvent};
pub use loader::{LoadReport, LoaderWiring, PluginLoader};
pub use manifest::{
    LoadPriority, PluginDependency, PluginManifest, PluginVersion, RunMode, UI_BLOCKS,
};
pub use registry::{PluginFactory, PluginRegistry};
pub use resolver::{immediate_closure, resolve, LoadPlan};
pub use state::{PluginRuntimeState, PluginStatus};
pub use store::PluginStateStore;
pub use traits::{Plugin, PluginChannel, PluginContext};
