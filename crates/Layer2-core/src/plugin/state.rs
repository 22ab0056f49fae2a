//! 플러그인 런타임 상태
//!
//! 상태 전이는 로더만 한다.

use super::manifest::{PluginManifest, RunMode};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "reason")]
pub enum PluginRuntimeState {
    NotLoaded,
    Loaded,

    /// 로드를 시도했지만 실패 (파싱, 번들 없음, 활성화 실패, 순환 의존성)
    Failed(String),

    /// 조건 불충족으로 시도하지 않음 (의존성 없음, 버전 불일치)
    Skipped(String),

    /// 사용자가 비활성화 (재시작 후에도 유지)
    Disabled,
}

impl PluginRuntimeState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Failed(reason) | Self::Skipped(reason) => Some(reason),
            _ => None,
        }
    }
}

impl std::fmt::Display for PluginRuntimeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotLoaded => write!(f, "not-loaded"),
            Self::Loaded => write!(f, "loaded"),
            Self::Failed(reason) => write!(f, "failed({})", reason),
            Self::Skipped(reason) => write!(f, "skipped({})", reason),
            Self::Disabled => write!(f, "disabled"),
        }
    }
}

/// 표시용 플러그인 상태 한 줄
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginStatus {
    pub id: String,
    pub name: String,
    pub version: String,
    pub run_mode: RunMode,
    pub state: PluginRuntimeState,
}

impl PluginStatus {
    pub fn new(manifest: &PluginManifest, state: PluginRuntimeState) -> Self {
        Self {
            id: manifest.id.clone(),
            name: manifest.display_name().to_string(),
            version: manifest.version.to_string(),
            run_mode: manifest.run_mode,
            state,
        }
    }

    /// 매니페스트를 읽지 못한 번들
    pub fn bundle_failure(id: &str, reason: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            version: String::new(),
            run_mode: RunMode::default(),
            state: PluginRuntimeState::Failed(reason.to_string()),
        }
    }
}
