//! Plugin Manifest - 플러그인 메타데이터 정의
//!
//! 번들의 `manifest.json`을 그대로 읽는다. UI 선언 블록은 해석하지 않고 UI 레지스트리로 넘긴다.

use eterm_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::path::Path;

// ============================================================================
// PluginVersion - 점 구분 정수 버전
// ============================================================================

/// 플러그인 버전 (`1`, `1.2`, `1.2.3.4` 모두 허용)
///
/// 비교는 자리별 정수 비교이며, 없는 뒷자리는 0으로 본다 (`1.2` == `1.2.0`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PluginVersion {
    components: Vec<u32>,
}

impl PluginVersion {
    pub fn new(components: impl Into<Vec<u32>>) -> Self {
        Self {
            components: components.into(),
        }
    }

    /// 버전 문자열 파싱 (예: "1.2.3")
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        let components = s
            .split('.')
            .map(|part| part.parse::<u32>().ok())
            .collect::<Option<Vec<_>>>()?;
        Some(Self { components })
    }

    pub fn components(&self) -> &[u32] {
        &self.components
    }

    /// `minimum` 이상인지
    pub fn satisfies(&self, minimum: &PluginVersion) -> bool {
        self >= minimum
    }
}

impl Ord for PluginVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        (0..len)
            .map(|i| {
                let a = self.components.get(i).copied().unwrap_or(0);
                let b = other.components.get(i).copied().unwrap_or(0);
                a.cmp(&b)
            })
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for PluginVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PluginVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PluginVersion {}

impl std::fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.components.iter().map(u32::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

impl std::str::FromStr for PluginVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| Error::Manifest(format!("invalid version '{}'", s)))
    }
}

impl TryFrom<String> for PluginVersion {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PluginVersion> for String {
    fn from(version: PluginVersion) -> Self {
        version.to_string()
    }
}

impl Default for PluginVersion {
    fn default() -> Self {
        Self::new([1, 0, 0])
    }
}

// ============================================================================
// Dependency / RunMode / LoadPriority
// ============================================================================

/// 플러그인 의존성
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginDependency {
    /// 의존하는 플러그인 ID
    pub id: String,

    /// 최소 필요 버전 (없으면 아무 버전)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<PluginVersion>,
}

impl PluginDependency {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            min_version: None,
        }
    }

    pub fn at_least(mut self, version: PluginVersion) -> Self {
        self.min_version = Some(version);
        self
    }

    /// 로드된 버전이 조건을 만족하는지
    pub fn accepts(&self, loaded: &PluginVersion) -> bool {
        self.min_version
            .as_ref()
            .map_or(true, |min| loaded.satisfies(min))
    }
}

/// 실행 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// 앱 프로세스 안에서 실행
    Main,

    /// Host 프로세스에서 실행
    #[default]
    Isolated,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Isolated => write!(f, "isolated"),
        }
    }
}

/// 로드 시점
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPriority {
    /// 앱이 상호작용 가능해지기 전에 로드
    Immediate,

    /// 이후 비동기 로드
    #[default]
    Background,
}

// ============================================================================
// PluginManifest
// ============================================================================

/// UI 선언 블록 이름 (매니페스트 키 그대로)
pub const UI_BLOCKS: [&str; 6] = [
    "sidebarTabs",
    "commands",
    "menuBar",
    "bottomDock",
    "infoPanels",
    "slots",
];

/// 플러그인 매니페스트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// 고유 플러그인 ID (예: "com.eterm.translation")
    pub id: String,

    /// 표시 이름
    #[serde(default)]
    pub name: String,

    pub version: PluginVersion,

    #[serde(default)]
    pub dependencies: Vec<PluginDependency>,

    #[serde(default)]
    pub run_mode: RunMode,

    #[serde(default)]
    pub load_priority: LoadPriority,

    /// 권한 토큰
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// 구독 이벤트 이름
    #[serde(default)]
    pub subscribes: Vec<String>,

    // UI 선언 (불투명)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidebar_tabs: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu_bar: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bottom_dock: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info_panels: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slots: Option<Value>,
}

impl PluginManifest {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: PluginVersion::default(),
            dependencies: Vec::new(),
            run_mode: RunMode::default(),
            load_priority: LoadPriority::default(),
            capabilities: Vec::new(),
            subscribes: Vec::new(),
            sidebar_tabs: None,
            commands: None,
            menu_bar: None,
            bottom_dock: None,
            info_panels: None,
            slots: None,
        }
    }

    /// JSON 파싱 + 검증
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(json)
            .map_err(|e| Error::Manifest(format!("invalid manifest: {}", e)))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json(&content).map_err(|e| match e {
            Error::Manifest(m) => Error::Manifest(format!("{}: {}", path.display(), m)),
            other => other,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Manifest("plugin id must not be empty".to_string()));
        }
        if self.dependencies.iter().any(|d| d.id == self.id) {
            return Err(Error::Manifest(format!("{} depends on itself", self.id)));
        }
        Ok(())
    }

    /// 표시 이름 (없으면 ID)
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn is_isolated(&self) -> bool {
        self.run_mode == RunMode::Isolated
    }

    pub fn dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.id.as_str())
    }

    /// 선언된 UI 블록만 모은 객체 (UI 레지스트리로 그대로 전달)
    pub fn ui_declarations(&self) -> Map<String, Value> {
        let blocks = [
            &self.sidebar_tabs,
            &self.commands,
            &self.menu_bar,
            &self.bottom_dock,
            &self.info_panels,
            &self.slots,
        ];
        UI_BLOCKS
            .iter()
            .zip(blocks)
            .filter_map(|(key, block)| block.clone().map(|v| (key.to_string(), v)))
            .collect()
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn with_version(mut self, version: PluginVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_dependency(mut self, dependency: PluginDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_run_mode(mut self, run_mode: RunMode) -> Self {
        self.run_mode = run_mode;
        self
    }

    pub fn with_priority(mut self, priority: LoadPriority) -> Self {
        self.load_priority = priority;
        self
    }

    pub fn with_capability(mut self, token: impl Into<String>) -> Self {
        self.capabilities.push(token.into());
        self
    }

    pub fn with_subscription(mut self, event: impl Into<String>) -> Self {
        self.subscribes.push(event.into());
        self
    }
}
