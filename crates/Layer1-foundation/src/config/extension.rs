//! Extension Config - 확장 호스트 설정
//!
//! 글로벌(`~/.config/eterm/extensions.json`) + 프로젝트(`.eterm/extensions.json`) 병합 후
//! 환경 변수 오버라이드를 적용한다.

use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 설정 파일명
pub const EXTENSION_CONFIG_FILE: &str = "extensions.json";

/// 개발용 플러그인 디렉토리 오버라이드
pub const ENV_PLUGIN_DEV_DIR: &str = "ETERM_PLUGIN_DEV_DIR";

/// Host 소켓 경로 오버라이드
pub const ENV_HOST_SOCKET: &str = "ETERM_HOST_SOCKET";

/// Host 실행 파일 오버라이드
pub const ENV_HOST_EXECUTABLE: &str = "ETERM_HOST_EXECUTABLE";

/// Host 프로세스에 전달되는 부모 PID
pub const ENV_PARENT_PID: &str = "ETERM_PARENT_PID";

fn runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(std::env::temp_dir)
}

fn default_socket_path() -> PathBuf {
    runtime_dir().join("eterm-extension-host.sock")
}

fn default_pid_file() -> PathBuf {
    runtime_dir().join("eterm-extension-host.pid")
}

fn default_executable() -> PathBuf {
    PathBuf::from("eterm-host")
}

fn default_activation_timeout_ms() -> u64 {
    10_000
}

fn default_state_file() -> String {
    "plugin-state.json".to_string()
}

// ============================================================================
// Restart Policy
// ============================================================================

/// Host 재시작 정책
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartPolicyConfig {
    /// 윈도우 내 최대 재시작 횟수
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// 카운터 윈도우 (초)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// 재시작 지연 단위 (attempt * base)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_restarts() -> u32 {
    5
}

fn default_window_secs() -> u64 {
    60
}

fn default_base_delay_ms() -> u64 {
    500
}

impl Default for RestartPolicyConfig {
    fn default() -> Self {
        Self {
            max_restarts: default_max_restarts(),
            window_secs: default_window_secs(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RestartPolicyConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

// ============================================================================
// Host Config
// ============================================================================

/// Host 프로세스 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    /// Host 실행 파일
    #[serde(default = "default_executable")]
    pub executable: PathBuf,

    /// 잘 알려진 소켓 경로
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// PID 파일 경로
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    #[serde(default = "default_socket_ready_timeout_ms")]
    pub socket_ready_timeout_ms: u64,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// 연결/accept 실패 시 재시도 간격
    #[serde(default = "default_connect_backoff_ms")]
    pub connect_backoff_ms: u64,

    #[serde(default)]
    pub restart: RestartPolicyConfig,
}

fn default_socket_ready_timeout_ms() -> u64 {
    5_000
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_connect_backoff_ms() -> u64 {
    200
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            socket_path: default_socket_path(),
            pid_file: default_pid_file(),
            socket_ready_timeout_ms: default_socket_ready_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_backoff_ms: default_connect_backoff_ms(),
            restart: RestartPolicyConfig::default(),
        }
    }
}

impl HostConfig {
    /// 소켓/PID 파일을 한 디렉토리 아래에 두는 설정 (테스트, 다중 인스턴스)
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            socket_path: dir.join("host.sock"),
            pid_file: dir.join("host.pid"),
            ..Self::default()
        }
    }

    pub fn socket_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_ready_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    fn merge(&mut self, other: HostConfig) {
        let defaults = HostConfig::default();
        if other.executable != defaults.executable {
            self.executable = other.executable;
        }
        if other.socket_path != defaults.socket_path {
            self.socket_path = other.socket_path;
        }
        if other.pid_file != defaults.pid_file {
            self.pid_file = other.pid_file;
        }
        if other.socket_ready_timeout_ms != defaults.socket_ready_timeout_ms {
            self.socket_ready_timeout_ms = other.socket_ready_timeout_ms;
        }
        if other.handshake_timeout_ms != defaults.handshake_timeout_ms {
            self.handshake_timeout_ms = other.handshake_timeout_ms;
        }
        if other.request_timeout_ms != defaults.request_timeout_ms {
            self.request_timeout_ms = other.request_timeout_ms;
        }
        if other.connect_backoff_ms != defaults.connect_backoff_ms {
            self.connect_backoff_ms = other.connect_backoff_ms;
        }
        if other.restart != defaults.restart {
            self.restart = other.restart;
        }
    }
}

// ============================================================================
// Extension Config (통합)
// ============================================================================

/// 확장 호스트 통합 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionConfig {
    /// 플러그인 번들 검색 디렉토리
    #[serde(default)]
    pub plugin_dirs: Vec<PathBuf>,

    /// 개발용 디렉토리 (가장 먼저 스캔)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev_plugin_dir: Option<PathBuf>,

    /// 비활성화 목록 파일 경로 (상대 경로면 글로벌 설정 디렉토리 기준)
    #[serde(default = "default_state_file")]
    pub state_file: String,

    /// 플러그인 하나의 활성화 제한 시간
    #[serde(default = "default_activation_timeout_ms")]
    pub activation_timeout_ms: u64,

    #[serde(default)]
    pub host: HostConfig,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            plugin_dirs: Vec::new(),
            dev_plugin_dir: None,
            state_file: default_state_file(),
            activation_timeout_ms: default_activation_timeout_ms(),
            host: HostConfig::default(),
        }
    }
}

impl ExtensionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 + 프로젝트 병합 로드 후 환경 변수 적용
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        if let Ok(global) = JsonStore::global() {
            if let Some(global_config) =
                global.load_optional::<ExtensionConfig>(EXTENSION_CONFIG_FILE)?
            {
                config.merge(global_config);
            }
        }

        if let Ok(project) = JsonStore::current_project() {
            if let Some(project_config) =
                project.load_optional::<ExtensionConfig>(EXTENSION_CONFIG_FILE)?
            {
                config.merge(project_config);
            }
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// 특정 저장소에서만 로드
    pub fn load_from(store: &JsonStore) -> Result<Self> {
        Ok(store
            .load_optional::<ExtensionConfig>(EXTENSION_CONFIG_FILE)?
            .unwrap_or_default())
    }

    /// 글로벌 설정 저장
    pub fn save_global(&self) -> Result<()> {
        let store = JsonStore::global()?;
        store.save(EXTENSION_CONFIG_FILE, self)
    }

    /// 다른 설정을 덮어쓰기 병합 (디렉토리 목록은 누적)
    pub fn merge(&mut self, other: ExtensionConfig) {
        for dir in other.plugin_dirs {
            if !self.plugin_dirs.contains(&dir) {
                self.plugin_dirs.push(dir);
            }
        }
        if other.dev_plugin_dir.is_some() {
            self.dev_plugin_dir = other.dev_plugin_dir;
        }
        if other.state_file != default_state_file() {
            self.state_file = other.state_file;
        }
        if other.activation_timeout_ms != default_activation_timeout_ms() {
            self.activation_timeout_ms = other.activation_timeout_ms;
        }
        self.host.merge(other.host);
    }

    /// 환경 변수 오버라이드
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_PLUGIN_DEV_DIR).filter(|v| !v.is_empty()) {
            self.dev_plugin_dir = Some(PathBuf::from(dir));
        }
        if let Some(socket) = lookup(ENV_HOST_SOCKET).filter(|v| !v.is_empty()) {
            self.host.socket_path = PathBuf::from(socket);
        }
        if let Some(exe) = lookup(ENV_HOST_EXECUTABLE).filter(|v| !v.is_empty()) {
            self.host.executable = PathBuf::from(exe);
        }
    }

    /// 스캔 순서대로 정렬된 플러그인 디렉토리 (개발 디렉토리 우선)
    pub fn scan_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = Vec::with_capacity(self.plugin_dirs.len() + 1);
        if let Some(dev) = &self.dev_plugin_dir {
            dirs.push(dev.clone());
        }
        for dir in &self.plugin_dirs {
            if !dirs.contains(dir) {
                dirs.push(dir.clone());
            }
        }
        dirs
    }

    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation_timeout_ms)
    }

    // ========================================================================
    // Builder
    // ========================================================================

    pub fn plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugin_dirs.push(dir.into());
        self
    }

    pub fn dev_plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dev_plugin_dir = Some(dir.into());
        self
    }

    pub fn host(mut self, host: HostConfig) -> Self {
        self.host = host;
        self
    }
}
