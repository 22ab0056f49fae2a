//! Plugin Store - 비활성화 목록 영속화
//!
//! `plugin-state.json`: `{ "version": 1, "disabled": [ids] }`. 파일이 없으면 아무것도 비활성화되지 않은 상태.

use eterm_foundation::{ExtensionConfig, JsonStore, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PluginStateFile {
    version: u32,

    #[serde(default)]
    disabled: BTreeSet<String>,
}

impl Default for PluginStateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            disabled: BTreeSet::new(),
        }
    }
}

/// 비활성화된 플러그인 ID 집합
#[derive(Debug)]
pub struct PluginStateStore {
    store: JsonStore,
    filename: String,
    state: PluginStateFile,
}

impl PluginStateStore {
    /// 파일을 읽어 연다 (깨진 파일은 경고 후 빈 상태)
    pub fn open(store: JsonStore, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        let state = match store.load_optional::<PluginStateFile>(&filename) {
            Ok(Some(state)) => state,
            Ok(None) => PluginStateFile::default(),
            Err(e) => {
                warn!("Ignoring unreadable plugin state: {}", e);
                PluginStateFile::default()
            }
        };
        debug!("Loaded plugin state ({} disabled)", state.disabled.len());
        Self {
            store,
            filename,
            state,
        }
    }

    /// 경로로 열기 (파일 이름과 상위 디렉토리로 분리)
    pub fn at_path(path: &Path) -> Self {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plugin-state.json".to_string());
        Self::open(JsonStore::new(dir), filename)
    }

    /// 설정의 `stateFile` (상대 경로면 글로벌 설정 디렉토리 기준)
    pub fn from_config(config: &ExtensionConfig) -> Result<Self> {
        let path = Path::new(&config.state_file);
        if path.is_absolute() {
            return Ok(Self::at_path(path));
        }
        let global = JsonStore::global()?;
        Ok(Self::at_path(&global.file_path(&config.state_file)))
    }

    pub fn is_disabled(&self, plugin_id: &str) -> bool {
        self.state.disabled.contains(plugin_id)
    }

    pub fn disabled(&self) -> impl Iterator<Item = &str> {
        self.state.disabled.iter().map(String::as_str)
    }

    /// 비활성화 플래그 변경 후 저장
    pub fn set_disabled(&mut self, plugin_id: &str, disabled: bool) -> Result<()> {
        let changed = if disabled {
            self.state.disabled.insert(plugin_id.to_string())
        } else {
            self.state.disabled.remove(plugin_id)
        };
        if changed {
            self.save()?;
            info!(
                "Plugin {} {}",
                plugin_id,
                if disabled { "disabled" } else { "enabled" }
            );
        }
        Ok(())
    }

    fn save(&self) -> Result<()> {
        self.store.save(&self.filename, &self.state)
    }
}
