//! Host에 컴파일되어 들어가는 isolated 플러그인
//!
//! 번들의 `manifest.json` id와 같은 이름으로 팩토리를 등록한다.

mod echo;

use echo::{Echo, ECHO_PLUGIN_ID};

use eterm_core::{Plugin, PluginRegistry};
use std::sync::Arc;

/// Host 플러그인 레지스트리
pub fn registry() -> PluginRegistry {
    PluginRegistry::new().with(ECHO_PLUGIN_ID, || Arc::new(Echo::default()) as Arc<dyn Plugin>)
}
