//! Plugin Discovery - 플러그인 번들 발견
//!
//! 번들 = `<dir>/<bundle>/manifest.json`을 가진 디렉토리. 최상위 파일은 무시한다.
//! 디렉토리는 주어진 순서대로(개발 디렉토리 먼저) 스캔하고, 같은 ID는 먼저 발견된 쪽이 이긴다.
//! 파싱 실패는 그 번들만 실패로 기록하고 나머지 발견은 계속한다.

use super::manifest::PluginManifest;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// 번들 안 매니페스트 상대 경로
pub const MANIFEST_FILE: &str = "manifest.json";

// ============================================================================
// DiscoveredPlugin - 발견된 플러그인
// ============================================================================

/// 발견된 플러그인 정보
#[derive(Debug, Clone)]
pub struct DiscoveredPlugin {
    pub manifest: PluginManifest,

    /// 번들 디렉토리 경로 (isolated 활성화 시 Host로 전달)
    pub bundle_path: PathBuf,
}

/// 발견 단계에서 실패한 번들
#[derive(Debug, Clone)]
pub struct DiscoveryFailure {
    /// 매니페스트 ID (파싱 실패면 번들 디렉토리 이름)
    pub id: String,
    pub bundle_path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub plugins: Vec<DiscoveredPlugin>,
    pub failures: Vec<DiscoveryFailure>,
}

// ============================================================================
// PluginDiscovery
// ============================================================================

/// 플러그인 발견 시스템
#[derive(Debug, Clone, Default)]
pub struct PluginDiscovery {
    /// 검색 경로들 (스캔 순서)
    search_paths: Vec<PathBuf>,
}

impl PluginDiscovery {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// 검색 경로 추가
    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.push(path.into());
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// 모든 검색 경로 스캔
    pub async fn discover(&self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        let mut seen: HashSet<String> = HashSet::new();

        for dir in &self.search_paths {
            if !dir.is_dir() {
                debug!("Plugin directory {} does not exist, skipped", dir.display());
                continue;
            }

            let bundles = match Self::bundle_dirs(dir).await {
                Ok(bundles) => bundles,
                Err(e) => {
                    warn!("Failed to scan plugin directory {}: {}", dir.display(), e);
                    continue;
                }
            };

            for bundle in bundles {
                Self::inspect_bundle(bundle, &mut seen, &mut report).await;
            }
        }

        info!(
            "Discovered {} plugins ({} failed)",
            report.plugins.len(),
            report.failures.len()
        );
        report
    }

    /// 매니페스트를 가진 하위 디렉토리 (이름순)
    async fn bundle_dirs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut bundles = Vec::new();
        let mut entries = fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() && path.join(MANIFEST_FILE).is_file() {
                bundles.push(path);
            }
        }

        bundles.sort();
        Ok(bundles)
    }

    async fn inspect_bundle(
        bundle: PathBuf,
        seen: &mut HashSet<String>,
        report: &mut DiscoveryReport,
    ) {
        let manifest_path = bundle.join(MANIFEST_FILE);

        match PluginManifest::from_file(&manifest_path).await {
            Ok(manifest) => {
                if !seen.insert(manifest.id.clone()) {
                    warn!(
                        "Duplicate plugin id {} at {}, ignored",
                        manifest.id,
                        bundle.display()
                    );
                    report.failures.push(DiscoveryFailure {
                        id: manifest.id,
                        bundle_path: bundle,
                        reason: "duplicate plugin id".to_string(),
                    });
                    return;
                }
                debug!("Found plugin {} v{} at {}", manifest.id, manifest.version, bundle.display());
                report.plugins.push(DiscoveredPlugin {
                    manifest,
                    bundle_path: bundle,
                });
            }
            Err(e) => {
                warn!("Failed to load manifest {}: {}", manifest_path.display(), e);
                let id = bundle
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| bundle.display().to_string());
                report.failures.push(DiscoveryFailure {
                    id,
                    bundle_path: bundle,
                    reason: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_bundle(dir: &Path, bundle: &str, manifest: &str) -> PathBuf {
        let path = dir.join(bundle);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(MANIFEST_FILE), manifest).unwrap();
        path
    }

    #[tokio::test]
    async fn test_discover_bundles_and_ignore_loose_files() {
        let dir = TempDir::new().unwrap();
        write_bundle(dir.path(), "a", r#"{"id": "a", "version": "1.0"}"#);
        write_bundle(dir.path(), "b", r#"{"id": "b", "version": "2.0"}"#);
        std::fs::write(dir.path().join("manifest.json"), "{}").unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();

        let report = PluginDiscovery::new(vec![dir.path().to_path_buf()])
            .discover()
            .await;

        let ids: Vec<&str> = report.plugins.iter().map(|p| p.manifest.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(report.failures.is_empty());
        assert_eq!(report.plugins[0].bundle_path, dir.path().join("a"));
    }

    #[tokio::test]
    async fn test_parse_failure_is_isolated() {
        let dir = TempDir::new().unwrap();
        write_bundle(dir.path(), "good", r#"{"id": "good", "version": "1"}"#);
        write_bundle(dir.path(), "broken", r#"{"id": "broken", "version": "#);

        let report = PluginDiscovery::new(vec![dir.path().to_path_buf()])
            .discover()
            .await;

        assert_eq!(report.plugins.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "broken");
    }

    #[tokio::test]
    async fn test_dev_dir_wins_duplicates() {
        let dev = TempDir::new().unwrap();
        let installed = TempDir::new().unwrap();
        write_bundle(dev.path(), "x", r#"{"id": "x", "version": "9.0"}"#);
        write_bundle(installed.path(), "x", r#"{"id": "x", "version": "1.0"}"#);

        let mut discovery = PluginDiscovery::new(vec![dev.path().to_path_buf()]);
        discovery.add_search_path(installed.path());
        discovery.add_search_path(installed.path().join("missing"));
        let report = discovery.discover().await;

        assert_eq!(report.plugins.len(), 1);
        assert_eq!(report.plugins[0].manifest.version.to_string(), "9.0");
        assert_eq!(report.failures[0].reason, "duplicate plugin id");
    }
}
