//! Dependency Resolver - 의존성 그래프를 활성화 레이어로
//!
//! Kahn 알고리즘을 레이어 단위로 돌린다. in-degree 0인 노드가 한 레이어가 되고,
//! 같은 레이어는 동시에 활성화해도 된다.
//!
//! - 없는 의존성, 버전 미달 → `skipped` (하위 의존 플러그인도 전이적으로 `skipped`)
//! - 큐가 빈 뒤 남은 노드 → `failed` (순환 또는 순환에 의존)

use super::manifest::{PluginManifest, PluginVersion};
use super::state::PluginRuntimeState;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// 해석 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadPlan {
    /// 활성화 레이어 (레이어 안은 ID 순)
    pub layers: Vec<Vec<String>>,

    /// 활성화하지 않을 플러그인과 그 상태 (`Skipped` / `Failed`)
    pub rejected: BTreeMap<String, PluginRuntimeState>,
}

impl LoadPlan {
    /// 레이어를 펼친 활성화 순서
    pub fn order(&self) -> Vec<String> {
        self.layers.iter().flatten().cloned().collect()
    }

    /// 몇 번째 레이어인지
    pub fn layer_of(&self, id: &str) -> Option<usize> {
        self.layers.iter().position(|layer| layer.iter().any(|p| p == id))
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// 의존성 해석
///
/// `available`은 이번 집합 밖에서 이미 로드된 플러그인의 버전이다
/// (background 로드 시 immediate 플러그인, hot enable 시 기존 플러그인).
pub fn resolve(
    manifests: &[&PluginManifest],
    available: &HashMap<String, PluginVersion>,
) -> LoadPlan {
    let mut plan = LoadPlan::default();
    let by_id: HashMap<&str, &PluginManifest> =
        manifests.iter().map(|m| (m.id.as_str(), *m)).collect();

    // 1. 의존성 충족 검사
    for manifest in manifests {
        if let Some(reason) = unsatisfied(manifest, &by_id, available) {
            warn!("Skipping plugin {}: {}", manifest.id, reason);
            plan.rejected
                .insert(manifest.id.clone(), PluginRuntimeState::Skipped(reason));
        }
    }

    // 2. skipped 전이
    loop {
        let mut changed = false;
        for manifest in manifests {
            if plan.rejected.contains_key(&manifest.id) {
                continue;
            }
            let blocked = manifest
                .dependency_ids()
                .find(|dep| plan.rejected.contains_key(*dep))
                .map(str::to_string);
            if let Some(dep) = blocked {
                warn!("Skipping plugin {}: dependency {} skipped", manifest.id, dep);
                plan.rejected.insert(
                    manifest.id.clone(),
                    PluginRuntimeState::Skipped(format!("dependency {} skipped", dep)),
                );
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // 3. 레이어 Kahn (이번 집합 안의 간선만)
    let candidates: Vec<&PluginManifest> = manifests
        .iter()
        .copied()
        .filter(|m| !plan.rejected.contains_key(&m.id))
        .collect();

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for manifest in &candidates {
        let local_deps: HashSet<&str> = manifest
            .dependency_ids()
            .filter(|dep| by_id.contains_key(dep))
            .collect();
        in_degree.insert(manifest.id.as_str(), local_deps.len());
        for dep in local_deps {
            dependents.entry(dep).or_default().push(manifest.id.as_str());
        }
    }

    let mut remaining: HashSet<&str> = in_degree.keys().copied().collect();
    loop {
        let mut layer: Vec<&str> = remaining
            .iter()
            .filter(|id| in_degree.get(*id).copied() == Some(0))
            .copied()
            .collect();
        if layer.is_empty() {
            break;
        }
        layer.sort_unstable();

        for id in &layer {
            remaining.remove(id);
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree = degree.saturating_sub(1);
                }
            }
        }
        debug!("Load layer {}: {:?}", plan.layers.len(), layer);
        plan.layers
            .push(layer.into_iter().map(str::to_string).collect());
    }

    // 4. 남은 노드 = 순환 (또는 순환에 의존)
    let mut leftovers: Vec<&str> = remaining.into_iter().collect();
    leftovers.sort_unstable();
    let leftover_set: HashSet<&str> = leftovers.iter().copied().collect();
    for id in leftovers {
        let reason = if on_cycle(id, &by_id, &leftover_set) {
            "circular dependency".to_string()
        } else {
            "depends on a circular dependency".to_string()
        };
        warn!("Plugin {} failed: {}", id, reason);
        plan.rejected
            .insert(id.to_string(), PluginRuntimeState::Failed(reason));
    }

    plan
}

/// immediate 플러그인과 그 의존성 (전이적) ID 집합
///
/// immediate 플러그인이 background 플러그인에 의존하면 그 의존성도 immediate 단계로 당겨진다.
pub fn immediate_closure(manifests: &[&PluginManifest]) -> HashSet<String> {
    use super::manifest::LoadPriority;

    let by_id: HashMap<&str, &PluginManifest> =
        manifests.iter().map(|m| (m.id.as_str(), *m)).collect();
    let mut closure = HashSet::new();
    let mut stack: Vec<&str> = manifests
        .iter()
        .filter(|m| m.load_priority == LoadPriority::Immediate)
        .map(|m| m.id.as_str())
        .collect();

    while let Some(id) = stack.pop() {
        if !closure.insert(id.to_string()) {
            continue;
        }
        if let Some(manifest) = by_id.get(id) {
            stack.extend(manifest.dependency_ids().filter(|dep| by_id.contains_key(dep)));
        }
    }
    closure
}

fn unsatisfied(
    manifest: &PluginManifest,
    by_id: &HashMap<&str, &PluginManifest>,
    available: &HashMap<String, PluginVersion>,
) -> Option<String> {
    for dep in &manifest.dependencies {
        let version = by_id
            .get(dep.id.as_str())
            .map(|m| &m.version)
            .or_else(|| available.get(&dep.id));

        match version {
            None => return Some(format!("missing dependency {}", dep.id)),
            Some(version) if !dep.accepts(version) => {
                let required = dep
                    .min_version
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                return Some(format!(
                    "requires {} >= {}, found {}",
                    dep.id, required, version
                ));
            }
            Some(_) => {}
        }
    }
    None
}

/// 남은 노드 사이에서 `start`로 돌아오는 경로가 있는지
fn on_cycle(
    start: &str,
    by_id: &HashMap<&str, &PluginManifest>,
    leftovers: &HashSet<&str>,
) -> bool {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = vec![start];

    while let Some(id) = stack.pop() {
        let Some(manifest) = by_id.get(id) else {
            continue;
        };
        for dep in manifest.dependency_ids() {
            if dep == start {
                return true;
            }
            if leftovers.contains(dep) && visited.insert(dep) {
                stack.push(dep);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::manifest::{LoadPriority, PluginDependency};

    fn v(s: &str) -> PluginVersion {
        PluginVersion::parse(s).unwrap()
    }

    fn plugin(id: &str, version: &str, deps: &[(&str, Option<&str>)]) -> PluginManifest {
        deps.iter().fold(
            PluginManifest::new(id, id).with_version(v(version)),
            |m, (dep, min)| {
                let dependency = match min {
                    Some(min) => PluginDependency::new(*dep).at_least(v(min)),
                    None => PluginDependency::new(*dep),
                };
                m.with_dependency(dependency)
            },
        )
    }

    fn run(manifests: &[PluginManifest]) -> LoadPlan {
        let refs: Vec<&PluginManifest> = manifests.iter().collect();
        resolve(&refs, &HashMap::new())
    }

    #[test]
    fn test_dependent_lands_in_later_layer() {
        let plan = run(&[
            plugin("b", "1.0", &[("a", Some("1.0.0"))]),
            plugin("a", "1.2.0", &[]),
            plugin("c", "1.0", &[]),
        ]);

        assert_eq!(plan.layers, vec![vec!["a", "c"], vec!["b"]]);
        assert!(plan.rejected.is_empty());
    }

    #[test]
    fn test_every_edge_respects_layers() {
        let manifests = vec![
            plugin("app", "1", &[("ui", None), ("net", None)]),
            plugin("ui", "1", &[("core", None)]),
            plugin("net", "1", &[("core", None)]),
            plugin("core", "1", &[]),
            plugin("log", "1", &[]),
        ];
        let plan = run(&manifests);

        for manifest in &manifests {
            for dep in manifest.dependency_ids() {
                assert!(plan.layer_of(dep) < plan.layer_of(&manifest.id));
            }
        }
        assert_eq!(plan.layers.len(), 3);
    }

    #[test]
    fn test_cycle_fails_and_blocks_dependents() {
        let plan = run(&[
            plugin("c", "1", &[("d", None)]),
            plugin("d", "1", &[("c", None)]),
            plugin("e", "1", &[("c", None)]),
            plugin("f", "1", &[]),
        ]);

        assert_eq!(plan.order(), vec!["f"]);
        assert_eq!(
            plan.rejected["c"],
            PluginRuntimeState::Failed("circular dependency".into())
        );
        assert_eq!(
            plan.rejected["d"],
            PluginRuntimeState::Failed("circular dependency".into())
        );
        assert!(matches!(plan.rejected["e"], PluginRuntimeState::Failed(_)));
    }

    #[test]
    fn test_version_mismatch_skips_transitively() {
        let plan = run(&[
            plugin("a", "0.9", &[]),
            plugin("b", "1", &[("a", Some("1.0"))]),
            plugin("c", "1", &[("b", None)]),
        ]);

        assert_eq!(plan.order(), vec!["a"]);
        assert_eq!(
            plan.rejected["b"],
            PluginRuntimeState::Skipped("requires a >= 1.0, found 0.9".into())
        );
        assert_eq!(
            plan.rejected["c"],
            PluginRuntimeState::Skipped("dependency b skipped".into())
        );
    }

    #[test]
    fn test_missing_dependency_skips() {
        let plan = run(&[plugin("b", "1", &[("ghost", None)])]);
        assert!(plan.is_empty());
        assert_eq!(
            plan.rejected["b"],
            PluginRuntimeState::Skipped("missing dependency ghost".into())
        );
    }

    #[test]
    fn test_available_versions_satisfy_external_deps() {
        let manifests = [plugin("b", "1", &[("a", Some("1.1"))])];
        let refs: Vec<&PluginManifest> = manifests.iter().collect();

        let mut available = HashMap::new();
        available.insert("a".to_string(), v("1.1.0"));
        assert_eq!(resolve(&refs, &available).order(), vec!["b"]);

        available.insert("a".to_string(), v("1.0.9"));
        assert!(resolve(&refs, &available).is_empty());
    }

    #[test]
    fn test_immediate_pulls_in_background_deps() {
        let manifests = vec![
            plugin("shell", "1", &[("theme", None)]).with_priority(LoadPriority::Immediate),
            plugin("theme", "1", &[("palette", None)]),
            plugin("palette", "1", &[]),
            plugin("git", "1", &[]),
        ];
        let refs: Vec<&PluginManifest> = manifests.iter().collect();

        let closure = immediate_closure(&refs);
        let mut ids: Vec<&str> = closure.iter().map(String::as_str).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["palette", "shell", "theme"]);
    }
}
