//! Plugin Loader - 발견부터 활성화, 비활성화까지
//!
//! 로더의 모든 진입점은 하나의 상태 잠금으로 직렬화된다. 잠금을 쥔 채 활성화를 기다리지만,
//! 활성화 경로(라우터, 서비스 디렉토리, Host 연결)는 로더를 다시 부르지 않는다.
//!
//! ## 로드 순서
//!
//! 1. `discover`: 번들 스캔, 비활성화 목록 반영
//! 2. `load_immediate`: immediate 플러그인 + 그 의존성 (background 의존성도 끌어온다)
//! 3. `load_background`: 나머지
//!
//! 각 단계에서 `resolve()`가 만든 레이어를 순서대로, 레이어 안은 동시에 활성화한다.

use super::discovery::{DiscoveryFailure, PluginDiscovery};
use super::events::EventHub;
use super::manifest::{PluginManifest, PluginVersion, RunMode};
use super::registry::PluginRegistry;
use super::resolver::{immediate_closure, resolve};
use super::state::{PluginRuntimeState, PluginStatus};
use super::store::PluginStateStore;
use super::traits::{Plugin, PluginChannel, PluginContext};
use crate::ipc::{Envelope, HostLink, MessageType};
use crate::service::ServiceDirectory;
use crate::ui::Coordinator;
use eterm_foundation::{CapabilityChecker, Error, ExtensionConfig, Result};
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// ============================================================================
// Wiring
// ============================================================================

/// 로더가 활성화 중에 건드리는 공유 구성요소
#[derive(Clone)]
pub struct LoaderWiring {
    pub capabilities: Arc<CapabilityChecker>,
    pub services: Arc<ServiceDirectory>,
    pub events: Arc<EventHub>,
    pub coordinator: Coordinator,

    /// isolated 플러그인 경로
    pub host: Arc<dyn HostLink>,

    /// main 플러그인 컨텍스트가 쓰는 앱 라우터
    pub app_channel: Arc<dyn PluginChannel>,
}

/// 한 번의 로드 단계 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// 활성화 순서
    pub loaded: Vec<String>,
    pub rejected: BTreeMap<String, PluginRuntimeState>,
}

impl LoadReport {
    fn merge(&mut self, other: LoadReport) {
        self.loaded.extend(other.loaded);
        self.rejected.extend(other.rejected);
    }
}

struct PluginRecord {
    manifest: PluginManifest,
    bundle_path: PathBuf,
    state: PluginRuntimeState,

    /// main 플러그인 인스턴스 (isolated는 Host에 있다)
    instance: Option<Arc<dyn Plugin>>,
}

struct LoaderState {
    records: BTreeMap<String, PluginRecord>,
    bundle_failures: Vec<DiscoveryFailure>,

    /// 로드된 플러그인의 활성화 순서
    activation_order: Vec<String>,

    store: PluginStateStore,
}

// ============================================================================
// PluginLoader
// ============================================================================

pub struct PluginLoader {
    discovery: PluginDiscovery,
    activation_timeout: Duration,
    registry: PluginRegistry,
    wiring: LoaderWiring,
    state: Mutex<LoaderState>,

    /// `deactivate_all` 이후에는 아무것도 로드하지 않는다
    shut_down: AtomicBool,
}

impl PluginLoader {
    pub fn new(
        config: &ExtensionConfig,
        store: PluginStateStore,
        registry: PluginRegistry,
        wiring: LoaderWiring,
    ) -> Self {
        Self {
            discovery: PluginDiscovery::new(config.scan_dirs()),
            activation_timeout: config.activation_timeout(),
            registry,
            wiring,
            state: Mutex::new(LoaderState {
                records: BTreeMap::new(),
                bundle_failures: Vec::new(),
                activation_order: Vec::new(),
                store,
            }),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// 번들 스캔. 로드된 플러그인은 그대로 두고 나머지는 새로 읽은 매니페스트로 교체한다.
    pub async fn discover(&self) -> usize {
        let report = self.discovery.discover().await;
        let mut state = self.state.lock().await;
        state.bundle_failures = report.failures;

        let mut added = 0;
        for found in report.plugins {
            let id = found.manifest.id.clone();
            if state.records.get(&id).is_some_and(|r| r.state.is_loaded()) {
                continue;
            }
            let initial = if state.store.is_disabled(&id) {
                PluginRuntimeState::Disabled
            } else {
                PluginRuntimeState::NotLoaded
            };
            state.records.insert(
                id,
                PluginRecord {
                    manifest: found.manifest,
                    bundle_path: found.bundle_path,
                    state: initial,
                    instance: None,
                },
            );
            added += 1;
        }

        info!(
            "Discovered {} plugins ({} bundle failures)",
            added,
            state.bundle_failures.len()
        );
        added
    }

    /// 번들 없이 매니페스트를 직접 등록 (앱에 내장된 main 플러그인)
    pub async fn register_manifest(
        &self,
        manifest: PluginManifest,
        bundle_path: impl Into<PathBuf>,
    ) -> Result<()> {
        manifest.validate()?;
        let mut state = self.state.lock().await;
        if state
            .records
            .get(&manifest.id)
            .is_some_and(|r| r.state.is_loaded())
        {
            return Err(Error::Plugin(format!("{} is already loaded", manifest.id)));
        }
        let initial = if state.store.is_disabled(&manifest.id) {
            PluginRuntimeState::Disabled
        } else {
            PluginRuntimeState::NotLoaded
        };
        state.records.insert(
            manifest.id.clone(),
            PluginRecord {
                manifest,
                bundle_path: bundle_path.into(),
                state: initial,
                instance: None,
            },
        );
        Ok(())
    }

    // ========================================================================
    // Loading
    // ========================================================================

    /// immediate 플러그인과 그 의존성 클로저
    pub async fn load_immediate(&self) -> LoadReport {
        let mut state = self.state.lock().await;
        let pending = pending_ids(&state);
        let tier = {
            let manifests: Vec<&PluginManifest> = pending
                .iter()
                .filter_map(|id| state.records.get(id))
                .map(|r| &r.manifest)
                .collect();
            immediate_closure(&manifests)
        };
        let ids: Vec<String> = pending.into_iter().filter(|id| tier.contains(id)).collect();
        info!("Loading {} immediate plugins", ids.len());
        self.load_set(&mut state, ids).await
    }

    /// 아직 로드하지 않은 나머지 전부
    pub async fn load_background(&self) -> LoadReport {
        let mut state = self.state.lock().await;
        let ids = pending_ids(&state);
        info!("Loading {} background plugins", ids.len());
        self.load_set(&mut state, ids).await
    }

    /// background 단계를 별도 태스크로
    pub fn spawn_background(self: &Arc<Self>) -> JoinHandle<LoadReport> {
        let loader = Arc::clone(self);
        tokio::spawn(async move { loader.load_background().await })
    }

    /// discover → immediate → background
    pub async fn load_all(&self) -> LoadReport {
        self.discover().await;
        let mut report = self.load_immediate().await;
        report.merge(self.load_background().await);
        report
    }

    async fn load_set(&self, state: &mut LoaderState, ids: Vec<String>) -> LoadReport {
        let mut report = LoadReport::default();
        if ids.is_empty() {
            return report;
        }
        if self.is_shut_down() {
            debug!("Loader shut down, skipping {} plugins", ids.len());
            return report;
        }

        let plan = {
            let manifests: Vec<&PluginManifest> = ids
                .iter()
                .filter_map(|id| state.records.get(id))
                .map(|r| &r.manifest)
                .collect();
            let available: HashMap<String, PluginVersion> = state
                .records
                .iter()
                .filter(|(_, r)| r.state.is_loaded())
                .map(|(id, r)| (id.clone(), r.manifest.version.clone()))
                .collect();
            resolve(&manifests, &available)
        };

        for (id, rejected) in plan.rejected {
            if let Some(record) = state.records.get_mut(&id) {
                record.state = rejected.clone();
            }
            report.rejected.insert(id, rejected);
        }

        for (index, layer) in plan.layers.into_iter().enumerate() {
            let mut ready = Vec::with_capacity(layer.len());
            for id in layer {
                let Some(record) = state.records.get(&id) else {
                    continue;
                };
                // 앞 레이어에서 실패한 의존성
                let blocked = record
                    .manifest
                    .dependency_ids()
                    .find(|dep| !state.records.get(*dep).is_some_and(|r| r.state.is_loaded()))
                    .map(str::to_string);
                match blocked {
                    Some(dep) => {
                        let skipped =
                            PluginRuntimeState::Skipped(format!("dependency {} not loaded", dep));
                        warn!("Skipping plugin {}: dependency {} not loaded", id, dep);
                        if let Some(record) = state.records.get_mut(&id) {
                            record.state = skipped.clone();
                        }
                        report.rejected.insert(id, skipped);
                    }
                    None => ready.push((id, record.manifest.clone(), record.bundle_path.clone())),
                }
            }

            debug!("Activating layer {} ({} plugins)", index, ready.len());
            let results = join_all(
                ready
                    .iter()
                    .map(|(id, manifest, path)| self.activate(id, manifest, path)),
            )
            .await;

            for ((id, _, _), result) in ready.into_iter().zip(results) {
                let Some(record) = state.records.get_mut(&id) else {
                    continue;
                };
                match result {
                    Ok(instance) => {
                        record.state = PluginRuntimeState::Loaded;
                        record.instance = instance;
                        state.activation_order.push(id.clone());
                        report.loaded.push(id);
                    }
                    Err(e) => {
                        error!("Failed to activate plugin {}: {}", id, e);
                        let failed = PluginRuntimeState::Failed(e.to_string());
                        record.state = failed.clone();
                        report.rejected.insert(id, failed);
                    }
                }
            }
        }

        info!(
            "Loaded {} plugins, {} rejected",
            report.loaded.len(),
            report.rejected.len()
        );
        report
    }

    // ========================================================================
    // Activation
    // ========================================================================

    /// 권한/서비스 등록 → 활성화 (제한 시간) → 이벤트 구독, UI 부착
    ///
    /// 실패하면 등록한 것을 모두 되돌린다.
    async fn activate(
        &self,
        plugin_id: &str,
        manifest: &PluginManifest,
        bundle_path: &Path,
    ) -> Result<Option<Arc<dyn Plugin>>> {
        let wiring = &self.wiring;
        wiring
            .capabilities
            .register(plugin_id, manifest.capabilities.iter().cloned());
        wiring.services.register_plugin(plugin_id, manifest.run_mode);

        let started = tokio::time::timeout(
            self.activation_timeout,
            self.start_instance(plugin_id, manifest, bundle_path),
        )
        .await
        .unwrap_or_else(|_| {
            Err(Error::Timeout(format!(
                "activation of {} exceeded {:?}",
                plugin_id, self.activation_timeout
            )))
        });

        let instance = match started {
            Ok(instance) => instance,
            Err(e) => {
                self.release(plugin_id);
                return Err(e);
            }
        };

        match &instance {
            Some(plugin) => {
                wiring
                    .events
                    .subscribe_local(plugin_id, &manifest.subscribes, Arc::clone(plugin))
            }
            None => wiring.events.subscribe_remote(plugin_id, &manifest.subscribes),
        }
        self.attach_ui(plugin_id, manifest).await;

        info!(
            "Plugin {} v{} activated ({})",
            plugin_id, manifest.version, manifest.run_mode
        );
        Ok(instance)
    }

    async fn start_instance(
        &self,
        plugin_id: &str,
        manifest: &PluginManifest,
        bundle_path: &Path,
    ) -> Result<Option<Arc<dyn Plugin>>> {
        match manifest.run_mode {
            RunMode::Main => {
                let plugin = self.registry.create(plugin_id).ok_or_else(|| {
                    Error::Plugin(format!("no entry point registered for {}", plugin_id))
                })?;
                let ctx = PluginContext::new(
                    plugin_id,
                    Arc::clone(&self.wiring.app_channel),
                    Arc::clone(self.wiring.services.handlers()),
                );
                plugin.activate(ctx).await?;
                Ok(Some(plugin))
            }
            RunMode::Isolated => {
                self.activate_isolated(plugin_id, manifest, bundle_path)
                    .await?;
                Ok(None)
            }
        }
    }

    async fn activate_isolated(
        &self,
        plugin_id: &str,
        manifest: &PluginManifest,
        bundle_path: &Path,
    ) -> Result<()> {
        if !bundle_path.is_dir() {
            return Err(Error::Plugin(format!(
                "bundle {} not found",
                bundle_path.display()
            )));
        }
        self.wiring.host.ensure_ready().await?;

        let message = Envelope::new(MessageType::Activate)
            .with_plugin(plugin_id)
            .with("bundlePath", bundle_path.to_string_lossy().into_owned())
            .with("manifest", serde_json::to_value(manifest)?);
        self.wiring
            .host
            .request_with_timeout(message, self.activation_timeout)
            .await?;
        Ok(())
    }

    async fn attach_ui(&self, plugin_id: &str, manifest: &PluginManifest) {
        let declarations = manifest.ui_declarations();
        if declarations.is_empty() {
            return;
        }
        let owner = plugin_id.to_string();
        let attached = self
            .wiring
            .coordinator
            .run(move |c| c.registry.attach(&owner, &declarations))
            .await;
        match attached {
            Ok(Ok(())) => debug!("Attached UI of {}", plugin_id),
            Ok(Err(e)) | Err(e) => warn!("Failed to attach UI of {}: {}", plugin_id, e),
        }
    }

    /// 권한, 서비스, 구독 해제
    fn release(&self, plugin_id: &str) {
        self.wiring.capabilities.unregister(plugin_id);
        self.wiring.services.unregister_plugin(plugin_id);
        self.wiring.events.unsubscribe(plugin_id);
    }

    // ========================================================================
    // Unloading
    // ========================================================================

    /// 로드된 플러그인 하나를 내린다 (상태는 `NotLoaded`)
    async fn unload(&self, state: &mut LoaderState, plugin_id: &str) -> bool {
        let Some(record) = state.records.get_mut(plugin_id) else {
            return false;
        };
        if !record.state.is_loaded() {
            return false;
        }
        let instance = record.instance.take();
        let isolated = record.manifest.is_isolated();
        record.state = PluginRuntimeState::NotLoaded;
        state.activation_order.retain(|id| id != plugin_id);

        let owner = plugin_id.to_string();
        if let Err(e) = self
            .wiring
            .coordinator
            .run(move |c| c.registry.retract(&owner))
            .await
        {
            warn!("Failed to retract UI of {}: {}", plugin_id, e);
        }

        match instance {
            Some(plugin) => {
                if let Err(e) = plugin.deactivate().await {
                    warn!("Plugin {} deactivate failed: {}", plugin_id, e);
                }
            }
            None if isolated && self.wiring.host.is_connected() => {
                let message = Envelope::new(MessageType::Deactivate).with_plugin(plugin_id);
                if let Err(e) = self.wiring.host.request(message).await {
                    warn!("Host deactivate of {} failed: {}", plugin_id, e);
                }
            }
            None => {}
        }

        self.release(plugin_id);
        info!("Plugin {} unloaded", plugin_id);
        true
    }

    /// 전부 역순으로 비활성화 (앱 종료)
    ///
    /// 이후의 로드 요청 (진행 중이던 background 단계 포함)은 아무것도 하지 않는다.
    pub async fn deactivate_all(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        let order: Vec<String> = state.activation_order.iter().rev().cloned().collect();
        for id in &order {
            self.unload(&mut state, id).await;
        }
        info!("Deactivated {} plugins", order.len());
    }

    // ========================================================================
    // Enable / Disable
    // ========================================================================

    /// 플러그인 활성화. 비활성화된 의존성을 먼저 켠다.
    pub async fn enable(&self, plugin_id: &str) -> Result<()> {
        if self.is_shut_down() {
            return Err(Error::Plugin(format!(
                "{} cannot be enabled after shutdown",
                plugin_id
            )));
        }
        let mut state = self.state.lock().await;
        let Some(record) = state.records.get(plugin_id) else {
            return Err(Error::NotFound(format!("plugin {}", plugin_id)));
        };
        if record.state.is_loaded() {
            return Ok(());
        }

        let chain = enable_chain(&state.records, plugin_id);
        for id in &chain {
            state.store.set_disabled(id, false)?;
            if let Some(record) = state.records.get_mut(id) {
                record.state = PluginRuntimeState::NotLoaded;
            }
        }
        debug!("Enabling {} with {:?}", plugin_id, chain);
        self.load_set(&mut state, chain).await;

        match state.records.get(plugin_id).map(|r| r.state.clone()) {
            Some(PluginRuntimeState::Loaded) => Ok(()),
            Some(other) => Err(Error::Plugin(format!(
                "{} could not be enabled: {}",
                plugin_id, other
            ))),
            None => Err(Error::NotFound(format!("plugin {}", plugin_id))),
        }
    }

    /// 플러그인 비활성화. 로드된 의존 플러그인을 먼저 (활성화 역순으로) 내린다.
    ///
    /// 비활성화한 ID를 순서대로 돌려준다.
    pub async fn disable(&self, plugin_id: &str) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        if !state.records.contains_key(plugin_id) {
            return Err(Error::NotFound(format!("plugin {}", plugin_id)));
        }

        let dependents = loaded_dependents(&state.records, plugin_id);
        let mut order: Vec<String> = state
            .activation_order
            .iter()
            .rev()
            .filter(|id| dependents.contains(id.as_str()))
            .cloned()
            .collect();
        order.push(plugin_id.to_string());

        for id in &order {
            self.unload(&mut state, id).await;
            if let Some(record) = state.records.get_mut(id) {
                record.state = PluginRuntimeState::Disabled;
            }
            state.store.set_disabled(id, true)?;
        }
        Ok(order)
    }

    // ========================================================================
    // Host restart
    // ========================================================================

    /// Host 재시작 후 로드돼 있던 isolated 플러그인을 활성화 순서대로 다시 활성화
    ///
    /// 매니페스트는 다시 읽지 않는다. 실패한 플러그인은 `Failed`가 된다.
    pub async fn resume(&self) -> usize {
        let mut state = self.state.lock().await;
        let targets: Vec<(String, PluginManifest, PathBuf)> = state
            .activation_order
            .iter()
            .filter_map(|id| state.records.get(id).map(|r| (id, r)))
            .filter(|(_, r)| r.state.is_loaded() && r.manifest.is_isolated())
            .map(|(id, r)| (id.clone(), r.manifest.clone(), r.bundle_path.clone()))
            .collect();

        let mut resumed = 0;
        for (id, manifest, bundle_path) in targets {
            let result = tokio::time::timeout(
                self.activation_timeout,
                self.activate_isolated(&id, &manifest, &bundle_path),
            )
            .await
            .unwrap_or_else(|_| Err(Error::Timeout(format!("resume of {}", id))));

            match result {
                Ok(()) => resumed += 1,
                Err(e) => {
                    error!("Failed to resume plugin {}: {}", id, e);
                    self.unload(&mut state, &id).await;
                    if let Some(record) = state.records.get_mut(&id) {
                        record.state = PluginRuntimeState::Failed(format!("resume failed: {}", e));
                    }
                }
            }
        }
        info!("Resumed {} isolated plugins", resumed);
        resumed
    }

    // ========================================================================
    // Plugin calls
    // ========================================================================

    async fn loaded_instance(&self, plugin_id: &str) -> Result<Option<Arc<dyn Plugin>>> {
        let state = self.state.lock().await;
        let record = state
            .records
            .get(plugin_id)
            .ok_or_else(|| Error::NotFound(format!("plugin {}", plugin_id)))?;
        if !record.state.is_loaded() {
            return Err(Error::Plugin(format!(
                "{} is not loaded ({})",
                plugin_id, record.state
            )));
        }
        Ok(record.instance.clone())
    }

    /// 매니페스트에 선언된 명령 실행
    pub async fn invoke_command(&self, plugin_id: &str, command_id: &str, args: Value) -> Result<Value> {
        match self.loaded_instance(plugin_id).await? {
            Some(plugin) => plugin.invoke_command(command_id, args).await,
            None => {
                let message = Envelope::new(MessageType::CommandInvoke)
                    .with_plugin(plugin_id)
                    .with("commandId", command_id)
                    .with("args", args);
                Ok(self.wiring.host.request(message).await?.result_value())
            }
        }
    }

    /// 플러그인 전용 요청
    pub async fn plugin_request(
        &self,
        plugin_id: &str,
        request_type: &str,
        payload: Value,
    ) -> Result<Value> {
        match self.loaded_instance(plugin_id).await? {
            Some(plugin) => plugin.handle_request(request_type, payload).await,
            None => {
                let message = Envelope::new(MessageType::PluginRequest)
                    .with_plugin(plugin_id)
                    .with("requestType", request_type)
                    .with("payload", payload);
                Ok(self.wiring.host.request(message).await?.result_value())
            }
        }
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub async fn status(&self) -> Vec<PluginStatus> {
        let state = self.state.lock().await;
        let mut list: Vec<PluginStatus> = state
            .records
            .values()
            .map(|r| PluginStatus::new(&r.manifest, r.state.clone()))
            .collect();
        list.extend(
            state
                .bundle_failures
                .iter()
                .map(|f| PluginStatus::bundle_failure(&f.id, &f.reason)),
        );
        list
    }

    pub async fn state_of(&self, plugin_id: &str) -> Option<PluginRuntimeState> {
        let state = self.state.lock().await;
        state.records.get(plugin_id).map(|r| r.state.clone())
    }

    /// 로드된 플러그인 (활성화 순서)
    pub async fn loaded(&self) -> Vec<String> {
        self.state.lock().await.activation_order.clone()
    }
}

// ============================================================================
// Graph helpers
// ============================================================================

fn pending_ids(state: &LoaderState) -> Vec<String> {
    state
        .records
        .iter()
        .filter(|(_, r)| r.state == PluginRuntimeState::NotLoaded)
        .map(|(id, _)| id.clone())
        .collect()
}

/// 대상 + 아직 로드되지 않은 전이 의존성 (의존성 먼저)
fn enable_chain(records: &BTreeMap<String, PluginRecord>, plugin_id: &str) -> Vec<String> {
    fn visit(
        records: &BTreeMap<String, PluginRecord>,
        id: &str,
        seen: &mut HashSet<String>,
        chain: &mut Vec<String>,
    ) {
        if !seen.insert(id.to_string()) {
            return;
        }
        let Some(record) = records.get(id) else {
            return;
        };
        if record.state.is_loaded() {
            return;
        }
        for dep in record.manifest.dependency_ids() {
            visit(records, dep, seen, chain);
        }
        chain.push(id.to_string());
    }

    let mut seen = HashSet::new();
    let mut chain = Vec::new();
    visit(records, plugin_id, &mut seen, &mut chain);
    chain
}

/// 대상에 (전이적으로) 의존하는 로드된 플러그인
fn loaded_dependents(records: &BTreeMap<String, PluginRecord>, plugin_id: &str) -> HashSet<String> {
    let mut closure: HashSet<String> = HashSet::new();
    let mut frontier = vec![plugin_id.to_string()];
    while let Some(current) = frontier.pop() {
        for (id, record) in records {
            if record.state.is_loaded()
                && !closure.contains(id)
                && record.manifest.dependency_ids().any(|dep| dep == current)
            {
                closure.insert(id.clone());
                frontier.push(id.clone());
            }
        }
    }
    closure.remove(plugin_id);
    closure
}
