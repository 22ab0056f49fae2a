//! ExtensionHost - 확장 서브시스템 조립
//!
//! 구성 순서:
//! 1. CapabilityChecker, ServiceDirectory, EventHub, Coordinator, 앱 라우터
//! 2. 라우터를 핸들러로 쓰는 HostSupervisor
//! 3. 디렉토리/이벤트 허브에 Host 경로 연결
//! 4. PluginLoader, 그리고 재시작 후 재활성화 콜백 (로더는 약한 참조)

use super::routes::app_router;
use crate::host::{HostLauncher, HostProcessState, HostSupervisor, ProcessLauncher};
use crate::ipc::{HostLink, Router};
use crate::plugin::{
    EventHub, LoadReport, LoaderWiring, PluginLoader, PluginRegistry, PluginStateStore,
    PluginStatus,
};
use crate::service::{CoreServices, ServiceDirectory};
use crate::ui::{Collaborators, Coordinator};
use eterm_foundation::{CapabilityChecker, ExtensionConfig, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::info;

// ============================================================================
// Builder
// ============================================================================

pub struct ExtensionHostBuilder {
    config: ExtensionConfig,
    launcher: Option<Arc<dyn HostLauncher>>,
    plugins: PluginRegistry,
    collaborators: Option<Collaborators>,
    core: Option<Arc<dyn CoreServices>>,
    store: Option<PluginStateStore>,
}

impl ExtensionHostBuilder {
    /// Host 실행 방식 (기본: `ProcessLauncher`)
    pub fn launcher(mut self, launcher: Arc<dyn HostLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// main 플러그인 진입점
    pub fn plugins(mut self, registry: PluginRegistry) -> Self {
        self.plugins = registry;
        self
    }

    /// UI / 터미널 협력자 (기본: 헤드리스)
    pub fn collaborators(mut self, collaborators: Collaborators) -> Self {
        self.collaborators = Some(collaborators);
        self
    }

    pub fn core_services(mut self, core: Arc<dyn CoreServices>) -> Self {
        self.core = Some(core);
        self
    }

    /// 비활성화 목록 저장소 (기본: 설정의 `stateFile`)
    pub fn state_store(mut self, store: PluginStateStore) -> Self {
        self.store = Some(store);
        self
    }

    /// 조립 (tokio 런타임 안에서 호출)
    pub fn build(self) -> Result<ExtensionHost> {
        let store = match self.store {
            Some(store) => store,
            None => PluginStateStore::from_config(&self.config)?,
        };
        let collaborators = self
            .collaborators
            .unwrap_or_else(|| Collaborators::headless().0);
        let launcher = self
            .launcher
            .unwrap_or_else(|| Arc::new(ProcessLauncher::new()));

        let capabilities = Arc::new(CapabilityChecker::new());
        let services = Arc::new(ServiceDirectory::new(Arc::clone(&capabilities)));
        if let Some(core) = self.core {
            services.set_core(core);
        }
        let events = Arc::new(EventHub::new());
        let coordinator = Coordinator::spawn(collaborators);
        let router = Arc::new(app_router(
            Arc::clone(&capabilities),
            Arc::clone(&services),
            Arc::clone(&events),
            coordinator.clone(),
        ));

        let supervisor = HostSupervisor::new(self.config.host.clone(), launcher, router.clone());
        let host: Arc<dyn HostLink> = supervisor.clone();
        services.attach_host(Arc::clone(&host));
        events.attach_host(Arc::clone(&host));

        let loader = Arc::new(PluginLoader::new(
            &self.config,
            store,
            self.plugins,
            LoaderWiring {
                capabilities: Arc::clone(&capabilities),
                services: Arc::clone(&services),
                events: Arc::clone(&events),
                coordinator: coordinator.clone(),
                host,
                app_channel: router.clone(),
            },
        ));

        let weak = Arc::downgrade(&loader);
        supervisor.set_resume_hook(move || {
            let weak = weak.clone();
            async move {
                if let Some(loader) = weak.upgrade() {
                    loader.resume().await;
                }
            }
        });

        Ok(ExtensionHost {
            capabilities,
            services,
            events,
            coordinator,
            router,
            supervisor,
            loader,
            background: Mutex::new(None),
        })
    }
}

// ============================================================================
// ExtensionHost
// ============================================================================

/// 앱이 들고 있는 확장 서브시스템 핸들
pub struct ExtensionHost {
    capabilities: Arc<CapabilityChecker>,
    services: Arc<ServiceDirectory>,
    events: Arc<EventHub>,
    coordinator: Coordinator,
    router: Arc<Router>,
    supervisor: Arc<HostSupervisor>,
    loader: Arc<PluginLoader>,

    /// `start()`가 띄운 background 로드
    background: Mutex<Option<AbortHandle>>,
}

impl ExtensionHost {
    pub fn builder(config: ExtensionConfig) -> ExtensionHostBuilder {
        ExtensionHostBuilder {
            config,
            launcher: None,
            plugins: PluginRegistry::new(),
            collaborators: None,
            core: None,
            store: None,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// 발견 + immediate 로드. background 로드는 별도 태스크로 돌려준다.
    pub async fn start(&self) -> (LoadReport, JoinHandle<LoadReport>) {
        self.loader.discover().await;
        let immediate = self.loader.load_immediate().await;
        info!(
            "Extension host started ({} immediate plugins)",
            immediate.loaded.len()
        );
        let background = self.loader.spawn_background();
        *self.background.lock() = Some(background.abort_handle());
        (immediate, background)
    }

    /// 플러그인을 모두 내리고 Host 연결을 끊는다 (Host 프로세스는 계속 실행)
    ///
    /// 이후에는 background 단계를 포함해 어떤 로드도 플러그인을 되살리지 않는다.
    pub async fn shutdown(&self) {
        self.loader.deactivate_all().await;
        if let Some(background) = self.background.lock().take() {
            background.abort();
        }
        self.supervisor.disconnect().await;
        info!("Extension host shut down");
    }

    // ========================================================================
    // Shortcuts
    // ========================================================================

    pub async fn status(&self) -> Vec<PluginStatus> {
        self.loader.status().await
    }

    pub async fn enable(&self, plugin_id: &str) -> Result<()> {
        self.loader.enable(plugin_id).await
    }

    pub async fn disable(&self, plugin_id: &str) -> Result<Vec<String>> {
        self.loader.disable(plugin_id).await
    }

    pub async fn invoke_command(&self, plugin_id: &str, command_id: &str, args: Value) -> Result<Value> {
        self.loader.invoke_command(plugin_id, command_id, args).await
    }

    /// 앱 자신의 이벤트 발행
    pub async fn publish(&self, event: &str, payload: Value) -> usize {
        self.events.publish(event, payload, None).await
    }

    /// 앱 자신의 서비스 호출 (호출자 없음, 권한 검사 없음)
    pub async fn call_service(&self, target: &str, service_name: &str, params: Value) -> Result<Value> {
        self.services.call(None, target, service_name, params).await
    }

    pub fn host_state(&self) -> HostProcessState {
        self.supervisor.state()
    }

    pub fn subscribe_host_state(&self) -> watch::Receiver<HostProcessState> {
        self.supervisor.subscribe_state()
    }

    // ========================================================================
    // Components
    // ========================================================================

    pub fn capabilities(&self) -> &Arc<CapabilityChecker> {
        &self.capabilities
    }

    pub fn services(&self) -> &Arc<ServiceDirectory> {
        &self.services
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn supervisor(&self) -> &Arc<HostSupervisor> {
        &self.supervisor
    }

    pub fn loader(&self) -> &Arc<PluginLoader> {
        &self.loader
    }
}
