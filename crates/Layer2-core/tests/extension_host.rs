//! 전체 스택 통합 테스트
//!
//! 실제 Unix 소켓 위에서 같은 프로세스 안의 Host(`EmbeddedLauncher` + `HostRuntime`)와
//! 앱 쪽 `ExtensionHost`를 연결한다.

#![cfg(unix)]

use async_trait::async_trait;
use eterm_core::host::HostRuntime;
use eterm_core::plugin::PluginStateStore;
use eterm_core::ui::{Headless, UiCall};
use eterm_core::{
    Collaborators, EmbeddedLauncher, ExtensionHost, HostProcessState, MessageHandler,
    MessageType, Plugin, PluginContext, PluginRegistry, PluginRuntimeState,
};
use eterm_foundation::{ErrorCode, ExtensionConfig, HostConfig, RestartPolicyConfig, Result};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::assert_ok;

// ============================================================================
// Plugins
// ============================================================================

/// Host에서 실행: 서비스 제공, 탭 제목 설정, 받은 이벤트를 `echo.<이벤트>`로 되돌려 발행
///
/// `lookup` 이벤트는 먼저 자기 `echo` 서비스를 앱 디렉토리 경유로 불러 그 결과를 발행한다.
#[derive(Default)]
struct Echo {
    ctx: Mutex<Option<PluginContext>>,
}

#[async_trait]
impl Plugin for Echo {
    async fn activate(&self, ctx: PluginContext) -> Result<()> {
        ctx.provide_service("echo", |params| async move { Ok(params) })
            .await?;
        ctx.set_tab_title(1, "echo ready").await?;
        *self.ctx.lock() = Some(ctx);
        Ok(())
    }

    async fn on_event(&self, event: &str, payload: Value) {
        let ctx = self.ctx.lock().clone();
        let Some(ctx) = ctx else {
            return;
        };
        let payload = if event == "lookup" {
            match ctx.call_service("echo", "echo", payload).await {
                Ok(found) => found,
                Err(e) => json!({ "error": e.to_string() }),
            }
        } else {
            payload
        };
        let _ = ctx.emit(&format!("echo.{}", event), payload).await;
    }
}

/// 앱 안에서 실행: `ping` 명령이 isolated `echo` 서비스를 부른다
#[derive(Default)]
struct Relay {
    ctx: Mutex<Option<PluginContext>>,
}

#[async_trait]
impl Plugin for Relay {
    async fn activate(&self, ctx: PluginContext) -> Result<()> {
        *self.ctx.lock() = Some(ctx);
        Ok(())
    }

    async fn invoke_command(&self, command_id: &str, args: Value) -> Result<Value> {
        let ctx = self.ctx.lock().clone();
        match (command_id, ctx) {
            ("ping", Some(ctx)) => ctx.call_service("echo", "echo", args).await,
            _ => Ok(Value::Null),
        }
    }
}

// ============================================================================
// Fixture
// ============================================================================

fn write_bundle(dir: &Path, name: &str, manifest: Value) {
    let bundle = dir.join(name);
    std::fs::create_dir_all(&bundle).unwrap();
    std::fs::write(
        bundle.join("manifest.json"),
        serde_json::to_string_pretty(&manifest).unwrap(),
    )
    .unwrap();
}

struct Stack {
    host: ExtensionHost,
    launcher: Arc<EmbeddedLauncher>,
    headless: Arc<Headless>,
    dir: TempDir,
}

fn stack() -> Stack {
    let dir = TempDir::new().unwrap();
    let plugins = dir.path().join("plugins");
    write_bundle(
        &plugins,
        "echo",
        json!({
            "id": "echo",
            "name": "Echo",
            "version": "1.2.0",
            "capabilities": ["service.register", "service.call", "ui.tabTitle"],
            "subscribes": ["focus", "lookup"],
            "sidebarTabs": [{ "id": "echo.tab", "title": "Echo" }]
        }),
    );
    write_bundle(
        &plugins,
        "relay",
        json!({
            "id": "relay",
            "version": "0.1",
            "runMode": "main",
            "loadPriority": "immediate",
            "dependencies": [{ "id": "echo", "minVersion": "1.0" }],
            "capabilities": ["service.call"]
        }),
    );

    let mut host_config = HostConfig::in_dir(dir.path());
    host_config.connect_backoff_ms = 10;
    host_config.restart = RestartPolicyConfig {
        max_restarts: 3,
        window_secs: 60,
        base_delay_ms: 10,
    };
    let config = ExtensionConfig::new().plugin_dir(&plugins).host(host_config);

    let launcher = Arc::new(EmbeddedLauncher::new(|| {
        let registry = PluginRegistry::new()
            .with("echo", || Arc::new(Echo::default()) as Arc<dyn Plugin>);
        Arc::new(HostRuntime::new(registry)) as Arc<dyn MessageHandler>
    }));
    let (collaborators, headless) = Collaborators::headless();

    let host = ExtensionHost::builder(config)
        .launcher(launcher.clone())
        .plugins(
            PluginRegistry::new().with("relay", || Arc::new(Relay::default()) as Arc<dyn Plugin>),
        )
        .collaborators(collaborators)
        .state_store(PluginStateStore::at_path(&dir.path().join("plugin-state.json")))
        .build()
        .unwrap();

    Stack {
        host,
        launcher,
        headless,
        dir,
    }
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_immediate_tier_spawns_host_and_routes_services() {
    let s = stack();

    let (report, background) = s.host.start().await;
    assert_eq!(report.loaded, vec!["echo", "relay"]);
    assert!(background.await.unwrap().loaded.is_empty());
    assert_eq!(s.launcher.launches(), 1);
    assert_eq!(s.host.host_state(), HostProcessState::Running);

    // 앱 → isolated 서비스
    let echoed = assert_ok!(s.host.call_service("echo", "echo", json!({ "n": 1 })).await);
    assert_eq!(echoed, json!({ "n": 1 }));

    // main 플러그인 → 라우터 게이트 → Host
    let pinged = assert_ok!(s.host.invoke_command("relay", "ping", json!({ "n": 2 })).await);
    assert_eq!(pinged, json!({ "n": 2 }));

    let calls = s.headless.calls();
    assert!(calls.iter().any(|call| matches!(
        call,
        UiCall::Attach { plugin_id, blocks } if plugin_id == "echo" && blocks == &vec!["sidebarTabs".to_string()]
    )));

    // UI 제어는 fire-and-forget이라 응답보다 늦게 처리될 수 있다
    let headless = Arc::clone(&s.headless);
    wait_until(move || {
        let headless = Arc::clone(&headless);
        async move {
            headless.calls().iter().any(|call| matches!(
                call,
                UiCall::Command(command) if command.kind == MessageType::SetTabTitle && command.plugin_id == "echo"
            ))
        }
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_round_trip_through_host() {
    let s = stack();
    s.host.start().await;
    let mut observer = s.host.events().observe();

    assert_eq!(s.host.publish("focus", json!({ "tab": 3 })).await, 1);

    let echoed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = observer.recv().await.unwrap();
            if event.name == "echo.focus" {
                return event;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(echoed.source.as_deref(), Some("echo"));
    assert_eq!(echoed.payload, json!({ "tab": 3 }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_event_handler_calls_service_while_event_pending() {
    let s = stack();
    s.host.start().await;
    let mut observer = s.host.events().observe();

    assert_eq!(s.host.publish("lookup", json!({ "q": "tab" })).await, 1);

    // 30초 요청 제한보다 훨씬 짧게
    let found = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let event = observer.recv().await.unwrap();
            if event.name == "echo.lookup" {
                return event;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(found.payload, json!({ "q": "tab" }));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_host_crash_restarts_and_resumes_plugins() {
    let s = stack();
    s.host.start().await;
    assert_eq!(s.launcher.launches(), 1);

    assert!(s.launcher.stop(1));

    let launcher = Arc::clone(&s.launcher);
    wait_until(|| {
        let launcher = Arc::clone(&launcher);
        async move { launcher.launches() == 2 }
    })
    .await;
    let host = &s.host;
    wait_until(move || async move {
        host.call_service("echo", "echo", json!("again")).await.is_ok()
    })
    .await;

    assert_eq!(host.host_state(), HostProcessState::Running);
    assert_eq!(
        host.loader().state_of("echo").await,
        Some(PluginRuntimeState::Loaded)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disable_cascades_and_persists() {
    let s = stack();
    s.host.start().await;

    let disabled = assert_ok!(s.host.disable("echo").await);
    assert_eq!(disabled, vec!["relay", "echo"]);

    let err = s
        .host
        .call_service("echo", "echo", Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ServiceNotFound);

    let persisted = PluginStateStore::at_path(&s.dir.path().join("plugin-state.json"));
    assert!(persisted.is_disabled("echo"));
    assert!(persisted.is_disabled("relay"));

    assert_ok!(s.host.enable("relay").await);
    let status = s.host.status().await;
    assert!(status
        .iter()
        .all(|entry| entry.state == PluginRuntimeState::Loaded));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_leaves_host_running() {
    let s = stack();
    s.host.start().await;

    s.host.shutdown().await;

    assert_eq!(s.host.host_state(), HostProcessState::Stopped);
    assert!(s.host.loader().loaded().await.is_empty());
    assert!(s.dir.path().join("host.sock").exists());
    assert!(s.headless.calls().iter().any(|call| matches!(
        call,
        UiCall::Retract { plugin_id } if plugin_id == "echo"
    )));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_plugin_comes_back_after_shutdown() {
    let s = stack();
    let (_, background) = s.host.start().await;
    s.host.shutdown().await;

    // 중단됐거나 이미 끝난 background 단계
    let _ = background.await;
    let late = s.host.loader().load_background().await;
    assert!(late.loaded.is_empty());
    assert!(s.host.enable("echo").await.is_err());

    assert!(s.host.loader().loaded().await.is_empty());
    assert_eq!(s.host.host_state(), HostProcessState::Stopped);
    assert_eq!(s.launcher.launches(), 1);
}
