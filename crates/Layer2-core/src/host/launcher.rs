//! Host 실행기
//!
//! - `ProcessLauncher`: Host 바이너리를 데몬으로 spawn
//! - `EmbeddedLauncher`: 현재 런타임 안에서 Host 서버를 띄운다 (단일 프로세스 모드, 테스트)

#[cfg(unix)]
use super::process::HostArtifacts;
#[cfg(unix)]
use crate::ipc::{ConnectionOptions, IpcServer};
use crate::ipc::MessageHandler;
use async_trait::async_trait;
use eterm_foundation::{Error, HostConfig, Result, ENV_PARENT_PID};
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{info, warn};

// ============================================================================
// Traits
// ============================================================================

/// 실행된 Host에 대한 핸들
pub trait HostProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// 종료했으면 종료 코드 (신호로 끝났으면 128 + signo)
    fn try_exit(&mut self) -> Option<i32>;

    /// 종료 요청 (대기하지 않음)
    fn start_kill(&mut self);
}

#[async_trait]
pub trait HostLauncher: Send + Sync {
    /// Host를 시작한다. 소켓 준비 대기는 호출자 몫.
    async fn launch(&self, config: &HostConfig) -> Result<Box<dyn HostProcess>>;
}

// ============================================================================
// ProcessLauncher
// ============================================================================

/// 실행 파일을 `--socket <path> --pid-file <path> --lifecycle <hint>`로 spawn
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    lifecycle: String,
    env: Vec<(String, String)>,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self {
            lifecycle: "daemon".to_string(),
            env: Vec::new(),
        }
    }
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lifecycle(mut self, lifecycle: impl Into<String>) -> Self {
        self.lifecycle = lifecycle.into();
        self
    }

    /// 리소스 경로 오버라이드 등 추가 환경 변수
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl HostLauncher for ProcessLauncher {
    async fn launch(&self, config: &HostConfig) -> Result<Box<dyn HostProcess>> {
        info!(
            "Spawning host: {} --socket {} ({})",
            config.executable.display(),
            config.socket_path.display(),
            self.lifecycle
        );

        let mut cmd = Command::new(&config.executable);
        cmd.arg("--socket")
            .arg(&config.socket_path)
            .arg("--pid-file")
            .arg(&config.pid_file)
            .arg("--lifecycle")
            .arg(&self.lifecycle)
            .env(ENV_PARENT_PID, std::process::id().to_string())
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().map_err(|e| {
            Error::Internal(format!(
                "Failed to spawn host '{}': {}",
                config.executable.display(),
                e
            ))
        })?;

        info!("Host spawned (pid {:?})", child.id());
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

impl HostProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(exit_code(status)),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to poll host process: {}", e);
                None
            }
        }
    }

    fn start_kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            warn!("Failed to kill host process: {}", e);
        }
    }
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

// ============================================================================
// EmbeddedLauncher
// ============================================================================

type HandlerFactory = Arc<dyn Fn() -> Arc<dyn MessageHandler> + Send + Sync>;
type StopSlot = Arc<Mutex<Option<oneshot::Sender<i32>>>>;

/// 현재 프로세스 안에서 Host 서버를 띄우는 실행기
///
/// 실행마다 `factory`로 새 Host 측 핸들러를 만든다 (새 프로세스와 같은 빈 상태).
pub struct EmbeddedLauncher {
    factory: HandlerFactory,
    current: Mutex<Option<StopSlot>>,
    launches: AtomicU32,
}

impl EmbeddedLauncher {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Arc<dyn MessageHandler> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            current: Mutex::new(None),
            launches: AtomicU32::new(0),
        }
    }

    /// 지금까지 실행 횟수
    pub fn launches(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    /// 현재 인스턴스를 종료 코드와 함께 멈춘다
    pub fn stop(&self, exit_code: i32) -> bool {
        let slot = self.current.lock().clone();
        match slot.and_then(|s| s.lock().take()) {
            Some(stop) => stop.send(exit_code).is_ok(),
            None => false,
        }
    }
}

#[cfg(unix)]
#[async_trait]
impl HostLauncher for EmbeddedLauncher {
    async fn launch(&self, config: &HostConfig) -> Result<Box<dyn HostProcess>> {
        let artifacts = HostArtifacts::from_config(config);
        let options = ConnectionOptions::new("embedded-host")
            .with_request_timeout(config.request_timeout());
        let server = IpcServer::bind(&config.socket_path, (self.factory)(), options)?
            .with_backoff(config.connect_backoff());
        artifacts.write_pid(std::process::id())?;

        let (stop_tx, stop_rx) = oneshot::channel::<i32>();
        let stop: StopSlot = Arc::new(Mutex::new(Some(stop_tx)));
        let exit = Arc::new(Mutex::new(None));

        // 종료 코드는 PID 파일을 지운 뒤, 연결을 닫기 전에 기록된다
        let exit_slot = Arc::clone(&exit);
        tokio::spawn(async move {
            let shutdown = async move {
                let code = stop_rx.await.unwrap_or(0);
                let _ = std::fs::remove_file(artifacts.pid_file());
                *exit_slot.lock() = Some(code);
            };
            if let Err(e) = server.run(shutdown).await {
                warn!("Embedded host stopped with error: {}", e);
            }
        });

        *self.current.lock() = Some(Arc::clone(&stop));
        let n = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Embedded host started (launch #{})", n);

        Ok(Box::new(EmbeddedProcess { exit, stop }))
    }
}

struct EmbeddedProcess {
    exit: Arc<Mutex<Option<i32>>>,
    stop: StopSlot,
}

impl HostProcess for EmbeddedProcess {
    fn pid(&self) -> Option<u32> {
        Some(std::process::id())
    }

    fn try_exit(&mut self) -> Option<i32> {
        *self.exit.lock()
    }

    fn start_kill(&mut self) {
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(128 + 15);
        }
    }
}
