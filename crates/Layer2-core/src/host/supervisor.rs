//! Host Supervisor - Host 프로세스 감지/시작/감시와 크래시 재시작
//!
//! 시스템 전체에 Host는 하나. 공개 진입점(`ensure_running`, `disconnect`,
//! `force_terminate`, `reset`)은 하나의 비동기 Mutex로 직렬화되어 상태 전이가 섞이지 않는다.
//!
//! ```text
//! stopped → starting → connecting → running
//!                                      │ 예기치 않은 연결 끊김
//!                                      ▼
//!                    restarting ◀── crashed(code) ──▶ crashed (한도 초과, 종료 상태)
//! ```

use super::launcher::{HostLauncher, HostProcess};
use super::process::{HostArtifacts, Liveness};
use super::restart::{RestartDecision, RestartTracker};
use crate::ipc::{Connection, ConnectionOptions, Envelope, HostLink, IpcClient, MessageHandler};
use async_trait::async_trait;
use eterm_foundation::{Error, HostConfig, Result};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 소켓 파일 폴링 간격
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// 연결이 끊긴 뒤 자식 종료 코드를 기다리는 시간
const EXIT_GRACE: Duration = Duration::from_millis(500);

pub type ResumeHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

// ============================================================================
// HostProcessState
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "exitCode")]
pub enum HostProcessState {
    Stopped,
    Starting,
    Connecting,
    Running,
    Crashed(Option<i32>),
    Restarting,
}

impl std::fmt::Display for HostProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Connecting => write!(f, "connecting"),
            Self::Running => write!(f, "running"),
            Self::Crashed(Some(code)) => write!(f, "crashed({})", code),
            Self::Crashed(None) => write!(f, "crashed"),
            Self::Restarting => write!(f, "restarting"),
        }
    }
}

// ============================================================================
// HostSupervisor
// ============================================================================

#[derive(Default)]
struct Inner {
    /// 이 supervisor가 직접 띄운 Host (재사용한 데몬이면 None)
    process: Option<Box<dyn HostProcess>>,
    monitor: Option<JoinHandle<()>>,
}

pub struct HostSupervisor {
    config: HostConfig,
    launcher: Arc<dyn HostLauncher>,

    /// Host에서 오는 메시지 처리기 (앱 측 라우터)
    handler: Arc<dyn MessageHandler>,

    weak_self: Weak<Self>,
    inner: tokio::sync::Mutex<Inner>,
    connection: RwLock<Option<Arc<Connection>>>,
    state: watch::Sender<HostProcessState>,

    /// 재시작 횟수 + 마지막 재시작 시각
    restart: Mutex<RestartTracker>,

    gave_up: AtomicBool,
    should_run: AtomicBool,
    needs_resume: AtomicBool,

    /// 연결 세대 (오래된 감시 태스크 무시용)
    generation: AtomicU64,

    resume: RwLock<Option<ResumeHook>>,
}

impl HostSupervisor {
    pub fn new(
        config: HostConfig,
        launcher: Arc<dyn HostLauncher>,
        handler: Arc<dyn MessageHandler>,
    ) -> Arc<Self> {
        let restart = RestartTracker::new(config.restart.clone());
        Arc::new_cyclic(|weak_self| Self {
            config,
            launcher,
            handler,
            weak_self: weak_self.clone(),
            inner: tokio::sync::Mutex::new(Inner::default()),
            connection: RwLock::new(None),
            state: watch::channel(HostProcessState::Stopped).0,
            restart: Mutex::new(restart),
            gave_up: AtomicBool::new(false),
            should_run: AtomicBool::new(false),
            needs_resume: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            resume: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    // ========================================================================
    // State
    // ========================================================================

    pub fn state(&self) -> HostProcessState {
        self.state.borrow().clone()
    }

    /// 상태 변화 구독 (종료 상태 `crashed`도 여기로 전달된다)
    pub fn subscribe_state(&self) -> watch::Receiver<HostProcessState> {
        self.state.subscribe()
    }

    /// 재시작 한도 초과로 멈춘 상태인지
    pub fn has_given_up(&self) -> bool {
        self.gave_up.load(Ordering::SeqCst)
    }

    /// 살아 있는 연결
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.connection
            .read()
            .as_ref()
            .filter(|c| !c.is_closed())
            .cloned()
    }

    /// 재시작 성공 후 호출할 콜백 (로더의 isolated 플러그인 재활성화)
    pub fn set_resume_hook<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: ResumeHook = Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(hook()) });
        *self.resume.write() = Some(hook);
    }

    fn set_state(&self, state: HostProcessState) {
        let previous = self.state.send_replace(state.clone());
        if previous != state {
            info!("Host state: {} -> {}", previous, state);
        }
    }

    // ========================================================================
    // Public entry points
    // ========================================================================

    /// Host가 떠 있고 연결되어 있음을 보장
    ///
    /// 살아 있는 Host(PID 0-signal + 소켓 존재)가 있으면 spawn 없이 연결한다. 없으면
    /// 남은 아티팩트를 정리하고 spawn한 뒤 소켓 생성을 제한 시간까지 기다린다.
    /// handshake가 끝나야 `running`.
    pub async fn ensure_running(&self) -> Result<Arc<Connection>> {
        let conn = {
            let mut inner = self.inner.lock().await;
            self.ensure_running_locked(&mut inner).await?
        };
        self.resume_if_needed();
        Ok(conn)
    }

    /// 연결만 끊는다 (Host 프로세스는 계속 실행)
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        self.detach(&mut inner);
        inner.process = None;
        self.set_state(HostProcessState::Stopped);
        info!("Disconnected from host (host left running)");
    }

    /// Host 강제 종료 (명시적 reload 용)
    ///
    /// 직접 띄운 Host면 핸들로 종료하고, 아니면 PID 파일의 프로세스에 SIGTERM.
    /// 이후 소켓/PID 아티팩트를 제거하고 재시작 카운터를 초기화한다.
    pub async fn force_terminate(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.detach(&mut inner);

        let artifacts = HostArtifacts::from_config(&self.config);
        match inner.process.take() {
            Some(mut process) => {
                info!("Terminating host (pid {:?})", process.pid());
                process.start_kill();
                artifacts.cleanup();
            }
            None => {
                artifacts.terminate()?;
            }
        }

        self.restart.lock().reset();
        self.gave_up.store(false, Ordering::SeqCst);
        self.needs_resume.store(false, Ordering::SeqCst);
        self.set_state(HostProcessState::Stopped);
        Ok(())
    }

    /// 종료 상태 `crashed`에서 빠져나온다 (다음 `ensure_running`부터 다시 시도)
    pub async fn reset(&self) {
        let _inner = self.inner.lock().await;
        self.restart.lock().reset();
        self.gave_up.store(false, Ordering::SeqCst);
        if matches!(self.state(), HostProcessState::Crashed(_)) {
            self.set_state(HostProcessState::Stopped);
        }
    }

    // ========================================================================
    // Start / connect
    // ========================================================================

    async fn ensure_running_locked(&self, inner: &mut Inner) -> Result<Arc<Connection>> {
        if let Some(conn) = self.connection() {
            return Ok(conn);
        }
        if self.has_given_up() {
            return Err(Error::HostCrashed(format!(
                "restart limit reached ({} restarts within {:?})",
                self.config.restart.max_restarts,
                self.config.restart.window()
            )));
        }

        self.should_run.store(true, Ordering::SeqCst);
        match self.start_and_connect(inner).await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                error!("Failed to bring up host: {}", e);
                self.set_state(HostProcessState::Stopped);
                Err(e)
            }
        }
    }

    async fn start_and_connect(&self, inner: &mut Inner) -> Result<Arc<Connection>> {
        self.set_state(HostProcessState::Starting);

        let artifacts = HostArtifacts::from_config(&self.config);
        match artifacts.probe() {
            Liveness::Alive(pid) => info!("Host already running (pid {}), connecting", pid),
            liveness => {
                if liveness == Liveness::Stale {
                    warn!("Cleaning up stale host artifacts");
                }
                artifacts.cleanup();
                inner.process = Some(self.launcher.launch(&self.config).await?);
                self.wait_for_socket(&artifacts, inner).await?;
            }
        }

        self.set_state(HostProcessState::Connecting);
        let options = ConnectionOptions::new("host")
            .with_request_timeout(self.config.request_timeout());
        let client = IpcClient::new(&self.config.socket_path, options)
            .with_backoff(self.config.connect_backoff());

        let deadline = Instant::now() + self.config.socket_ready_timeout();
        let conn = client
            .connect_with_retry(Arc::clone(&self.handler), || {
                self.should_run.load(Ordering::SeqCst) && Instant::now() < deadline
            })
            .await?;

        if let Err(e) = conn
            .wait_for_handshake(self.config.handshake_timeout())
            .await
        {
            conn.close();
            return Err(e);
        }

        *self.connection.write() = Some(Arc::clone(&conn));
        self.spawn_monitor(inner, Arc::clone(&conn));
        self.set_state(HostProcessState::Running);
        Ok(conn)
    }

    async fn wait_for_socket(&self, artifacts: &HostArtifacts, inner: &mut Inner) -> Result<()> {
        let timeout = self.config.socket_ready_timeout();
        let deadline = Instant::now() + timeout;

        loop {
            if artifacts.socket_exists() {
                return Ok(());
            }
            if let Some(code) = inner.process.as_mut().and_then(|p| p.try_exit()) {
                inner.process = None;
                return Err(Error::HostCrashed(format!(
                    "host exited with status {} before its socket appeared",
                    code
                )));
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "host socket {} not ready within {:?}",
                    artifacts.socket_path().display(),
                    timeout
                )));
            }
            tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
        }
    }

    /// 현재 연결과 감시 태스크를 내려놓는다
    fn detach(&self, inner: &mut Inner) {
        self.should_run.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(monitor) = inner.monitor.take() {
            monitor.abort();
        }
        if let Some(conn) = self.connection.write().take() {
            conn.close();
        }
    }

    // ========================================================================
    // Monitor / restart
    // ========================================================================

    fn spawn_monitor(&self, inner: &mut Inner, conn: Arc<Connection>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let supervisor = self.weak_self.clone();

        if let Some(old) = inner.monitor.take() {
            old.abort();
        }
        inner.monitor = Some(tokio::spawn(async move {
            conn.closed().await;
            if let Some(supervisor) = supervisor.upgrade() {
                supervisor.on_connection_lost(generation).await;
            }
        }));
    }

    async fn on_connection_lost(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        // 이 태스크 자신이므로 abort하지 않고 떼어낸다
        inner.monitor.take();
        self.connection.write().take();

        if !self.should_run.load(Ordering::SeqCst) {
            self.set_state(HostProcessState::Stopped);
            return;
        }

        let exit = Self::reap_exit(&mut inner).await;
        inner.process = None;

        if exit == Some(0) {
            info!("Host exited cleanly");
            self.should_run.store(false, Ordering::SeqCst);
            self.set_state(HostProcessState::Stopped);
            return;
        }

        warn!("Host connection lost unexpectedly (exit status {:?})", exit);
        self.set_state(HostProcessState::Crashed(exit));
        self.needs_resume.store(true, Ordering::SeqCst);
        drop(inner);

        self.restart_loop(exit).await;
    }

    /// 직접 띄운 Host의 종료 코드 (잠깐 기다려 본다)
    async fn reap_exit(inner: &mut Inner) -> Option<i32> {
        let process = inner.process.as_mut()?;
        let deadline = Instant::now() + EXIT_GRACE;
        loop {
            if let Some(code) = process.try_exit() {
                return Some(code);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
        }
    }

    async fn restart_loop(&self, exit: Option<i32>) {
        let mut last_exit = exit;

        loop {
            let decision = self.restart.lock().record_crash(Instant::now());
            match decision {
                RestartDecision::GiveUp { attempts } => {
                    error!(
                        "Host crashed after {} restarts within {:?}; giving up",
                        attempts,
                        self.config.restart.window()
                    );
                    self.gave_up.store(true, Ordering::SeqCst);
                    self.set_state(HostProcessState::Crashed(last_exit));
                    return;
                }
                RestartDecision::Retry { attempt, delay } => {
                    self.set_state(HostProcessState::Restarting);
                    info!("Restarting host in {:?} (attempt {})", delay, attempt);
                    tokio::time::sleep(delay).await;

                    let result = {
                        let mut inner = self.inner.lock().await;
                        if !self.should_run.load(Ordering::SeqCst) {
                            info!("Restart cancelled");
                            return;
                        }
                        self.ensure_running_locked(&mut inner).await
                    };

                    match result {
                        Ok(_) => {
                            self.resume_if_needed();
                            return;
                        }
                        Err(e) => {
                            warn!("Restart attempt {} failed: {}", attempt, e);
                            last_exit = None;
                            self.set_state(HostProcessState::Crashed(None));
                        }
                    }
                }
            }
        }
    }

    /// 크래시 이후 첫 연결이면 resume 콜백을 별도 태스크로 실행
    fn resume_if_needed(&self) {
        if !self.needs_resume.swap(false, Ordering::SeqCst) {
            return;
        }
        let hook = self.resume.read().clone();
        if let Some(hook) = hook {
            info!("Host restarted, resuming plugins");
            tokio::spawn(hook());
        }
    }

    fn live(&self) -> Result<Arc<Connection>> {
        match self.connection() {
            Some(conn) => Ok(conn),
            None if self.has_given_up() => {
                Err(Error::HostCrashed("restart limit reached".to_string()))
            }
            None => Err(Error::HostNotRunning),
        }
    }
}

#[async_trait]
impl HostLink for HostSupervisor {
    async fn request(&self, message: Envelope) -> Result<Envelope> {
        self.live()?.request(message).await
    }

    async fn request_with_timeout(&self, message: Envelope, timeout: Duration) -> Result<Envelope> {
        self.live()?.request_with_timeout(message, timeout).await
    }

    async fn send(&self, message: Envelope) -> Result<()> {
        self.live()?.send(message).await
    }

    async fn ensure_ready(&self) -> Result<()> {
        self.ensure_running().await.map(|_| ())
    }

    fn is_connected(&self) -> bool {
        self.connection().is_some()
    }
}
