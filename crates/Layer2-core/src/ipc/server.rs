//! Host 측 accept 루프
//!
//! 잘 알려진 소켓 경로에 bind하고, 연결마다 `Connection`을 띄운 뒤 자기 handshake를 먼저 보낸다.
//! accept 실패는 고정 간격 후 재시도하며, shutdown future가 끝나면 깨끗이 빠져나온다.

use super::connection::{Connection, ConnectionOptions, MessageHandler};
use super::message::Envelope;
use eterm_foundation::{Error, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixListener;
use tracing::{debug, info, warn};

type AcceptHook = Arc<dyn Fn(Arc<Connection>) + Send + Sync>;

pub struct IpcServer {
    listener: UnixListener,
    socket_path: PathBuf,
    handler: Arc<dyn MessageHandler>,
    options: ConnectionOptions,
    backoff: Duration,
    on_accept: Option<AcceptHook>,
}

impl IpcServer {
    /// 소켓에 bind (남아 있는 소켓 파일은 제거)
    pub fn bind(
        socket_path: impl AsRef<Path>,
        handler: Arc<dyn MessageHandler>,
        options: ConnectionOptions,
    ) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();

        if socket_path.exists() {
            debug!("Removing stale socket {}", socket_path.display());
            std::fs::remove_file(&socket_path)?;
        }
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&socket_path).map_err(|e| {
            Error::Transport(format!("Failed to bind {}: {}", socket_path.display(), e))
        })?;
        info!("IPC server listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path,
            handler,
            options,
            backoff: Duration::from_millis(200),
            on_accept: None,
        })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// 새 연결마다 호출 (handshake 전송 직후)
    pub fn on_accept<F>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<Connection>) + Send + Sync + 'static,
    {
        self.on_accept = Some(Arc::new(hook));
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// shutdown future가 끝날 때까지 연결을 받는다
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut connections: Vec<Arc<Connection>> = Vec::new();
        let mut accepted = 0u64;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("IPC server shutting down");
                    break;
                }
                result = self.listener.accept() => match result {
                    Ok((stream, _addr)) => {
                        accepted += 1;
                        let options = ConnectionOptions {
                            label: format!("{}#{}", self.options.label, accepted),
                            ..self.options.clone()
                        };
                        let conn = Connection::start(stream, Arc::clone(&self.handler), options);
                        if let Err(e) = conn.send_handshake(Envelope::host_handshake()).await {
                            warn!("Handshake to {} failed: {}", conn.label(), e);
                            conn.close();
                            continue;
                        }
                        info!("Accepted connection {}", conn.label());

                        connections.retain(|c| !c.is_closed());
                        connections.push(Arc::clone(&conn));
                        if let Some(hook) = &self.on_accept {
                            hook(conn);
                        }
                    }
                    Err(e) => {
                        warn!("Accept failed: {} (retrying in {:?})", e, self.backoff);
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!("Socket cleanup skipped: {}", e);
        }
        for conn in connections {
            conn.close();
        }
        Ok(())
    }
}
