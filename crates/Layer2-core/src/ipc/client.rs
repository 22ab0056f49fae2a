//! 앱 측 연결: connect / connect-with-retry

use super::connection::{Connection, ConnectionOptions, MessageHandler};
use super::message::Envelope;
use eterm_foundation::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::{debug, info};

#[derive(Clone)]
pub struct IpcClient {
    socket_path: PathBuf,
    options: ConnectionOptions,
    backoff: Duration,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<PathBuf>, options: ConnectionOptions) -> Self {
        Self {
            socket_path: socket_path.into(),
            options,
            backoff: Duration::from_millis(200),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// 한 번 연결하고 앱 handshake를 보낸다
    pub async fn connect(&self, handler: Arc<dyn MessageHandler>) -> Result<Arc<Connection>> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            Error::Transport(format!(
                "Failed to connect to {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;

        let conn = Connection::start(stream, handler, self.options.clone());
        if let Err(e) = conn.send_handshake(Envelope::app_handshake()).await {
            conn.close();
            return Err(e);
        }
        info!("Connected to {}", self.socket_path.display());
        Ok(conn)
    }

    /// `keep_trying()`이 true인 동안 고정 간격으로 재시도
    pub async fn connect_with_retry<F>(
        &self,
        handler: Arc<dyn MessageHandler>,
        keep_trying: F,
    ) -> Result<Arc<Connection>>
    where
        F: Fn() -> bool,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.connect(Arc::clone(&handler)).await {
                Ok(conn) => return Ok(conn),
                Err(e) if keep_trying() => {
                    debug!(
                        "Connect attempt {} failed: {} (retrying in {:?})",
                        attempt, e, self.backoff
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::server::IpcServer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    struct Silent;

    #[async_trait]
    impl MessageHandler for Silent {
        async fn handle(&self, _conn: Arc<Connection>, _message: Envelope) -> Option<Envelope> {
            None
        }
    }

    #[tokio::test]
    async fn test_connect_and_handshake_over_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("host.sock");

        let server =
            IpcServer::bind(&path, Arc::new(Silent), ConnectionOptions::new("host")).unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let serving = tokio::spawn(server.run(async move {
            let _ = stop_rx.await;
        }));

        let client = IpcClient::new(&path, ConnectionOptions::new("app"));
        let conn = client.connect(Arc::new(Silent)).await.unwrap();
        let info = conn.wait_for_handshake(Duration::from_secs(1)).await.unwrap();
        assert!(info.contains_key("hostPid"));

        stop_tx.send(()).unwrap();
        serving.await.unwrap().unwrap();
        conn.closed().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_retry_gives_up_when_told() {
        let dir = TempDir::new().unwrap();
        let client = IpcClient::new(dir.path().join("absent.sock"), ConnectionOptions::new("app"))
            .with_backoff(Duration::from_millis(5));

        let attempts = AtomicU32::new(0);
        let result = client
            .connect_with_retry(Arc::new(Silent), || {
                attempts.fetch_add(1, Ordering::SeqCst) < 3
            })
            .await;

        assert!(matches!(result, Err(Error::Transport(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }
}
