//! IPC Connection - 프레임 단위 메시지 교환과 요청/응답 상관
//!
//! 연결 하나당:
//! - writer 태스크 1개 (인코딩된 프레임을 mpsc 채널로 받는 단일 writer)
//! - reader 태스크 1개 (핸들러를 기다리지 않는다)
//! - fire-and-forget 태스크 1개 (이벤트/UI 메시지를 수신 순서대로 처리)
//! - correlation id → 완료 슬롯 테이블 (응답/에러/연결 끊김 중 정확히 한 번 해소)

use super::codec::{decode_frame, encode_frame, read_frame_body};
use super::link::HostLink;
use super::message::{Envelope, MessageType, PROTOCOL_VERSION};
use async_trait::async_trait;
use eterm_foundation::{Error, ErrorCode, Result};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// writer 채널 용량
const OUTBOUND_CAPACITY: usize = 64;

// ============================================================================
// MessageHandler
// ============================================================================

/// 수신 메시지 처리기
///
/// 요청 타입이면 응답(또는 에러) 엔벨로프를 돌려준다. fire-and-forget 타입은 보통 `None`이지만,
/// 권한 거부처럼 상대에게 알려야 할 때는 에러 엔벨로프를 돌려줄 수 있다.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, conn: Arc<Connection>, message: Envelope) -> Option<Envelope>;
}

// ============================================================================
// ConnectionOptions
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// 로그용 이름
    pub label: String,

    /// `request()` 기본 제한 시간
    pub request_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            label: "ipc".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ConnectionOptions {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

// ============================================================================
// Connection
// ============================================================================

/// 대기 중인 요청 테이블
///
/// `closed`가 설정된 뒤에는 새 슬롯을 받지 않는다.
#[derive(Default)]
struct PendingTable {
    slots: HashMap<String, oneshot::Sender<Result<Envelope>>>,
    closed: Option<String>,
}

pub struct Connection {
    label: String,
    request_timeout: Duration,

    /// writer 태스크로 가는 채널 (길이 접두어 포함 프레임)
    outbound: mpsc::Sender<Vec<u8>>,

    /// fire-and-forget 태스크로 가는 채널
    inbound: mpsc::UnboundedSender<Envelope>,

    /// 대기 중인 요청들 (correlation id -> 완료 슬롯)
    pending: Mutex<PendingTable>,

    /// 상대 handshake payload (수신 전에는 None)
    peer_handshake: watch::Sender<Option<Map<String, Value>>>,

    /// 연결 종료 여부
    closed: watch::Sender<bool>,

    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// 스트림 위에 연결을 띄운다 (reader/writer 태스크 시작)
    pub fn start<S>(
        stream: S,
        handler: Arc<dyn MessageHandler>,
        options: ConnectionOptions,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (outbound, mut outbound_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_CAPACITY);
        let (inbound, mut inbound_rx) = mpsc::unbounded_channel::<Envelope>();

        let conn = Arc::new(Self {
            label: options.label,
            request_timeout: options.request_timeout,
            outbound,
            inbound,
            pending: Mutex::new(PendingTable::default()),
            peer_handshake: watch::channel(None).0,
            closed: watch::channel(false).0,
            tasks: Mutex::new(Vec::new()),
        });

        // writer task
        let writer_conn = Arc::downgrade(&conn);
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let written = match writer.write_all(&frame).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    if let Some(conn) = writer_conn.upgrade() {
                        conn.mark_closed(format!("write failed: {}", e));
                    }
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        // fire-and-forget task: 핸들러가 같은 연결로 요청을 보내도 reader는 계속 응답을 읽는다
        let inbound_conn = Arc::downgrade(&conn);
        let inbound_handler = Arc::clone(&handler);
        let inbound_task = tokio::spawn(async move {
            while let Some(message) = inbound_rx.recv().await {
                let Some(conn) = inbound_conn.upgrade() else {
                    break;
                };
                let kind = message.kind;
                if let Some(reply) = inbound_handler.handle(Arc::clone(&conn), message).await {
                    if let Err(e) = conn.send(reply).await {
                        debug!("[{}] reply to {} dropped: {}", conn.label, kind, e);
                    }
                }
            }
        });

        // reader task
        let reader_conn = Arc::clone(&conn);
        let reader_task = tokio::spawn(async move {
            let reason = loop {
                match read_frame_body(&mut reader).await {
                    Ok(Some(body)) => match decode_frame(&body) {
                        Ok(message) => reader_conn.dispatch(message, &handler).await,
                        Err(e) => reader_conn.reject_undecodable(&body, e).await,
                    },
                    Ok(None) => break "peer closed the connection".to_string(),
                    Err(e) => break format!("read failed: {}", e),
                }
            };
            reader_conn.mark_closed(reason);
        });

        {
            let mut tasks = conn.tasks.lock();
            tasks.push(writer_task);
            tasks.push(inbound_task);
            tasks.push(reader_task);
            if conn.is_closed() {
                for task in tasks.drain(..) {
                    task.abort();
                }
            }
        }

        debug!("[{}] connection started", conn.label);
        conn
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    /// 자기 쪽 handshake 전송
    pub async fn send_handshake(&self, handshake: Envelope) -> Result<()> {
        if handshake.kind != MessageType::Handshake {
            return Err(Error::Protocol(format!(
                "expected handshake, got {}",
                handshake.kind
            )));
        }
        self.send(handshake).await
    }

    /// 상대 handshake 수신 여부
    pub fn handshake_received(&self) -> bool {
        self.peer_handshake.borrow().is_some()
    }

    /// 상대 handshake payload
    pub fn peer_info(&self) -> Option<Map<String, Value>> {
        self.peer_handshake.borrow().clone()
    }

    /// 상대 handshake가 올 때까지 대기 (제한 시간 초과 시 `Timeout`)
    pub async fn wait_for_handshake(&self, timeout: Duration) -> Result<Map<String, Value>> {
        let mut handshake = self.peer_handshake.subscribe();
        let mut closed = self.closed.subscribe();

        let waited = tokio::time::timeout(timeout, async {
            tokio::select! {
                biased;
                _ = handshake.wait_for(Option::is_some) => Ok(()),
                _ = closed.wait_for(|c| *c) => Err(Error::ConnectionLost(format!(
                    "[{}] closed before handshake",
                    self.label
                ))),
            }
        })
        .await;

        match waited {
            Ok(Ok(())) => self
                .peer_info()
                .ok_or_else(|| Error::Internal("handshake payload missing".to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout(format!(
                "[{}] handshake not received within {:?}",
                self.label, timeout
            ))),
        }
    }

    // ========================================================================
    // Request / Send
    // ========================================================================

    /// 요청 전송 후 응답 대기 (기본 제한 시간)
    pub async fn request(&self, message: Envelope) -> Result<Envelope> {
        self.request_with_timeout(message, self.request_timeout)
            .await
    }

    /// 요청 전송 후 응답 대기
    ///
    /// 새 correlation id를 발급해 슬롯을 등록한다. 응답/에러/연결 끊김/시간 초과 중
    /// 하나로 정확히 한 번 해소되고 슬롯은 제거된다.
    pub async fn request_with_timeout(
        &self,
        mut message: Envelope,
        timeout: Duration,
    ) -> Result<Envelope> {
        let correlation_id = Uuid::new_v4().to_string();
        message.correlation_id = Some(correlation_id.clone());
        let kind = message.kind;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if let Some(reason) = &pending.closed {
                return Err(Error::ConnectionLost(reason.clone()));
            }
            pending.slots.insert(correlation_id.clone(), tx);
        }

        if let Err(e) = self.send(message).await {
            self.pending.lock().slots.remove(&correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ConnectionLost(format!(
                "[{}] {} abandoned",
                self.label, kind
            ))),
            Err(_) => {
                self.pending.lock().slots.remove(&correlation_id);
                Err(Error::Timeout(format!(
                    "[{}] {} not answered within {:?}",
                    self.label, kind, timeout
                )))
            }
        }
    }

    /// fire-and-forget 전송
    ///
    /// 프레임 한도를 넘는 메시지는 `Protocol`로 거부되고 연결은 유지된다.
    pub async fn send(&self, message: Envelope) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionLost(format!("[{}] closed", self.label)));
        }
        let frame = encode_frame(&message)?;
        self.outbound
            .send(frame)
            .await
            .map_err(|_| Error::Transport(format!("[{}] writer stopped", self.label)))
    }

    /// 대기 중인 요청 수
    pub fn pending_count(&self) -> usize {
        self.pending.lock().slots.len()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// 연결 종료까지 대기
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|c| *c).await;
    }

    /// 로컬에서 연결을 닫는다
    pub fn close(&self) {
        self.mark_closed("closed locally".to_string());
    }

    /// 종료 처리: 모든 대기 슬롯을 `ConnectionLost`로 해소하고 태스크를 정리
    fn mark_closed(&self, reason: String) {
        let drained = {
            let mut pending = self.pending.lock();
            if pending.closed.is_some() {
                return;
            }
            pending.closed = Some(reason.clone());
            std::mem::take(&mut pending.slots)
        };

        if !drained.is_empty() {
            warn!(
                "[{}] failing {} in-flight request(s): {}",
                self.label,
                drained.len(),
                reason
            );
        }
        for (_, slot) in drained {
            let _ = slot.send(Err(Error::ConnectionLost(reason.clone())));
        }

        self.closed.send_replace(true);
        info!("[{}] connection closed: {}", self.label, reason);

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    async fn dispatch(self: &Arc<Self>, message: Envelope, handler: &Arc<dyn MessageHandler>) {
        match message.kind {
            MessageType::Handshake => self.on_handshake(message),
            MessageType::Response | MessageType::Error => self.resolve(message),
            kind => {
                if !self.handshake_received() {
                    warn!("[{}] {} received before handshake", self.label, kind);
                    if message.correlation_id.is_some() {
                        let reply = Envelope::error_to(
                            &message,
                            ErrorCode::InvalidParams,
                            "handshake required before any other message",
                        );
                        let _ = self.send(reply).await;
                    }
                    return;
                }

                if kind.is_request() {
                    // 요청 핸들러는 같은 연결로 중첩 요청을 보낼 수 있으므로 별도 태스크에서 실행
                    let conn = Arc::clone(self);
                    let handler = Arc::clone(handler);
                    tokio::spawn(async move {
                        if let Some(reply) = handler.handle(Arc::clone(&conn), message).await {
                            if let Err(e) = conn.send(reply).await {
                                debug!("[{}] reply to {} dropped: {}", conn.label, kind, e);
                            }
                        }
                    });
                } else if self.inbound.send(message).is_err() {
                    debug!("[{}] {} dropped: connection closing", self.label, kind);
                }
            }
        }
    }

    /// 디코딩할 수 없는 프레임은 건너뛰고 연결은 유지한다
    ///
    /// correlation id를 읽을 수 있으면 요청 쪽에 `INVALID_PARAMS`로 알린다. 깨진 것이
    /// 응답이면 이쪽의 대기 슬롯을 `Protocol`로 해소한다.
    async fn reject_undecodable(&self, body: &[u8], error: Error) {
        let raw: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
        let kind = raw.get("type").and_then(Value::as_str).unwrap_or("<unknown>");
        warn!("[{}] skipping undecodable {} frame: {}", self.label, kind, error);

        let Some(correlation_id) = raw.get("correlationId").and_then(Value::as_str) else {
            return;
        };

        if matches!(kind, "response" | "error") {
            let slot = self.pending.lock().slots.remove(correlation_id);
            if let Some(slot) = slot {
                let _ = slot.send(Err(error));
            }
            return;
        }

        let mut request = Envelope::new(MessageType::Error);
        request.correlation_id = Some(correlation_id.to_string());
        request.plugin_id = raw.get("pluginId").and_then(Value::as_str).map(str::to_string);
        let reply = Envelope::error_to(
            &request,
            ErrorCode::InvalidParams,
            format!("undecodable {} message: {}", kind, error),
        );
        if let Err(e) = self.send(reply).await {
            debug!("[{}] rejection dropped: {}", self.label, e);
        }
    }

    fn on_handshake(&self, message: Envelope) {
        if self.handshake_received() {
            debug!("[{}] duplicate handshake ignored", self.label);
            return;
        }
        match message.get("protocolVersion").and_then(Value::as_u64) {
            Some(v) if v != u64::from(PROTOCOL_VERSION) => warn!(
                "[{}] peer protocol version {} differs from {}",
                self.label, v, PROTOCOL_VERSION
            ),
            _ => {}
        }
        debug!("[{}] handshake received", self.label);
        self.peer_handshake.send_replace(Some(message.payload));
    }

    fn resolve(&self, message: Envelope) {
        let Some(correlation_id) = message.correlation_id.clone() else {
            warn!("[{}] {} without correlationId dropped", self.label, message.kind);
            return;
        };

        let slot = self.pending.lock().slots.remove(&correlation_id);
        match slot {
            Some(slot) => {
                let _ = slot.send(message.into_result());
            }
            None => debug!(
                "[{}] no pending request for correlationId {}",
                self.label, correlation_id
            ),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("label", &self.label)
            .field("handshake_received", &self.handshake_received())
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl HostLink for Connection {
    async fn request(&self, message: Envelope) -> Result<Envelope> {
        Connection::request(self, message).await
    }

    async fn request_with_timeout(&self, message: Envelope, timeout: Duration) -> Result<Envelope> {
        Connection::request_with_timeout(self, message, timeout).await
    }

    async fn send(&self, message: Envelope) -> Result<()> {
        Connection::send(self, message).await
    }

    async fn ensure_ready(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::ConnectionLost(format!("[{}] closed", self.label)))
        } else {
            Ok(())
        }
    }

    fn is_connected(&self) -> bool {
        !self.is_closed()
    }
}
