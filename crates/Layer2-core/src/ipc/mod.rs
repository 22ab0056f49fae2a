//! IPC Transport & Message Router
//!
//! 앱과 Host 사이의 로컬 소켓 통신:
//! - 4바이트 길이 프레이밍 + JSON 엔벨로프
//! - correlation id 기반 요청/응답
//! - 메시지 타입별 디스패치 (특권 타입은 권한 게이트 통과 후)
//!
//! ```text
//! App                                   Host
//!  │ ── handshake {appPid} ───────────▶ │
//!  │ ◀─────────── handshake {hostPid} ─ │
//!  │ ── activate (correlationId) ─────▶ │
//!  │ ◀──────────── response / error ─── │
//!  │ ◀── writeTerminal / emit / ... ─── │  (fire-and-forget)
//! ```

mod codec;
mod connection;
mod link;
mod message;
mod router;

#[cfg(unix)]
mod client;
#[cfg(unix)]
mod server;

pub use codec::{
    decode_frame, encode_frame, read_frame, read_frame_body, write_frame, MAX_FRAME_LEN,
};
pub use connection::{Connection, ConnectionOptions, MessageHandler};
pub use link::HostLink;
pub use message::{Envelope, MessageType, PROTOCOL_VERSION};
pub use router::Router;

#[cfg(unix)]
pub use client::IpcClient;
#[cfg(unix)]
pub use server::IpcServer;
