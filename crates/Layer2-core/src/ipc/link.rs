//! HostLink - Host로 가는 요청/전송 채널 추상화
//!
//! 로더, 서비스 디렉토리, 이벤트 허브는 연결 자체가 아니라 이 trait만 본다.
//! 운영 환경에서는 `HostSupervisor`가, 테스트에서는 `Connection`이 직접 구현한다.

use super::message::Envelope;
use async_trait::async_trait;
use eterm_foundation::Result;
use std::time::Duration;

#[async_trait]
pub trait HostLink: Send + Sync {
    /// 요청 전송 후 응답 대기 (에러 엔벨로프는 타입 있는 에러로)
    async fn request(&self, message: Envelope) -> Result<Envelope>;

    /// 제한 시간을 지정한 요청
    async fn request_with_timeout(&self, message: Envelope, timeout: Duration) -> Result<Envelope>;

    /// fire-and-forget 전송
    async fn send(&self, message: Envelope) -> Result<()>;

    /// 요청을 보낼 수 있는 상태를 보장 (필요하면 Host를 시작)
    async fn ensure_ready(&self) -> Result<()>;

    /// 현재 연결 여부
    fn is_connected(&self) -> bool;
}
