//! 프레이밍: 4바이트 big-endian 길이 + UTF-8 JSON 엔벨로프

use super::message::Envelope;
use eterm_foundation::{Error, Result};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// 프레임 최대 크기 (16 MiB)
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// 길이 접두어를 포함한 프레임 바이트로 인코딩
///
/// 본문이 `MAX_FRAME_LEN`을 넘으면 `Protocol` (아무것도 쓰지 않는다).
pub fn encode_frame(message: &Envelope) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!(
            "outbound {} frame too large: {} bytes",
            message.kind,
            body.len()
        )));
    }

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// 프레임 본문을 엔벨로프로 디코딩
pub fn decode_frame(body: &[u8]) -> Result<Envelope> {
    serde_json::from_slice(body).map_err(|e| Error::Protocol(format!("malformed envelope: {}", e)))
}

/// 엔벨로프 하나를 프레임으로 기록
pub async fn write_frame<W>(writer: &mut W, message: &Envelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// 프레임 본문 하나를 읽는다 (디코딩 전 바이트)
///
/// 프레임 경계에서 EOF면 `Ok(None)` (정상 종료). 길이 접두어나 본문 중간의 EOF는 `ConnectionLost`.
pub async fn read_frame_body<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::ConnectionLost(format!(
                "peer closed mid-frame ({} of 4 length bytes)",
                filled
            )));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Protocol(format!("frame too large: {} bytes", len)));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::ConnectionLost("peer closed mid-frame".to_string())
        } else {
            Error::Io(e)
        }
    })?;
    Ok(Some(body))
}

/// 프레임 하나를 읽어 디코딩
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Envelope>>
where
    R: AsyncRead + Unpin,
{
    match read_frame_body(reader).await? {
        Some(body) => decode_frame(&body).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::message::MessageType;

    #[tokio::test]
    async fn test_frames_in_sequence() {
        let (mut a, mut b) = tokio::io::duplex(1024);

        let first = Envelope::new(MessageType::Emit).with("event", "tab.opened");
        let second = Envelope::app_handshake();
        write_frame(&mut a, &first).await.unwrap();
        write_frame(&mut a, &second).await.unwrap();
        drop(a);

        assert_eq!(read_frame(&mut b).await.unwrap(), Some(first));
        assert_eq!(read_frame(&mut b).await.unwrap(), Some(second));
        assert_eq!(read_frame(&mut b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_length_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32((MAX_FRAME_LEN + 1) as u32).await.unwrap();

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_truncated_frame() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(32).await.unwrap();
        a.write_all(b"{\"type\"").await.unwrap();
        drop(a);

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(_)));
    }

    #[tokio::test]
    async fn test_eof_inside_length_prefix() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0, 0]).await.unwrap();
        drop(a);

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionLost(m) if m.contains("mid-frame")));
    }

    #[test]
    fn test_oversized_outbound_rejected_before_write() {
        let huge = Envelope::new(MessageType::WriteTerminal).with("text", "x".repeat(MAX_FRAME_LEN));

        let err = encode_frame(&huge).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_garbage_body_is_protocol_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(4).await.unwrap();
        a.write_all(b"nope").await.unwrap();

        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
