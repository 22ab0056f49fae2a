//! Error types for the ETerm extension host
//!
//! 모든 에러를 중앙에서 관리하고, IPC 와이어의 에러 코드와 상호 변환한다.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
// ErrorCode - 와이어 에러 코드 (닫힌 집합)
// ============================================================================

/// `error` 엔벨로프의 `code` 필드에 들어가는 고정 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PermissionDenied,
    InvalidParams,
    NotFound,
    ServiceNotFound,
    NotImplemented,
    UnknownPlugin,
    Timeout,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::NotFound => "NOT_FOUND",
            Self::ServiceNotFound => "SERVICE_NOT_FOUND",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::UnknownPlugin => "UNKNOWN_PLUGIN",
            Self::Timeout => "TIMEOUT",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "PERMISSION_DENIED" => Some(Self::PermissionDenied),
            "INVALID_PARAMS" => Some(Self::InvalidParams),
            "NOT_FOUND" => Some(Self::NotFound),
            "SERVICE_NOT_FOUND" => Some(Self::ServiceNotFound),
            "NOT_IMPLEMENTED" => Some(Self::NotImplemented),
            "UNKNOWN_PLUGIN" => Some(Self::UnknownPlugin),
            "TIMEOUT" => Some(Self::Timeout),
            "INTERNAL_ERROR" => Some(Self::InternalError),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Error
// ============================================================================

/// Extension host 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 전송 계층 (Supervisor 재시작 정책으로 복구)
    // ========================================================================
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // ========================================================================
    // 권한 (재시도 없음, 항상 호출자에게 반환)
    // ========================================================================
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    // ========================================================================
    // 서비스 라우팅
    // ========================================================================
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// 상대 프로세스가 돌려준 에러 (알 수 없는 코드 포함)
    #[error("Remote error {code}: {message}")]
    Remote { code: String, message: String },

    // ========================================================================
    // Host 프로세스
    // ========================================================================
    #[error("Host crashed: {0}")]
    HostCrashed(String),

    #[error("Host not running")]
    HostNotRunning,

    // ========================================================================
    // 로드 시점
    // ========================================================================
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 재시도 가능한 에러인지 확인 (전송 계층 에러만)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::ConnectionLost(_) | Error::Transport(_)
        )
    }

    /// 와이어 에러 코드
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::PermissionDenied(_) => ErrorCode::PermissionDenied,
            Error::UnknownPlugin(_) => ErrorCode::UnknownPlugin,
            Error::InvalidParams(_) | Error::Manifest(_) | Error::Json(_) => {
                ErrorCode::InvalidParams
            }
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::ServiceNotFound(_) => ErrorCode::ServiceNotFound,
            Error::NotImplemented(_) => ErrorCode::NotImplemented,
            Error::Timeout(_) => ErrorCode::Timeout,
            Error::Remote { code, .. } => {
                ErrorCode::parse(code).unwrap_or(ErrorCode::InternalError)
            }
            _ => ErrorCode::InternalError,
        }
    }

    /// 와이어에 실을 메시지 (Display 접두어 없이 원문만)
    pub fn wire_message(&self) -> String {
        match self {
            Error::PermissionDenied(m)
            | Error::UnknownPlugin(m)
            | Error::InvalidParams(m)
            | Error::NotFound(m)
            | Error::ServiceNotFound(m)
            | Error::NotImplemented(m)
            | Error::Timeout(m) => m.clone(),
            Error::Remote { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// 와이어 에러 코드에서 복원
    pub fn from_wire(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match ErrorCode::parse(code) {
            Some(ErrorCode::PermissionDenied) => Error::PermissionDenied(message),
            Some(ErrorCode::InvalidParams) => Error::InvalidParams(message),
            Some(ErrorCode::NotFound) => Error::NotFound(message),
            Some(ErrorCode::ServiceNotFound) => Error::ServiceNotFound(message),
            Some(ErrorCode::NotImplemented) => Error::NotImplemented(message),
            Some(ErrorCode::UnknownPlugin) => Error::UnknownPlugin(message),
            Some(ErrorCode::Timeout) => Error::Timeout(message),
            _ => Error::Remote {
                code: code.to_string(),
                message,
            },
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}
