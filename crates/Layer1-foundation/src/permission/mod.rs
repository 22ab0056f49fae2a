//! Capability-based permission system
//!
//! - `tokens`: 권한 토큰 상수와 작업(메시지 타입) → 토큰 고정 테이블
//! - `checker`: 플러그인별 권한 부여 테이블 (CapabilityChecker)
//!
//! ## 사용 예시
//!
//! ```rust,ignore
//! use eterm_foundation::permission::{tokens, CapabilityChecker};
//!
//! let checker = CapabilityChecker::new();
//! checker.register("com.example.git", ["terminal.write"]);
//!
//! assert!(checker.has_capability("com.example.git", tokens::TERMINAL_WRITE));
//! checker.check_operation("com.example.git", "writeTerminal")?;
//! ```

mod checker;
pub mod tokens;

pub use checker::CapabilityChecker;
pub use tokens::required_capability;
