//! # Service Directory
//!
//! 플러그인이 이름 붙은 서비스를 노출하고, main/isolated 경계를 넘어 호출하게 한다.
//!
//! ```text
//! caller ──call(target, name)──▶ ServiceDirectory
//!                                   │ target == "core"   → CoreServices
//!                                   │ entry.runMode main → HandlerTable
//!                                   │ entry.runMode isolated → serviceCall ──▶ Host
//!                                   └ 항목 없음 → SERVICE_NOT_FOUND
//! ```

pub mod core;
mod directory;
mod handlers;

pub use self::core::{CoreServices, CORE_NAMESPACE};
pub use directory::{ServiceDirectory, ServiceEntry};
pub use handlers::{service_key, HandlerTable, ServiceHandler};
