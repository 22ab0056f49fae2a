//! 앱 쪽 확장 서브시스템 조립
//!
//! - `routes`: 권한 게이트가 걸린 앱 라우터 (UI 제어, 터미널, 이벤트, 서비스)
//! - `host`: `ExtensionHost` 파사드와 빌더

mod host;
mod routes;

pub use host::{ExtensionHost, ExtensionHostBuilder};
pub use routes::{app_router, UI_COMMANDS};
