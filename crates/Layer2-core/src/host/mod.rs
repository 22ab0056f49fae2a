//! Host 프로세스 관리
//!
//! - `supervisor`: 앱 쪽. Host를 찾거나 띄우고, 연결을 감시하고, 크래시 시 재시작
//! - `launcher`: Host 실행 방식 (별도 프로세스 / 같은 프로세스 안)
//! - `process`: 소켓/PID 파일 아티팩트와 생존 확인
//! - `restart`: 윈도우 기반 재시작 한도
//! - `runtime`: Host 쪽. isolated 플러그인 인스턴스를 실행

mod launcher;
mod process;
mod restart;
mod runtime;

#[cfg(unix)]
mod supervisor;

pub use launcher::{EmbeddedLauncher, HostLauncher, HostProcess, ProcessLauncher};
pub use process::{process_alive, send_terminate, HostArtifacts, Liveness};
pub use restart::{RestartDecision, RestartTracker};
pub use runtime::HostRuntime;

#[cfg(unix)]
pub use supervisor::{HostProcessState, HostSupervisor, ResumeHook};
