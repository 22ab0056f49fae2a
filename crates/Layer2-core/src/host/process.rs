//! Host 프로세스 아티팩트 (PID 파일, 소켓 파일)와 생존 확인

use eterm_foundation::{Error, HostConfig, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 생존 확인 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// PID가 살아 있고 소켓도 있다
    Alive(u32),

    /// 아티팩트 일부만 남아 있다 (정리 필요)
    Stale,

    /// 아무것도 없다
    Absent,
}

/// 잘 알려진 PID/소켓 경로
#[derive(Debug, Clone)]
pub struct HostArtifacts {
    socket_path: PathBuf,
    pid_file: PathBuf,
}

impl HostArtifacts {
    pub fn new(socket_path: impl Into<PathBuf>, pid_file: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            pid_file: pid_file.into(),
        }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(&config.socket_path, &config.pid_file)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// 기록된 PID
    pub fn read_pid(&self) -> Option<u32> {
        std::fs::read_to_string(&self.pid_file)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// PID 파일 기록 (Host 측)
    pub fn write_pid(&self, pid: u32) -> Result<()> {
        if let Some(parent) = self.pid_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.pid_file, pid.to_string())?;
        Ok(())
    }

    /// PID 0-signal 확인 + 소켓 존재 확인
    pub fn probe(&self) -> Liveness {
        let pid = self.read_pid();
        let socket = self.socket_exists();

        match pid {
            Some(pid) if socket && process_alive(pid) => Liveness::Alive(pid),
            None if !socket && !self.pid_file.exists() => Liveness::Absent,
            _ => Liveness::Stale,
        }
    }

    /// 소켓/PID 파일 모두 제거
    pub fn cleanup(&self) {
        for path in [&self.socket_path, &self.pid_file] {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }

    /// PID 파일의 프로세스에 종료 신호를 보내고 아티팩트 정리
    ///
    /// 신호를 보낸 PID를 돌려준다 (PID 파일이 없으면 None).
    pub fn terminate(&self) -> Result<Option<u32>> {
        let pid = self.read_pid();
        if let Some(pid) = pid {
            if pid == std::process::id() {
                warn!("PID file points at this process, not signalling");
            } else if process_alive(pid) {
                info!("Sending SIGTERM to host (pid {})", pid);
                send_terminate(pid)?;
            } else {
                debug!("Host pid {} already gone", pid);
            }
        }
        self.cleanup();
        Ok(pid)
    }
}

/// 0-signal 생존 확인 (EPERM도 살아 있는 것으로)
#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0은 권한/존재만 검사하고 아무것도 전달하지 않는다
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
pub fn send_terminate(pid: u32) -> Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| Error::Internal(format!("invalid pid {}", pid)))?;
    // SAFETY: 유효한 pid에 SIGTERM 전달
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(Error::Io(std::io::Error::last_os_error()))
    }
}

#[cfg(not(unix))]
pub fn send_terminate(pid: u32) -> Result<()> {
    Err(Error::NotImplemented(format!(
        "signal delivery to pid {} is unix-only",
        pid
    )))
}
