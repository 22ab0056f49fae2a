//! ETerm Extension Host - isolated 플러그인 실행 프로세스
//!
//! 앱이 `--socket <path> --pid-file <path> --lifecycle <hint>`로 띄운다.
//! `daemon`이면 신호가 올 때까지 연결을 받고, `attached`면 첫 연결이 끊길 때 종료한다.

mod plugins;

use clap::{Parser, ValueEnum};
use eterm_core::host::{HostArtifacts, HostRuntime};
use eterm_core::ipc::{Connection, ConnectionOptions, IpcServer};
use eterm_foundation::{ENV_PARENT_PID, HostConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ETerm extension host
#[derive(Parser, Debug)]
#[command(name = "eterm-host")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Socket path to listen on
    #[arg(long)]
    socket: Option<PathBuf>,

    /// PID file path
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// How long to stay alive
    #[arg(long, value_enum, default_value_t = Lifecycle::Daemon)]
    lifecycle: Lifecycle,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Lifecycle {
    /// Accept connections until SIGTERM / ctrl-c
    Daemon,

    /// Exit when the first connection closes
    Attached,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging (stdout은 앱이 무시하므로 stderr로)
    let log_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // 인자가 없으면 기본 위치 사용
    let defaults = HostConfig::default();
    let socket = args.socket.unwrap_or(defaults.socket_path);
    let pid_file = args.pid_file.unwrap_or(defaults.pid_file);
    let artifacts = HostArtifacts::new(&socket, &pid_file);

    if let Ok(parent) = std::env::var(ENV_PARENT_PID) {
        info!("Started by pid {}", parent);
    }

    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel::<Arc<Connection>>();
    let runtime = Arc::new(HostRuntime::new(plugins::registry()));
    let server = IpcServer::bind(&socket, runtime, ConnectionOptions::new("host"))?
        .on_accept(move |conn| {
            let _ = accepted_tx.send(conn);
        });
    artifacts.write_pid(std::process::id())?;
    info!(
        "Extension host ready (pid {}, lifecycle {:?})",
        std::process::id(),
        args.lifecycle
    );

    let result = server.run(shutdown(args.lifecycle, accepted_rx)).await;

    artifacts.cleanup();
    info!("Extension host exited");
    result.map_err(Into::into)
}

/// 종료 조건: 신호, 또는 `attached`일 때 첫 연결 종료
async fn shutdown(lifecycle: Lifecycle, mut accepted: mpsc::UnboundedReceiver<Arc<Connection>>) {
    let first_closed = async move {
        match lifecycle {
            Lifecycle::Daemon => std::future::pending::<()>().await,
            Lifecycle::Attached => {
                if let Some(conn) = accepted.recv().await {
                    conn.closed().await;
                    info!("Attached connection {} closed", conn.label());
                }
            }
        }
    };

    tokio::select! {
        _ = first_closed => {}
        _ = terminate_signal() => {}
    }
}

async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = term.recv() => info!("Received SIGTERM"),
                _ = tokio::signal::ctrl_c() => info!("Received ctrl-c"),
            }
        }
        Err(e) => {
            warn!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

