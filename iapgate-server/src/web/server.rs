use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket};
use tokio::signal::unix::SignalKind;

use crate::config::Config;
use crate::state::State;
use crate::web::app::App;

/// Connections the kernel queues for us before it starts refusing them.
const LISTEN_BACKLOG: u32 = 1024;

/// Runs the iapgate HTTP server until the process is asked to terminate.
///
/// Storage and the assertion validator are set up before the port is opened, so a misconfigured
/// server never accepts connections. Requests in flight are allowed to complete before returning.
pub async fn server(config: Config) -> Result<()> {
    let addr = config.http_addr();
    let state = State::new(config).await?;
    let listener = bind(addr)?;

    tracing::info!(
        %addr,
        backend = state.service.backend_name(),
        audience = %state.config.auth.audience,
        "serving objects"
    );

    let serving = tokio::spawn(App::new(state).graceful_shutdown(true).serve(listener));
    wait_for_termination().await;

    let result = match serving.await {
        Ok(result) => result,
        Err(join_error) => Err(join_error.into()),
    };
    tracing::info!("shutdown complete");
    result
}

/// Blocks until a termination signal arrived and all shutdown guards have been released.
async fn wait_for_termination() {
    tokio::spawn(async {
        elegant_departure::get_shutdown_guard().wait().await;
        tracing::info!("draining in-flight requests");
    });

    elegant_departure::tokio::depart()
        .on_termination()
        .on_sigint()
        .on_signal(SignalKind::hangup())
        .on_signal(SignalKind::quit())
        .await;
}

/// Opens the listening socket on `addr`.
fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .context("failed to create TCP socket")?;

    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuseport(true)?;

    socket
        .bind(addr)
        .and_then(|()| socket.listen(LISTEN_BACKLOG))
        .with_context(|| format!("cannot listen on {addr}, check `PORT` and `IAPGATE__HOST`"))
}
