//! # Shutdown
//!
//! A single `watch` channel carries the shutdown request. The signal handler, the
//! leader lease renewer and tests can all flip it; the watch loop and every
//! in-flight store call observe it.

use crate::controller::server::ServerState;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Create the shutdown channel, initially "keep running"
#[must_use]
pub fn shutdown_channel() -> (Arc<watch::Sender<bool>>, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (Arc::new(tx), rx)
}

/// Resolve on SIGINT, or SIGTERM on unix
async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Mark the server not ready and request shutdown when SIGTERM/SIGINT arrives
pub fn spawn_signal_handler(
    shutdown: Arc<watch::Sender<bool>>,
    server_state: Arc<ServerState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");

        server_state.set_ready(false);
        shutdown.send_replace(true);
        info!("Marked server as not ready, aborting in-flight reconciliations...");
    })
}
