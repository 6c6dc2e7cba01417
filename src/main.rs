//! # PVC Reclaimer
//!
//! A Kubernetes controller that lets a recreated `PersistentVolumeClaim` rebind to
//! the retained `PersistentVolume` its predecessor used.
//!
//! ## Overview
//!
//! When a claim is deleted and recreated under the same name, the retained volume
//! still records the old claim's UID. The new claim stays `Pending` with an
//! "already bound" condition. This controller:
//!
//! 1. **Watches claims** - Admits creations and transitions into `Pending`
//! 2. **Detects the conflict** - Looks for the "already bound" condition message
//! 3. **Releases the volume** - Clears `claimRef.uid` and `claimRef.resourceVersion`
//!    on the first `Retain` + `Released` volume whose claimRef names a different
//!    claim (the deleted predecessor)
//!
//! The PV binder then completes the binding on its own.
//!
//! ## Features
//!
//! - **Namespace scoping**: `--watch-namespace` restricts the claim watch
//! - **Leader election**: `--leader-elect` for multi-replica deployments
//! - **Prometheus metrics**: Exposes metrics for monitoring and observability
//! - **Health probes**: HTTP endpoints for liveness and readiness checks

use anyhow::{Context, Result};
use clap::Parser;
use pvc_reclaimer::config::{Args, ControllerConfig};
use pvc_reclaimer::observability::logging::init_tracing;
use pvc_reclaimer::runtime::{
    initialize, run_watch_loop, shutdown_channel, spawn_signal_handler, InitializationResult,
    LeaderElector,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ControllerConfig::from_args(args).context("Invalid configuration")?;
    init_tracing(config.log_format)?;

    let (shutdown_tx, mut shutdown_rx) = shutdown_channel();

    let InitializationResult {
        client,
        reconciler,
        server_state,
    } = initialize(config.clone(), shutdown_rx.clone()).await?;

    spawn_signal_handler(Arc::clone(&shutdown_tx), Arc::clone(&server_state));

    let renewal = match config.leader_election {
        Some(leader_config) => {
            let mut elector = LeaderElector::new(client.clone(), leader_config);
            if !elector.acquire(&mut shutdown_rx).await? {
                info!("Shutdown requested before acquiring leadership");
                return Ok(());
            }
            Some(elector.spawn_renewal(Arc::clone(&shutdown_tx)))
        }
        None => None,
    };

    run_watch_loop(client, reconciler, server_state, shutdown_rx).await?;

    // Stops the renewer if the loop exited for another reason
    shutdown_tx.send_replace(true);
    if let Some(renewal) = renewal {
        match renewal.await {
            Ok(mut elector) => {
                if let Err(e) = elector.release().await {
                    warn!("Failed to release leader lease: {}", e);
                }
            }
            Err(e) => warn!("Leader lease renewer exited abnormally: {}", e),
        }
    }

    Ok(())
}
