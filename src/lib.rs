#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! An nginx data-plane controller for the Kubernetes Gateway API.
//!
//! The controller watches GatewayClasses, Gateways, HTTPRoutes, and Services,
//! reduces them to a flat nginx configuration, writes that configuration to
//! disk, reloads nginx, and reports status conditions back to the cluster.

pub mod config;
mod events;
mod k8s;
mod nginx;
mod state;
mod status;

pub use self::config::Config;

use crate::events::EventLoop;
use crate::k8s::ResourceWatches;
use crate::state::ChangeProcessor;
use crate::status::{RealClock, Updater};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Timeout for connections to the Kubernetes API.
const CLUSTER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Runs the controller until `shutdown` fires.
///
/// Watcher tasks publish upsert/delete events onto a single channel; the
/// event loop consumes it, reconciles state, and fans out to nginx and the
/// status API. The loop finishes its in-flight reconcile before returning.
pub async fn run(config: Config, shutdown: watch::Receiver<bool>) -> Result<()> {
    let mut kube_config = kube::Config::infer()
        .await
        .context("failed to infer kubernetes config")?;
    kube_config.connect_timeout = Some(CLUSTER_TIMEOUT);

    let client = kube::Client::try_from(kube_config).context("failed to build kubernetes client")?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let watches = ResourceWatches::new(client.clone());
    let watchers = tokio::spawn(watches.watch(events_tx));

    let processor = ChangeProcessor::new(
        config.gateway_ctlr_name.clone(),
        config.gateway_class_name.clone(),
    );
    let nginx = nginx::Nginx::new(config.nginx_conf_path.clone());
    let status_updater = Updater::new(
        client,
        config.gateway_ctlr_name.clone(),
        Arc::new(RealClock),
    );

    info!("Starting event loop");
    let event_loop = EventLoop::new(processor, nginx, status_updater, events_rx);
    event_loop.run(shutdown).await;

    watchers.abort();
    if let Err(error) = watchers.await {
        if !error.is_cancelled() {
            warn!(%error, "Watcher task failed");
        }
    }

    Ok(())
}
