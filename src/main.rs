use anyhow::Result;
use ngx_gateway::Config;
use std::path::PathBuf;
use structopt::StructOpt;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "ngx-gateway",
    about = "An nginx controller for the Kubernetes Gateway API"
)]
struct Args {
    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Runs the controller.
    Controller {
        /// The name this controller announces, as referenced by GatewayClass
        /// resources (e.g. gateway.nginx.org/nginx-gateway).
        #[structopt(long = "gateway-ctlr-name")]
        gateway_ctlr_name: String,

        /// The GatewayClass resource to reconcile.
        #[structopt(long = "gatewayclass")]
        gateway_class_name: String,

        /// Where the rendered nginx configuration is written.
        #[structopt(long, default_value = "/etc/nginx/conf.d/gateway.conf")]
        nginx_conf_path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let Args { command } = Args::from_args();
    let Command::Controller {
        gateway_ctlr_name,
        gateway_class_name,
        nginx_conf_path,
    } = command;

    let config = Config::new(gateway_ctlr_name, gateway_class_name, nginx_conf_path)?;
    info!(
        controller = %config.gateway_ctlr_name,
        gatewayclass = %config.gateway_class_name,
        "Starting controller",
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    ngx_gateway::run(config, shutdown_rx).await
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}
