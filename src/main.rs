use clap::Parser;
use kube::client::Client;
use prometheus::Registry;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use spot::config::{ControllerConfig, OperatorConfig};
use spot::{build_controller, telemetry, webhook, workspace_controller};
use spot::{ContextData, KubeCluster, Metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    //init dotenv
    dotenv::dotenv().ok();
    let config = OperatorConfig::parse();
    telemetry::init(&config.log_level);

    let kubernetes_client = Client::try_default().await?;

    let registry = Registry::new();
    let workspace_metrics = Metrics::default().register(&registry)?;
    let build_metrics = workspace_metrics.clone();

    let controller_config = ControllerConfig::from(&config);
    let workspace_context = Arc::new(ContextData::new(
        Arc::new(KubeCluster::new(kubernetes_client.clone(), workspace_controller::CONTROLLER)),
        controller_config.clone(),
        workspace_metrics,
    ));
    let build_context = Arc::new(ContextData::new(
        Arc::new(KubeCluster::new(kubernetes_client.clone(), build_controller::CONTROLLER)),
        controller_config,
        build_metrics,
    ));

    let server = webhook::server(&config.server_address, registry)?;
    let tls = config.webhook_tls();
    let admission = webhook::admission_server(
        &config.webhook_address,
        tls.as_ref().map(|(cert, key)| (cert.as_path(), key.as_path())),
    )?;
    info!(
        server = %config.server_address,
        webhooks = %config.webhook_address,
        "starting the operator"
    );

    let _server = tokio::spawn(server);
    let _admission = tokio::spawn(admission);
    let _workspaces = tokio::spawn(workspace_controller::run(
        kubernetes_client.clone(),
        workspace_context,
    ));
    let _builds = tokio::spawn(build_controller::run(kubernetes_client, build_context));

    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_int = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sig_term.recv() => log::info!("SIGTERM received"),
        _ = sig_int.recv() => log::info!("SIGINT received"),
    }

    Ok(())
}
