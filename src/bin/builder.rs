use anyhow::Context;
use clap::Parser;
use kube::client::Client;
use tracing::error;

use spot::worker::{self, WorkerConfig};
use spot::{telemetry, KubeCluster};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = WorkerConfig::parse();
    telemetry::init(&config.log_level);

    let client = Client::try_default()
        .await
        .context("Failed to create client")?;
    let cluster = KubeCluster::new(client, "spot-builder");

    if let Err(e) = worker::run(&cluster, &config).await {
        error!(build = %config.build_reference, error = %e, "build failed");
        return Err(e).context(format!("building {}", config.build_reference));
    }
    Ok(())
}
