//! kube-guard server entrypoint

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kube_guard::providers::{
    CloudIdentityApi, ClusterRbacApi, KubeClusterApi, MockCloud, MockCluster, OfflineCloudApi,
};
use kube_guard::server::{serve, AppState};

/// kube-guard - audit EKS IAM attachments against Kubernetes RBAC
#[derive(Parser, Debug)]
#[command(name = "kube-guard", version, about, long_about = None)]
struct Cli {
    /// Address to serve the API on
    #[arg(long, env = "KUBE_GUARD_BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind_addr: SocketAddr,

    /// TTL for cached audit results, in seconds
    #[arg(long, env = "KUBE_GUARD_CACHE_TTL_SECS", default_value = "60")]
    cache_ttl_secs: u64,

    /// Serve in-memory fixture data instead of talking to a cluster
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let (cluster_api, cloud_api): (Arc<dyn ClusterRbacApi>, Arc<dyn CloudIdentityApi>) =
        if cli.mock {
            tracing::warn!("serving in-memory fixture data (--mock)");
            (
                Arc::new(MockCluster::with_fixtures()),
                Arc::new(MockCloud::with_fixtures()),
            )
        } else {
            let client = Client::try_default()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
            tracing::info!(
                "no cloud identity client configured; access-entry and pod-identity \
                 attachments will be empty"
            );
            (Arc::new(KubeClusterApi::new(client)), Arc::new(OfflineCloudApi))
        };

    let state = AppState::new(
        cluster_api,
        cloud_api,
        Duration::from_secs(cli.cache_ttl_secs),
    );

    serve(cli.bind_addr, state)
        .await
        .map_err(|e| anyhow::anyhow!("Server failed: {}", e))
}
