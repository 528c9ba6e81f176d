use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tokio::signal;
use tracing::info;

use ferry_api::{Orchestrator, Settings};
use ferry_apply::{DecodeLimits, ManifestDecoder};
use ferry_github::GithubContents;
use ferry_kubehub::Cluster;
use ferry_server::WebhookState;

#[derive(Parser, Debug)]
#[command(name = "ferryd", version, about = "Reconcile GitHub pushes into a Kubernetes cluster")]
struct Cli {
    /// Address the webhook server binds
    #[arg(long, env = "FERRY_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Shared secret for X-Hub-Signature-256; unset disables verification
    #[arg(long, env = "WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    #[arg(long, env = "FERRY_GITHUB_API", default_value = ferry_github::DEFAULT_API_URL)]
    github_api: String,

    /// Namespace for manifests that do not set one
    #[arg(long, env = "FERRY_DEFAULT_NAMESPACE", default_value = ferry_apply::DEFAULT_NAMESPACE)]
    default_namespace: String,

    /// Use the pod's service account instead of kubeconfig
    #[arg(long, env = "FERRY_IN_CLUSTER", action = ArgAction::SetTrue)]
    in_cluster: bool,

    /// 0 re-runs discovery for every manifest
    #[arg(long, env = "FERRY_DISCOVERY_CACHE_TTL_SECS", default_value_t = 0)]
    discovery_cache_ttl_secs: u64,

    #[arg(long, env = "FERRY_FETCH_TIMEOUT_SECS", default_value_t = 10)]
    fetch_timeout_secs: u64,

    #[arg(long, env = "FERRY_DISCOVERY_TIMEOUT_SECS", default_value_t = 10)]
    discovery_timeout_secs: u64,

    #[arg(long, env = "FERRY_APPLY_TIMEOUT_SECS", default_value_t = 10)]
    apply_timeout_secs: u64,

    #[arg(long, env = "FERRY_DELIVERY_TIMEOUT_SECS", default_value_t = 120)]
    delivery_timeout_secs: u64,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            default_namespace: self.default_namespace.clone(),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            discovery_timeout: Duration::from_secs(self.discovery_timeout_secs),
            apply_timeout: Duration::from_secs(self.apply_timeout_secs),
            delivery_timeout: Duration::from_secs(self.delivery_timeout_secs),
            discovery_cache_ttl: Duration::from_secs(self.discovery_cache_ttl_secs),
        }
    }
}

fn init_tracing() {
    let env = std::env::var("FERRY_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("FERRY_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid FERRY_METRICS_ADDR; expected host:port");
        }
    }
}

async fn shutdown() {
    if signal::ctrl_c().await.is_ok() {
        info!("shutting down");
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let settings = cli.settings();

    let client = ferry_kubehub::connect(cli.in_cluster).await?;
    let cluster = Cluster::from_client(client, settings.discovery_cache_ttl);
    let content = GithubContents::new(&cli.github_api, cli.github_token.clone(), settings.fetch_timeout)?;
    let decoder = ManifestDecoder::new(settings.default_namespace.clone()).with_limits(DecodeLimits::from_env());
    let delivery_timeout = settings.delivery_timeout;
    let orchestrator = Orchestrator::new(&cluster, Arc::new(content), decoder, settings);

    let state = WebhookState::new(Arc::new(orchestrator), cli.webhook_secret.clone(), delivery_timeout);
    let app = ferry_server::router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    info!(addr = %cli.listen, in_cluster = cli.in_cluster, "ferryd listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown()).await.context("serving webhooks")?;
    Ok(())
}
