//! Binary entry point: loads configuration, installs structured logging,
//! starts the Prometheus exporter, and runs the agent until shutdown.

use std::net::SocketAddr;

use event_aggregator_agent::{AggregatorAgent, CancellationToken, Config};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{EnvFilter, Layer as _, fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    init_logging(&config.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.worker_pool_size.max(1))
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting telemetry event aggregator agent"
    );

    let metrics_addr: SocketAddr = config.metrics_listen_addr.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()?;
    tracing::info!(%metrics_addr, "prometheus exporter listening");

    let cancel = CancellationToken::new();
    let liveness_cancel = cancel.clone();
    let liveness_interval = config.liveness_check_interval;
    let liveness_task = tokio::spawn(async move {
        event_aggregator_agent::liveness::run(liveness_interval, liveness_cancel).await;
    });

    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown_cancel.cancel();
        }
    });

    let agent = AggregatorAgent::new(config)?;
    let result = agent.run(cancel.clone()).await;
    cancel.cancel();
    liveness_task.await.ok();

    result?;
    tracing::info!("aggregator agent stopped");
    Ok(())
}

fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));
    let layer = Layer::new().with_target(true).with_filter(env_filter);
    tracing_subscriber::registry().with(layer).init();
}
