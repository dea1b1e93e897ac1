//! Reverse proxy reporting pageviews of an upstream service to an analytics collector.
use std::net::SocketAddr;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pageview_feeder::config::Config;
use pageview_feeder::proxy::{router, Upstream};
use pageview_feeder::PageviewFeeder;

async fn shutdown_signal(shutdown: CancellationToken) {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
        _ = shutdown.cancelled() => {},
    };

    info!("shutting down");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init_from_env().expect("Invalid configuration:");

    // RUST_LOG wins over DEBUG_LOGGING.
    let default_level = if config.feeder.debug_logging {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .init();

    let shutdown = CancellationToken::new();

    let feeder = PageviewFeeder::new("pageview-proxy", config.feeder.clone(), &shutdown)
        .context("failed to create pageview feeder")?;
    let upstream = Upstream::new(&config.upstream_url, config.upstream_timeout.0)
        .context("failed to create upstream client")?;

    let recorder_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install metrics recorder")?;
    let metrics_listener = tokio::net::TcpListener::bind(config.metrics_address)
        .await
        .context("could not bind metrics port")?;
    let metrics_router = Router::new().route(
        "/metrics",
        get(move || std::future::ready(recorder_handle.render())),
    );
    let metrics_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let served = axum::serve(metrics_listener, metrics_router)
            .with_graceful_shutdown(async move { metrics_shutdown.cancelled().await })
            .await;
        if let Err(e) = served {
            tracing::error!("failed to serve metrics: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(config.address)
        .await
        .context("could not bind port")?;
    info!(
        "listening on {:?}, forwarding to {}",
        listener.local_addr()?,
        config.upstream_url
    );

    axum::serve(
        listener,
        router(upstream, feeder.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await
    .context("server failed")?;

    feeder.shutdown().await;
    info!("shutdown complete");

    Ok(())
}
