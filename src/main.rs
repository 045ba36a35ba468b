use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use image_gateway::proxy::OriginGate;
use image_gateway::{api, cli, config, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // Export spans over OTLP only when a collector is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "image-gateway"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "image_gateway=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::CheckOrigin { url }) => {
            let gate = OriginGate::new(&cfg.allowed_image_hosts);
            if gate.is_allowed_origin(&url) {
                println!("allowed: {}", url);
            } else {
                let mut hosts: Vec<&str> = gate.hosts().collect();
                hosts.sort_unstable();
                println!("blocked: {} (allowed hosts: {})", url, hosts.join(", "));
            }
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    if cfg.infip_api_key.is_empty() {
        tracing::warn!("INFIP_API_KEY is not set; Infip generation requests will be rejected upstream");
    }
    if cfg.vasarai_api_key.is_empty() {
        tracing::warn!("VASARAI_API_KEY is not set; VasarAI generation requests will be rejected upstream");
    }
    if cfg.api_secret.is_none() {
        tracing::warn!("API_SECRET is not set; public routes are unauthenticated");
    }

    let sweep_every = cfg.sweep_interval();
    let state = Arc::new(AppState::new(cfg)?);

    tracing::info!(
        ttl_secs = state.config.token_ttl_secs,
        max_access = state.config.token_max_access,
        capacity = state.config.token_store_capacity,
        hosts = ?state.config.allowed_image_hosts,
        "image token store ready"
    );

    let sweeper = jobs::sweep::spawn(state.clone(), sweep_every);
    tracing::info!("Background sweep started (every {}s)", sweep_every.as_secs());

    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("image gateway listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
