use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use trackflow_core::{BigQueryClient, Dashboard, DashboardConfig};

#[derive(Parser, Debug)]
#[command(name = "trackflow-dashboard")]
#[command(about = "Serve the music analysis dashboard", long_about = None)]
struct Args {
    /// TOML file with dashboard settings. Flags override file values.
    #[arg(short, long, env = "TRACKFLOW_DASHBOARD_CONFIG")]
    config: Option<PathBuf>,
    /// Address to listen on (default 127.0.0.1:8501)
    #[arg(short, long)]
    bind: Option<String>,
    /// Project billed for dashboard queries
    #[arg(long)]
    project: Option<String>,
    /// Fully qualified project.dataset.view to analyse
    #[arg(long)]
    view: Option<String>,
    /// Seconds a query result stays cached
    #[arg(long)]
    cache_ttl: Option<u64>,
    #[arg(long)]
    warehouse_endpoint: Option<String>,
}

fn init_tracing() {
    let log_format = std::env::var("TRACKFLOW_LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::INFO.into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::INFO.into()),
            )
            .init();
    }
}

fn config_from(args: &Args) -> Result<DashboardConfig> {
    let mut cfg = DashboardConfig::load(args.config.as_deref())?;
    if let Some(bind) = &args.bind {
        cfg.bind_addr = bind.clone();
    }
    if let Some(project) = &args.project {
        cfg.project = project.clone();
    }
    if let Some(view) = &args.view {
        cfg.analysis_view = view.clone();
    }
    if let Some(ttl) = args.cache_ttl {
        cfg.cache_ttl_secs = ttl;
    }
    if let Some(endpoint) = &args.warehouse_endpoint {
        cfg.warehouse_endpoint = Some(endpoint.clone());
    }
    cfg.validate()?;
    Ok(cfg)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = config_from(&args)?;

    let mut warehouse = BigQueryClient::from_env(cfg.project.clone())?;
    if let Some(endpoint) = &cfg.warehouse_endpoint {
        warehouse = warehouse.with_endpoint(endpoint.clone());
    }
    let dashboard = Arc::new(Dashboard::new(Arc::new(warehouse), &cfg));
    let app = trackflow_server::router(dashboard);

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("bind {}", cfg.bind_addr))?;
    info!(
        addr = %cfg.bind_addr,
        view = %cfg.analysis_view,
        cache_ttl_secs = cfg.cache_ttl_secs,
        "dashboard listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
