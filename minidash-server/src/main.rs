use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    http::{HeaderValue, header},
    routing::get,
};
use clap::{Parser, Subcommand};
use confique::Config;
use tokio::{net::TcpListener, signal, sync::Mutex};
use tower_http::{
    set_header::SetResponseHeaderLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::{info, trace};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::collector::MetricsCollector;

mod collector;
mod route;

#[derive(Debug, Parser)]
#[command(name = "minidash-server")]
struct Cli {
    #[arg(short, long, value_name = "FILE", help = "Path to config file")]
    config_path: Option<String>,
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve metrics over HTTP
    Serve,

    /// Collect metrics once and print them as JSON
    Dump,
}

#[derive(Config, Debug)]
struct Conf {
    /// Port to listen on
    #[config(env = "MINIDASH_PORT", default = 9090)]
    port: u16,

    /// Bind address
    #[config(env = "MINIDASH_ADDRESS", default = "127.0.0.1")]
    address: IpAddr,

    /// Network interface to report traffic for, all non-loopback ones when unset
    #[config(env = "MINIDASH_INTERFACE")]
    interface: Option<String>,
}

fn config(path: &str) -> anyhow::Result<Conf> {
    Conf::builder()
        .env()
        .file(path)
        .load()
        .map_err(|e| e.into())
}

#[derive(Clone, Debug)]
pub(crate) struct AppState {
    pub collector: Arc<Mutex<MetricsCollector>>,
}

fn app(state: AppState) -> Router {
    Router::new()
        .route(
            "/",
            get(route::metrics).fallback(route::method_not_allowed),
        )
        .route(
            "/metrics",
            get(route::metrics).fallback(route::method_not_allowed),
        )
        .route(
            "/health",
            get(route::health).fallback(route::method_not_allowed),
        )
        .fallback(route::not_found)
        .layer((
            TraceLayer::new_for_http(),
            // Prevent requests to hang forever
            TimeoutLayer::new(Duration::from_secs(10)),
            // CORS for browser dashboards
            SetResponseHeaderLayer::overriding(
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            ),
        ))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    trace!("using command line arguments {:?}", cli);

    let config = config(&cli.config_path.unwrap_or("config.toml".to_owned()))?;
    trace!("using config {:?}", config);

    let mut collector = MetricsCollector::try_new(config.interface.as_deref())?;

    match cli.commands {
        Commands::Serve => {
            let addr = SocketAddr::from((config.address, config.port));
            info!("listening on {addr}, try: curl http://{addr}/metrics");
            let listener = TcpListener::bind(addr).await?;

            let state = AppState {
                collector: Arc::new(Mutex::new(collector)),
            };

            axum::serve(listener, app(state))
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            info!("server stopped");
        }
        Commands::Dump => {
            tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
            let snapshot = collector.collect();
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                #[cfg(debug_assertions)]
                let default_log_level =
                    format!("{}=debug,tower_http=debug", env!("CARGO_CRATE_NAME")).into();

                #[cfg(not(debug_assertions))]
                let default_log_level =
                    format!("{}=info,tower_http=info", env!("CARGO_CRATE_NAME")).into();

                default_log_level
            }),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
