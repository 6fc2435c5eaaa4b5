use anyhow::Result;
use clap::Parser;
use rustls::crypto::{ring::default_provider, CryptoProvider};
use server::{serve_connections, SharedDriverAcceptor};
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vigil_core::{
    config::AppConfig,
    driver::{Driver, LocalDriver},
    interrupt::InterruptToken,
    remote::DriverHost,
    transport::HttpTransport,
};

/// Graceful shutdown timeout in seconds.
/// After this timeout, open connections are dropped.
const GRACEFUL_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Parser)]
#[command(name = "vigil", version, about = "Serves a node's chain driver to remote clients")]
struct Args {
    /// Configuration file.
    #[arg(short, long, env = "VIGIL_CONFIG", default_value = "config/config.toml")]
    config: PathBuf,

    /// Node URL, overriding `node.url`.
    #[arg(long)]
    node: Option<String>,

    /// Listener address, overriding the `host` section.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

/// Initializes the logging system based on the configuration.
///
/// `RUST_LOG` wins over `logging.level` when set.
fn init_logging(config: &AppConfig) {
    let filter = if let Ok(env_filter) = std::env::var("RUST_LOG") {
        if env_filter == "debug" {
            EnvFilter::new("warn,vigil_core=debug,server=debug,tests=debug")
        } else if env_filter == "trace" {
            EnvFilter::new("warn,vigil_core=trace,server=trace,tests=trace")
        } else {
            EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| {
                EnvFilter::new("warn,vigil_core=debug,server=debug,tests=debug")
            })
        }
    } else {
        let level = &config.logging.level;
        EnvFilter::try_new(format!("warn,vigil_core={level},server={level}"))
            .unwrap_or_else(|_| EnvFilter::new("warn,vigil_core=info,server=info"))
    };

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

async fn connect_driver(config: &AppConfig, token: &InterruptToken) -> Result<Arc<LocalDriver>> {
    let transport = HttpTransport::with_config(&config.node.url, config.node.http.clone())
        .map_err(|e| anyhow::anyhow!("Invalid node transport: {e}"))?;

    let mut builder = LocalDriver::builder()
        .tracker_config(config.tracker.clone())
        .cache_config(config.cache.clone())
        .driver_config(config.driver.clone())
        .interrupt_token(token.child());
    if let Some(genesis_id) = &config.node.genesis_id {
        builder = builder.expect_genesis(genesis_id.clone());
    }

    let driver = builder
        .connect(Arc::new(transport))
        .await
        .map_err(|e| anyhow::anyhow!("Node connection failed: {e}"))?;
    Ok(Arc::new(driver))
}

#[tokio::main]
async fn main() -> Result<()> {
    CryptoProvider::install_default(default_provider())
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse();
    let mut config = AppConfig::from_file(&args.config)
        .map_err(|e| anyhow::anyhow!("Config load failed: {e}"))?;
    if let Some(node) = args.node {
        config.node.url = node;
    }
    config.validate().map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    init_logging(&config);
    info!(node = %config.node.url, "starting driver host");

    let shutdown = InterruptToken::new();
    let driver = connect_driver(&config, &shutdown).await?;

    let addr = match args.bind {
        Some(addr) => addr,
        None => config.socket_addr().map_err(anyhow::Error::msg)?,
    };
    let listener = TcpListener::bind(addr).await?;
    info!(address = %addr, "driver host listening");

    let acceptor = SharedDriverAcceptor::new(Arc::clone(&driver) as Arc<dyn Driver>);
    let host = DriverHost::new(Arc::new(acceptor), shutdown.child());
    let mut server = tokio::spawn(serve_connections(listener, host, shutdown.clone()));

    tokio::select! {
        () = shutdown_signal() => {}
        result = &mut server => {
            if let Err(e) = result {
                error!(error = %e, "listener task failed");
            }
        }
    }

    shutdown.interrupt();
    driver.close();
    let grace = Duration::from_secs(GRACEFUL_SHUTDOWN_TIMEOUT_SECS);
    if !server.is_finished() && tokio::time::timeout(grace, &mut server).await.is_err() {
        warn!("graceful shutdown timed out, dropping open connections");
        server.abort();
    }
    driver.join().await;
    info!("server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install signal handler");
                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(
        "shutdown signal received, starting graceful shutdown (timeout: {}s)",
        GRACEFUL_SHUTDOWN_TIMEOUT_SECS
    );
}
