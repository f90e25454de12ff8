//! `r0n-https` binary: load the configuration, start the HTTPS server and
//! run until interrupted. `SIGHUP` reloads certificates.

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use r0n_https::config::{AppConfig, ConfigLoader, LogFormat, LoggingConfig};
use r0n_https::module::{ModuleConfig, ModuleContract};
use r0n_https::modules::https_server::HttpsServer;

#[derive(Parser)]
#[command(
    name = "r0n-https",
    version,
    about = "HTTPS server with SNI-based certificate selection"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "r0n-https.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let loader = ConfigLoader::with_default_validators();
    let app = loader.load(&cli.config)?;
    init_tracing(&app.logging);

    if cli.check {
        info!(path = %cli.config.display(), "Configuration is valid");
        return Ok(());
    }

    info!(
        name = %app.server.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting"
    );

    let mut server = HttpsServer::new();
    server.init(module_config(&app)?)?;
    server.start()?;

    for addr in server.local_addrs() {
        info!(addr = %addr, "Accepting connections");
    }

    wait_for_shutdown(&mut server, &loader, &cli.config).await?;

    server.stop()?;
    info!(
        metrics = %server.metrics().to_prometheus("r0n_https"),
        "Shut down"
    );
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("r0n_https={}", logging.level)));

    let fmt_layer = match logging.format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Pretty => tracing_subscriber::fmt::layer().pretty().boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();
}

fn module_config(app: &AppConfig) -> Result<ModuleConfig, serde_json::Error> {
    Ok(ModuleConfig::from_json(serde_json::to_string(&app.https)?))
}

/// Re-read the configuration file and hand it to the server.
///
/// Failures are logged and the running configuration is kept.
fn reload(server: &mut HttpsServer, loader: &ConfigLoader, path: &Path) {
    let result = loader
        .load(path)
        .map_err(|e| e.to_string())
        .and_then(|app| module_config(&app).map_err(|e| e.to_string()))
        .and_then(|config| server.reload(config).map_err(|e| e.to_string()));

    match result {
        Ok(()) => info!(path = %path.display(), "Configuration reloaded"),
        Err(e) => error!(path = %path.display(), error = %e, "Reload failed"),
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(
    server: &mut HttpsServer,
    loader: &ConfigLoader,
    path: &Path,
) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut terminate = signal(SignalKind::terminate())?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, shutting down");
                return Ok(());
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM, shutting down");
                return Ok(());
            },
            _ = hangup.recv() => {
                info!("Received SIGHUP, reloading");
                reload(server, loader, path);
            },
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(
    _server: &mut HttpsServer,
    _loader: &ConfigLoader,
    _path: &Path,
) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");
    Ok(())
}
