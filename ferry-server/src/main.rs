use anyhow::Result;
use clap::Parser;
use ferry_core::config::ServerConfig;
use ferry_server::Server;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ferry-server")]
#[command(about = "Line-protocol TCP server with sessions and file transfer")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "ferry.toml")]
    config: PathBuf,

    /// Override the bind address
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Override the bind port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the stored-files directory
    #[arg(short, long)]
    files_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        ServerConfig::load(&args.config)?
    } else {
        // First run: write the defaults so they can be edited.
        let config = ServerConfig::default();
        config.save(&args.config)?;
        config
    };

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(dir) = args.files_dir {
        config.storage.files_dir = dir;
    }
    config.validate()?;

    init_logging(&config, args.debug)?;

    info!("Ferry server starting");
    info!(config = %args.config.display(), "configuration loaded");
    info!(
        bind = %config.bind_addr(),
        max_clients = config.server.max_clients,
        files_dir = %config.storage.files_dir.display(),
        "listener settings"
    );

    let server = Server::bind(config).await?;
    info!(addr = %server.local_addr()?, "listening");
    server.run().await
}

fn init_logging(config: &ServerConfig, debug: bool) -> Result<()> {
    let level = if debug {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ferry_server={level},ferry_core={level}")));

    match &config.logging.file_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}
