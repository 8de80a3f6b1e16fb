//! exitnet Daemon
//!
//! Coordinator for HOST and USER nodes: lifecycle, sessions, rewards and
//! tunnel credentials over an HTTP API.

use anyhow::Result;
use clap::Parser;
use exitnet_daemon::config::DaemonConfig;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// exitnet Daemon - node lifecycle and reward coordinator
#[derive(Parser, Debug)]
#[command(name = "exitnetd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "exitnet.toml")]
    config: String,

    /// Run in verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Print an admin bearer token for this wallet and exit
    #[arg(long, value_name = "WALLET")]
    issue_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins when set
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("exitnet Daemon v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = if std::path::Path::new(&args.config).exists() {
        let config = DaemonConfig::load(&args.config).await?;
        info!("Loaded configuration from {}", args.config);
        config
    } else {
        warn!("{} not found, using defaults", args.config);
        DaemonConfig::default()
    };

    if let Some(wallet) = args.issue_token {
        let issued = exitnet_daemon::issue_admin_token(&config, &wallet)?;
        println!("{}", issued.token);
        return Ok(());
    }

    exitnet_daemon::run(config).await
}
