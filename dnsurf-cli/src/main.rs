//! dnsurf CLI
//!
//! Runs the tunnel server, or fetches a single page through it.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dnsurf_engine::{build_client, build_server, render_document, Config};

/// dnsurf - browse the web over DNS TXT records
#[derive(Parser)]
#[command(name = "dnsurf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "dnsurf.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tunnel DNS server
    Server,

    /// Fetch a page through the tunnel and write it as HTML
    Fetch {
        /// Page to fetch
        url: String,

        /// Tunnel server, overrides the configured one
        #[arg(short, long)]
        server: Option<String>,

        /// Output file, stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a sample configuration file
    GenConfig {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "dnsurf.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Server => run_server(&cli.config).await,
        Commands::Fetch {
            url,
            server,
            output,
        } => run_fetch(&cli.config, &url, server.as_deref(), output).await,
        Commands::GenConfig { output } => generate_config(output),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_server(config_path: &Path) -> Result<()> {
    info!("Starting dnsurf tunnel server...");

    let config = load_config(config_path)?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let server = build_server(&config, shutdown_rx).context("Failed to create tunnel server")?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Tunnel server error: {}", e);
        }
    });

    wait_for_shutdown().await?;

    info!("Shutting down server...");
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), server_handle).await;

    Ok(())
}

async fn run_fetch(
    config_path: &Path,
    url: &str,
    server: Option<&str>,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let fetcher = build_client(&config, server);

    let progress = |done: usize, total: usize| {
        let percent = done * 100 / total.max(1);
        eprint!("\r({}%) Loading {}/{}", percent, done, total);
    };

    let page = fetcher
        .fetch_page(url, &progress)
        .await
        .with_context(|| format!("Failed to fetch {} through the tunnel", url))?;
    eprintln!();

    let document = render_document(&page, url);
    match output {
        Some(path) => {
            std::fs::write(&path, document)
                .with_context(|| format!("Failed to write page to {:?}", path))?;
            info!("Wrote {} to {:?}", url, path);
        }
        None => {
            std::io::stdout()
                .write_all(document.as_bytes())
                .context("Failed to write page to stdout")?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load_or_default(path)
        .with_context(|| format!("Failed to load configuration from {:?}", path))?;
    info!("Configuration loaded from {:?}", path);
    Ok(config)
}

fn generate_config(output: PathBuf) -> Result<()> {
    let sample = Config::sample();

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write configuration to {:?}", output))?;

    info!("Generated sample configuration at {:?}", output);
    println!("Sample configuration written to {:?}", output);

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to register SIGTERM handler")?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .context("Failed to register SIGINT handler")?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
