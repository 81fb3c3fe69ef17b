//! Proxyc - run a command through a chain of proxies
//!
//! This is the main entry point for the Proxyc application.

use anyhow::{Context, Result};
use clap::Parser;
use proxyc::config::{load_or_default, Config, HopSpec, Mode};
use proxyc::wrapper::run_wrapped;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::FmtSubscriber;

/// Proxyc - route a command's TCP connections through SOCKS5/HTTP proxies
#[derive(Parser, Debug)]
#[command(name = "proxyc")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Proxy hop `<scheme>://[user:pass@]host:port` (socks5, http); repeat to chain
    #[arg(short, long, value_delimiter = ',')]
    proxy: Vec<HopSpec>,

    /// Path to configuration file
    #[arg(short, long)]
    file_config: Option<PathBuf>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Suppress all logging (same as --log-level off)
    #[arg(short, long)]
    quiet: bool,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,

    /// TCP connect timeout in milliseconds
    #[arg(long)]
    tcp_connect_timeout: Option<u64>,

    /// Handshake read timeout in milliseconds
    #[arg(long)]
    tcp_read_timeout: Option<u64>,

    /// Dial every destination directly instead of through the chain
    #[arg(long)]
    direct: bool,

    /// Address of the local proxy the command is pointed at
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Command to run, followed by its arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = Args::parse();

    // Load configuration; command line options win
    let mut config = load_or_default(args.file_config.as_deref())?;
    let command = std::mem::take(&mut args.command);
    apply_args(&mut config, args);

    // Setup logging
    let level = if config.quiet {
        "off"
    } else {
        config.log_level.as_str()
    };
    setup_logging(level, config.json_log)?;

    config.validate().context("Invalid configuration")?;

    debug!("Proxyc v{}", proxyc::VERSION);
    for (index, hop) in config.proxies.iter().enumerate() {
        debug!("Hop {}: {}", index, hop);
    }

    let code = run_wrapped(&config, &command).await?;
    std::process::exit(code)
}

/// Merge command line options into the configuration
fn apply_args(config: &mut Config, args: Args) {
    // Proxies given on the command line replace those of the file
    if !args.proxy.is_empty() {
        config.proxies = args.proxy;
    }
    if args.direct {
        config.mode = Mode::Direct;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if args.quiet {
        config.quiet = true;
    }
    if args.json_log {
        config.json_log = true;
    }
    if let Some(timeout) = args.tcp_connect_timeout {
        config.tcp_connect_timeout = timeout;
    }
    if let Some(timeout) = args.tcp_read_timeout {
        config.tcp_read_timeout = timeout;
    }
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
}

/// Setup logging on stderr, leaving stdout to the command
fn setup_logging(level: &str, json: bool) -> Result<()> {
    let level = LevelFilter::from_str(level)
        .with_context(|| format!("Invalid log level: {}", level))?;

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
