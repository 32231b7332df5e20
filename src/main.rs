//! dns-sinkhole entry point
//!
//! # Usage
//!
//! ```bash
//! # Run on the default port (25353)
//! dns-sinkhole listen
//!
//! # Run on an explicit port
//! dns-sinkhole listen 5353
//!
//! # Environment overrides
//! RATE_LIMIT=500 CACHE_TTL=10m dns-sinkhole listen
//! ```

use anyhow::Context;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use dns_sinkhole::config::Config;
use dns_sinkhole::server::Sinkhole;

enum Command {
    Help,
    Version,
    Listen { port: Option<u16> },
}

fn parse_args() -> Result<Command, String> {
    let mut args = std::env::args().skip(1);
    let Some(subcommand) = args.next() else {
        return Ok(Command::Help);
    };

    match subcommand.as_str() {
        "help" | "-h" | "--help" => Ok(Command::Help),
        "version" | "-v" | "--version" => Ok(Command::Version),
        "listen" => {
            let port = match args.next() {
                Some(raw) => Some(
                    raw.parse::<u16>()
                        .map_err(|_| format!("invalid port: {raw:?}"))?,
                ),
                None => None,
            };
            Ok(Command::Listen { port })
        }
        other => Err(format!("unknown subcommand: {other:?}")),
    }
}

fn print_help() {
    println!(
        r#"dns-sinkhole v{}

DNS sinkhole: answers every query with a fixed A record and logs it.

USAGE:
    dns-sinkhole <SUBCOMMAND>

SUBCOMMANDS:
    listen [port]    Run the server; `port` overrides DNS_PORT
    help             Print this message
    version          Print version information

ENVIRONMENT:
    DNS_PORT             DNS UDP/TCP port            [default: 25353]
    HEALTH_CHECK_PORT    Health/metrics HTTP port    [default: 8088]
    WORKER_COUNT         Worker tasks                [default: 4]
    RATE_LIMIT           Tokens/second per client    [default: 100000]
    RATE_BURST           Bucket size per client      [default: 1000]
    CACHE_TTL            Cache entry lifetime        [default: 30m]
    CACHE_CLEANUP        Cache sweep interval        [default: 1m]
    LOGS_DIR             Request log directory       [default: ./logs]
    LOG_FILE             Request log basename        [default: dns_listener.log]
    DEBUG                Mirror request log to stdout [default: false]

ENDPOINTS:
    GET /health          {{"status":"healthy","timestamp":...}}
    GET /metrics         health plus a counter snapshot
"#,
        dns_sinkhole::VERSION
    );
}

fn init_logging(debug: bool) {
    let default_level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env()
        .add_directive(default_level.into())
        // Reduce noise from dependencies
        .add_directive("hyper=warn".parse().expect("valid directive"))
        .add_directive("tokio=warn".parse().expect("valid directive"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received interrupt");
    }
}

#[tokio::main]
async fn main() {
    let command = match parse_args() {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{message}");
            print_help();
            std::process::exit(1);
        }
    };

    match command {
        Command::Help => print_help(),
        Command::Version => println!("dns-sinkhole v{}", dns_sinkhole::VERSION),
        Command::Listen { port } => {
            if let Err(e) = listen(port).await {
                eprintln!("Error: {e:#}");
                std::process::exit(1);
            }
        }
    }
}

async fn listen(port_override: Option<u16>) -> anyhow::Result<()> {
    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(port) = port_override {
        config = config.with_port(port);
    }
    config.validate().context("invalid configuration")?;

    init_logging(config.debug);
    info!(version = dns_sinkhole::VERSION, port = config.port, "starting dns-sinkhole");

    let sinkhole = Sinkhole::start(config)
        .await
        .context("failed to start sinkhole")?;

    wait_for_shutdown_signal().await;

    sinkhole.shutdown().await;
    info!("shutdown complete");
    Ok(())
}
