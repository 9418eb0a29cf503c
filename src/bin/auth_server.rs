#![cfg_attr(not(test), deny(clippy::panic))]

use std::path::PathBuf;

use clap::Parser;
use warlane_server::auth::AuthService;
use warlane_server::{config, logging};

/// Warlane auth server -- account storage, login and session validation over UDP
#[derive(Parser, Debug)]
#[command(name = "auth-server")]
#[command(about = "Authentication service for the Warlane backbone")]
#[command(version)]
struct Cli {
    /// UDP port to listen on (overrides the config file)
    port: Option<u16>,

    /// Path to the sqlite database (overrides the config file)
    db_path: Option<String>,

    /// Configuration file (defaults to ./config.json when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Validate configuration and exit without starting the server.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => config::load_from_path(path),
        None => config::load(),
    };
    if let Some(port) = cli.port {
        cfg.auth.port = port;
    }
    if let Some(db_path) = cli.db_path {
        cfg.auth.db_path = db_path;
    }

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&cfg)?);
        return Ok(());
    }

    let validation = config::validate(&cfg);
    if cli.validate_config {
        match validation {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Port: {}", cfg.auth.port);
                println!("  Database: {}", cfg.auth.db_path);
                println!("  Session TTL: {}s", cfg.auth.session_ttl_secs);
                println!(
                    "  Login rate limit: {} failures / {}s",
                    cfg.auth.max_recent_failures, cfg.auth.failure_window_secs
                );
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }
    validation.map_err(|e| anyhow::anyhow!("invalid configuration:\n{e}"))?;

    logging::init_with_config(&cfg.logging);

    let service = AuthService::bind(cfg.auth).await?;
    service.run().await
}
