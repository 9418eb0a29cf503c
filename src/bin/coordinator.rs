#![cfg_attr(not(test), deny(clippy::panic))]

use std::path::PathBuf;

use clap::Parser;
use warlane_server::coordinator::Coordinator;
use warlane_server::{config, logging};

/// Warlane matchmaking coordinator -- queue, lobbies, server pool and reconnect directory
#[derive(Parser, Debug)]
#[command(name = "coordinator")]
#[command(about = "Matchmaking coordinator for the Warlane backbone")]
#[command(version)]
struct Cli {
    /// UDP port to listen on (overrides the config file)
    port: Option<u16>,

    /// Auth server address (overrides the config file)
    auth_ip: Option<String>,

    /// Auth server port (overrides the config file)
    auth_port: Option<u16>,

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
        cfg.coordinator.port = port;
    }
    if let Some(auth_ip) = cli.auth_ip {
        cfg.coordinator.auth_ip = auth_ip;
    }
    if let Some(auth_port) = cli.auth_port {
        cfg.coordinator.auth_port = auth_port;
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
                println!("  Port: {}", cfg.coordinator.port);
                println!(
                    "  Auth server: {}:{}",
                    cfg.coordinator.auth_ip, cfg.coordinator.auth_port
                );
                println!("  Players per lobby: {}", cfg.coordinator.required_players);
                println!("  Accept timeout: {}s", cfg.coordinator.accept_timeout_secs);
                println!("  Server pool TTL: {}s", cfg.coordinator.server_ttl_secs);
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

    let coordinator = Coordinator::bind(cfg.coordinator).await?;
    coordinator.run().await
}
