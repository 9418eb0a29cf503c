#![cfg_attr(not(test), deny(clippy::panic))]

use std::path::PathBuf;

use clap::Parser;
use warlane_server::game::GameServer;
use warlane_server::{config, logging};

/// Warlane dedicated game server -- authoritative simulation and snapshot fanout
#[derive(Parser, Debug)]
#[command(name = "game-server")]
#[command(about = "Dedicated game server for the Warlane backbone")]
#[command(version)]
struct Cli {
    /// Game UDP port to listen on (overrides the config file)
    port: Option<u16>,

    /// Coordinator address (overrides the config file)
    coordinator_ip: Option<String>,

    /// Coordinator port (overrides the config file)
    coordinator_port: Option<u16>,

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
        cfg.game.port = port;
    }
    if let Some(coordinator_ip) = cli.coordinator_ip {
        cfg.game.coordinator_ip = coordinator_ip;
    }
    if let Some(coordinator_port) = cli.coordinator_port {
        cfg.game.coordinator_port = coordinator_port;
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
                println!("  Game port: {}", cfg.game.port);
                println!(
                    "  Coordinator: {}:{}",
                    cfg.game.coordinator_ip, cfg.game.coordinator_port
                );
                println!("  Capacity: {}", cfg.game.capacity);
                println!("  Tick rate: {} Hz", cfg.game.tick_rate);
                println!("  Client timeout: {}s", cfg.game.client_timeout_secs);
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

    let server = GameServer::bind(cfg.game).await?;
    server.run().await
}

#[cfg(test)]
mod cli_tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn positional_overrides_parse() {
        let cli = Cli::try_parse_from(["game-server", "27018", "10.0.0.7", "27016"]).unwrap();
        assert_eq!(cli.port, Some(27018));
        assert_eq!(cli.coordinator_ip.as_deref(), Some("10.0.0.7"));
        assert_eq!(cli.coordinator_port, Some(27016));
    }

    #[test]
    fn version_flag_short_circuits() {
        assert!(Cli::try_parse_from(["game-server", "--version"]).is_err());
    }
}
