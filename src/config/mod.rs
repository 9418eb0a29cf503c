//! Configuration for the three services.
//!
//! A single `Config` tree covers all binaries; each loads the same optional
//! JSON file (code defaults otherwise) and reads its own section. Positional
//! CLI arguments override the file.

mod loader;

pub use loader::{load, load_from_path};

use serde::{Deserialize, Serialize};

use crate::proto::{auth::AUTH_PORT, game::GAME_PORT, matchmaking::COORDINATOR_PORT};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub auth: AuthConfig,
    pub coordinator: CoordinatorConfig,
    pub game: GameServerConfig,
    pub logging: LoggingConfig,
}

/// Auth service tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub port: u16,
    pub db_path: String,
    /// Session lifetime in seconds.
    pub session_ttl_secs: u64,
    /// Sliding window for counting failed logins per (username, ip).
    pub failure_window_secs: u64,
    /// Failed logins within the window before RateLimited.
    pub max_recent_failures: u32,
    /// Cadence of the expired-session / stale-failure sweep.
    pub sweep_interval_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            port: AUTH_PORT,
            db_path: "warlane_auth.db".into(),
            session_ttl_secs: 86_400,
            failure_window_secs: 300,
            max_recent_failures: 5,
            sweep_interval_secs: 60,
        }
    }
}

/// Matchmaking coordinator tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub port: u16,
    pub auth_ip: String,
    pub auth_port: u16,
    /// Players per lobby. 2 is the development default; the wire supports
    /// up to 10.
    pub required_players: u16,
    pub accept_timeout_secs: f32,
    /// How long a queue admission may wait on the auth server.
    pub auth_validation_timeout_secs: f32,
    /// Dedicated-server heartbeat TTL before pool eviction.
    pub server_ttl_secs: f32,
    /// Cadence of QueueUpdate broadcasts to waiting players.
    pub queue_update_interval_secs: f32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            port: COORDINATOR_PORT,
            auth_ip: "127.0.0.1".into(),
            auth_port: AUTH_PORT,
            required_players: 2,
            accept_timeout_secs: 20.0,
            auth_validation_timeout_secs: 5.0,
            server_ttl_secs: 15.0,
            queue_update_interval_secs: 1.0,
        }
    }
}

/// Dedicated game server tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameServerConfig {
    pub port: u16,
    pub coordinator_ip: String,
    pub coordinator_port: u16,
    /// Address advertised to the coordinator for client connections.
    pub advertised_ip: String,
    pub capacity: u16,
    /// Authoritative simulation rate in Hz.
    pub tick_rate: u32,
    /// Seconds without client input before eviction.
    pub client_timeout_secs: f32,
    pub heartbeat_interval_secs: f32,
}

impl Default for GameServerConfig {
    fn default() -> Self {
        Self {
            port: GAME_PORT,
            coordinator_ip: "127.0.0.1".into(),
            coordinator_port: COORDINATOR_PORT,
            advertised_ip: "127.0.0.1".into(),
            capacity: 10,
            tick_rate: 30,
            client_timeout_secs: 10.0,
            heartbeat_interval_secs: 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level directive; `None` defers to `RUST_LOG`, falling back to "info".
    pub level: Option<String>,
    pub format: LogFormat,
    pub enable_file_logging: bool,
    pub dir: String,
    pub filename: String,
    /// "daily", "hourly" or "never".
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: LogFormat::Text,
            enable_file_logging: false,
            dir: "logs".into(),
            filename: "server.log".into(),
            rotation: "daily".into(),
        }
    }
}

/// Sanity-check a loaded configuration. Violations are joined into one
/// message so operators see everything at once.
pub fn validate(config: &Config) -> Result<(), String> {
    let mut problems = Vec::new();

    if config.coordinator.required_players == 0 {
        problems.push("coordinator.required_players must be at least 1".to_string());
    }
    if config.coordinator.required_players as usize > crate::proto::matchmaking::MAX_LOBBY_PLAYERS {
        problems.push(format!(
            "coordinator.required_players exceeds the wire limit of {}",
            crate::proto::matchmaking::MAX_LOBBY_PLAYERS
        ));
    }
    if config.coordinator.accept_timeout_secs <= 0.0 {
        problems.push("coordinator.accept_timeout_secs must be positive".to_string());
    }
    if config.coordinator.auth_validation_timeout_secs <= 0.0 {
        problems.push("coordinator.auth_validation_timeout_secs must be positive".to_string());
    }
    if config.game.tick_rate == 0 || config.game.tick_rate > 240 {
        problems.push("game.tick_rate must be within 1..=240".to_string());
    }
    if config.game.capacity == 0 {
        problems.push("game.capacity must be at least 1".to_string());
    }
    if config.auth.session_ttl_secs == 0 {
        problems.push("auth.session_ttl_secs must be positive".to_string());
    }
    if config.auth.max_recent_failures == 0 {
        problems.push("auth.max_recent_failures must be at least 1".to_string());
    }
    match config.logging.rotation.to_lowercase().as_str() {
        "daily" | "hourly" | "never" => {}
        other => problems.push(format!("logging.rotation '{other}' is not recognized")),
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.auth.port, 27015);
        assert_eq!(config.coordinator.port, 27016);
        assert_eq!(config.game.port, 27015);
        assert_eq!(config.coordinator.required_players, 2);
        assert_eq!(config.coordinator.accept_timeout_secs, 20.0);
        assert_eq!(config.coordinator.auth_validation_timeout_secs, 5.0);
        assert_eq!(config.coordinator.server_ttl_secs, 15.0);
        assert_eq!(config.game.tick_rate, 30);
        assert_eq!(config.game.client_timeout_secs, 10.0);
        assert_eq!(config.game.heartbeat_interval_secs, 2.0);
        assert_eq!(config.auth.session_ttl_secs, 86_400);
    }

    #[test]
    fn default_config_validates() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn validate_rejects_zero_players_and_bad_rotation() {
        let mut config = Config::default();
        config.coordinator.required_players = 0;
        config.logging.rotation = "weekly".into();
        let err = validate(&config).unwrap_err();
        assert!(err.contains("required_players"));
        assert!(err.contains("weekly"));
    }

    #[test]
    fn validate_rejects_oversized_lobby() {
        let mut config = Config::default();
        config.coordinator.required_players = 11;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn config_roundtrips_through_json() {
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.coordinator.required_players, 2);
        assert_eq!(back.logging.format, LogFormat::Text);
    }

    #[test]
    fn partial_json_keeps_defaults_elsewhere() {
        let back: Config =
            serde_json::from_str(r#"{"coordinator": {"required_players": 10}}"#).unwrap();
        assert_eq!(back.coordinator.required_players, 10);
        assert_eq!(back.coordinator.accept_timeout_secs, 20.0);
        assert_eq!(back.auth.port, 27015);
    }
}
