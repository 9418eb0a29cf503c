//! Configuration loading: an optional JSON file over code defaults.

use std::path::Path;

use super::Config;

const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Load configuration from `config.json` in the working directory if it
/// exists, otherwise use code defaults. A malformed file is an operator
/// error worth failing loudly over, but at load time logging is not up yet,
/// so report on stderr and fall back to defaults.
pub fn load() -> Config {
    load_from_path(Path::new(DEFAULT_CONFIG_FILE))
}

/// Load configuration from an explicit path; missing file means defaults.
pub fn load_from_path(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                eprintln!(
                    "Failed to parse config file '{}': {e}; using defaults",
                    path.display()
                );
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}
