//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `MATTERLINK_CONFIG` - Path of the configuration file
//! - `MATTERLINK_MATTERMOST_TOKEN` - Mattermost bot access token
//! - `MATTERLINK_MATRIX_TOKEN` - Matrix application service token
//! - `MATTERLINK_HS_TOKEN` - Token the homeserver authenticates with
//! - `MATTERLINK_DATABASE` - SQLite database path

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "MATTERLINK";

/// Apply environment variable overrides to a config.
///
/// This allows tokens to be provided via environment variables instead of
/// the config file.
pub fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(token) = env::var(format!("{}_MATTERMOST_TOKEN", ENV_PREFIX)) {
        config.mattermost.bot_access_token = token;
    }
    if let Ok(token) = env::var(format!("{}_MATRIX_TOKEN", ENV_PREFIX)) {
        config.matrix.appservice_token = token;
    }
    if let Ok(token) = env::var(format!("{}_HS_TOKEN", ENV_PREFIX)) {
        config.matrix.homeserver_token = token;
    }
    if let Ok(path) = env::var(format!("{}_DATABASE", ENV_PREFIX)) {
        config.database.path = path;
    }

    config
}

/// Get the config file path from environment or use default.
///
/// Checks `MATTERLINK_CONFIG` environment variable, otherwise returns "matterlink.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "matterlink.conf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::*;

    fn make_test_config() -> Config {
        Config {
            matrix: MatrixConfig {
                homeserver_url: "http://localhost:8008".to_string(),
                server_name: "localhost".to_string(),
                appservice_token: "original_as".to_string(),
                homeserver_token: "original_hs".to_string(),
                listen_address: "127.0.0.1:9995".to_string(),
                bot_localpart: "matterbot".to_string(),
                bot_display_name: None,
                ghost_prefix: "mm_".to_string(),
            },
            mattermost: MattermostConfig {
                url: "http://localhost:8065".to_string(),
                bot_user_id: "bot".to_string(),
                bot_access_token: "original_token".to_string(),
                puppet_prefix: "matrix_".to_string(),
                email_domain: "matrix.invalid".to_string(),
            },
            mappings: Vec::new(),
            ignored_matrix_users: Vec::new(),
            ignored_mattermost_users: Vec::new(),
            database: DatabaseConfig::default(),
        }
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(ENV_PREFIX, "MATTERLINK");
    }

    #[test]
    fn test_env_overrides() {
        // Single test touching the process environment to avoid races between tests.
        env::remove_var("MATTERLINK_CONFIG");
        assert_eq!(get_config_path(), "matterlink.conf");

        env::remove_var("MATTERLINK_MATTERMOST_TOKEN");
        env::remove_var("MATTERLINK_MATRIX_TOKEN");
        env::remove_var("MATTERLINK_HS_TOKEN");
        env::remove_var("MATTERLINK_DATABASE");
        let result = apply_env_overrides(make_test_config());
        assert_eq!(result.mattermost.bot_access_token, "original_token");
        assert_eq!(result.matrix.appservice_token, "original_as");
        assert_eq!(result.matrix.homeserver_token, "original_hs");

        env::set_var("MATTERLINK_HS_TOKEN", "pushed");
        let result = apply_env_overrides(make_test_config());
        assert_eq!(result.matrix.homeserver_token, "pushed");
        env::remove_var("MATTERLINK_HS_TOKEN");

        env::set_var("MATTERLINK_DATABASE", "/tmp/override.db");
        let result = apply_env_overrides(make_test_config());
        assert_eq!(result.database.path, "/tmp/override.db");
        env::remove_var("MATTERLINK_DATABASE");
    }
}
