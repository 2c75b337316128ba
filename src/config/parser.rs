//! Configuration file parsing (HOCON format).

use std::path::Path;

use hocon::HoconLoader;

use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Load configuration from a HOCON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    HoconLoader::new()
        .load_file(path)
        .map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

/// Load configuration from a HOCON string.
pub fn load_config_str(content: &str) -> Result<Config, ConfigError> {
    HoconLoader::new()
        .load_str(content)
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        matrix {
            homeserver_url = "http://localhost:8008"
            server_name = "localhost"
            appservice_token = "as-token"
            homeserver_token = "hs-token"
            bot_localpart = "matterbot"
        }
        mattermost {
            url = "http://localhost:8065"
            bot_user_id = "botid"
            bot_access_token = "bot-token"
        }
        mappings = [
            { matrix = "!town:localhost", mattermost = "townsquare" }
            { matrix = "!off:localhost", mattermost = "offtopic" }
        ]
        ignored_matrix_users = ["@ignored_user:localhost"]
    "#;

    #[test]
    fn test_load_config_str_with_defaults() {
        let config = load_config_str(SAMPLE).unwrap();

        assert_eq!(config.matrix.bot_user_id(), "@matterbot:localhost");
        assert_eq!(config.matrix.ghost_prefix, "mm_");
        assert_eq!(config.matrix.listen_address, "0.0.0.0:9995");
        assert_eq!(config.mattermost.puppet_prefix, "matrix_");
        assert_eq!(config.mappings.len(), 2);
        assert_eq!(config.mappings[1].mattermost, "offtopic");
        assert_eq!(config.ignored_matrix_users, vec!["@ignored_user:localhost"]);
        assert!(config.ignored_mattermost_users.is_empty());
        assert_eq!(config.database.path, "matterlink.db");
    }

    #[test]
    fn test_missing_section_is_parse_error() {
        let result = load_config_str("matrix { server_name = \"x\" }");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("/nonexistent/matterlink.conf");
        assert!(result.is_err());
    }
}
