//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::common::error::ConfigError;
use crate::config::types::Config;

const PLACEHOLDER_TOKENS: [&str; 2] = ["YOUR_TOKEN_HERE", "CHANGEME"];

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    // Matrix
    check_url(&mut errors, "matrix.homeserver_url", &config.matrix.homeserver_url);
    if config.matrix.server_name.is_empty() {
        errors.push("matrix.server_name is required".to_string());
    }
    check_token(&mut errors, "matrix.appservice_token", &config.matrix.appservice_token);
    check_token(&mut errors, "matrix.homeserver_token", &config.matrix.homeserver_token);
    if config.matrix.listen_address.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "matrix.listen_address '{}' is not a socket address (expected 'host:port')",
            config.matrix.listen_address
        ));
    }
    if config.matrix.bot_localpart.is_empty() {
        errors.push("matrix.bot_localpart is required".to_string());
    }
    if config.matrix.ghost_prefix.is_empty() {
        errors.push("matrix.ghost_prefix must not be empty".to_string());
    } else if config.matrix.bot_localpart.starts_with(&config.matrix.ghost_prefix) {
        errors.push(format!(
            "matrix.bot_localpart '{}' must not start with the ghost prefix '{}'",
            config.matrix.bot_localpart, config.matrix.ghost_prefix
        ));
    }

    // Mattermost
    check_url(&mut errors, "mattermost.url", &config.mattermost.url);
    if config.mattermost.bot_user_id.is_empty() {
        errors.push("mattermost.bot_user_id is required".to_string());
    }
    check_token(&mut errors, "mattermost.bot_access_token", &config.mattermost.bot_access_token);
    if config.mattermost.puppet_prefix.is_empty() {
        errors.push("mattermost.puppet_prefix must not be empty".to_string());
    }

    // Channel mappings
    if config.mappings.is_empty() {
        errors.push("mappings is empty - no channels to bridge".to_string());
    }
    let mut rooms = HashSet::new();
    let mut channels = HashSet::new();
    for (i, mapping) in config.mappings.iter().enumerate() {
        if !mapping.matrix.starts_with('!') {
            errors.push(format!(
                "mappings[{}].matrix '{}' is not a room id (expected '!room:server')",
                i, mapping.matrix
            ));
        }
        if mapping.mattermost.is_empty() {
            errors.push(format!("mappings[{}].mattermost is required", i));
        }
        if !rooms.insert(mapping.matrix.as_str()) {
            errors.push(format!("mappings[{}].matrix '{}' is mapped twice", i, mapping.matrix));
        }
        if !channels.insert(mapping.mattermost.as_str()) {
            errors.push(format!(
                "mappings[{}].mattermost '{}' is mapped twice",
                i, mapping.mattermost
            ));
        }
    }

    if config.database.path.is_empty() {
        errors.push("database.path must not be empty".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}

fn check_url(errors: &mut Vec<String>, field: &str, value: &str) {
    if value.is_empty() {
        errors.push(format!("{} is required", field));
    } else if url::Url::parse(value).is_err() {
        errors.push(format!("{} '{}' is not a valid URL", field, value));
    }
}

fn check_token(errors: &mut Vec<String>, field: &str, value: &str) {
    if value.is_empty() {
        errors.push(format!("{} is required", field));
    } else if PLACEHOLDER_TOKENS.contains(&value) {
        errors.push(format!("{} has not been configured (still using placeholder)", field));
    }
}
