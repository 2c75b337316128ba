//! Configuration type definitions.

use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub matrix: MatrixConfig,
    pub mattermost: MattermostConfig,
    #[serde(default)]
    pub mappings: Vec<ChannelMapping>,
    /// Matrix users that are never mirrored into Mattermost.
    #[serde(default)]
    pub ignored_matrix_users: Vec<String>,
    /// Mattermost users that are never mirrored into Matrix.
    #[serde(default)]
    pub ignored_mattermost_users: Vec<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Matrix homeserver and application service settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MatrixConfig {
    /// Client-server API base, e.g. `https://matrix.example.org`.
    pub homeserver_url: String,
    /// Server name used in user ids, e.g. `example.org`.
    pub server_name: String,
    /// Application service token (`as_token` of the registration).
    pub appservice_token: String,
    /// Token the homeserver presents when pushing events (`hs_token`).
    pub homeserver_token: String,
    /// Address the transaction endpoint listens on (the registration's `url`).
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
    /// Localpart of the bridge bot (`sender_localpart`).
    pub bot_localpart: String,
    pub bot_display_name: Option<String>,
    /// Localpart prefix of the ghost users representing Mattermost users.
    #[serde(default = "default_ghost_prefix")]
    pub ghost_prefix: String,
}

impl MatrixConfig {
    pub fn bot_user_id(&self) -> String {
        format!("@{}:{}", self.bot_localpart, self.server_name)
    }
}

/// Mattermost server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MattermostConfig {
    /// Server base URL, e.g. `https://chat.example.org`.
    pub url: String,
    pub bot_user_id: String,
    pub bot_access_token: String,
    /// Username prefix of the puppet accounts representing Matrix users.
    #[serde(default = "default_puppet_prefix")]
    pub puppet_prefix: String,
    /// Domain of the placeholder e-mail addresses given to puppets.
    #[serde(default = "default_email_domain")]
    pub email_domain: String,
}

/// Binds one Matrix room to one Mattermost channel.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelMapping {
    /// Matrix room id (`!abc:example.org`).
    pub matrix: String,
    /// Mattermost channel id.
    pub mattermost: String,
}

/// Persistent storage settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_listen_address() -> String {
    "0.0.0.0:9995".to_string()
}

fn default_ghost_prefix() -> String {
    "mm_".to_string()
}

fn default_puppet_prefix() -> String {
    "matrix_".to_string()
}

fn default_email_domain() -> String {
    "matrix.invalid".to_string()
}

fn default_database_path() -> String {
    "matterlink.db".to_string()
}
