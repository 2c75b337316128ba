//! Ignore policy: which users are never mirrored.

use std::collections::HashSet;

use crate::common::types::Side;
use crate::config::Config;

/// Users excluded from bridging, per side.
///
/// Built once from configuration and replaced as a whole on reload. The
/// bridge's own accounts are always ignored.
#[derive(Debug, Clone, Default)]
pub struct IgnorePolicy {
    matrix: HashSet<String>,
    mattermost: HashSet<String>,
}

impl IgnorePolicy {
    pub fn new(
        matrix_bot: &str,
        mattermost_bot: &str,
        ignored_matrix: impl IntoIterator<Item = String>,
        ignored_mattermost: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut matrix: HashSet<String> = ignored_matrix.into_iter().collect();
        matrix.insert(matrix_bot.to_string());
        let mut mattermost: HashSet<String> = ignored_mattermost.into_iter().collect();
        mattermost.insert(mattermost_bot.to_string());
        Self { matrix, mattermost }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.matrix.bot_user_id(),
            &config.mattermost.bot_user_id,
            config.ignored_matrix_users.iter().cloned(),
            config.ignored_mattermost_users.iter().cloned(),
        )
    }

    /// Returns true if `user_id` of `side` must not be mirrored.
    pub fn ignores(&self, side: Side, user_id: &str) -> bool {
        match side {
            Side::Matrix => self.matrix.contains(user_id),
            Side::Mattermost => self.mattermost.contains(user_id),
        }
    }
}
