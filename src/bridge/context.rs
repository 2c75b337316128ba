//! Shared services handed to the reconciler and the event handlers.

use std::sync::Arc;

use crate::bridge::format::FormatConverter;
use crate::bridge::identity::{GhostNamespace, IdentityResolver};
use crate::mattermost::api::MattermostApi;
use crate::matrix::api::MatrixApi;
use crate::store::CorrelationStore;

/// Everything a relay job needs, injected once at startup.
pub struct BridgeContext {
    pub mattermost: Arc<dyn MattermostApi>,
    pub matrix: Arc<dyn MatrixApi>,
    pub identities: Arc<dyn IdentityResolver>,
    pub store: CorrelationStore,
    pub formatter: Arc<dyn FormatConverter>,
    pub namespace: GhostNamespace,
}

impl BridgeContext {
    /// The Matrix bridge bot.
    pub fn matrix_bot(&self) -> &str {
        self.matrix.bot_user_id()
    }

    /// The Mattermost bridge bot.
    pub fn mattermost_bot(&self) -> &str {
        self.mattermost.bot_user_id()
    }
}
