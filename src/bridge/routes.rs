//! Bridged channel pairs and the indexes used to route events to them.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::common::error::PlatformResult;
use crate::config::ChannelMapping;
use crate::mattermost::api::MattermostApi;

/// One Matrix room bridged to one Mattermost channel.
#[derive(Debug)]
pub struct ChannelPair {
    pub matrix_room: String,
    pub mattermost_channel: String,
    team: OnceCell<String>,
}

impl ChannelPair {
    pub fn new(mapping: &ChannelMapping) -> Self {
        Self {
            matrix_room: mapping.matrix.clone(),
            mattermost_channel: mapping.mattermost.clone(),
            team: OnceCell::new(),
        }
    }

    /// Team owning the Mattermost channel, fetched once and then cached.
    pub async fn team(&self, mattermost: &dyn MattermostApi) -> PlatformResult<&str> {
        self.team
            .get_or_try_init(|| mattermost.channel_team(&self.mattermost_channel))
            .await
            .map(String::as_str)
    }

    pub fn cached_team(&self) -> Option<&str> {
        self.team.get().map(String::as_str)
    }
}

/// All bridged pairs, indexed by Mattermost channel, Matrix room and team.
#[derive(Debug, Default)]
pub struct Routes {
    pairs: Vec<Arc<ChannelPair>>,
    by_mattermost: HashMap<String, usize>,
    by_matrix: HashMap<String, usize>,
    by_team: HashMap<String, Vec<usize>>,
}

impl Routes {
    /// Index `pairs`. Only pairs whose team is already cached appear in the
    /// team index.
    pub fn new(pairs: Vec<Arc<ChannelPair>>) -> Self {
        let mut routes = Self::default();
        for (i, pair) in pairs.iter().enumerate() {
            routes
                .by_mattermost
                .insert(pair.mattermost_channel.clone(), i);
            routes.by_matrix.insert(pair.matrix_room.clone(), i);
            if let Some(team) = pair.cached_team() {
                routes.by_team.entry(team.to_string()).or_default().push(i);
            }
        }
        routes.pairs = pairs;
        routes
    }

    pub fn from_mappings(mappings: &[ChannelMapping]) -> Self {
        Self::new(
            mappings
                .iter()
                .map(|m| Arc::new(ChannelPair::new(m)))
                .collect(),
        )
    }

    pub fn pairs(&self) -> &[Arc<ChannelPair>] {
        &self.pairs
    }

    pub fn by_mattermost(&self, channel_id: &str) -> Option<&Arc<ChannelPair>> {
        self.by_mattermost.get(channel_id).map(|&i| &self.pairs[i])
    }

    pub fn by_matrix(&self, room_id: &str) -> Option<&Arc<ChannelPair>> {
        self.by_matrix.get(room_id).map(|&i| &self.pairs[i])
    }

    /// Every pair whose Mattermost channel belongs to `team_id`.
    pub fn by_team(&self, team_id: &str) -> Vec<&Arc<ChannelPair>> {
        self.by_team
            .get(team_id)
            .map(|indexes| indexes.iter().map(|&i| &self.pairs[i]).collect())
            .unwrap_or_default()
    }

    /// Keep only the pairs matching `keep`, rebuilding the indexes.
    pub fn retain(&self, mut keep: impl FnMut(&ChannelPair) -> bool) -> Self {
        Self::new(
            self.pairs
                .iter()
                .filter(|pair| keep(pair))
                .cloned()
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
