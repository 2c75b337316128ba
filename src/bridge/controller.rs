//! Bridge controller: owns the routes and the relay lanes.
//!
//! Inbound events from both platforms enter here. Each is queued on its
//! direction's lane, resolved to a channel pair and handed to the
//! dispatcher. The lanes stay closed until every configured pair went
//! through its initial reconciliation.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, bail, Result};
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::bridge::context::BridgeContext;
use crate::bridge::dispatch::ChannelRelay;
use crate::bridge::lane::RelayLane;
use crate::bridge::policy::IgnorePolicy;
use crate::bridge::reconcile::reconcile;
use crate::bridge::routes::Routes;
use crate::common::types::{Direction, Side};
use crate::config::{ChannelMapping, Config};
use crate::mattermost::api::{Actor, NewPost};
use crate::mattermost::events::{Broadcast, MattermostEvent, MattermostMessage};
use crate::matrix::events::{MatrixEvent, MatrixEventKind, Membership, MessageContent, MsgType};

const DIRECT_MESSAGE_REPLY: &str = "This is a bot. You will not get a reply";
const DIRECT_INVITE_NOTICE: &str = "Private messaging is not supported for this bridged user";

/// The running bridge.
pub struct Bridge {
    ctx: Arc<BridgeContext>,
    mappings: Vec<ChannelMapping>,
    routes: RwLock<Arc<Routes>>,
    policy: RwLock<Arc<IgnorePolicy>>,
    mattermost_lane: RelayLane,
    matrix_lane: RelayLane,
}

impl Bridge {
    /// Create the bridge with closed lanes. Must be called within a Tokio
    /// runtime.
    pub fn new(ctx: Arc<BridgeContext>, config: &Config) -> Self {
        Self::with_policy(ctx, &config.mappings, IgnorePolicy::from_config(config))
    }

    pub fn with_policy(
        ctx: Arc<BridgeContext>,
        mappings: &[ChannelMapping],
        policy: IgnorePolicy,
    ) -> Self {
        Self {
            ctx,
            mappings: mappings.to_vec(),
            routes: RwLock::new(Arc::new(Routes::from_mappings(mappings))),
            policy: RwLock::new(Arc::new(policy)),
            mattermost_lane: RelayLane::new(Direction::MattermostToMatrix),
            matrix_lane: RelayLane::new(Direction::MatrixToMattermost),
        }
    }

    fn routes(&self) -> Result<Arc<Routes>> {
        self.routes
            .read()
            .map(|routes| routes.clone())
            .map_err(|_| anyhow!("routes lock poisoned"))
    }

    fn policy(&self) -> Result<Arc<IgnorePolicy>> {
        self.policy
            .read()
            .map(|policy| policy.clone())
            .map_err(|_| anyhow!("policy lock poisoned"))
    }

    /// Number of pairs currently bridged.
    pub fn bridged_pairs(&self) -> usize {
        self.routes().map(|routes| routes.len()).unwrap_or_default()
    }

    /// Reconcile every pair, drop the ones that failed and open the lanes.
    pub async fn start(&self) -> Result<()> {
        let routes = self.routes()?;
        let policy = self.policy()?;

        let results = join_all(routes.pairs().iter().map(|pair| {
            let ctx = &self.ctx;
            let policy = &policy;
            async move { (pair, reconcile(ctx, policy, pair).await) }
        }))
        .await;

        let mut failed = HashSet::new();
        for (pair, result) in results {
            match result {
                Ok(report) => info!(
                    "Reconciled {} <-> {}: {}",
                    pair.matrix_room, pair.mattermost_channel, report
                ),
                Err(e) => {
                    error!(
                        "Not bridging {} <-> {}: {:#}",
                        pair.matrix_room, pair.mattermost_channel, e
                    );
                    failed.insert(pair.mattermost_channel.clone());
                }
            }
        }

        // Rebuilt after reconciliation so the team index covers every pair.
        let routes = routes.retain(|pair| !failed.contains(&pair.mattermost_channel));
        if routes.is_empty() {
            bail!("no channel pair could be bridged");
        }
        info!("Bridging {} channel pairs", routes.len());
        *self
            .routes
            .write()
            .map_err(|_| anyhow!("routes lock poisoned"))? = Arc::new(routes);

        self.mattermost_lane.open();
        self.matrix_lane.open();
        Ok(())
    }

    /// Replace the ignore policy. Mapping changes need a restart.
    pub fn reload(&self, config: &Config) -> Result<()> {
        if config.mappings != self.mappings {
            warn!("Channel mappings changed, restart to apply them");
        }
        *self
            .policy
            .write()
            .map_err(|_| anyhow!("policy lock poisoned"))? =
            Arc::new(IgnorePolicy::from_config(config));
        info!("Ignore lists reloaded");
        Ok(())
    }

    /// Queue a Mattermost event for relaying.
    pub fn handle_mattermost(self: &Arc<Self>, message: MattermostMessage) {
        let bridge = Arc::clone(self);
        self.mattermost_lane
            .submit(async move { bridge.process_mattermost(message).await });
    }

    /// Queue a Matrix event for relaying.
    pub fn handle_matrix(self: &Arc<Self>, event: MatrixEvent) {
        let bridge = Arc::clone(self);
        self.matrix_lane
            .submit(async move { bridge.process_matrix(event).await });
    }

    /// Wait until every event queued so far was relayed in both directions.
    pub async fn drain(&self) -> Result<()> {
        self.mattermost_lane.run(async { Ok(()) }).await?;
        self.matrix_lane.run(async { Ok(()) }).await
    }

    /// Relay a Mattermost event through its lane and wait for the outcome.
    #[cfg(test)]
    pub async fn relay_mattermost(self: &Arc<Self>, message: MattermostMessage) -> Result<()> {
        let bridge = Arc::clone(self);
        self.mattermost_lane
            .run(async move { bridge.process_mattermost(message).await })
            .await
    }

    /// Relay a Matrix event through its lane and wait for the outcome.
    #[cfg(test)]
    pub async fn relay_matrix(self: &Arc<Self>, event: MatrixEvent) -> Result<()> {
        let bridge = Arc::clone(self);
        self.matrix_lane
            .run(async move { bridge.process_matrix(event).await })
            .await
    }

    async fn process_mattermost(&self, message: MattermostMessage) -> Result<()> {
        let routes = self.routes()?;
        let policy = self.policy()?;
        debug!("Mattermost event {}", message.event.name());

        if let Some(sender) = &message.sender {
            if policy.ignores(Side::Mattermost, sender)
                || !self.ctx.identities.is_mattermost_user(sender).await?
            {
                debug!("Ignoring {} from {}", message.event.name(), sender);
                return Ok(());
            }
        }

        match &message.event {
            MattermostEvent::Noise(_) => return Ok(()),
            MattermostEvent::DirectAdded => return self.direct_added(&message.broadcast).await,
            MattermostEvent::UserUpdated(user) => {
                return self.ctx.identities.update_profile(user).await
            }
            _ => {}
        }

        if let Some(channel) = message.broadcast.channel() {
            let Some(pair) = routes.by_mattermost(channel) else {
                debug!("Event for unbridged channel {}", channel);
                return Ok(());
            };
            ChannelRelay::new(&self.ctx, &policy, &routes, pair)
                .on_mattermost(&message)
                .await
        } else if let Some(team) = message.broadcast.team() {
            let pairs = routes.by_team(team);
            if pairs.is_empty() {
                debug!("Event for unbridged team {}", team);
                return Ok(());
            }
            let message = &message;
            join_all(pairs.into_iter().map(|pair| {
                let relay = ChannelRelay::new(&self.ctx, &policy, &routes, pair);
                async move { relay.on_mattermost(message).await }
            }))
            .await
            .into_iter()
            .collect::<Result<Vec<()>>>()?;
            Ok(())
        } else {
            debug!("Unroutable {} event", message.event.name());
            Ok(())
        }
    }

    async fn direct_added(&self, broadcast: &Broadcast) -> Result<()> {
        let Some(channel) = broadcast.channel() else {
            return Ok(());
        };
        let post = NewPost {
            channel_id: channel.to_string(),
            message: DIRECT_MESSAGE_REPLY.to_string(),
            ..Default::default()
        };
        self.ctx.mattermost.create_post(&Actor::Bot, &post).await?;
        Ok(())
    }

    async fn process_matrix(&self, event: MatrixEvent) -> Result<()> {
        let routes = self.routes()?;
        let policy = self.policy()?;
        debug!("Matrix event {} in {}", event.event_id, event.room_id);

        if let Some(pair) = routes.by_matrix(&event.room_id) {
            return ChannelRelay::new(&self.ctx, &policy, &routes, pair)
                .on_matrix(&event)
                .await;
        }

        match &event.kind {
            MatrixEventKind::Member {
                user_id,
                membership: Membership::Invite,
                is_direct: true,
            } if self.ctx.namespace.is_ghost(user_id) => {
                self.refuse_direct_chat(user_id, &event.room_id).await
            }
            _ => {
                debug!("Event for unbridged room {}", event.room_id);
                Ok(())
            }
        }
    }

    /// Ghosts do not take part in direct chats.
    async fn refuse_direct_chat(&self, ghost: &str, room_id: &str) -> Result<()> {
        let matrix = &self.ctx.matrix;
        matrix.join_room(ghost, room_id).await?;
        let notice = MessageContent::text(MsgType::Notice, DIRECT_INVITE_NOTICE);
        matrix.send_message(ghost, room_id, &notice).await?;
        matrix.leave_room(ghost, room_id).await?;
        info!("Refused direct chat with {} in {}", ghost, room_id);
        Ok(())
    }
}
