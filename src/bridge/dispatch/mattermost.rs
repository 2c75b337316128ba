//! Mattermost events relayed into the Matrix room.

use std::collections::HashSet;

use anyhow::Result;
use tracing::{debug, info};

use super::ChannelRelay;
use crate::mattermost::api::{Post, PostKind};
use crate::mattermost::events::{MattermostEvent, MattermostMessage};
use crate::matrix::events::{MediaInfo, MessageContent, MsgType, RelatesTo};
use crate::store::Correlation;

/// How long a relayed typing notification lasts.
const TYPING_TIMEOUT_MS: u64 = 6000;

impl ChannelRelay<'_> {
    pub async fn on_mattermost(&self, message: &MattermostMessage) -> Result<()> {
        match &message.event {
            MattermostEvent::Posted(post) => self.posted(post).await,
            MattermostEvent::PostEdited(post) => self.post_edited(post).await,
            MattermostEvent::UserAdded { user_id } => self.user_added(user_id).await,
            MattermostEvent::UserRemoved { user_id } | MattermostEvent::LeaveTeam { user_id } => {
                self.user_removed(user_id).await
            }
            MattermostEvent::Typing { user_id } => self.typing(user_id).await,
            other => {
                debug!(
                    "Ignoring {} in {}",
                    other.name(),
                    self.pair.mattermost_channel
                );
                Ok(())
            }
        }
    }

    async fn posted(&self, post: &Post) -> Result<()> {
        let (text, msgtype) = match post.kind() {
            PostKind::Plain => (post.message.as_str(), MsgType::Text),
            PostKind::Emote => (
                post.emote_text().unwrap_or(post.message.as_str()),
                MsgType::Emote,
            ),
            PostKind::System(kind) | PostKind::Other(kind) => {
                debug!("Dropping {} post {}", kind, post.id);
                return Ok(());
            }
        };
        if text.is_empty() && post.metadata.files.is_empty() {
            debug!("Dropping empty post {}", post.id);
            return Ok(());
        }

        let ghost = self
            .ctx
            .identities
            .mattermost_counterpart(&post.user_id, true)
            .await?;
        let parent = self.thread_parent(post).await?;

        // The text part anchors the post, even when only files were attached.
        let content = self.ctx.formatter.to_matrix(text, msgtype);
        self.send_to_matrix(&ghost, content, parent.as_deref(), &post.id, true)
            .await?;

        for file in &post.metadata.files {
            let data = self.ctx.mattermost.download_file(&file.id).await?;
            let url = self
                .ctx
                .matrix
                .upload(&ghost, data, &file.name, &file.mime_type)
                .await?;

            let mut content = MessageContent::text(MsgType::from_mime(&file.mime_type), &file.name);
            content.url = Some(url);
            content.info = Some(MediaInfo {
                mimetype: (!file.mime_type.is_empty()).then(|| file.mime_type.clone()),
                size: Some(file.size),
            });
            self.send_to_matrix(&ghost, content, parent.as_deref(), &post.id, false)
                .await?;
        }

        if let Err(e) = self
            .ctx
            .matrix
            .set_typing(&ghost, &self.pair.matrix_room, false, 0)
            .await
        {
            debug!("Failed to clear typing of {}: {}", ghost, e);
        }
        Ok(())
    }

    /// Event id of the post a thread reply answers: the second to last
    /// entry of the deduplicated thread order, when it was relayed as a
    /// primary part.
    async fn thread_parent(&self, post: &Post) -> Result<Option<String>> {
        let Some(root) = post.thread_root() else {
            return Ok(None);
        };

        let mut seen = HashSet::new();
        let order: Vec<String> = self
            .ctx
            .mattermost
            .thread(root)
            .await?
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        let Some(parent) = order.len().checked_sub(2).map(|i| &order[i]) else {
            return Ok(None);
        };

        Ok(self
            .ctx
            .store
            .find_by_post_id(parent)?
            .filter(|c| c.is_primary)
            .map(|c| c.event_id))
    }

    async fn send_to_matrix(
        &self,
        ghost: &str,
        mut content: MessageContent,
        reply_to: Option<&str>,
        post_id: &str,
        primary: bool,
    ) -> Result<String> {
        let room = self.pair.matrix_room.as_str();
        if let Some(parent) = reply_to {
            match self.ctx.matrix.room_event(ghost, room, parent).await {
                Ok(original) => self.ctx.formatter.reply(&original, &mut content),
                Err(e) => {
                    debug!("Cannot fetch reply target {}: {}", parent, e);
                    content.relates_to = Some(RelatesTo::reply(parent));
                }
            }
        }

        let event_id = self.ctx.matrix.send_message(ghost, room, &content).await?;
        let correlation = if primary {
            Correlation::primary(post_id, &event_id)
        } else {
            Correlation::secondary(post_id, &event_id)
        };
        self.ctx.store.record(&correlation)?;
        Ok(event_id)
    }

    async fn post_edited(&self, post: &Post) -> Result<()> {
        let msgtype = match post.kind() {
            PostKind::Plain => MsgType::Text,
            PostKind::Emote => MsgType::Emote,
            PostKind::System(kind) | PostKind::Other(kind) => {
                debug!("Dropping edit of {} post {}", kind, post.id);
                return Ok(());
            }
        };
        let text = match msgtype {
            MsgType::Emote => post.emote_text().unwrap_or(post.message.as_str()),
            _ => post.message.as_str(),
        };

        let ghost = self
            .ctx
            .identities
            .mattermost_counterpart(&post.user_id, true)
            .await?;

        let replacement = self.ctx.formatter.to_matrix(text, msgtype.clone());
        let mut content = self.ctx.formatter.to_matrix(text, msgtype);
        content.body = format!("* {}", content.body);
        content.formatted_body = content.formatted_body.map(|html| format!("* {}", html));

        match self.ctx.store.find_by_post_id(&post.id)? {
            Some(original) => {
                content.new_content = Some(Box::new(replacement));
                content.relates_to = Some(RelatesTo::replace(original.event_id));
            }
            None => debug!("Edited post {} was never relayed", post.id),
        }

        self.ctx
            .matrix
            .send_message(&ghost, &self.pair.matrix_room, &content)
            .await?;
        Ok(())
    }

    async fn user_added(&self, user_id: &str) -> Result<()> {
        let ghost = self
            .ctx
            .identities
            .mattermost_counterpart(user_id, true)
            .await?;
        self.ctx
            .matrix
            .join_room(&ghost, &self.pair.matrix_room)
            .await?;
        info!("{} joined {}", ghost, self.pair.matrix_room);
        Ok(())
    }

    async fn user_removed(&self, user_id: &str) -> Result<()> {
        let Some(ghost) = self.ctx.identities.lookup_mattermost_user(user_id).await? else {
            debug!("No ghost for removed user {}", user_id);
            return Ok(());
        };
        self.ctx
            .matrix
            .leave_room(&ghost, &self.pair.matrix_room)
            .await?;
        info!("{} left {}", ghost, self.pair.matrix_room);
        Ok(())
    }

    async fn typing(&self, user_id: &str) -> Result<()> {
        if let Some(ghost) = self.ctx.identities.lookup_mattermost_user(user_id).await? {
            self.ctx
                .matrix
                .set_typing(&ghost, &self.pair.matrix_room, true, TYPING_TIMEOUT_MS)
                .await?;
        }
        Ok(())
    }
}
