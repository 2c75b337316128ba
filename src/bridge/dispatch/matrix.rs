//! Matrix events relayed into the Mattermost channel.

use anyhow::Result;
use futures::future::join_all;
use serde_json::json;
use tracing::{debug, info, warn};

use super::ChannelRelay;
use crate::bridge::identity::Puppet;
use crate::bridge::reconcile::{join_mattermost, leave_mattermost};
use crate::common::types::Side;
use crate::mattermost::api::{CommandRequest, FileUpload, NewPost, PostKind, PostPatch};
use crate::matrix::events::{
    MatrixEvent, MatrixEventKind, Membership, MessageContent, MsgType, Relation,
};
use crate::store::Correlation;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Where a Matrix message lands on the Mattermost side.
#[derive(Debug, Default)]
struct Placement {
    /// Post to patch instead of creating a new one.
    edits: Option<String>,
    /// Thread to post into.
    root_id: Option<String>,
}

impl ChannelRelay<'_> {
    pub async fn on_matrix(&self, event: &MatrixEvent) -> Result<()> {
        match &event.kind {
            MatrixEventKind::Message(content) => self.room_message(event, content).await,
            MatrixEventKind::Member {
                user_id,
                membership,
                ..
            } => self.membership(user_id, membership).await,
            MatrixEventKind::Other(kind) => {
                debug!("Ignoring {} in {}", kind, event.room_id);
                Ok(())
            }
        }
    }

    /// Users whose membership is never mirrored to Mattermost.
    fn skips(&self, user_id: &str) -> bool {
        self.policy.ignores(Side::Matrix, user_id) || self.ctx.namespace.is_ghost(user_id)
    }

    async fn room_message(&self, event: &MatrixEvent, content: &MessageContent) -> Result<()> {
        if self.skips(&event.sender) {
            debug!("Ignoring message {} from {}", event.event_id, event.sender);
            return Ok(());
        }
        let Some(puppet) = self.ctx.identities.lookup_matrix_user(&event.sender).await? else {
            info!("Received message from untracked matrix user {}", event.sender);
            return Ok(());
        };

        let placement = self.placement(&puppet, content).await?;
        match content.msg_type() {
            MsgType::Emote => self.emote(event, content, &puppet, placement).await,
            msgtype if msgtype.is_media() => self.file(event, content, &puppet, placement).await,
            _ => self.text(event, content, &puppet, placement).await,
        }
    }

    async fn placement(&self, puppet: &Puppet, content: &MessageContent) -> Result<Placement> {
        let mut placement = Placement::default();
        match content.relation() {
            Some(Relation::Replace(event_id)) => {
                placement.edits = self
                    .ctx
                    .store
                    .find_by_event_id(&event_id)?
                    .map(|c| c.post_id);
            }
            Some(Relation::Reply(event_id)) => {
                if let Some(parent) = self.ctx.store.find_by_event_id(&event_id)? {
                    match self.ctx.mattermost.post(&puppet.actor(), &parent.post_id).await {
                        Ok(post) => {
                            placement.root_id = Some(
                                post.thread_root()
                                    .unwrap_or(parent.post_id.as_str())
                                    .to_string(),
                            );
                        }
                        Err(e) => debug!("Cannot fetch reply target {}: {}", parent.post_id, e),
                    }
                }
            }
            None => {}
        }
        Ok(placement)
    }

    async fn text(
        &self,
        event: &MatrixEvent,
        content: &MessageContent,
        puppet: &Puppet,
        placement: Placement,
    ) -> Result<()> {
        let actor = puppet.actor();
        if let Some(post_id) = placement.edits {
            let patch = PostPatch {
                message: self.ctx.formatter.to_mattermost(content.edited_content()),
                props: None,
            };
            self.ctx.mattermost.patch_post(&actor, &post_id, &patch).await?;
            return Ok(());
        }

        let post = NewPost {
            channel_id: self.pair.mattermost_channel.clone(),
            message: self.ctx.formatter.to_mattermost(content),
            root_id: placement.root_id,
            file_ids: Vec::new(),
        };
        let post_id = self.ctx.mattermost.create_post(&actor, &post).await?;
        self.ctx
            .store
            .record(&Correlation::primary(post_id, &event.event_id))?;
        Ok(())
    }

    async fn emote(
        &self,
        event: &MatrixEvent,
        content: &MessageContent,
        puppet: &Puppet,
        placement: Placement,
    ) -> Result<()> {
        let actor = puppet.actor();
        if let Some(post_id) = placement.edits {
            let text = self.ctx.formatter.to_mattermost(content.edited_content());
            let patch = PostPatch {
                message: format!("*{}*", text),
                props: Some(json!({ "message": text })),
            };
            self.ctx.mattermost.patch_post(&actor, &post_id, &patch).await?;
            return Ok(());
        }

        let text = self.ctx.formatter.to_mattermost(content);
        let team = self.pair.team(self.ctx.mattermost.as_ref()).await?;
        let command = CommandRequest {
            channel_id: self.pair.mattermost_channel.clone(),
            team_id: team.to_string(),
            command: format!("/me {}", text),
            root_id: placement.root_id,
        };
        self.ctx.mattermost.execute_command(&actor, &command).await?;

        // The command API does not return the post it creates.
        let recent = self
            .ctx
            .mattermost
            .recent_posts(&actor, &self.pair.mattermost_channel)
            .await?;
        let created = recent.iter().find(|post| {
            post.kind() == PostKind::Emote
                && post.user_id == puppet.mattermost_user_id
                && post.emote_text() == Some(text.as_str())
        });
        match created {
            Some(post) => self
                .ctx
                .store
                .record(&Correlation::primary(&post.id, &event.event_id))?,
            None => info!("Cannot find post for {}", text),
        }
        Ok(())
    }

    async fn file(
        &self,
        event: &MatrixEvent,
        content: &MessageContent,
        puppet: &Puppet,
        placement: Placement,
    ) -> Result<()> {
        if placement.edits.is_some() {
            debug!("Ignoring edit of file {}", event.event_id);
            return Ok(());
        }
        let Some(url) = content.url.as_deref() else {
            warn!("File message {} has no url", event.event_id);
            return Ok(());
        };

        let actor = puppet.actor();
        let data = self.ctx.matrix.download(url).await?;
        let upload = FileUpload {
            filename: content.body.clone(),
            mime_type: content
                .info
                .as_ref()
                .and_then(|info| info.mimetype.clone())
                .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
            data,
        };
        let file_id = self
            .ctx
            .mattermost
            .upload_file(&actor, &self.pair.mattermost_channel, upload)
            .await?;

        let post = NewPost {
            channel_id: self.pair.mattermost_channel.clone(),
            message: String::new(),
            root_id: placement.root_id,
            file_ids: vec![file_id],
        };
        let post_id = self.ctx.mattermost.create_post(&actor, &post).await?;
        self.ctx
            .store
            .record(&Correlation::primary(post_id, &event.event_id))?;
        Ok(())
    }

    async fn membership(&self, user_id: &str, membership: &Membership) -> Result<()> {
        match membership {
            Membership::Invite | Membership::Knock => Ok(()),
            Membership::Join => self.matrix_join(user_id).await,
            Membership::Leave | Membership::Ban => self.matrix_leave(user_id).await,
            Membership::Unknown(state) => {
                warn!("Invalid membership state {} for {}", state, user_id);
                Ok(())
            }
        }
    }

    async fn matrix_join(&self, user_id: &str) -> Result<()> {
        if self.skips(user_id) {
            return Ok(());
        }
        let puppet = self.ctx.identities.matrix_counterpart(user_id, true).await?;
        join_mattermost(self.ctx, self.pair, &puppet.mattermost_user_id).await?;
        Ok(())
    }

    async fn matrix_leave(&self, user_id: &str) -> Result<()> {
        if self.skips(user_id) {
            return Ok(());
        }
        let Some(puppet) = self.ctx.identities.lookup_matrix_user(user_id).await? else {
            info!("Removing untracked matrix user {}", user_id);
            return Ok(());
        };
        leave_mattermost(self.ctx, self.pair, &puppet.mattermost_user_id).await?;

        // Leaving the team is the only way out of its default channel, so
        // the puppet leaves once its user is in no bridged room of the team.
        let team = self.pair.team(self.ctx.mattermost.as_ref()).await?;
        let rooms = self.routes.by_team(team);
        let members = join_all(
            rooms
                .iter()
                .map(|pair| self.ctx.matrix.joined_members(&pair.matrix_room)),
        )
        .await;
        let still_joined = members.into_iter().any(|members| match members {
            Ok(members) => members.iter().any(|m| m == user_id),
            Err(e) => {
                warn!("Cannot list room members: {}", e);
                true
            }
        });
        if still_joined {
            return Ok(());
        }

        self.ctx
            .mattermost
            .remove_team_member(&puppet.actor(), team, &puppet.mattermost_user_id)
            .await?;
        info!("{} left team {}", puppet.mattermost_user_id, team);
        Ok(())
    }
}
