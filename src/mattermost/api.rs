//! Mattermost API surface used by the bridge.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::common::error::PlatformResult;

/// Error id returned when removing a user from the team's default channel.
pub const REMOVE_DEFAULT_CHANNEL: &str = "api.channel.remove.default.app_error";

/// Error id meaning "already a member of the team".
pub const TEAM_MEMBER_EXISTS: &str = "store.sql_team.save_member.exists.app_error";

/// Error id meaning "already a member of the channel".
pub const CHANNEL_MEMBER_EXISTS: &str = "store.sql_channel.save_member.exists.app_error";

/// The account a call is made as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// The bridge bot (administrative calls).
    Bot,
    /// A puppet account, authenticated with its own access token.
    Puppet { user_id: String, token: String },
}

impl Actor {
    pub fn puppet(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Actor::Puppet {
            user_id: user_id.into(),
            token: token.into(),
        }
    }
}

/// Post subtype, from the `type` field of a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostKind {
    /// A regular message (empty type).
    Plain,
    /// A `/me` action message.
    Emote,
    /// Join/leave and other server-generated posts (`system_*`).
    System(String),
    Other(String),
}

impl PostKind {
    pub fn parse(post_type: &str) -> Self {
        match post_type {
            "" => PostKind::Plain,
            "me" => PostKind::Emote,
            t if t.starts_with("system_") => PostKind::System(t.to_string()),
            t => PostKind::Other(t.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostMetadata {
    #[serde(default)]
    pub files: Vec<FileInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub root_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub post_type: String,
    #[serde(default)]
    pub props: serde_json::Value,
    #[serde(default)]
    pub metadata: PostMetadata,
}

impl Post {
    pub fn kind(&self) -> PostKind {
        PostKind::parse(&self.post_type)
    }

    /// Root of the thread this post belongs to, if any.
    pub fn thread_root(&self) -> Option<&str> {
        (!self.root_id.is_empty()).then_some(self.root_id.as_str())
    }

    /// The action text of an emote post (`props.message`).
    pub fn emote_text(&self) -> Option<&str> {
        self.props.get("message").and_then(|m| m.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NewPost {
    pub channel_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PostPatch {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub props: Option<serde_json::Value>,
}

/// A file to attach to a post.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub filename: String,
    pub mime_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandRequest {
    pub channel_id: String,
    pub team_id: String,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MattermostUser {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub is_bot: bool,
}

impl MattermostUser {
    /// Human readable name: the full name when set, otherwise the username.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub first_name: String,
}

/// Mattermost server operations.
///
/// Calls without an [`Actor`] are made as the bridge bot.
#[async_trait]
pub trait MattermostApi: Send + Sync {
    fn bot_user_id(&self) -> &str;

    /// One page of channel member ids.
    async fn channel_members(
        &self,
        channel_id: &str,
        page: u32,
        per_page: u32,
    ) -> PlatformResult<Vec<String>>;

    /// Id of the team owning a channel.
    async fn channel_team(&self, channel_id: &str) -> PlatformResult<String>;

    async fn add_team_member(&self, team_id: &str, user_id: &str) -> PlatformResult<()>;

    async fn remove_team_member(
        &self,
        actor: &Actor,
        team_id: &str,
        user_id: &str,
    ) -> PlatformResult<()>;

    async fn add_channel_member(&self, channel_id: &str, user_id: &str) -> PlatformResult<()>;

    async fn remove_channel_member(&self, channel_id: &str, user_id: &str) -> PlatformResult<()>;

    /// Post ids of a thread, oldest first. May contain duplicates.
    async fn thread(&self, root_id: &str) -> PlatformResult<Vec<String>>;

    async fn post(&self, actor: &Actor, post_id: &str) -> PlatformResult<Post>;

    /// Create a post and return its id.
    async fn create_post(&self, actor: &Actor, post: &NewPost) -> PlatformResult<String>;

    async fn patch_post(&self, actor: &Actor, post_id: &str, patch: &PostPatch)
        -> PlatformResult<()>;

    /// The latest page of posts in a channel, newest first.
    async fn recent_posts(&self, actor: &Actor, channel_id: &str) -> PlatformResult<Vec<Post>>;

    async fn download_file(&self, file_id: &str) -> PlatformResult<Bytes>;

    /// Upload a file to a channel and return its file id.
    async fn upload_file(
        &self,
        actor: &Actor,
        channel_id: &str,
        file: FileUpload,
    ) -> PlatformResult<String>;

    async fn execute_command(&self, actor: &Actor, command: &CommandRequest) -> PlatformResult<()>;

    async fn user(&self, user_id: &str) -> PlatformResult<MattermostUser>;

    async fn create_user(&self, user: &NewUser) -> PlatformResult<MattermostUser>;

    /// Create a personal access token for a user and return the token.
    async fn create_token(&self, user_id: &str, description: &str) -> PlatformResult<String>;
}
