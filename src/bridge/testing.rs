//! In-memory platform fakes recording every call made against them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};

use crate::bridge::context::BridgeContext;
use crate::bridge::format::MarkdownConverter;
use crate::bridge::identity::{GhostNamespace, IdentityResolver, Puppet};
use crate::bridge::policy::IgnorePolicy;
use crate::common::error::{PlatformError, PlatformResult};
use crate::mattermost::api::{
    Actor, CommandRequest, FileInfo, FileUpload, MattermostApi, MattermostUser, NewPost, NewUser,
    Post, PostMetadata, PostPatch, CHANNEL_MEMBER_EXISTS, REMOVE_DEFAULT_CHANNEL,
    TEAM_MEMBER_EXISTS,
};
use crate::matrix::api::{MatrixApi, USER_IN_USE};
use crate::matrix::events::{MessageContent, RoomEvent};
use crate::store::{CorrelationStore, Database};

pub const MATRIX_BOT: &str = "@bridge:test";
pub const MATTERMOST_BOT: &str = "mmbot";

fn api_error(status: u16, code: &str) -> PlatformError {
    PlatformError::Api {
        status,
        code: code.to_string(),
        message: format!("fake {}", code),
    }
}

fn injected(op: &str, key: &str) -> PlatformError {
    PlatformError::Api {
        status: 500,
        code: "fake.injected".to_string(),
        message: format!("{} failed for {}", op, key),
    }
}

fn actor_id(actor: &Actor) -> String {
    match actor {
        Actor::Bot => MATTERMOST_BOT.to_string(),
        Actor::Puppet { user_id, .. } => user_id.clone(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MmCall {
    AddTeamMember { team: String, user: String },
    RemoveTeamMember { team: String, user: String },
    AddChannelMember { channel: String, user: String },
    RemoveChannelMember { channel: String, user: String },
    CreatePost { actor: String, channel: String, message: String, root_id: Option<String>, file_ids: Vec<String> },
    PatchPost { actor: String, post_id: String, message: String, props: Option<Value> },
    UploadFile { channel: String, filename: String, mime_type: String },
    ExecuteCommand { actor: String, channel: String, command: String, root_id: Option<String> },
    CreateUser { username: String },
}

#[derive(Default)]
struct MmState {
    channel_teams: HashMap<String, String>,
    default_channels: HashSet<String>,
    channel_members: HashMap<String, Vec<String>>,
    team_members: HashMap<String, HashSet<String>>,
    posts: HashMap<String, Post>,
    post_order: Vec<String>,
    threads: HashMap<String, Vec<String>>,
    users: HashMap<String, MattermostUser>,
    files: HashMap<String, (FileInfo, Bytes)>,
    calls: Vec<MmCall>,
    failures: HashSet<(String, String)>,
    team_lookups: usize,
    next_id: u64,
}

impl MmState {
    fn next_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{}{}", kind, self.next_id)
    }

    fn check(&self, op: &str, key: &str) -> PlatformResult<()> {
        if self.failures.contains(&(op.to_string(), key.to_string())) {
            return Err(injected(op, key));
        }
        Ok(())
    }

    fn insert_post(&mut self, post: Post) -> String {
        let id = post.id.clone();
        self.post_order.push(id.clone());
        self.posts.insert(id.clone(), post);
        id
    }
}

/// Mattermost server fake.
#[derive(Default)]
pub struct FakeMattermost {
    state: Mutex<MmState>,
}

impl FakeMattermost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&self, channel: &str, team: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .channel_teams
            .insert(channel.to_string(), team.to_string());
        state.channel_members.entry(channel.to_string()).or_default();
    }

    pub fn set_default_channel(&self, channel: &str) {
        self.state
            .lock()
            .unwrap()
            .default_channels
            .insert(channel.to_string());
    }

    /// Make `user` a member of `channel` and of its team.
    pub fn seed_member(&self, channel: &str, user: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(team) = state.channel_teams.get(channel).cloned() {
            state
                .team_members
                .entry(team)
                .or_default()
                .insert(user.to_string());
        }
        let members = state.channel_members.entry(channel.to_string()).or_default();
        if !members.iter().any(|m| m == user) {
            members.push(user.to_string());
        }
    }

    pub fn add_user(&self, id: &str, username: &str) {
        self.state.lock().unwrap().users.insert(
            id.to_string(),
            MattermostUser {
                id: id.to_string(),
                username: username.to_string(),
                ..Default::default()
            },
        );
    }

    pub fn seed_post(&self, post: Post) {
        self.state.lock().unwrap().insert_post(post);
    }

    pub fn seed_file(&self, id: &str, name: &str, mime_type: &str, data: &'static [u8]) -> FileInfo {
        let info = FileInfo {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            size: data.len() as u64,
        };
        self.state
            .lock()
            .unwrap()
            .files
            .insert(id.to_string(), (info.clone(), Bytes::from_static(data)));
        info
    }

    /// Override the thread order returned for `root`.
    pub fn set_thread(&self, root: &str, order: &[&str]) {
        self.state.lock().unwrap().threads.insert(
            root.to_string(),
            order.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn fail_on(&self, op: &str, key: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((op.to_string(), key.to_string()));
    }

    pub fn calls(&self) -> Vec<MmCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn members(&self, channel: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut members = state.channel_members.get(channel).cloned().unwrap_or_default();
        members.sort();
        members
    }

    pub fn team_members(&self, team: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut members: Vec<String> = state
            .team_members
            .get(team)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Posts of `channel`, oldest first.
    pub fn posts_in(&self, channel: &str) -> Vec<Post> {
        let state = self.state.lock().unwrap();
        state
            .post_order
            .iter()
            .filter_map(|id| state.posts.get(id))
            .filter(|post| post.channel_id == channel)
            .cloned()
            .collect()
    }

    pub fn get_post(&self, id: &str) -> Option<Post> {
        self.state.lock().unwrap().posts.get(id).cloned()
    }

    pub fn created_users(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MmCall::CreateUser { username } => Some(username),
                _ => None,
            })
            .collect()
    }

    pub fn channel_team_lookups(&self) -> usize {
        self.state.lock().unwrap().team_lookups
    }
}

#[async_trait]
impl MattermostApi for FakeMattermost {
    fn bot_user_id(&self) -> &str {
        MATTERMOST_BOT
    }

    async fn channel_members(
        &self,
        channel_id: &str,
        page: u32,
        per_page: u32,
    ) -> PlatformResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        state.check("channel_members", channel_id)?;
        let members = state.channel_members.get(channel_id).cloned().unwrap_or_default();
        Ok(members
            .into_iter()
            .skip((page * per_page) as usize)
            .take(per_page as usize)
            .collect())
    }

    async fn channel_team(&self, channel_id: &str) -> PlatformResult<String> {
        let mut state = self.state.lock().unwrap();
        state.team_lookups += 1;
        state.check("channel_team", channel_id)?;
        state
            .channel_teams
            .get(channel_id)
            .cloned()
            .ok_or_else(|| api_error(404, "app.channel.get.existing.app_error"))
    }

    async fn add_team_member(&self, team_id: &str, user_id: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MmCall::AddTeamMember {
            team: team_id.to_string(),
            user: user_id.to_string(),
        });
        state.check("add_team_member", user_id)?;
        let members = state.team_members.entry(team_id.to_string()).or_default();
        if !members.insert(user_id.to_string()) {
            return Err(api_error(400, TEAM_MEMBER_EXISTS));
        }
        Ok(())
    }

    async fn remove_team_member(
        &self,
        _actor: &Actor,
        team_id: &str,
        user_id: &str,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MmCall::RemoveTeamMember {
            team: team_id.to_string(),
            user: user_id.to_string(),
        });
        state.check("remove_team_member", user_id)?;
        if let Some(members) = state.team_members.get_mut(team_id) {
            members.remove(user_id);
        }
        Ok(())
    }

    async fn add_channel_member(&self, channel_id: &str, user_id: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MmCall::AddChannelMember {
            channel: channel_id.to_string(),
            user: user_id.to_string(),
        });
        state.check("add_channel_member", user_id)?;
        let members = state.channel_members.entry(channel_id.to_string()).or_default();
        if members.iter().any(|m| m == user_id) {
            return Err(api_error(400, CHANNEL_MEMBER_EXISTS));
        }
        members.push(user_id.to_string());
        Ok(())
    }

    async fn remove_channel_member(&self, channel_id: &str, user_id: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MmCall::RemoveChannelMember {
            channel: channel_id.to_string(),
            user: user_id.to_string(),
        });
        state.check("remove_channel_member", user_id)?;
        if state.default_channels.contains(channel_id) {
            return Err(api_error(400, REMOVE_DEFAULT_CHANNEL));
        }
        if let Some(members) = state.channel_members.get_mut(channel_id) {
            members.retain(|m| m != user_id);
        }
        Ok(())
    }

    async fn thread(&self, root_id: &str) -> PlatformResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        if let Some(order) = state.threads.get(root_id) {
            return Ok(order.clone());
        }
        Ok(state
            .post_order
            .iter()
            .filter(|id| {
                id.as_str() == root_id
                    || state.posts.get(id.as_str()).is_some_and(|p| p.root_id == root_id)
            })
            .cloned()
            .collect())
    }

    async fn post(&self, _actor: &Actor, post_id: &str) -> PlatformResult<Post> {
        let state = self.state.lock().unwrap();
        state
            .posts
            .get(post_id)
            .cloned()
            .ok_or_else(|| api_error(404, "app.post.get.app_error"))
    }

    async fn create_post(&self, actor: &Actor, post: &NewPost) -> PlatformResult<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MmCall::CreatePost {
            actor: actor_id(actor),
            channel: post.channel_id.clone(),
            message: post.message.clone(),
            root_id: post.root_id.clone(),
            file_ids: post.file_ids.clone(),
        });
        state.check("create_post", &post.channel_id)?;
        let files = post
            .file_ids
            .iter()
            .filter_map(|id| state.files.get(id).map(|(info, _)| info.clone()))
            .collect();
        let id = state.next_id("post");
        Ok(state.insert_post(Post {
            id,
            channel_id: post.channel_id.clone(),
            user_id: actor_id(actor),
            root_id: post.root_id.clone().unwrap_or_default(),
            message: post.message.clone(),
            metadata: PostMetadata { files },
            ..Default::default()
        }))
    }

    async fn patch_post(
        &self,
        actor: &Actor,
        post_id: &str,
        patch: &PostPatch,
    ) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MmCall::PatchPost {
            actor: actor_id(actor),
            post_id: post_id.to_string(),
            message: patch.message.clone(),
            props: patch.props.clone(),
        });
        let post = state
            .posts
            .get_mut(post_id)
            .ok_or_else(|| api_error(404, "app.post.get.app_error"))?;
        post.message = patch.message.clone();
        if let Some(props) = &patch.props {
            post.props = props.clone();
        }
        Ok(())
    }

    async fn recent_posts(&self, _actor: &Actor, channel_id: &str) -> PlatformResult<Vec<Post>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .post_order
            .iter()
            .rev()
            .filter_map(|id| state.posts.get(id))
            .filter(|post| post.channel_id == channel_id)
            .cloned()
            .collect())
    }

    async fn download_file(&self, file_id: &str) -> PlatformResult<Bytes> {
        let state = self.state.lock().unwrap();
        state.check("download_file", file_id)?;
        state
            .files
            .get(file_id)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| api_error(404, "app.file.get.app_error"))
    }

    async fn upload_file(
        &self,
        _actor: &Actor,
        channel_id: &str,
        file: FileUpload,
    ) -> PlatformResult<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MmCall::UploadFile {
            channel: channel_id.to_string(),
            filename: file.filename.clone(),
            mime_type: file.mime_type.clone(),
        });
        let id = state.next_id("file");
        let info = FileInfo {
            id: id.clone(),
            name: file.filename,
            mime_type: file.mime_type,
            size: file.data.len() as u64,
        };
        state.files.insert(id.clone(), (info, file.data));
        Ok(id)
    }

    async fn execute_command(&self, actor: &Actor, command: &CommandRequest) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MmCall::ExecuteCommand {
            actor: actor_id(actor),
            channel: command.channel_id.clone(),
            command: command.command.clone(),
            root_id: command.root_id.clone(),
        });
        if let Some(text) = command.command.strip_prefix("/me ") {
            let id = state.next_id("post");
            state.insert_post(Post {
                id,
                channel_id: command.channel_id.clone(),
                user_id: actor_id(actor),
                root_id: command.root_id.clone().unwrap_or_default(),
                message: format!("*{}*", text),
                post_type: "me".to_string(),
                props: json!({ "message": text }),
                ..Default::default()
            });
        }
        Ok(())
    }

    async fn user(&self, user_id: &str) -> PlatformResult<MattermostUser> {
        let state = self.state.lock().unwrap();
        state
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| api_error(404, "app.user.missing_account.const"))
    }

    async fn create_user(&self, user: &NewUser) -> PlatformResult<MattermostUser> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MmCall::CreateUser {
            username: user.username.clone(),
        });
        if state.users.values().any(|u| u.username == user.username) {
            return Err(api_error(400, "app.user.save.username_exists.app_error"));
        }
        let created = MattermostUser {
            id: state.next_id("user"),
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            ..Default::default()
        };
        state.users.insert(created.id.clone(), created.clone());
        Ok(created)
    }

    async fn create_token(&self, user_id: &str, _description: &str) -> PlatformResult<String> {
        Ok(format!("token-{}", user_id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatrixCall {
    Join { user: String, room: String },
    Leave { user: String, room: String },
    Send { user: String, room: String, event_id: String },
    Typing { user: String, room: String, typing: bool },
    Upload { user: String, filename: String, mime_type: String },
    Register { localpart: String },
    SetDisplayName { user: String, name: String },
}

/// A message sent through the fake homeserver.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub user: String,
    pub room: String,
    pub event_id: String,
    pub content: MessageContent,
}

#[derive(Default)]
struct MxState {
    rooms: HashMap<String, Vec<String>>,
    events: HashMap<String, RoomEvent>,
    sent: Vec<SentMessage>,
    calls: Vec<MatrixCall>,
    registered: HashSet<String>,
    display_names: HashMap<String, String>,
    media: HashMap<String, Bytes>,
    failures: HashSet<(String, String)>,
    next_id: u64,
}

impl MxState {
    fn check(&self, op: &str, key: &str) -> PlatformResult<()> {
        if self.failures.contains(&(op.to_string(), key.to_string())) {
            return Err(injected(op, key));
        }
        Ok(())
    }
}

/// Matrix homeserver fake.
#[derive(Default)]
pub struct FakeMatrix {
    state: Mutex<MxState>,
}

impl FakeMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_member(&self, room: &str, user: &str) {
        let mut state = self.state.lock().unwrap();
        let members = state.rooms.entry(room.to_string()).or_default();
        if !members.iter().any(|m| m == user) {
            members.push(user.to_string());
        }
    }

    pub fn seed_event(&self, event: RoomEvent) {
        self.state
            .lock()
            .unwrap()
            .events
            .insert(event.event_id.clone(), event);
    }

    pub fn seed_media(&self, mxc: &str, data: &'static [u8]) {
        self.state
            .lock()
            .unwrap()
            .media
            .insert(mxc.to_string(), Bytes::from_static(data));
    }

    pub fn seed_display_name(&self, user: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .display_names
            .insert(user.to_string(), name.to_string());
    }

    pub fn mark_registered(&self, localpart: &str) {
        self.state
            .lock()
            .unwrap()
            .registered
            .insert(localpart.to_string());
    }

    pub fn fail_on(&self, op: &str, key: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((op.to_string(), key.to_string()));
    }

    pub fn calls(&self) -> Vec<MatrixCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn members(&self, room: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut members = state.rooms.get(room).cloned().unwrap_or_default();
        members.sort();
        members
    }
}

#[async_trait]
impl MatrixApi for FakeMatrix {
    fn bot_user_id(&self) -> &str {
        MATRIX_BOT
    }

    async fn joined_members(&self, room_id: &str) -> PlatformResult<Vec<String>> {
        let state = self.state.lock().unwrap();
        state.check("joined_members", room_id)?;
        Ok(state.rooms.get(room_id).cloned().unwrap_or_default())
    }

    async fn join_room(&self, user_id: &str, room_id: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MatrixCall::Join {
            user: user_id.to_string(),
            room: room_id.to_string(),
        });
        state.check("join_room", user_id)?;
        let members = state.rooms.entry(room_id.to_string()).or_default();
        if !members.iter().any(|m| m == user_id) {
            members.push(user_id.to_string());
        }
        Ok(())
    }

    async fn leave_room(&self, user_id: &str, room_id: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MatrixCall::Leave {
            user: user_id.to_string(),
            room: room_id.to_string(),
        });
        state.check("leave_room", user_id)?;
        if let Some(members) = state.rooms.get_mut(room_id) {
            members.retain(|m| m != user_id);
        }
        Ok(())
    }

    async fn send_message(
        &self,
        user_id: &str,
        room_id: &str,
        content: &MessageContent,
    ) -> PlatformResult<String> {
        let mut state = self.state.lock().unwrap();
        state.check("send_message", room_id)?;
        state.next_id += 1;
        let event_id = format!("$ev{}", state.next_id);
        state.calls.push(MatrixCall::Send {
            user: user_id.to_string(),
            room: room_id.to_string(),
            event_id: event_id.clone(),
        });
        state.events.insert(
            event_id.clone(),
            RoomEvent {
                event_id: event_id.clone(),
                room_id: room_id.to_string(),
                sender: user_id.to_string(),
                content: content.clone(),
            },
        );
        state.sent.push(SentMessage {
            user: user_id.to_string(),
            room: room_id.to_string(),
            event_id: event_id.clone(),
            content: content.clone(),
        });
        Ok(event_id)
    }

    async fn room_event(
        &self,
        _user_id: &str,
        _room_id: &str,
        event_id: &str,
    ) -> PlatformResult<RoomEvent> {
        let state = self.state.lock().unwrap();
        state
            .events
            .get(event_id)
            .cloned()
            .ok_or_else(|| api_error(404, "M_NOT_FOUND"))
    }

    async fn set_typing(
        &self,
        user_id: &str,
        room_id: &str,
        typing: bool,
        _timeout_ms: u64,
    ) -> PlatformResult<()> {
        self.state.lock().unwrap().calls.push(MatrixCall::Typing {
            user: user_id.to_string(),
            room: room_id.to_string(),
            typing,
        });
        Ok(())
    }

    async fn upload(
        &self,
        user_id: &str,
        data: Bytes,
        filename: &str,
        mime_type: &str,
    ) -> PlatformResult<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MatrixCall::Upload {
            user: user_id.to_string(),
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
        });
        state.next_id += 1;
        let mxc = format!("mxc://test/media{}", state.next_id);
        state.media.insert(mxc.clone(), data);
        Ok(mxc)
    }

    async fn download(&self, mxc: &str) -> PlatformResult<Bytes> {
        let state = self.state.lock().unwrap();
        state
            .media
            .get(mxc)
            .cloned()
            .ok_or_else(|| api_error(404, "M_NOT_FOUND"))
    }

    async fn register(&self, localpart: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MatrixCall::Register {
            localpart: localpart.to_string(),
        });
        if !state.registered.insert(localpart.to_string()) {
            return Err(api_error(400, USER_IN_USE));
        }
        Ok(())
    }

    async fn display_name(&self, user_id: &str) -> PlatformResult<Option<String>> {
        Ok(self.state.lock().unwrap().display_names.get(user_id).cloned())
    }

    async fn set_display_name(&self, user_id: &str, display_name: &str) -> PlatformResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MatrixCall::SetDisplayName {
            user: user_id.to_string(),
            name: display_name.to_string(),
        });
        state
            .display_names
            .insert(user_id.to_string(), display_name.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct IdentityState {
    puppets: HashMap<String, Puppet>,
    ghosts: HashMap<String, String>,
    failures: HashSet<String>,
    profile_updates: Vec<String>,
}

/// Deterministic identity mapping: puppets are `matrix_<localpart>`,
/// ghosts are `@mm_<id>:test`.
#[derive(Default)]
pub struct FakeIdentities {
    state: Mutex<IdentityState>,
}

impl FakeIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn puppet_id(matrix_user_id: &str) -> String {
        let localpart = matrix_user_id
            .trim_start_matches('@')
            .split(':')
            .next()
            .unwrap_or_default();
        format!("matrix_{}", localpart)
    }

    pub fn ghost_id(mattermost_user_id: &str) -> String {
        namespace().ghost_id(mattermost_user_id)
    }

    /// Make `id` (of either side) fail to resolve.
    pub fn fail_on(&self, id: &str) {
        self.state.lock().unwrap().failures.insert(id.to_string());
    }

    pub fn profile_updates(&self) -> Vec<String> {
        self.state.lock().unwrap().profile_updates.clone()
    }
}

#[async_trait]
impl IdentityResolver for FakeIdentities {
    async fn matrix_counterpart(&self, matrix_user_id: &str, _persist: bool) -> Result<Puppet> {
        let mut state = self.state.lock().unwrap();
        if state.failures.contains(matrix_user_id) {
            bail!("cannot create puppet for {}", matrix_user_id);
        }
        let puppet = Puppet {
            matrix_user_id: matrix_user_id.to_string(),
            mattermost_user_id: Self::puppet_id(matrix_user_id),
            access_token: "tok".to_string(),
        };
        state
            .puppets
            .insert(matrix_user_id.to_string(), puppet.clone());
        Ok(puppet)
    }

    async fn lookup_matrix_user(&self, matrix_user_id: &str) -> Result<Option<Puppet>> {
        Ok(self.state.lock().unwrap().puppets.get(matrix_user_id).cloned())
    }

    async fn mattermost_counterpart(
        &self,
        mattermost_user_id: &str,
        _persist: bool,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.failures.contains(mattermost_user_id) {
            bail!("cannot create ghost for {}", mattermost_user_id);
        }
        let ghost = Self::ghost_id(mattermost_user_id);
        state
            .ghosts
            .insert(mattermost_user_id.to_string(), ghost.clone());
        Ok(ghost)
    }

    async fn lookup_mattermost_user(&self, mattermost_user_id: &str) -> Result<Option<String>> {
        Ok(self.state.lock().unwrap().ghosts.get(mattermost_user_id).cloned())
    }

    async fn is_mattermost_user(&self, mattermost_user_id: &str) -> Result<bool> {
        Ok(!mattermost_user_id.starts_with("matrix_"))
    }

    async fn update_profile(&self, user: &MattermostUser) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .profile_updates
            .push(user.id.clone());
        Ok(())
    }
}

pub fn namespace() -> GhostNamespace {
    GhostNamespace::new("mm_", "test")
}

pub fn policy() -> IgnorePolicy {
    IgnorePolicy::new(MATRIX_BOT, MATTERMOST_BOT, Vec::new(), Vec::new())
}

/// Fakes wired into a [`BridgeContext`] over an in-memory store.
pub struct Harness {
    pub mattermost: Arc<FakeMattermost>,
    pub matrix: Arc<FakeMatrix>,
    pub identities: Arc<FakeIdentities>,
    pub ctx: Arc<BridgeContext>,
}

impl Harness {
    pub fn new() -> Self {
        let mattermost = Arc::new(FakeMattermost::new());
        let matrix = Arc::new(FakeMatrix::new());
        let identities = Arc::new(FakeIdentities::new());
        let ctx = Arc::new(BridgeContext {
            mattermost: mattermost.clone(),
            matrix: matrix.clone(),
            identities: identities.clone(),
            store: CorrelationStore::new(Database::open_in_memory().unwrap()),
            formatter: Arc::new(MarkdownConverter::new().unwrap()),
            namespace: namespace(),
        });
        Self {
            mattermost,
            matrix,
            identities,
            ctx,
        }
    }
}
