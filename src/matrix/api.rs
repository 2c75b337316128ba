//! Matrix API surface used by the bridge.

use async_trait::async_trait;
use bytes::Bytes;

use crate::common::error::PlatformResult;
use crate::matrix::events::{MessageContent, RoomEvent};

/// `errcode` returned when registering a user id that already exists.
pub const USER_IN_USE: &str = "M_USER_IN_USE";

/// Homeserver operations.
///
/// Every call taking a `user_id` is made as that user (the bridge bot or
/// one of its ghosts).
#[async_trait]
pub trait MatrixApi: Send + Sync {
    fn bot_user_id(&self) -> &str;

    async fn joined_members(&self, room_id: &str) -> PlatformResult<Vec<String>>;

    async fn join_room(&self, user_id: &str, room_id: &str) -> PlatformResult<()>;

    async fn leave_room(&self, user_id: &str, room_id: &str) -> PlatformResult<()>;

    /// Send an `m.room.message` and return its event id.
    async fn send_message(
        &self,
        user_id: &str,
        room_id: &str,
        content: &MessageContent,
    ) -> PlatformResult<String>;

    async fn room_event(
        &self,
        user_id: &str,
        room_id: &str,
        event_id: &str,
    ) -> PlatformResult<RoomEvent>;

    async fn set_typing(
        &self,
        user_id: &str,
        room_id: &str,
        typing: bool,
        timeout_ms: u64,
    ) -> PlatformResult<()>;

    /// Upload media and return its `mxc://` URI.
    async fn upload(
        &self,
        user_id: &str,
        data: Bytes,
        filename: &str,
        mime_type: &str,
    ) -> PlatformResult<String>;

    async fn download(&self, mxc: &str) -> PlatformResult<Bytes>;

    /// Register a user in the application service namespace.
    async fn register(&self, localpart: &str) -> PlatformResult<()>;

    async fn display_name(&self, user_id: &str) -> PlatformResult<Option<String>>;

    async fn set_display_name(&self, user_id: &str, display_name: &str) -> PlatformResult<()>;
}
