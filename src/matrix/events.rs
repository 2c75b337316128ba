//! Matrix event and message content types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::error::{PlatformError, PlatformResult};

/// `msgtype` of an `m.room.message` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgType {
    Text,
    Notice,
    Emote,
    Image,
    File,
    Audio,
    Video,
    Other(String),
}

impl MsgType {
    pub fn parse(msgtype: &str) -> Self {
        match msgtype {
            "m.text" => Self::Text,
            "m.notice" => Self::Notice,
            "m.emote" => Self::Emote,
            "m.image" => Self::Image,
            "m.file" => Self::File,
            "m.audio" => Self::Audio,
            "m.video" => Self::Video,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "m.text",
            Self::Notice => "m.notice",
            Self::Emote => "m.emote",
            Self::Image => "m.image",
            Self::File => "m.file",
            Self::Audio => "m.audio",
            Self::Video => "m.video",
            Self::Other(other) => other,
        }
    }

    /// Media kind for an attachment with the given MIME type.
    pub fn from_mime(mime_type: &str) -> Self {
        if mime_type.starts_with("image/") {
            Self::Image
        } else if mime_type.starts_with("audio/") {
            Self::Audio
        } else if mime_type.starts_with("video/") {
            Self::Video
        } else {
            Self::File
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, Self::Image | Self::File | Self::Audio | Self::Video)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InReplyTo {
    pub event_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelatesTo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rel_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(rename = "m.in_reply_to", skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<InReplyTo>,
}

impl RelatesTo {
    pub fn replace(event_id: impl Into<String>) -> Self {
        Self {
            rel_type: Some("m.replace".to_string()),
            event_id: Some(event_id.into()),
            in_reply_to: None,
        }
    }

    pub fn reply(event_id: impl Into<String>) -> Self {
        Self {
            in_reply_to: Some(InReplyTo {
                event_id: event_id.into(),
            }),
            ..Default::default()
        }
    }
}

/// What a message event refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    /// Edit of the given event.
    Replace(String),
    /// Reply to the given event.
    Reply(String),
}

/// Content of an `m.room.message` event, in both directions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub msgtype: String,
    #[serde(default)]
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<MediaInfo>,
    #[serde(rename = "m.relates_to", skip_serializing_if = "Option::is_none")]
    pub relates_to: Option<RelatesTo>,
    #[serde(rename = "m.new_content", skip_serializing_if = "Option::is_none")]
    pub new_content: Option<Box<MessageContent>>,
}

impl MessageContent {
    pub fn text(msgtype: MsgType, body: impl Into<String>) -> Self {
        Self {
            msgtype: msgtype.as_str().to_string(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn msg_type(&self) -> MsgType {
        MsgType::parse(&self.msgtype)
    }

    /// Edit relations win over reply relations.
    pub fn relation(&self) -> Option<Relation> {
        let relates_to = self.relates_to.as_ref()?;
        if relates_to.rel_type.as_deref() == Some("m.replace") {
            return relates_to.event_id.clone().map(Relation::Replace);
        }
        relates_to
            .in_reply_to
            .as_ref()
            .map(|r| Relation::Reply(r.event_id.clone()))
    }

    /// Content to relay for an edit: the replacement content when present.
    pub fn edited_content(&self) -> &MessageContent {
        self.new_content.as_deref().unwrap_or(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    Invite,
    Join,
    Leave,
    Ban,
    Knock,
    Unknown(String),
}

impl Membership {
    pub fn parse(membership: &str) -> Self {
        match membership {
            "invite" => Self::Invite,
            "join" => Self::Join,
            "leave" => Self::Leave,
            "ban" => Self::Ban,
            "knock" => Self::Knock,
            other => Self::Unknown(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatrixEventKind {
    Message(MessageContent),
    Member {
        /// The user whose membership changed (`state_key`).
        user_id: String,
        membership: Membership,
        is_direct: bool,
    },
    Other(String),
}

/// A room timeline event.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixEvent {
    pub room_id: String,
    pub event_id: String,
    pub sender: String,
    pub kind: MatrixEventKind,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    room_id: String,
    #[serde(default)]
    event_id: String,
    #[serde(default)]
    sender: String,
    #[serde(default)]
    state_key: Option<String>,
    #[serde(default)]
    content: Value,
}

impl MatrixEvent {
    /// Decode a room event pushed by the homeserver in a transaction.
    pub fn from_json(raw: Value) -> PlatformResult<Self> {
        let raw: RawEvent =
            serde_json::from_value(raw).map_err(|e| PlatformError::decode(e.to_string()))?;

        let kind = match raw.event_type.as_str() {
            "m.room.message" => MatrixEventKind::Message(
                serde_json::from_value(raw.content)
                    .map_err(|e| PlatformError::decode(e.to_string()))?,
            ),
            "m.room.member" => {
                let membership = raw
                    .content
                    .get("membership")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                MatrixEventKind::Member {
                    user_id: raw.state_key.unwrap_or_default(),
                    membership: Membership::parse(membership),
                    is_direct: raw
                        .content
                        .get("is_direct")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                }
            }
            other => MatrixEventKind::Other(other.to_string()),
        };

        Ok(Self {
            room_id: raw.room_id,
            event_id: raw.event_id,
            sender: raw.sender,
            kind,
        })
    }
}

/// A previously sent event, fetched to build reply fallbacks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomEvent {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub content: MessageContent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_msgtype_from_mime() {
        assert_eq!(MsgType::from_mime("image/png"), MsgType::Image);
        assert_eq!(MsgType::from_mime("audio/ogg"), MsgType::Audio);
        assert_eq!(MsgType::from_mime("video/mp4"), MsgType::Video);
        assert_eq!(MsgType::from_mime("application/pdf"), MsgType::File);
        assert_eq!(MsgType::from_mime(""), MsgType::File);
    }

    #[test]
    fn test_relations() {
        let edit: MessageContent = serde_json::from_value(json!({
            "msgtype": "m.text",
            "body": "* fixed",
            "m.new_content": {"msgtype": "m.text", "body": "fixed"},
            "m.relates_to": {"rel_type": "m.replace", "event_id": "$orig"}
        }))
        .unwrap();
        assert_eq!(edit.relation(), Some(Relation::Replace("$orig".to_string())));
        assert_eq!(edit.edited_content().body, "fixed");

        let reply: MessageContent = serde_json::from_value(json!({
            "msgtype": "m.text",
            "body": "yes",
            "m.relates_to": {"m.in_reply_to": {"event_id": "$parent"}}
        }))
        .unwrap();
        assert_eq!(reply.relation(), Some(Relation::Reply("$parent".to_string())));
        assert_eq!(reply.edited_content().body, "yes");
    }

    #[test]
    fn test_serialized_edit_uses_matrix_names() {
        let mut content = MessageContent::text(MsgType::Text, "* hi");
        content.new_content = Some(Box::new(MessageContent::text(MsgType::Text, "hi")));
        content.relates_to = Some(RelatesTo::replace("$e"));

        let json = serde_json::to_value(&content).unwrap();
        assert_eq!(json["m.relates_to"]["rel_type"], "m.replace");
        assert_eq!(json["m.new_content"]["body"], "hi");
        assert!(json.get("url").is_none());
    }

    #[test]
    fn test_member_event() {
        let event = MatrixEvent::from_json(json!({
                "type": "m.room.member",
                "room_id": "!room:test",
                "event_id": "$m",
                "sender": "@alice:test",
                "state_key": "@alice:test",
                "content": {"membership": "ban"}
            }))
        .unwrap();
        assert_eq!(event.room_id, "!room:test");

        assert_eq!(
            event.kind,
            MatrixEventKind::Member {
                user_id: "@alice:test".to_string(),
                membership: Membership::Ban,
                is_direct: false,
            }
        );
    }

    #[test]
    fn test_other_event_kind() {
        let event = MatrixEvent::from_json(json!({
            "type": "m.reaction",
            "room_id": "!room:test",
            "event_id": "$r",
            "sender": "@a:test",
            "content": {}
        }))
        .unwrap();
        assert_eq!(event.kind, MatrixEventKind::Other("m.reaction".to_string()));
    }

    #[test]
    fn test_direct_invite_event() {
        let event = MatrixEvent::from_json(json!({
            "type": "m.room.member",
            "room_id": "!dm:test",
            "event_id": "$i",
            "sender": "@alice:test",
            "state_key": "@mm_bob:test",
            "content": {"membership": "invite", "is_direct": true}
        }))
        .unwrap();

        assert_eq!(
            event.kind,
            MatrixEventKind::Member {
                user_id: "@mm_bob:test".to_string(),
                membership: Membership::Invite,
                is_direct: true,
            }
        );
    }

    #[test]
    fn test_event_without_room_is_rejected() {
        let result = MatrixEvent::from_json(json!({"type": "m.room.message", "content": {}}));
        assert!(result.is_err());
    }
}
