//! Mattermost websocket events.

use serde::Deserialize;
use serde_json::Value;

use crate::common::error::{PlatformError, PlatformResult};
use crate::mattermost::api::{MattermostUser, Post};

/// Events the server sends that never need relaying.
const NOISE_EVENTS: &[&str] = &[
    "hello",
    "added_to_team",
    "new_user",
    "status_change",
    "channel_viewed",
    "preferences_changed",
    "sidebar_category_updated",
];

/// Routing scope of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Broadcast {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub user_id: String,
}

impl Broadcast {
    pub fn channel(&self) -> Option<&str> {
        (!self.channel_id.is_empty()).then_some(self.channel_id.as_str())
    }

    pub fn team(&self) -> Option<&str> {
        (!self.team_id.is_empty()).then_some(self.team_id.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum MattermostEvent {
    Posted(Post),
    PostEdited(Post),
    UserAdded { user_id: String },
    UserRemoved { user_id: String },
    LeaveTeam { user_id: String },
    UserUpdated(MattermostUser),
    Typing { user_id: String },
    /// A direct message channel with the bot was created.
    DirectAdded,
    /// Known event kind with nothing to relay.
    Noise(String),
    Unknown(String),
}

impl MattermostEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::Posted(_) => "posted",
            Self::PostEdited(_) => "post_edited",
            Self::UserAdded { .. } => "user_added",
            Self::UserRemoved { .. } => "user_removed",
            Self::LeaveTeam { .. } => "leave_team",
            Self::UserUpdated(_) => "user_updated",
            Self::Typing { .. } => "typing",
            Self::DirectAdded => "direct_added",
            Self::Noise(name) | Self::Unknown(name) => name,
        }
    }
}

/// One decoded websocket event.
#[derive(Debug, Clone)]
pub struct MattermostMessage {
    pub event: MattermostEvent,
    pub broadcast: Broadcast,
    /// The user the event is about or was caused by, when known.
    pub sender: Option<String>,
}

#[derive(Deserialize)]
struct Frame {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    broadcast: Broadcast,
}

impl MattermostMessage {
    /// Decode a websocket text frame.
    ///
    /// Returns `None` for frames that are not events, such as replies to
    /// the authentication challenge.
    pub fn parse(text: &str) -> PlatformResult<Option<Self>> {
        let frame: Frame =
            serde_json::from_str(text).map_err(|e| PlatformError::decode(e.to_string()))?;
        let Some(name) = frame.event else {
            return Ok(None);
        };
        let data = frame.data;

        let data_user = str_field(&data, "user_id").or_else(|| {
            data.get("user")
                .and_then(|u| u.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });

        let event = match name.as_str() {
            "posted" => MattermostEvent::Posted(embedded_post(&data)?),
            "post_edited" => MattermostEvent::PostEdited(embedded_post(&data)?),
            "user_added" => MattermostEvent::UserAdded {
                user_id: required(data_user.clone(), &name)?,
            },
            "user_removed" => MattermostEvent::UserRemoved {
                user_id: required(data_user.clone(), &name)?,
            },
            "leave_team" => MattermostEvent::LeaveTeam {
                user_id: required(data_user.clone(), &name)?,
            },
            "user_updated" => {
                let user = data
                    .get("user")
                    .cloned()
                    .ok_or_else(|| PlatformError::decode("user_updated without user"))?;
                MattermostEvent::UserUpdated(
                    serde_json::from_value(user).map_err(|e| PlatformError::decode(e.to_string()))?,
                )
            }
            "typing" => MattermostEvent::Typing {
                user_id: required(data_user.clone(), &name)?,
            },
            "direct_added" => MattermostEvent::DirectAdded,
            n if NOISE_EVENTS.contains(&n) => MattermostEvent::Noise(name.clone()),
            _ => MattermostEvent::Unknown(name.clone()),
        };

        let sender = match &event {
            MattermostEvent::Posted(post) | MattermostEvent::PostEdited(post) => {
                data_user.or_else(|| Some(post.user_id.clone()))
            }
            _ => data_user,
        };

        Ok(Some(Self {
            event,
            broadcast: frame.broadcast,
            sender,
        }))
    }
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn required(value: Option<String>, event: &str) -> PlatformResult<String> {
    value.ok_or_else(|| PlatformError::decode(format!("{} without user_id", event)))
}

/// Posts are sent as a JSON document inside a string field.
fn embedded_post(data: &Value) -> PlatformResult<Post> {
    let raw = data
        .get("post")
        .and_then(Value::as_str)
        .ok_or_else(|| PlatformError::decode("post event without post"))?;
    serde_json::from_str(raw).map_err(|e| PlatformError::decode(e.to_string()))
}
