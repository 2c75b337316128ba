//! Matrix client-server API client acting as an application service.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{header, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::common::error::{PlatformError, PlatformResult};
use crate::common::http::{build_http_client, endpoint};
use crate::config::MatrixConfig;
use crate::matrix::api::MatrixApi;
use crate::matrix::events::{MessageContent, RoomEvent};

const CLIENT: [&str; 3] = ["_matrix", "client", "v3"];
const MEDIA: [&str; 3] = ["_matrix", "media", "v3"];

#[derive(Debug, Default, Deserialize)]
struct MatrixErrorBody {
    #[serde(default)]
    errcode: String,
    #[serde(default)]
    error: String,
}

pub struct MatrixClient {
    http: reqwest::Client,
    base: Url,
    token: String,
    bot_user_id: String,
    txn_counter: AtomicU64,
}

impl MatrixClient {
    pub fn new(config: &MatrixConfig) -> PlatformResult<Self> {
        Ok(Self {
            http: build_http_client()?,
            base: Url::parse(&config.homeserver_url)?,
            token: config.appservice_token.clone(),
            bot_user_id: config.bot_user_id(),
            txn_counter: AtomicU64::new(0),
        })
    }

    /// Build a request made as `user_id` through application service
    /// impersonation.
    fn request<'a>(
        &self,
        method: Method,
        user_id: &str,
        prefix: [&'a str; 3],
        path: impl IntoIterator<Item = &'a str>,
    ) -> PlatformResult<RequestBuilder> {
        let url = endpoint(&self.base, prefix.into_iter().chain(path))?;
        debug!("Matrix {} {} as {}", method, url.path(), user_id);
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(&self.token)
            .query(&[("user_id", user_id)]))
    }

    async fn send(&self, request: RequestBuilder) -> PlatformResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: MatrixErrorBody = response.json().await.unwrap_or_default();
        Err(PlatformError::Api {
            status: status.as_u16(),
            code: body.errcode,
            message: body.error,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> PlatformResult<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| PlatformError::decode(e.to_string()))
    }

    fn next_txn_id(&self) -> String {
        let n = self.txn_counter.fetch_add(1, Ordering::Relaxed);
        format!("matterlink.{}.{}", Utc::now().timestamp_millis(), n)
    }
}

/// Split `mxc://server/media` into its server name and media id.
fn parse_mxc(mxc: &str) -> PlatformResult<(&str, &str)> {
    mxc.strip_prefix("mxc://")
        .and_then(|rest| rest.split_once('/'))
        .filter(|(server, media)| !server.is_empty() && !media.is_empty())
        .ok_or_else(|| PlatformError::decode(format!("invalid content URI '{}'", mxc)))
}

#[async_trait]
impl MatrixApi for MatrixClient {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    async fn joined_members(&self, room_id: &str) -> PlatformResult<Vec<String>> {
        #[derive(Deserialize)]
        struct JoinedMembers {
            joined: HashMap<String, Value>,
        }

        let request = self.request(
            Method::GET,
            &self.bot_user_id,
            CLIENT,
            ["rooms", room_id, "joined_members"],
        )?;
        let members: JoinedMembers = self.send_json(request).await?;
        Ok(members.joined.into_keys().collect())
    }

    async fn join_room(&self, user_id: &str, room_id: &str) -> PlatformResult<()> {
        let request = self
            .request(Method::POST, user_id, CLIENT, ["rooms", room_id, "join"])?
            .json(&json!({}));
        self.send(request).await?;
        Ok(())
    }

    async fn leave_room(&self, user_id: &str, room_id: &str) -> PlatformResult<()> {
        let request = self
            .request(Method::POST, user_id, CLIENT, ["rooms", room_id, "leave"])?
            .json(&json!({}));
        self.send(request).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        user_id: &str,
        room_id: &str,
        content: &MessageContent,
    ) -> PlatformResult<String> {
        #[derive(Deserialize)]
        struct Sent {
            event_id: String,
        }

        let txn_id = self.next_txn_id();
        let request = self
            .request(
                Method::PUT,
                user_id,
                CLIENT,
                ["rooms", room_id, "send", "m.room.message", txn_id.as_str()],
            )?
            .json(content);
        let sent: Sent = self.send_json(request).await?;
        Ok(sent.event_id)
    }

    async fn room_event(
        &self,
        user_id: &str,
        room_id: &str,
        event_id: &str,
    ) -> PlatformResult<RoomEvent> {
        let request = self.request(
            Method::GET,
            user_id,
            CLIENT,
            ["rooms", room_id, "event", event_id],
        )?;
        self.send_json(request).await
    }

    async fn set_typing(
        &self,
        user_id: &str,
        room_id: &str,
        typing: bool,
        timeout_ms: u64,
    ) -> PlatformResult<()> {
        let body = if typing {
            json!({ "typing": true, "timeout": timeout_ms })
        } else {
            json!({ "typing": false })
        };
        let request = self
            .request(Method::PUT, user_id, CLIENT, ["rooms", room_id, "typing", user_id])?
            .json(&body);
        self.send(request).await?;
        Ok(())
    }

    async fn upload(
        &self,
        user_id: &str,
        data: Bytes,
        filename: &str,
        mime_type: &str,
    ) -> PlatformResult<String> {
        #[derive(Deserialize)]
        struct Uploaded {
            content_uri: String,
        }

        let request = self
            .request(Method::POST, user_id, MEDIA, ["upload"])?
            .query(&[("filename", filename)])
            .header(header::CONTENT_TYPE, mime_type)
            .body(data);
        let uploaded: Uploaded = self.send_json(request).await?;
        Ok(uploaded.content_uri)
    }

    async fn download(&self, mxc: &str) -> PlatformResult<Bytes> {
        let (server, media_id) = parse_mxc(mxc)?;
        let request = self.request(
            Method::GET,
            &self.bot_user_id,
            MEDIA,
            ["download", server, media_id],
        )?;
        Ok(self.send(request).await?.bytes().await?)
    }

    async fn register(&self, localpart: &str) -> PlatformResult<()> {
        let url = endpoint(&self.base, CLIENT.into_iter().chain(["register"]))?;
        let request = self.http.post(url).bearer_auth(&self.token).json(&json!({
            "type": "m.login.application_service",
            "username": localpart,
        }));
        self.send(request).await?;
        Ok(())
    }

    async fn display_name(&self, user_id: &str) -> PlatformResult<Option<String>> {
        #[derive(Deserialize)]
        struct DisplayName {
            displayname: Option<String>,
        }

        let request = self.request(
            Method::GET,
            user_id,
            CLIENT,
            ["profile", user_id, "displayname"],
        )?;
        match self.send_json::<DisplayName>(request).await {
            Ok(profile) => Ok(profile.displayname),
            Err(e) if e.is_code("M_NOT_FOUND") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn set_display_name(&self, user_id: &str, display_name: &str) -> PlatformResult<()> {
        let request = self
            .request(Method::PUT, user_id, CLIENT, ["profile", user_id, "displayname"])?
            .json(&json!({ "displayname": display_name }));
        self.send(request).await?;
        Ok(())
    }
}
