//! Mattermost REST client (API v4).

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::common::error::{PlatformError, PlatformResult};
use crate::common::http::{build_http_client, endpoint};
use crate::config::MattermostConfig;
use crate::mattermost::api::{
    Actor, CommandRequest, FileUpload, MattermostApi, MattermostUser, NewPost, NewUser, Post,
    PostPatch,
};

/// Error body of a failed Mattermost call.
#[derive(Debug, Default, Deserialize)]
struct AppErrorBody {
    #[serde(default)]
    id: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct PostList {
    #[serde(default)]
    order: Vec<String>,
    #[serde(default)]
    posts: HashMap<String, Post>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

pub struct MattermostClient {
    http: reqwest::Client,
    base: Url,
    bot_user_id: String,
    bot_token: String,
}

impl MattermostClient {
    pub fn new(config: &MattermostConfig) -> PlatformResult<Self> {
        Ok(Self {
            http: build_http_client()?,
            base: Url::parse(&config.url)?,
            bot_user_id: config.bot_user_id.clone(),
            bot_token: config.bot_access_token.clone(),
        })
    }

    pub fn bot_token(&self) -> &str {
        &self.bot_token
    }

    /// Websocket endpoint of the server (`ws(s)://.../api/v4/websocket`).
    pub fn websocket_url(&self) -> PlatformResult<Url> {
        let mut url = endpoint(&self.base, ["api", "v4", "websocket"])?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| PlatformError::decode(format!("cannot use {} for a websocket", url)))?;
        Ok(url)
    }

    fn request<'a>(
        &self,
        method: Method,
        actor: &Actor,
        path: impl IntoIterator<Item = &'a str>,
    ) -> PlatformResult<RequestBuilder> {
        let url = endpoint(&self.base, ["api", "v4"].into_iter().chain(path))?;
        let token = match actor {
            Actor::Bot => self.bot_token.as_str(),
            Actor::Puppet { token, .. } => token.as_str(),
        };
        debug!("Mattermost {} {}", method, url.path());
        Ok(self.http.request(method, url).bearer_auth(token))
    }

    async fn send(&self, request: RequestBuilder) -> PlatformResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: AppErrorBody = response.json().await.unwrap_or_default();
        Err(PlatformError::Api {
            status: status.as_u16(),
            code: body.id,
            message: body.message,
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> PlatformResult<T> {
        let response = self.send(request).await?;
        response
            .json()
            .await
            .map_err(|e| PlatformError::decode(e.to_string()))
    }
}

#[async_trait]
impl MattermostApi for MattermostClient {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    async fn channel_members(
        &self,
        channel_id: &str,
        page: u32,
        per_page: u32,
    ) -> PlatformResult<Vec<String>> {
        #[derive(Deserialize)]
        struct Member {
            user_id: String,
        }

        let request = self
            .request(Method::GET, &Actor::Bot, ["channels", channel_id, "members"])?
            .query(&[("page", page), ("per_page", per_page)]);
        let members: Vec<Member> = self.send_json(request).await?;
        Ok(members.into_iter().map(|m| m.user_id).collect())
    }

    async fn channel_team(&self, channel_id: &str) -> PlatformResult<String> {
        #[derive(Deserialize)]
        struct Channel {
            team_id: String,
        }

        let request = self.request(Method::GET, &Actor::Bot, ["channels", channel_id])?;
        let channel: Channel = self.send_json(request).await?;
        Ok(channel.team_id)
    }

    async fn add_team_member(&self, team_id: &str, user_id: &str) -> PlatformResult<()> {
        let request = self
            .request(Method::POST, &Actor::Bot, ["teams", team_id, "members"])?
            .json(&json!({ "team_id": team_id, "user_id": user_id }));
        self.send(request).await?;
        Ok(())
    }

    async fn remove_team_member(
        &self,
        actor: &Actor,
        team_id: &str,
        user_id: &str,
    ) -> PlatformResult<()> {
        let request = self.request(Method::DELETE, actor, ["teams", team_id, "members", user_id])?;
        self.send(request).await?;
        Ok(())
    }

    async fn add_channel_member(&self, channel_id: &str, user_id: &str) -> PlatformResult<()> {
        let request = self
            .request(Method::POST, &Actor::Bot, ["channels", channel_id, "members"])?
            .json(&json!({ "user_id": user_id }));
        self.send(request).await?;
        Ok(())
    }

    async fn remove_channel_member(&self, channel_id: &str, user_id: &str) -> PlatformResult<()> {
        let request = self.request(
            Method::DELETE,
            &Actor::Bot,
            ["channels", channel_id, "members", user_id],
        )?;
        self.send(request).await?;
        Ok(())
    }

    async fn thread(&self, root_id: &str) -> PlatformResult<Vec<String>> {
        let request = self.request(Method::GET, &Actor::Bot, ["posts", root_id, "thread"])?;
        let list: PostList = self.send_json(request).await?;
        Ok(list.order)
    }

    async fn post(&self, actor: &Actor, post_id: &str) -> PlatformResult<Post> {
        let request = self.request(Method::GET, actor, ["posts", post_id])?;
        self.send_json(request).await
    }

    async fn create_post(&self, actor: &Actor, post: &NewPost) -> PlatformResult<String> {
        let request = self.request(Method::POST, actor, ["posts"])?.json(post);
        let created: Created = self.send_json(request).await?;
        Ok(created.id)
    }

    async fn patch_post(
        &self,
        actor: &Actor,
        post_id: &str,
        patch: &PostPatch,
    ) -> PlatformResult<()> {
        let request = self
            .request(Method::PUT, actor, ["posts", post_id, "patch"])?
            .json(patch);
        self.send(request).await?;
        Ok(())
    }

    async fn recent_posts(&self, actor: &Actor, channel_id: &str) -> PlatformResult<Vec<Post>> {
        let request = self.request(Method::GET, actor, ["channels", channel_id, "posts"])?;
        let mut list: PostList = self.send_json(request).await?;
        Ok(list
            .order
            .iter()
            .filter_map(|id| list.posts.remove(id))
            .collect())
    }

    async fn download_file(&self, file_id: &str) -> PlatformResult<Bytes> {
        let request = self.request(Method::GET, &Actor::Bot, ["files", file_id])?;
        let response = self.send(request).await?;
        Ok(response.bytes().await?)
    }

    async fn upload_file(
        &self,
        actor: &Actor,
        channel_id: &str,
        file: FileUpload,
    ) -> PlatformResult<String> {
        #[derive(Deserialize)]
        struct Uploaded {
            file_infos: Vec<Created>,
        }

        let part = multipart::Part::bytes(file.data.to_vec())
            .file_name(file.filename)
            .mime_str(&file.mime_type)?;
        let form = multipart::Form::new()
            .text("channel_id", channel_id.to_string())
            .part("files", part);

        let request = self.request(Method::POST, actor, ["files"])?.multipart(form);
        let uploaded: Uploaded = self.send_json(request).await?;
        uploaded
            .file_infos
            .into_iter()
            .next()
            .map(|info| info.id)
            .ok_or_else(|| PlatformError::decode("upload returned no file infos"))
    }

    async fn execute_command(&self, actor: &Actor, command: &CommandRequest) -> PlatformResult<()> {
        let request = self
            .request(Method::POST, actor, ["commands", "execute"])?
            .json(command);
        self.send(request).await?;
        Ok(())
    }

    async fn user(&self, user_id: &str) -> PlatformResult<MattermostUser> {
        let request = self.request(Method::GET, &Actor::Bot, ["users", user_id])?;
        self.send_json(request).await
    }

    async fn create_user(&self, user: &NewUser) -> PlatformResult<MattermostUser> {
        let request = self.request(Method::POST, &Actor::Bot, ["users"])?.json(user);
        self.send_json(request).await
    }

    async fn create_token(&self, user_id: &str, description: &str) -> PlatformResult<String> {
        #[derive(Deserialize)]
        struct Token {
            token: String,
        }

        let request = self
            .request(Method::POST, &Actor::Bot, ["users", user_id, "tokens"])?
            .json(&json!({ "description": description }));
        let token: Token = self.send_json(request).await?;
        Ok(token.token)
    }
}
