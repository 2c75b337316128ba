//! Mattermost websocket event stream.

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::common::error::PlatformResult;
use crate::mattermost::events::MattermostMessage;

/// Connect to the websocket, authenticate and forward decoded events until
/// the connection closes or the receiver goes away.
pub async fn run_event_stream(
    url: &Url,
    token: &str,
    events: &mpsc::UnboundedSender<MattermostMessage>,
) -> PlatformResult<()> {
    let (stream, _) = connect_async(url.as_str()).await?;
    info!("Connected to Mattermost websocket at {}", url);

    let (mut write, mut read) = stream.split();
    let challenge = json!({
        "seq": 1,
        "action": "authentication_challenge",
        "data": { "token": token },
    });
    write.send(Message::Text(challenge.to_string())).await?;

    while let Some(frame) = read.next().await {
        match frame? {
            Message::Text(text) => match MattermostMessage::parse(&text) {
                Ok(Some(message)) => {
                    debug!("Mattermost event: {}", text);
                    if events.send(message).is_err() {
                        debug!("Event receiver dropped, closing websocket");
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Failed to decode Mattermost event: {}", e),
            },
            Message::Close(reason) => {
                info!("Mattermost websocket closed: {:?}", reason);
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
