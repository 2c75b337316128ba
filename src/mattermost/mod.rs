//! Mattermost side: REST client, websocket events and the API trait the
//! bridge is written against.

pub mod api;
pub mod client;
pub mod events;
pub mod websocket;

pub use client::MattermostClient;
