//! Matrix side: application service client, the homeserver transaction
//! endpoint and the API trait the bridge is written against.

pub mod api;
pub mod appservice;
pub mod client;
pub mod events;

pub use appservice::Appservice;
pub use client::MatrixClient;
