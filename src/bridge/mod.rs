//! The bridge engine between Matrix rooms and Mattermost channels.
//!
//! ## Module Structure
//!
//! - `controller`: Entry point for inbound events (`Bridge` struct)
//! - `lane`: Per-direction serialized relay lanes
//! - `reconcile`: Membership reconciliation of a channel pair
//! - `dispatch`: Per-event handlers for both directions
//! - `routes`: Channel pairs and their lookup indexes
//! - `identity`: Puppets, ghosts and the identity directory
//! - `format`: Markdown <-> Matrix HTML conversion
//! - `policy`: Users that are never bridged

pub mod context;
pub mod controller;
pub mod dispatch;
pub mod format;
pub mod identity;
pub mod lane;
pub mod policy;
pub mod reconcile;
pub mod routes;

#[cfg(test)]
pub(crate) mod testing;

pub use context::BridgeContext;
pub use controller::Bridge;
pub use format::MarkdownConverter;
pub use identity::{GhostNamespace, UserDirectory};
