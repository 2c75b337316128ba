//! Event handlers for one bridged channel pair.
//!
//! The controller resolves the pair an event belongs to and hands the event
//! to a [`ChannelRelay`], which dispatches on the event kind.

mod matrix;
mod mattermost;

use crate::bridge::context::BridgeContext;
use crate::bridge::policy::IgnorePolicy;
use crate::bridge::routes::{ChannelPair, Routes};

/// One event's view of the bridge: shared services plus the target pair.
pub struct ChannelRelay<'a> {
    pub ctx: &'a BridgeContext,
    pub policy: &'a IgnorePolicy,
    pub routes: &'a Routes,
    pub pair: &'a ChannelPair,
}

impl<'a> ChannelRelay<'a> {
    pub fn new(
        ctx: &'a BridgeContext,
        policy: &'a IgnorePolicy,
        routes: &'a Routes,
        pair: &'a ChannelPair,
    ) -> Self {
        Self {
            ctx,
            policy,
            routes,
            pair,
        }
    }
}
