//! Membership reconciliation of one channel pair.
//!
//! A pass makes both sides' member lists mirror each other: every native
//! Matrix user gets a puppet in the Mattermost channel, every genuine
//! Mattermost member gets a ghost in the Matrix room, and mirrored accounts
//! whose counterpart is gone are removed. Running a pass again on a
//! converged pair makes no membership calls.

use std::collections::HashSet;
use std::fmt;

use anyhow::{Context, Result};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::bridge::context::BridgeContext;
use crate::bridge::policy::IgnorePolicy;
use crate::bridge::routes::ChannelPair;
use crate::common::error::PlatformResult;
use crate::common::types::Side;
use crate::mattermost::api::{CHANNEL_MEMBER_EXISTS, REMOVE_DEFAULT_CHANNEL, TEAM_MEMBER_EXISTS};

/// Page size used when listing Mattermost channel members.
pub const MEMBERS_PER_PAGE: u32 = 200;

/// Membership changes made by one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub mattermost_joins: usize,
    pub mattermost_leaves: usize,
    pub matrix_joins: usize,
    pub matrix_leaves: usize,
    pub failures: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mattermost +{}/-{}, matrix +{}/-{}, {} failed",
            self.mattermost_joins,
            self.mattermost_leaves,
            self.matrix_joins,
            self.matrix_leaves,
            self.failures
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Joined,
    Left,
    Unchanged,
}

/// Run one reconciliation pass over `pair`.
///
/// Fails only if the bridge bots cannot be made members of both sides or a
/// member list cannot be fetched. Per-user failures are logged and counted.
pub async fn reconcile(
    ctx: &BridgeContext,
    policy: &IgnorePolicy,
    pair: &ChannelPair,
) -> Result<ReconcileReport> {
    let room = pair.matrix_room.as_str();
    let channel = pair.mattermost_channel.as_str();
    let mut report = ReconcileReport::default();

    ctx.matrix
        .join_room(ctx.matrix_bot(), room)
        .await
        .with_context(|| format!("bridge bot cannot join {}", room))?;

    let team = pair
        .team(ctx.mattermost.as_ref())
        .await
        .with_context(|| format!("cannot find the team of {}", channel))?;
    debug!("{} belongs to team {}", channel, team);

    let mut mattermost_members = fetch_mattermost_members(ctx, channel).await?;
    if !mattermost_members.contains(ctx.mattermost_bot()) {
        join_mattermost(ctx, pair, ctx.mattermost_bot())
            .await
            .with_context(|| format!("bridge bot cannot join {}", channel))?;
    }
    mattermost_members.remove(ctx.mattermost_bot());

    let (mut ghosts, natives): (HashSet<String>, Vec<String>) = {
        let (ghosts, natives): (Vec<String>, Vec<String>) = ctx
            .matrix
            .joined_members(room)
            .await
            .with_context(|| format!("cannot list members of {}", room))?
            .into_iter()
            .partition(|user| ctx.namespace.is_ghost(user));
        (ghosts.into_iter().collect(), natives)
    };

    // Native Matrix users -> Mattermost puppets.
    let results = join_all(
        natives
            .iter()
            .filter(|user| !policy.ignores(Side::Matrix, user))
            .map(|user| {
                let members = &mattermost_members;
                async move {
                    let puppet = match ctx.identities.matrix_counterpart(user, true).await {
                        Ok(puppet) => puppet,
                        Err(e) => return (user, None, Err(e)),
                    };
                    let change: Result<Change> = if members.contains(&puppet.mattermost_user_id) {
                        Ok(Change::Unchanged)
                    } else {
                        join_mattermost(ctx, pair, &puppet.mattermost_user_id)
                            .await
                            .map(|()| Change::Joined)
                            .map_err(Into::into)
                    };
                    (user, Some(puppet.mattermost_user_id), change)
                }
            }),
    )
    .await;
    for (user, puppet, change) in results {
        if let Some(puppet) = puppet {
            mattermost_members.remove(&puppet);
        }
        tally(&mut report, Side::Mattermost, user, change);
    }

    // Remaining Mattermost members -> Matrix ghosts, or removal of puppets
    // whose Matrix user is gone.
    let results = join_all(
        mattermost_members
            .iter()
            .filter(|user| !policy.ignores(Side::Mattermost, user))
            .map(|user| {
                let ghosts = &ghosts;
                async move {
                    match ctx.identities.is_mattermost_user(user).await {
                        Ok(true) => {}
                        Ok(false) => {
                            let change: Result<Change> = leave_mattermost(ctx, pair, user)
                                .await
                                .map(|()| Change::Left)
                                .map_err(Into::into);
                            return (user, Side::Mattermost, None, change);
                        }
                        Err(e) => return (user, Side::Matrix, Some(ctx.namespace.ghost_id(user)), Err(e)),
                    }
                    // A failed lookup must not evict the ghost of a user still
                    // in the channel; ghost ids are derived from the user id.
                    let ghost = match ctx.identities.mattermost_counterpart(user, true).await {
                        Ok(ghost) => ghost,
                        Err(e) => {
                            return (user, Side::Matrix, Some(ctx.namespace.ghost_id(user)), Err(e))
                        }
                    };
                    let change: Result<Change> = if ghosts.contains(&ghost) {
                        Ok(Change::Unchanged)
                    } else {
                        ctx.matrix
                            .join_room(&ghost, room)
                            .await
                            .map(|()| Change::Joined)
                            .map_err(Into::into)
                    };
                    (user, Side::Matrix, Some(ghost), change)
                }
            }),
    )
    .await;
    for (user, side, ghost, change) in results {
        if let Some(ghost) = ghost {
            ghosts.remove(&ghost);
        }
        tally(&mut report, side, user, change);
    }

    // Ghosts whose Mattermost user left the channel.
    let results = join_all(
        ghosts
            .iter()
            .filter(|ghost| ghost.as_str() != ctx.matrix_bot())
            .map(|ghost| async move {
                let change: Result<Change> = ctx
                    .matrix
                    .leave_room(ghost, room)
                    .await
                    .map(|()| Change::Left)
                    .map_err(Into::into);
                (ghost, change)
            }),
    )
    .await;
    for (ghost, change) in results {
        tally(&mut report, Side::Matrix, ghost, change);
    }

    Ok(report)
}

fn tally(report: &mut ReconcileReport, side: Side, user: &str, change: Result<Change>) {
    match (side, change) {
        (Side::Mattermost, Ok(Change::Joined)) => report.mattermost_joins += 1,
        (Side::Mattermost, Ok(Change::Left)) => report.mattermost_leaves += 1,
        (Side::Matrix, Ok(Change::Joined)) => report.matrix_joins += 1,
        (Side::Matrix, Ok(Change::Left)) => report.matrix_leaves += 1,
        (_, Ok(Change::Unchanged)) => {}
        (side, Err(e)) => {
            warn!("Failed to mirror {} on {}: {:#}", user, side, e);
            report.failures += 1;
        }
    }
}

/// All member ids of a Mattermost channel.
async fn fetch_mattermost_members(ctx: &BridgeContext, channel: &str) -> Result<HashSet<String>> {
    let mut members = HashSet::new();
    for page in 0.. {
        let batch = ctx
            .mattermost
            .channel_members(channel, page, MEMBERS_PER_PAGE)
            .await
            .with_context(|| format!("cannot list members of {}", channel))?;
        let full = batch.len() == MEMBERS_PER_PAGE as usize;
        members.extend(batch);
        if !full {
            break;
        }
    }
    Ok(members)
}

/// Add `user_id` to the pair's team and then to its channel.
pub async fn join_mattermost(
    ctx: &BridgeContext,
    pair: &ChannelPair,
    user_id: &str,
) -> PlatformResult<()> {
    let team = pair.team(ctx.mattermost.as_ref()).await?;

    match ctx.mattermost.add_team_member(team, user_id).await {
        Ok(()) => {}
        Err(e) if e.is_code(TEAM_MEMBER_EXISTS) => {
            debug!("{} already in team {}", user_id, team);
        }
        Err(e) => return Err(e),
    }

    match ctx
        .mattermost
        .add_channel_member(&pair.mattermost_channel, user_id)
        .await
    {
        Ok(()) => {
            info!("{} joined {}", user_id, pair.mattermost_channel);
            Ok(())
        }
        Err(e) if e.is_code(CHANNEL_MEMBER_EXISTS) => {
            debug!("{} already in {}", user_id, pair.mattermost_channel);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Remove `user_id` from the pair's channel.
pub async fn leave_mattermost(
    ctx: &BridgeContext,
    pair: &ChannelPair,
    user_id: &str,
) -> PlatformResult<()> {
    match ctx
        .mattermost
        .remove_channel_member(&pair.mattermost_channel, user_id)
        .await
    {
        Ok(()) => {
            info!("{} left {}", user_id, pair.mattermost_channel);
            Ok(())
        }
        Err(e) if e.is_code(REMOVE_DEFAULT_CHANNEL) => {
            debug!("{} cannot leave default channel {}", user_id, pair.mattermost_channel);
            Ok(())
        }
        Err(e) => Err(e),
    }
}
