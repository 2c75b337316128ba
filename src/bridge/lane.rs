//! Per-direction relay lanes.
//!
//! Each lane is a single worker task draining a FIFO inbox, so the events of
//! one direction are handled one at a time in arrival order. A lane starts
//! closed and only begins working once opened.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use anyhow::{anyhow, Result};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error};

use crate::common::types::Direction;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Serialized executor for one relay direction.
pub struct RelayLane {
    direction: Direction,
    inbox: mpsc::UnboundedSender<Job>,
    open: watch::Sender<bool>,
}

impl RelayLane {
    /// Create a closed lane and spawn its worker on the current runtime.
    pub fn new(direction: Direction) -> Self {
        let (inbox, jobs) = mpsc::unbounded_channel();
        let (open, gate) = watch::channel(false);
        tokio::spawn(worker(direction, jobs, gate));
        Self {
            direction,
            inbox,
            open,
        }
    }

    /// Start processing queued and future jobs.
    pub fn open(&self) {
        self.open.send_replace(true);
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Enqueue a job without waiting for it. Failures are logged here.
    pub fn submit<F>(&self, job: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let direction = self.direction;
        let job = async move {
            if let Err(e) = job.await {
                error!("Relay {} failed: {:#}", direction, e);
            }
        };
        if self.inbox.send(Box::pin(job)).is_err() {
            error!("Relay lane {} is gone, dropping event", self.direction);
        }
    }

    /// Enqueue a job and wait for its result.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = async move {
            let _ = tx.send(job.await);
        };
        self.inbox
            .send(Box::pin(job))
            .map_err(|_| anyhow!("relay lane {} is gone", self.direction))?;
        rx.await
            .map_err(|_| anyhow!("relay job on {} panicked", self.direction))?
    }
}

async fn worker(
    direction: Direction,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    mut gate: watch::Receiver<bool>,
) {
    if gate.wait_for(|open| *open).await.is_err() {
        debug!("Relay lane {} dropped before opening", direction);
        return;
    }
    debug!("Relay lane {} open", direction);

    while let Some(job) = jobs.recv().await {
        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            error!("Relay job on {} panicked", direction);
        }
    }
    debug!("Relay lane {} closed", direction);
}
