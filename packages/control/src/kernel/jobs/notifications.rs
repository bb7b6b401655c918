//! Change notifications that wake the job runner.
//!
//! Delivery is at-least-once at best: ids may arrive twice, arrive for jobs
//! that are no longer queued, or be lost while the listener reconnects. The
//! runner treats every wakeup as a hint and re-checks the store.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::store::StoreError;
use crate::common::JobId;

/// Default channel the `jobs_queued_notify` trigger publishes on.
pub const JOBS_CHANNEL: &str = "jobs_insert";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    /// A job was (probably) queued.
    Job(JobId),
    /// Nothing arrived within the timeout.
    Timeout,
    /// Notifications may have been dropped; rescan the queue.
    Lagged,
}

#[async_trait]
pub trait JobNotifications: Send {
    /// Wait up to `timeout` for the next notification.
    async fn recv(&mut self, timeout: Duration) -> Result<Wakeup, StoreError>;
}

// =============================================================================
// Postgres LISTEN
// =============================================================================

pub struct PgJobNotifications {
    listener: PgListener,
}

impl PgJobNotifications {
    /// Start listening on `channel`. Call this before the catch-up scan so
    /// that nothing queued in between is missed.
    pub async fn listen(pool: &PgPool, channel: &str) -> Result<Self, StoreError> {
        let mut listener = PgListener::connect_with(pool).await?;
        listener.listen(channel).await?;
        debug!(channel = %channel, "listening for queued jobs");
        Ok(Self { listener })
    }
}

#[async_trait]
impl JobNotifications for PgJobNotifications {
    async fn recv(&mut self, timeout: Duration) -> Result<Wakeup, StoreError> {
        match tokio::time::timeout(timeout, self.listener.try_recv()).await {
            Err(_) => Ok(Wakeup::Timeout),
            Ok(Ok(Some(notification))) => match notification.payload().parse::<JobId>() {
                Ok(id) => Ok(Wakeup::Job(id)),
                Err(_) => {
                    warn!(payload = %notification.payload(), "ignoring malformed job notification");
                    Ok(Wakeup::Lagged)
                }
            },
            // The listener reconnects on the next call; anything sent while
            // it was down is gone.
            Ok(Ok(None)) => {
                warn!("notification connection lost; reconnecting");
                Ok(Wakeup::Lagged)
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }
}

// =============================================================================
// In-process channel
// =============================================================================

/// Notifications delivered over an in-process channel.
pub struct ChannelNotifications {
    rx: mpsc::UnboundedReceiver<JobId>,
}

impl ChannelNotifications {
    pub fn channel() -> (mpsc::UnboundedSender<JobId>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx })
    }

    /// Next id if one is already waiting.
    pub fn try_next(&mut self) -> Option<JobId> {
        self.rx.try_recv().ok()
    }
}

#[async_trait]
impl JobNotifications for ChannelNotifications {
    async fn recv(&mut self, timeout: Duration) -> Result<Wakeup, StoreError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_) => Ok(Wakeup::Timeout),
            Ok(Some(id)) => Ok(Wakeup::Job(id)),
            Ok(None) => {
                // Every sender is gone; behave like a quiet channel.
                tokio::time::sleep(timeout).await;
                Ok(Wakeup::Timeout)
            }
        }
    }
}
