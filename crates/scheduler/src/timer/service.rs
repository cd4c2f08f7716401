//! TimerService trait definition

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use tokio::time::Instant;

use crate::persistence::StoreError;

/// Error type for timer operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    /// The timer service has been shut down
    #[error("timer service is closed")]
    Closed,

    /// The timer could not be persisted
    #[error("timer persistence failed: {0}")]
    Storage(#[from] StoreError),
}

/// Single-slot timer per link id
#[async_trait]
pub trait TimerService: Send + Sync + 'static {
    /// Deadline of the pending timer for a link, if one is armed
    async fn pending(&self, link_id: &str) -> Result<Option<Instant>, TimerError>;

    /// Arm the link's timer for `deadline`, replacing any pending one
    async fn schedule(&self, link_id: &str, deadline: Instant) -> Result<(), TimerError>;

    /// Disarm the link's timer. Returns whether one was pending.
    async fn cancel(&self, link_id: &str) -> Result<bool, TimerError>;
}

/// Wall-clock time of a monotonic deadline, at database precision
pub(crate) fn wall_clock(deadline: Instant) -> DateTime<Utc> {
    let now = Instant::now();
    let wall = if deadline >= now {
        Utc::now() + chrono::Duration::from_std(deadline - now).unwrap_or(chrono::Duration::zero())
    } else {
        Utc::now() - chrono::Duration::from_std(now - deadline).unwrap_or(chrono::Duration::zero())
    };
    wall.trunc_subsecs(6)
}

/// Monotonic deadline of a wall-clock fire time; past times map to now
pub(crate) fn deadline_from_wall_clock(fire_at: DateTime<Utc>) -> Instant {
    let remaining = (fire_at - Utc::now())
        .to_std()
        .unwrap_or(std::time::Duration::ZERO);
    Instant::now() + remaining
}
