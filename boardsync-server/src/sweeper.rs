//! Periodic inactivity sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::board::BoardCore;
use crate::store::TaskStore;

/// Spawns a task that calls [`BoardCore::sweep_inactive`] every `period`.
///
/// The first sweep runs one period after spawning. Ticks missed while the
/// runtime was busy are delayed rather than replayed in a burst. Abort the
/// returned handle to stop sweeping.
pub fn spawn_sweeper<S: TaskStore>(core: Arc<BoardCore<S>>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let notified = core.sweep_inactive();
            tracing::debug!(notified, "inactivity sweep finished");
        }
    })
}
