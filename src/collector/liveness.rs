use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Shared;
use crate::esl::Dialer;

/// Time of the most recent heartbeat event.
#[derive(Debug, Default)]
pub struct Heartbeat {
    last: parking_lot::Mutex<Option<Instant>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat observed at `at`. Never moves backwards.
    pub fn record(&self, at: Instant) {
        let mut last = self.last.lock();
        match *last {
            Some(prev) if prev >= at => {}
            _ => *last = Some(at),
        }
    }

    pub fn last(&self) -> Option<Instant> {
        *self.last.lock()
    }
}

/// Alive iff a session is installed and the last heartbeat is younger
/// than `staleness`. No heartbeat yet counts as stale.
pub fn is_alive(
    connected: bool,
    last_heartbeat: Option<Instant>,
    now: Instant,
    staleness: Duration,
) -> bool {
    match last_heartbeat {
        Some(at) if connected => now.saturating_duration_since(at) < staleness,
        _ => false,
    }
}

impl<D: Dialer> Shared<D> {
    /// Recompute liveness and publish it to `freeswitch_alive`.
    pub(crate) fn evaluate_liveness(&self) -> bool {
        let alive = is_alive(
            self.conn.is_connected(),
            self.heartbeat.last(),
            Instant::now(),
            self.intervals.heartbeat_staleness,
        );
        self.metrics.alive.set(if alive { 1.0 } else { 0.0 });
        alive
    }
}

/// Periodically re-evaluate liveness until cancelled.
pub(crate) async fn run<D: Dialer>(shared: Arc<Shared<D>>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(shared.intervals.liveness);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("liveness monitor stopped");
                return;
            }
            _ = ticker.tick() => {
                shared.evaluate_liveness();
            }
        }
    }
}
