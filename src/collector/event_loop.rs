use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use super::Shared;
use crate::esl::{Dialer, Event, EventKind, EventSocket};

impl<D: Dialer> Shared<D> {
    /// Account for one inbound event.
    pub(crate) fn handle_event(&self, event: &Event) {
        let kind = event.kind();

        if let Some(events) = self.events_total.get() {
            events.with_label_values(&[kind.as_str()]).inc();
        }

        trace!(
            event = %kind,
            headers = ?event.headers,
            body = ?event.body,
            "event loop received event",
        );

        if kind == EventKind::Heartbeat {
            self.heartbeat.record(Instant::now());
        }
    }
}

/// Connect, consume events, and reconnect after failures until cancelled.
///
/// Disconnected: dial, and wait `intervals.reconnect` after a failed attempt.
/// Connected: block on the next event; any read error drops the session.
pub(crate) async fn run<D: Dialer>(shared: Arc<Shared<D>>, cancel: CancellationToken) {
    info!("starting FreeSWITCH event loop");

    loop {
        let Some(conn) = shared.conn.current() else {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = shared.ensure_connected() => result,
            };

            if let Err(e) = result {
                warn!(
                    addr = %shared.target.addr,
                    error = %e,
                    "problem connecting to FreeSWITCH",
                );
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(shared.intervals.reconnect) => {}
                }
            }
            continue;
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = conn.read_event() => result,
        };

        match result {
            Ok(event) => shared.handle_event(&event),
            Err(e) => {
                warn!(error = %e, "event read failed, dropping connection");
                shared.conn.invalidate(&conn);
            }
        }
    }

    shared.conn.clear();
    info!("FreeSWITCH event loop stopped");
}
