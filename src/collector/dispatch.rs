use std::time::Instant;

use prometheus::Histogram;
use tracing::debug;

use super::connection::ConnectionCell;
use crate::esl::{EventSocket, Reply, SocketError};

/// Serializes commands on the shared session.
///
/// The lock is held for the whole round trip, so commands never interleave
/// on the wire and each reply belongs to the command that produced it.
pub struct Dispatcher {
    lock: tokio::sync::Mutex<()>,
    latency: Histogram,
}

impl Dispatcher {
    pub fn new(latency: Histogram) -> Self {
        Self {
            lock: tokio::sync::Mutex::new(()),
            latency,
        }
    }

    /// Run `command` against the installed session.
    ///
    /// Successful round trips are observed into the latency histogram.
    /// Errors are returned as-is and never retried.
    pub async fn send<C: EventSocket>(
        &self,
        cell: &ConnectionCell<C>,
        command: &str,
    ) -> Result<Reply, SocketError> {
        let _guard = self.lock.lock().await;

        let conn = cell.current().ok_or(SocketError::NotConnected)?;

        debug!(command, "sending command");
        let start = Instant::now();
        let reply = conn.send(command).await?;
        let elapsed = start.elapsed();

        self.latency.observe(elapsed.as_secs_f64());
        debug!(
            command,
            latency_ms = elapsed.as_secs_f64() * 1000.0,
            reply_text = reply.reply_text().unwrap_or_default(),
            body = %reply.body(),
            "command completed",
        );

        Ok(reply)
    }
}
