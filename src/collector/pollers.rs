use std::sync::Arc;

use prometheus::Gauge;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Shared;
use crate::esl::Dialer;
use crate::state::TOTAL_CHANNELS;

/// Command whose body reports sessions since startup.
pub const STATUS_COMMAND: &str = "API status";

/// Command whose body starts with the live channel count.
pub const CHANNELS_COUNT_COMMAND: &str = "API show channels count";

/// Line suffix carrying the cumulative session count in `status` output.
const SESSIONS_SUFFIX: &str = "session(s) since startup";

/// Errors from parsing administrative command output.
#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("empty response body")]
    Empty,

    #[error("invalid count {token:?} in line {line:?}")]
    InvalidCount { line: String, token: String },
}

/// Extract the cumulative session count from `status` output.
///
/// Returns `Ok(None)` when no line carries the count. The first matching
/// line decides: a malformed count there is an error, later lines are not
/// consulted.
pub fn parse_total_channels(body: &str) -> Result<Option<f64>, ParseError> {
    for line in body.lines() {
        let line = line.trim();
        if !line.ends_with(SESSIONS_SUFFIX) {
            continue;
        }

        let token = line.split_whitespace().next().unwrap_or_default();
        return token
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ParseError::InvalidCount {
                line: line.to_string(),
                token: token.to_string(),
            });
    }

    Ok(None)
}

/// Extract the live channel count: the first whitespace-delimited token.
pub fn parse_current_channels(body: &str) -> Result<f64, ParseError> {
    let trimmed = body.trim();
    let token = trimmed.split_whitespace().next().ok_or(ParseError::Empty)?;

    token.parse::<f64>().map_err(|_| ParseError::InvalidCount {
        line: trimmed.lines().next().unwrap_or_default().to_string(),
        token: token.to_string(),
    })
}

impl<D: Dialer> Shared<D> {
    /// One Channels-Total cycle. Skipped while disconnected.
    pub(crate) async fn poll_channels_total(&self) {
        if !self.conn.is_connected() {
            return;
        }

        let reply = match self.send(STATUS_COMMAND).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "error getting status");
                return;
            }
        };

        match parse_total_channels(reply.body()) {
            Ok(Some(total)) => self.state.set(TOTAL_CHANNELS, total),
            Ok(None) => debug!("status output has no session count"),
            Err(e) => warn!(error = %e, body = %reply.body(), "error parsing channels total"),
        }
    }

    /// One Channels-Current cycle. Skipped while disconnected.
    pub(crate) async fn poll_channels_current(&self, gauge: &Gauge) {
        if !self.conn.is_connected() {
            return;
        }

        let reply = match self.send(CHANNELS_COUNT_COMMAND).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "error sending show channels");
                return;
            }
        };

        match parse_current_channels(reply.body()) {
            Ok(current) => gauge.set(current),
            Err(e) => warn!(error = %e, body = %reply.body(), "error parsing channels current"),
        }
    }
}

/// Poll `API status` every `intervals.poll` until cancelled.
pub(crate) async fn run_channels_total<D: Dialer>(shared: Arc<Shared<D>>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(shared.intervals.poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => shared.poll_channels_total().await,
        }
    }
}

/// Poll `API show channels count` every `intervals.poll` until cancelled.
pub(crate) async fn run_channels_current<D: Dialer>(
    shared: Arc<Shared<D>>,
    gauge: Gauge,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(shared.intervals.poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => shared.poll_channels_current(&gauge).await,
        }
    }
}
