//! Event socket collector: one session, one event loop, periodic pollers.
//!
//! The event loop owns connecting and reconnecting. Pollers and the
//! liveness monitor only observe the installed session and go through the
//! [`Dispatcher`](dispatch::Dispatcher) for every command.

pub mod connection;
pub mod dispatch;
pub mod event_loop;
pub mod liveness;
pub mod pollers;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::{Arc, OnceLock};

use anyhow::{bail, Result};
use prometheus::CounterVec;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use self::connection::{ConnectionCell, InitCommands};
use self::dispatch::Dispatcher;
use self::liveness::Heartbeat;
use crate::config::{FreeswitchConfig, IntervalsConfig};
use crate::esl::{Dialer, Reply, SocketError};
use crate::export::ExporterMetrics;
use crate::state::StateStore;

/// Subscription sent on every connect.
pub const HEARTBEAT_SUBSCRIPTION: &str = "events json HEARTBEAT";

/// Subscription sent on every connect once event counting is enabled.
pub const ALL_EVENTS_SUBSCRIPTION: &str = "events json ALL";

/// Where to dial.
#[derive(Debug, Clone)]
pub struct Target {
    pub addr: String,
    pub password: String,
}

/// State shared by the collector's background tasks.
pub(crate) struct Shared<D: Dialer> {
    pub(crate) dialer: D,
    pub(crate) target: Target,
    pub(crate) intervals: IntervalsConfig,
    pub(crate) conn: ConnectionCell<D::Conn>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) init_commands: InitCommands,
    pub(crate) heartbeat: Heartbeat,
    pub(crate) events_total: OnceLock<CounterVec>,
    pub(crate) metrics: Arc<ExporterMetrics>,
    pub(crate) state: Arc<StateStore>,
}

impl<D: Dialer> Shared<D> {
    /// Send through the dispatcher against the installed session.
    pub(crate) async fn send(&self, command: &str) -> Result<Reply, SocketError> {
        self.dispatcher.send(&self.conn, command).await
    }
}

/// Harvests switch metrics over one persistent event socket session.
pub struct Collector<D: Dialer> {
    shared: Arc<Shared<D>>,
    cancel: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl<D: Dialer> Collector<D> {
    /// Create a collector. Nothing runs until [`Collector::start`].
    pub fn new(
        dialer: D,
        cfg: &FreeswitchConfig,
        intervals: IntervalsConfig,
        metrics: Arc<ExporterMetrics>,
        state: Arc<StateStore>,
        cancel: CancellationToken,
    ) -> Self {
        let init_commands = InitCommands::new();
        init_commands.add(HEARTBEAT_SUBSCRIPTION);

        let dispatcher = Dispatcher::new(metrics.event_latency.clone());

        let shared = Arc::new(Shared {
            dialer,
            target: Target {
                addr: cfg.address(),
                password: cfg.password.clone(),
            },
            intervals,
            conn: ConnectionCell::new(),
            dispatcher,
            init_commands,
            heartbeat: Heartbeat::new(),
            events_total: OnceLock::new(),
            metrics,
            state,
        });

        Self {
            shared,
            cancel,
            tasks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Spawn the event loop and the liveness monitor.
    pub fn start(&self) {
        info!(addr = %self.shared.target.addr, "starting collector");

        self.spawn(event_loop::run(
            Arc::clone(&self.shared),
            self.cancel.child_token(),
        ));
        self.spawn(liveness::run(
            Arc::clone(&self.shared),
            self.cancel.child_token(),
        ));
    }

    /// Register `freeswitch_channels_total` and spawn its poller.
    pub fn start_channels_total(&self) -> Result<()> {
        self.shared
            .metrics
            .register_channels_total(Arc::clone(&self.shared.state))?;

        self.spawn(pollers::run_channels_total(
            Arc::clone(&self.shared),
            self.cancel.child_token(),
        ));
        Ok(())
    }

    /// Register `freeswitch_channels_current` and spawn its poller.
    pub fn start_channels_current(&self) -> Result<()> {
        let gauge = self.shared.metrics.register_channels_current()?;

        self.spawn(pollers::run_channels_current(
            Arc::clone(&self.shared),
            gauge,
            self.cancel.child_token(),
        ));
        Ok(())
    }

    /// Count every event by name.
    ///
    /// Adds the all-events subscription to the replay set, and sends it
    /// right away when a session is already up.
    pub async fn start_events_total(&self) -> Result<()> {
        let events = self.shared.metrics.register_events_total()?;
        if self.shared.events_total.set(events).is_err() {
            bail!("events_total already started");
        }

        self.shared.init_commands.add(ALL_EVENTS_SUBSCRIPTION);

        if self.shared.conn.is_connected() {
            if let Err(e) = self.shared.send(ALL_EVENTS_SUBSCRIPTION).await {
                warn!(error = %e, "subscribing to all events failed");
            }
        }

        Ok(())
    }

    /// Whether a session is currently installed.
    pub fn is_connected(&self) -> bool {
        self.shared.conn.is_connected()
    }

    /// Time of the last heartbeat, if any arrived.
    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.shared.heartbeat.last()
    }

    /// Commands replayed on every connect, in replay order.
    pub fn init_commands(&self) -> Vec<String> {
        self.shared.init_commands.snapshot()
    }

    /// Run an arbitrary command through the dispatcher.
    pub async fn send(&self, command: &str) -> Result<Reply, SocketError> {
        self.shared.send(command).await
    }

    /// Cancel all background tasks, wait for them, and drop the session.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "collector task ended abnormally");
            }
        }

        self.shared.conn.clear();
    }

    fn spawn<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().push(tokio::spawn(fut));
    }
}
