use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::collector::Collector;
use crate::config::Config;
use crate::esl::TcpDialer;
use crate::export::ExporterMetrics;
use crate::state::StateStore;

/// Agent wires the metrics server and the collector together.
pub struct Agent {
    cfg: Config,
    metrics: Arc<ExporterMetrics>,
    state: Arc<StateStore>,
    collector: Option<Collector<TcpDialer>>,
    metrics_addr: Option<SocketAddr>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent with its registry and state store.
    pub fn new(cfg: Config) -> Result<Self> {
        let metrics =
            Arc::new(ExporterMetrics::new(&cfg.metrics.addr).context("creating metrics")?);

        Ok(Self {
            cfg,
            metrics,
            state: Arc::new(StateStore::new()),
            collector: None,
            metrics_addr: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Start the metrics server, the collector, and every enabled feature.
    pub async fn start(&mut self) -> Result<()> {
        // 0. Serve metrics first so scrapes see alive=0 while we dial.
        let addr = self
            .metrics
            .start()
            .await
            .context("starting metrics server")?;
        self.metrics_addr = Some(addr);

        // 1. Event loop and liveness.
        let collector = Collector::new(
            TcpDialer::new(self.cfg.freeswitch.dial_timeout),
            &self.cfg.freeswitch,
            self.cfg.intervals,
            Arc::clone(&self.metrics),
            Arc::clone(&self.state),
            self.cancel.child_token(),
        );
        collector.start();

        // 2. Optional collectors.
        if let Err(e) = self.start_features(&collector).await {
            collector.stop().await;
            self.metrics.stop().await?;
            return Err(e);
        }

        self.collector = Some(collector);

        info!(
            freeswitch = %self.cfg.freeswitch.address(),
            metrics = %addr,
            "agent fully started",
        );

        Ok(())
    }

    async fn start_features(&self, collector: &Collector<TcpDialer>) -> Result<()> {
        let features = &self.cfg.collectors;
        if features.channels_total {
            collector
                .start_channels_total()
                .context("starting channels_total collector")?;
            info!("channels_total collector enabled");
        }
        if features.channels_current {
            collector
                .start_channels_current()
                .context("starting channels_current collector")?;
            info!("channels_current collector enabled");
        }
        if features.events_total {
            collector
                .start_events_total()
                .await
                .context("starting events_total collector")?;
            info!("events_total collector enabled");
        }
        Ok(())
    }

    /// Bound metrics address, once started.
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    pub fn metrics(&self) -> &Arc<ExporterMetrics> {
        &self.metrics
    }

    /// Whether the collector currently holds a session.
    pub fn is_connected(&self) -> bool {
        self.collector.as_ref().is_some_and(Collector::is_connected)
    }

    /// Gracefully stop all components.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(collector) = self.collector.take() {
            collector.stop().await;
        }

        self.metrics.stop().await?;

        info!("agent stopped");

        Ok(())
    }
}
