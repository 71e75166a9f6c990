use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::derived::StoreCounter;
use crate::state::{StateStore, TOTAL_CHANNELS};

/// Namespace shared by every exported metric.
const NAMESPACE: &str = "freeswitch";

/// Prometheus metrics published by the exporter, plus the HTTP server
/// that serves them.
///
/// `alive` and `event_latency` always exist. The per-feature metrics are
/// registered on demand so a disabled collector leaves no trace in the
/// scrape output.
pub struct ExporterMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Liveness of the switch (1=alive, 0=dead).
    pub alive: Gauge,
    /// Event socket command round-trip latency.
    pub event_latency: Histogram,
}

impl ExporterMetrics {
    /// Creates the registry with the always-on metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let alive = Gauge::with_opts(
            Opts::new(
                "alive",
                "Freeswitch alive status, 0 if not connected 1 if connected.",
            )
            .namespace(NAMESPACE),
        )?;
        let event_latency = Histogram::with_opts(
            HistogramOpts::new("event_latency_seconds", "EventSocket query latency.")
                .namespace(NAMESPACE)
                .buckets(vec![
                    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
                ]),
        )?;

        registry.register(Box::new(alive.clone()))?;
        registry.register(Box::new(event_latency.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            alive,
            event_latency,
        })
    }

    /// Registers `freeswitch_channels_current` and returns the gauge.
    pub fn register_channels_current(&self) -> Result<Gauge> {
        let gauge = Gauge::with_opts(
            Opts::new(
                "channels_current",
                "The number of current channels, as reported by freeswitch.",
            )
            .namespace(NAMESPACE),
        )?;
        self.registry
            .register(Box::new(gauge.clone()))
            .context("registering channels_current")?;
        Ok(gauge)
    }

    /// Registers `freeswitch_channels_total`, backed by the state store.
    pub fn register_channels_total(&self, store: Arc<StateStore>) -> Result<()> {
        let counter = StoreCounter::new(
            Opts::new(
                "channels_total",
                "The number of total channels, as reported by freeswitch.",
            )
            .namespace(NAMESPACE),
            store,
            TOTAL_CHANNELS,
            -1.0,
        )?;
        self.registry
            .register(Box::new(counter))
            .context("registering channels_total")?;
        Ok(())
    }

    /// Registers `freeswitch_events_total{event}` and returns the vector.
    pub fn register_events_total(&self) -> Result<CounterVec> {
        let events = CounterVec::new(
            Opts::new(
                "events_total",
                "The number of events received from freeswitch, by event name.",
            )
            .namespace(NAMESPACE),
            &["event"],
        )?;
        self.registry
            .register(Box::new(events.clone()))
            .context("registering events_total")?;
        Ok(events)
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        encode(&self.registry)
    }

    /// Binds the listener and starts serving /metrics and /healthz.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port 0 was requested.
    pub async fn start(&self) -> Result<SocketAddr> {
        let bind_addr = normalize_listen_addr(&self.addr);

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "metrics server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "metrics server error");
            }
        });

        Ok(local_addr)
    }

    /// Gracefully shuts down the metrics server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Expands the ":port" shorthand to an all-interfaces address.
fn normalize_listen_addr(addr: &str) -> String {
    let addr = if addr.is_empty() { ":9143" } else { addr };

    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

fn encode(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .context("encoding metrics")?;
    String::from_utf8(buffer).context("converting metrics to string")
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match encode(&state.registry) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "encoding metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
