//! ---
//! sim_section: "03-observability"
//! sim_subsection: "module"
//! sim_type: "source"
//! sim_scope: "code"
//! sim_description: "Metrics collection and export utilities."
//! sim_version: "v0.1.0-dev"
//! sim_owner: "tbd"
//! ---
//! Metrics aggregation for the PLC-SIM orchestration layer.
//!
//! [`SimMetrics`] owns one Prometheus instrument per named metric and merges
//! the immutable process-wide base dimension set with per-call overlays on
//! every emission. Instrument updates are atomic; nothing here blocks on I/O.

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use plcsim_common::DimensionSet;

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

const BASE_LABELS: [&str; 4] = ["host", "app", "simulation_id", "cluster"];
const SESSION_LABELS: [&str; 5] = ["host", "app", "simulation_id", "cluster", "session"];
const SUBSCRIPTION_LABELS: [&str; 6] = [
    "host",
    "app",
    "simulation_id",
    "cluster",
    "session",
    "subscription",
];
const TYPED_PUBLISH_LABELS: [&str; 7] = [
    "host",
    "app",
    "simulation_id",
    "cluster",
    "session",
    "subscription",
    "type",
];
const ERROR_LABELS: [&str; 6] = [
    "host",
    "app",
    "simulation_id",
    "cluster",
    "operation",
    "error_type",
];

/// Named metrics in the `plcsim` namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Metric {
    PodCount,
    SessionCount,
    SubscriptionCount,
    MonitoredItemCount,
    PublishedCount,
    PublishedCountWithType,
    TotalErrors,
}

/// Breakdown kinds for `plcsim_published_count_with_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum PublishedType {
    DataPoint,
    Event,
}

/// Metrics published by the orchestration layer.
#[derive(Clone)]
pub struct SimMetrics {
    base: Arc<DimensionSet>,
    pod_count: IntGaugeVec,
    session_count: IntGaugeVec,
    subscription_count: IntGaugeVec,
    monitored_item_count: IntGaugeVec,
    published_count: IntCounterVec,
    published_count_with_type: IntCounterVec,
    total_errors: IntCounterVec,
    #[allow(dead_code)]
    registry: SharedRegistry,
}

impl SimMetrics {
    /// Register all orchestration metrics with the provided registry. The
    /// base dimension set is captured once and never mutated afterwards.
    pub fn new(registry: SharedRegistry, base: DimensionSet) -> Result<Self> {
        let pod_count = IntGaugeVec::new(
            Opts::new("plcsim_pod_count", "Number of live simulator instances"),
            &BASE_LABELS,
        )?;
        registry.register(Box::new(pod_count.clone()))?;

        let session_count = IntGaugeVec::new(
            Opts::new("plcsim_session_count", "Number of sessions created"),
            &SESSION_LABELS,
        )?;
        registry.register(Box::new(session_count.clone()))?;

        let subscription_count = IntGaugeVec::new(
            Opts::new(
                "plcsim_subscription_count",
                "Number of subscriptions created",
            ),
            &SUBSCRIPTION_LABELS,
        )?;
        registry.register(Box::new(subscription_count.clone()))?;

        let monitored_item_count = IntGaugeVec::new(
            Opts::new(
                "plcsim_monitored_item_count",
                "Number of monitored items registered",
            ),
            &SUBSCRIPTION_LABELS,
        )?;
        registry.register(Box::new(monitored_item_count.clone()))?;

        let published_count = IntCounterVec::new(
            Opts::new(
                "plcsim_published_count",
                "Number of publish responses delivered",
            ),
            &SUBSCRIPTION_LABELS,
        )?;
        registry.register(Box::new(published_count.clone()))?;

        let published_count_with_type = IntCounterVec::new(
            Opts::new(
                "plcsim_published_count_with_type",
                "Notification bodies delivered, partitioned by kind",
            ),
            &TYPED_PUBLISH_LABELS,
        )?;
        registry.register(Box::new(published_count_with_type.clone()))?;

        let total_errors = IntCounterVec::new(
            Opts::new(
                "plcsim_total_errors",
                "Operation failures observed by the lifecycle interceptor",
            ),
            &ERROR_LABELS,
        )?;
        registry.register(Box::new(total_errors.clone()))?;

        Ok(Self {
            base: Arc::new(base),
            pod_count,
            session_count,
            subscription_count,
            monitored_item_count,
            published_count,
            published_count_with_type,
            total_errors,
            registry,
        })
    }

    /// The immutable base dimension set every emission is tagged with.
    pub fn base_dimensions(&self) -> &DimensionSet {
        &self.base
    }

    /// Merge `overlay` onto the base set and apply one atomic update to the
    /// named instrument. Counter metrics ignore negative deltas.
    pub fn add(&self, metric: Metric, delta: i64, overlay: &DimensionSet) {
        let merged = self.base.merged(overlay);
        match metric {
            Metric::PodCount => {
                self.pod_count
                    .with_label_values(&label_values(&merged, &BASE_LABELS))
                    .add(delta);
            }
            Metric::SessionCount => {
                self.session_count
                    .with_label_values(&label_values(&merged, &SESSION_LABELS))
                    .add(delta);
            }
            Metric::SubscriptionCount => {
                self.subscription_count
                    .with_label_values(&label_values(&merged, &SUBSCRIPTION_LABELS))
                    .add(delta);
            }
            Metric::MonitoredItemCount => {
                self.monitored_item_count
                    .with_label_values(&label_values(&merged, &SUBSCRIPTION_LABELS))
                    .add(delta);
            }
            Metric::PublishedCount => {
                self.published_count
                    .with_label_values(&label_values(&merged, &SUBSCRIPTION_LABELS))
                    .inc_by(delta.max(0) as u64);
            }
            Metric::PublishedCountWithType => {
                self.published_count_with_type
                    .with_label_values(&label_values(&merged, &TYPED_PUBLISH_LABELS))
                    .inc_by(delta.max(0) as u64);
            }
            Metric::TotalErrors => {
                self.total_errors
                    .with_label_values(&label_values(&merged, &ERROR_LABELS))
                    .inc_by(delta.max(0) as u64);
            }
        }
        // Best-effort mirror of the emission; never on the response path.
        debug!(metric = metric.as_ref(), delta, dimensions = %merged, "metric emitted");
    }

    pub fn set_pod_count(&self, count: i64) {
        self.pod_count
            .with_label_values(&label_values(&self.base, &BASE_LABELS))
            .set(count);
    }

    pub fn record_session(&self, session: &str, delta: i64) {
        let overlay = DimensionSet::new().with("session", session);
        self.add(Metric::SessionCount, delta, &overlay);
    }

    pub fn record_subscription(&self, session: &str, subscription: &str, delta: i64) {
        let overlay = DimensionSet::new()
            .with("session", session)
            .with("subscription", subscription);
        self.add(Metric::SubscriptionCount, delta, &overlay);
    }

    pub fn record_monitored_items(&self, session: &str, subscription: &str, count: i64) {
        let overlay = DimensionSet::new()
            .with("session", session)
            .with("subscription", subscription);
        self.add(Metric::MonitoredItemCount, count, &overlay);
    }

    pub fn record_published(&self, session: &str, subscription: &str) {
        let overlay = DimensionSet::new()
            .with("session", session)
            .with("subscription", subscription);
        self.add(Metric::PublishedCount, 1, &overlay);
    }

    pub fn record_published_with_type(
        &self,
        session: &str,
        subscription: &str,
        kind: PublishedType,
        count: i64,
    ) {
        let overlay = DimensionSet::new()
            .with("session", session)
            .with("subscription", subscription)
            .with("type", kind.as_ref());
        self.add(Metric::PublishedCountWithType, count, &overlay);
    }

    pub fn record_error(&self, operation: &str, error_type: &str) {
        let overlay = DimensionSet::new()
            .with("operation", operation)
            .with("error_type", error_type);
        self.add(Metric::TotalErrors, 1, &overlay);
    }
}

impl std::fmt::Debug for SimMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimMetrics").finish_non_exhaustive()
    }
}

fn label_values<'a>(dimensions: &'a DimensionSet, labels: &[&str]) -> Vec<&'a str> {
    labels
        .iter()
        .map(|label| dimensions.value_or_empty(label))
        .collect()
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

pub use prometheus;
