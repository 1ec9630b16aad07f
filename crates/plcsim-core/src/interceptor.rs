//! ---
//! sim_section: "04-configuration-orchestration"
//! sim_subsection: "module"
//! sim_type: "source"
//! sim_scope: "code"
//! sim_description: "Orchestration core: composition, instrumentation, shutdown."
//! sim_version: "v0.1.0-dev"
//! sim_owner: "tbd"
//! ---
//! Lifecycle instrumentation.
//!
//! [`InstrumentedEngine`] wraps the protocol engine by composition and
//! implements the same operation surface: every call delegates to the engine,
//! and on return the relevant identifiers are extracted and pushed through
//! the metrics aggregator. Responses and faults reach the caller unmodified;
//! this layer introduces no client-visible behaviour of its own.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use plcsim_engine::types::{
    CloseSessionRequest, CloseSessionResponse, CreateMonitoredItemsRequest,
    CreateMonitoredItemsResponse, CreateSessionRequest, CreateSessionResponse,
    CreateSubscriptionRequest, CreateSubscriptionResponse, DeleteMonitoredItemsRequest,
    DeleteMonitoredItemsResponse, EngineControl, PublishRequest, PublishResponse, ReadRequest,
    ReadResponse, ServerState, ServiceFault, ServiceResult, SessionServices, WriteRequest,
    WriteResponse,
};
use plcsim_metrics::{PublishedType, SimMetrics};

/// Instrumenting wrapper around a protocol engine.
///
/// Safe under arbitrary concurrent invocation; no locks are held across
/// delegate calls.
#[derive(Debug, Clone)]
pub struct InstrumentedEngine<E> {
    engine: Arc<E>,
    metrics: SimMetrics,
}

impl<E> InstrumentedEngine<E> {
    pub fn new(engine: Arc<E>, metrics: SimMetrics) -> Self {
        Self { engine, metrics }
    }

    /// The wrapped engine, for control-plane consumers.
    pub fn engine(&self) -> Arc<E> {
        self.engine.clone()
    }

    /// Record exactly one error metric for a failed operation and hand the
    /// original fault back untouched. Never swallows, wraps, or translates.
    fn record_failure(&self, operation: &'static str, fault: ServiceFault) -> ServiceFault {
        self.metrics.record_error(operation, fault.code.as_ref());
        error!(operation, code = %fault.code, reason = %fault.reason, "engine operation failed");
        fault
    }
}

#[async_trait]
impl<E> SessionServices for InstrumentedEngine<E>
where
    E: SessionServices + Send + Sync,
{
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> ServiceResult<CreateSessionResponse> {
        // The session id does not exist until the delegate returns it.
        match self.engine.create_session(request).await {
            Ok(response) => {
                let session = response.session_id.to_string();
                self.metrics.record_session(&session, 1);
                info!(session = %session, timeout_ms = response.revised_timeout_ms, "session created");
                Ok(response)
            }
            Err(fault) => Err(self.record_failure("create_session", fault)),
        }
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> ServiceResult<CreateSubscriptionResponse> {
        let session = request.session_id.to_string();
        match self.engine.create_subscription(request).await {
            Ok(response) => {
                let subscription = response.subscription_id.to_string();
                self.metrics.record_subscription(&session, &subscription, 1);
                info!(
                    session = %session,
                    subscription = %subscription,
                    publishing_interval_ms = response.revised_publishing_interval_ms,
                    "subscription created"
                );
                Ok(response)
            }
            Err(fault) => Err(self.record_failure("create_subscription", fault)),
        }
    }

    async fn create_monitored_items(
        &self,
        request: CreateMonitoredItemsRequest,
    ) -> ServiceResult<CreateMonitoredItemsResponse> {
        let session = request.session_id.to_string();
        let subscription = request.subscription_id.to_string();
        let requested = request.items.len();
        match self.engine.create_monitored_items(request).await {
            Ok(response) => {
                self.metrics
                    .record_monitored_items(&session, &subscription, requested as i64);
                info!(
                    session = %session,
                    subscription = %subscription,
                    count = requested,
                    "monitored items created"
                );
                Ok(response)
            }
            Err(fault) => Err(self.record_failure("create_monitored_items", fault)),
        }
    }

    async fn publish(&self, request: PublishRequest) -> ServiceResult<PublishResponse> {
        let session = request.session_id.to_string();
        match self.engine.publish(request).await {
            Ok(response) => {
                let subscription = response.subscription_id.to_string();
                self.metrics.record_published(&session, &subscription);

                // Zero-count breakdowns are suppressed so idle subscriptions
                // do not fan out metric cardinality.
                let data_points = response.message.data_changes.len() as i64;
                if data_points > 0 {
                    self.metrics.record_published_with_type(
                        &session,
                        &subscription,
                        PublishedType::DataPoint,
                        data_points,
                    );
                }
                let events = response.message.events.len() as i64;
                if events > 0 {
                    self.metrics.record_published_with_type(
                        &session,
                        &subscription,
                        PublishedType::Event,
                        events,
                    );
                }
                debug!(
                    session = %session,
                    subscription = %subscription,
                    data_points,
                    events,
                    more = response.more_notifications,
                    "publish delivered"
                );
                Ok(response)
            }
            Err(fault) => Err(self.record_failure("publish", fault)),
        }
    }

    async fn read(&self, request: ReadRequest) -> ServiceResult<ReadResponse> {
        let session = request.session_id.to_string();
        let nodes = request.node_ids.len();
        match self.engine.read(request).await {
            Ok(response) => {
                debug!(session = %session, nodes, "read completed");
                Ok(response)
            }
            Err(fault) => Err(self.record_failure("read", fault)),
        }
    }

    async fn write(&self, request: WriteRequest) -> ServiceResult<WriteResponse> {
        let session = request.session_id.to_string();
        let nodes = request.writes.len();
        match self.engine.write(request).await {
            Ok(response) => {
                info!(session = %session, nodes, "write completed");
                Ok(response)
            }
            Err(fault) => Err(self.record_failure("write", fault)),
        }
    }

    async fn delete_monitored_items(
        &self,
        request: DeleteMonitoredItemsRequest,
    ) -> ServiceResult<DeleteMonitoredItemsResponse> {
        let session = request.session_id.to_string();
        let subscription = request.subscription_id.to_string();
        let count = request.monitored_item_ids.len();
        match self.engine.delete_monitored_items(request).await {
            Ok(response) => {
                info!(
                    session = %session,
                    subscription = %subscription,
                    count,
                    "monitored items deleted"
                );
                Ok(response)
            }
            Err(fault) => Err(self.record_failure("delete_monitored_items", fault)),
        }
    }

    async fn close_session(
        &self,
        request: CloseSessionRequest,
    ) -> ServiceResult<CloseSessionResponse> {
        let session = request.session_id.to_string();
        match self.engine.close_session(request).await {
            Ok(response) => {
                info!(session = %session, "session closed");
                Ok(response)
            }
            Err(fault) => Err(self.record_failure("close_session", fault)),
        }
    }
}

impl<E> EngineControl for InstrumentedEngine<E>
where
    E: EngineControl,
{
    fn session_count(&self) -> usize {
        self.engine.session_count()
    }

    fn broadcast_shutdown(&self, seconds_remaining: u64, reason: &str) -> ServiceResult<()> {
        self.engine.broadcast_shutdown(seconds_remaining, reason)
    }

    fn server_state(&self) -> ServerState {
        self.engine.server_state()
    }
}
