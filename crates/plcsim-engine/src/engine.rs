//! ---
//! sim_section: "02-protocol-engine"
//! sim_subsection: "module"
//! sim_type: "source"
//! sim_scope: "code"
//! sim_description: "Protocol-engine abstraction and reference implementation."
//! sim_version: "v0.1.0-dev"
//! sim_owner: "tbd"
//! ---
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::provider::EngineContext;
use crate::types::{
    CloseSessionRequest, CloseSessionResponse, CreateMonitoredItemsRequest,
    CreateMonitoredItemsResponse, CreateSessionRequest, CreateSessionResponse,
    CreateSubscriptionRequest, CreateSubscriptionResponse, DataValue, DeleteMonitoredItemsRequest,
    DeleteMonitoredItemsResponse, EngineControl, MonitoredItemResult, NotificationMessage,
    PublishRequest, PublishResponse, ReadRequest, ReadResponse, ServerState, ServiceFault,
    ServiceResult, SessionId, SessionServices, StatusCode, SubscriptionId, Variant, WriteRequest,
    WriteResponse,
};

const MIN_PUBLISHING_INTERVAL_MS: f64 = 100.0;
const MAX_SESSION_TIMEOUT_MS: u64 = 3_600_000;

#[derive(Debug)]
struct SubscriptionState {
    publishing_interval_ms: f64,
    items: HashMap<u32, String>,
    pending: VecDeque<NotificationMessage>,
    next_sequence: u32,
}

impl SubscriptionState {
    fn new(publishing_interval_ms: f64) -> Self {
        Self {
            publishing_interval_ms,
            items: HashMap::new(),
            pending: VecDeque::new(),
            next_sequence: 1,
        }
    }
}

#[derive(Debug)]
struct SessionState {
    #[allow(dead_code)]
    client_name: String,
    auth_token: Uuid,
    subscriptions: HashMap<SubscriptionId, SubscriptionState>,
}

#[derive(Debug, Default)]
struct EngineState {
    sessions: HashMap<SessionId, SessionState>,
    values: HashMap<String, Variant>,
    next_subscription_id: SubscriptionId,
    next_item_id: u32,
}

/// In-memory reference engine.
///
/// Stands in for the external protocol engine in the daemon and in tests:
/// session/subscription/monitored-item bookkeeping, keep-alive publishes, and
/// countdown broadcast recording, with the proper fault codes for unknown
/// identifiers. No sockets, no encoding.
#[derive(Debug)]
pub struct InMemoryEngine {
    context: Arc<EngineContext>,
    max_sessions: usize,
    state: Mutex<EngineState>,
    run_state: Mutex<ServerState>,
    shutdown_broadcasts: Mutex<Vec<(u64, String)>>,
    fail_broadcasts: AtomicBool,
}

impl InMemoryEngine {
    pub fn new(context: Arc<EngineContext>, max_sessions: usize) -> Self {
        Self {
            context,
            max_sessions,
            state: Mutex::new(EngineState::default()),
            run_state: Mutex::new(ServerState::Running),
            shutdown_broadcasts: Mutex::new(Vec::new()),
            fail_broadcasts: AtomicBool::new(false),
        }
    }

    /// Queue a notification for delivery by the next publish on the
    /// subscription. Simulation and test hook; the real engine's value
    /// generators fill this role in production.
    pub fn enqueue_notification(
        &self,
        session_id: SessionId,
        subscription_id: SubscriptionId,
        mut message: NotificationMessage,
    ) -> ServiceResult<()> {
        let mut state = self.state.lock();
        let subscription = state
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| unknown_session(session_id))?
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| unknown_subscription(subscription_id))?;
        message.sequence_number = subscription.next_sequence;
        subscription.next_sequence += 1;
        subscription.pending.push_back(message);
        Ok(())
    }

    /// Countdown broadcasts observed so far, oldest first.
    pub fn shutdown_broadcasts(&self) -> Vec<(u64, String)> {
        self.shutdown_broadcasts.lock().clone()
    }

    /// Make subsequent countdown broadcasts fail. Test hook for the
    /// shutdown coordinator's ignore-errors contract.
    pub fn fail_shutdown_broadcasts(&self, fail: bool) {
        self.fail_broadcasts.store(fail, Ordering::SeqCst);
    }

    pub fn context(&self) -> Arc<EngineContext> {
        self.context.clone()
    }

    fn verify_token(state: &EngineState, session_id: SessionId) -> ServiceResult<()> {
        if state.sessions.contains_key(&session_id) {
            Ok(())
        } else {
            Err(unknown_session(session_id))
        }
    }
}

fn unknown_session(session_id: SessionId) -> ServiceFault {
    ServiceFault::new(
        StatusCode::BadSessionIdInvalid,
        format!("unknown session {session_id}"),
    )
}

fn unknown_subscription(subscription_id: SubscriptionId) -> ServiceFault {
    ServiceFault::new(
        StatusCode::BadSubscriptionIdInvalid,
        format!("unknown subscription {subscription_id}"),
    )
}

#[async_trait]
impl SessionServices for InMemoryEngine {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> ServiceResult<CreateSessionResponse> {
        if *self.run_state.lock() == ServerState::ShuttingDown {
            return Err(ServiceFault::new(
                StatusCode::BadShutdown,
                "server is shutting down",
            ));
        }
        let mut state = self.state.lock();
        if state.sessions.len() >= self.max_sessions {
            return Err(ServiceFault::new(
                StatusCode::BadTooManySessions,
                format!("session limit {} reached", self.max_sessions),
            ));
        }
        let session_id = Uuid::new_v4();
        let auth_token = Uuid::new_v4();
        state.sessions.insert(
            session_id,
            SessionState {
                client_name: request.client_name.clone(),
                auth_token,
                subscriptions: HashMap::new(),
            },
        );
        debug!(session = %session_id, client = %request.client_name, "session created");
        Ok(CreateSessionResponse {
            session_id,
            auth_token,
            revised_timeout_ms: request.requested_timeout_ms.min(MAX_SESSION_TIMEOUT_MS),
            server_nonce: rand::random::<[u8; 32]>().to_vec(),
            endpoints: vec!["opc.tcp://localhost:4840/".to_owned()],
        })
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> ServiceResult<CreateSubscriptionResponse> {
        let mut state = self.state.lock();
        Self::verify_token(&state, request.session_id)?;
        state.next_subscription_id += 1;
        let subscription_id = state.next_subscription_id;
        let revised_interval = request
            .requested_publishing_interval_ms
            .max(MIN_PUBLISHING_INTERVAL_MS);
        let session = state
            .sessions
            .get_mut(&request.session_id)
            .ok_or_else(|| unknown_session(request.session_id))?;
        session
            .subscriptions
            .insert(subscription_id, SubscriptionState::new(revised_interval));
        Ok(CreateSubscriptionResponse {
            subscription_id,
            revised_publishing_interval_ms: revised_interval,
            revised_lifetime_count: request.requested_lifetime_count.max(3),
            revised_max_keep_alive_count: request.requested_max_keep_alive_count.max(1),
        })
    }

    async fn create_monitored_items(
        &self,
        request: CreateMonitoredItemsRequest,
    ) -> ServiceResult<CreateMonitoredItemsResponse> {
        let mut state = self.state.lock();
        Self::verify_token(&state, request.session_id)?;
        let mut assigned = Vec::with_capacity(request.items.len());
        for item in &request.items {
            state.next_item_id += 1;
            let monitored_item_id = state.next_item_id;
            let status = if self.context.node(&item.node_id).is_some() {
                StatusCode::Good
            } else {
                StatusCode::BadNodeIdUnknown
            };
            assigned.push((monitored_item_id, item.node_id.clone(), status));
        }
        let subscription = state
            .sessions
            .get_mut(&request.session_id)
            .ok_or_else(|| unknown_session(request.session_id))?
            .subscriptions
            .get_mut(&request.subscription_id)
            .ok_or_else(|| unknown_subscription(request.subscription_id))?;
        let mut results = Vec::with_capacity(assigned.len());
        for (monitored_item_id, node_id, status) in assigned {
            if status.is_good() {
                subscription.items.insert(monitored_item_id, node_id);
            }
            results.push(MonitoredItemResult {
                monitored_item_id,
                status,
            });
        }
        Ok(CreateMonitoredItemsResponse { results })
    }

    async fn publish(&self, request: PublishRequest) -> ServiceResult<PublishResponse> {
        let mut state = self.state.lock();
        let session = state
            .sessions
            .get_mut(&request.session_id)
            .ok_or_else(|| unknown_session(request.session_id))?;

        // Serve the first subscription that has pending notifications;
        // otherwise answer with a keep-alive from the lowest subscription id.
        let mut candidate: Option<SubscriptionId> = None;
        let mut lowest: Option<SubscriptionId> = None;
        for (id, subscription) in &session.subscriptions {
            if !subscription.pending.is_empty() && candidate.map_or(true, |best| *id < best) {
                candidate = Some(*id);
            }
            if lowest.map_or(true, |best| *id < best) {
                lowest = Some(*id);
            }
        }
        let subscription_id = candidate.or(lowest).ok_or_else(|| {
            ServiceFault::new(
                StatusCode::BadSubscriptionIdInvalid,
                "session has no subscriptions to publish",
            )
        })?;
        let subscription = session
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| unknown_subscription(subscription_id))?;

        let message = match subscription.pending.pop_front() {
            Some(message) => message,
            None => {
                let sequence = subscription.next_sequence;
                NotificationMessage::keep_alive(sequence)
            }
        };
        let more_notifications = !subscription.pending.is_empty();
        Ok(PublishResponse {
            subscription_id,
            message,
            more_notifications,
        })
    }

    async fn read(&self, request: ReadRequest) -> ServiceResult<ReadResponse> {
        let state = self.state.lock();
        Self::verify_token(&state, request.session_id)?;
        let mut results = Vec::with_capacity(request.node_ids.len());
        let mut diagnostics = Vec::new();
        for node_id in &request.node_ids {
            match self.context.node(node_id) {
                Some(node) => {
                    let value = state
                        .values
                        .get(node_id)
                        .cloned()
                        .unwrap_or(node.initial_value);
                    results.push(DataValue::good(value));
                }
                None => {
                    diagnostics.push(format!("node {node_id} not found"));
                    results.push(DataValue::bad(StatusCode::BadNodeIdUnknown));
                }
            }
        }
        Ok(ReadResponse {
            results,
            diagnostics,
        })
    }

    async fn write(&self, request: WriteRequest) -> ServiceResult<WriteResponse> {
        let mut state = self.state.lock();
        Self::verify_token(&state, request.session_id)?;
        let mut results = Vec::with_capacity(request.writes.len());
        let mut diagnostics = Vec::new();
        for write in &request.writes {
            match self.context.node(&write.node_id) {
                Some(node) if node.writable => {
                    state
                        .values
                        .insert(write.node_id.clone(), write.value.clone());
                    results.push(StatusCode::Good);
                }
                Some(_) => {
                    diagnostics.push(format!("node {} is read-only", write.node_id));
                    results.push(StatusCode::BadNotWritable);
                }
                None => {
                    diagnostics.push(format!("node {} not found", write.node_id));
                    results.push(StatusCode::BadNodeIdUnknown);
                }
            }
        }
        Ok(WriteResponse {
            results,
            diagnostics,
        })
    }

    async fn delete_monitored_items(
        &self,
        request: DeleteMonitoredItemsRequest,
    ) -> ServiceResult<DeleteMonitoredItemsResponse> {
        let mut state = self.state.lock();
        let subscription = state
            .sessions
            .get_mut(&request.session_id)
            .ok_or_else(|| unknown_session(request.session_id))?
            .subscriptions
            .get_mut(&request.subscription_id)
            .ok_or_else(|| unknown_subscription(request.subscription_id))?;
        let results = request
            .monitored_item_ids
            .iter()
            .map(|id| {
                if subscription.items.remove(id).is_some() {
                    StatusCode::Good
                } else {
                    StatusCode::BadMonitoredItemIdInvalid
                }
            })
            .collect();
        Ok(DeleteMonitoredItemsResponse { results })
    }

    async fn close_session(
        &self,
        request: CloseSessionRequest,
    ) -> ServiceResult<CloseSessionResponse> {
        let mut state = self.state.lock();
        let mut session = state
            .sessions
            .remove(&request.session_id)
            .ok_or_else(|| unknown_session(request.session_id))?;
        if request.delete_subscriptions {
            session.subscriptions.clear();
        }
        debug!(session = %request.session_id, token = %session.auth_token, "session closed");
        Ok(CloseSessionResponse::default())
    }
}

impl EngineControl for InMemoryEngine {
    fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    fn broadcast_shutdown(&self, seconds_remaining: u64, reason: &str) -> ServiceResult<()> {
        if self.fail_broadcasts.load(Ordering::SeqCst) {
            return Err(ServiceFault::new(
                StatusCode::BadInternalError,
                "broadcast channel unavailable",
            ));
        }
        *self.run_state.lock() = ServerState::ShuttingDown;
        self.shutdown_broadcasts
            .lock()
            .push((seconds_remaining, reason.to_owned()));
        Ok(())
    }

    fn server_state(&self) -> ServerState {
        *self.run_state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::NodeDefinition;
    use crate::types::{DataChangeNotification, MonitoredItemRequest, WriteValue};

    fn engine_with_nodes() -> InMemoryEngine {
        let context = Arc::new(EngineContext::new());
        context.register_namespace(
            "sim",
            vec![
                NodeDefinition::readonly("ns=2;s=FastUInt1", "FastUInt1", Variant::Int64(7)),
                NodeDefinition::writable("ns=2;s=SetPoint", "SetPoint", Variant::Double(0.0)),
            ],
        );
        InMemoryEngine::new(context, 4)
    }

    async fn open_session(engine: &InMemoryEngine) -> CreateSessionResponse {
        engine
            .create_session(CreateSessionRequest {
                client_name: "test-client".into(),
                requested_timeout_ms: 30_000,
            })
            .await
            .expect("session opens")
    }

    #[tokio::test]
    async fn session_limit_is_enforced() {
        let engine = engine_with_nodes();
        for _ in 0..4 {
            open_session(&engine).await;
        }
        let fault = engine
            .create_session(CreateSessionRequest {
                client_name: "one-too-many".into(),
                requested_timeout_ms: 1_000,
            })
            .await
            .expect_err("limit enforced");
        assert_eq!(fault.code, StatusCode::BadTooManySessions);
    }

    #[tokio::test]
    async fn publish_drains_queue_then_keeps_alive() {
        let engine = engine_with_nodes();
        let session = open_session(&engine).await;
        let subscription = engine
            .create_subscription(CreateSubscriptionRequest {
                session_id: session.session_id,
                requested_publishing_interval_ms: 50.0,
                requested_lifetime_count: 10,
                requested_max_keep_alive_count: 3,
            })
            .await
            .expect("subscription created");
        assert!(subscription.revised_publishing_interval_ms >= MIN_PUBLISHING_INTERVAL_MS);

        let mut message = NotificationMessage::default();
        message.data_changes.push(DataChangeNotification {
            monitored_item_id: 1,
            value: DataValue::good(Variant::Int64(42)),
        });
        engine
            .enqueue_notification(session.session_id, subscription.subscription_id, message)
            .expect("enqueue");

        let first = engine
            .publish(PublishRequest {
                session_id: session.session_id,
                acknowledgements: Vec::new(),
            })
            .await
            .expect("publish");
        assert_eq!(first.message.data_changes.len(), 1);
        assert!(!first.more_notifications);

        let keep_alive = engine
            .publish(PublishRequest {
                session_id: session.session_id,
                acknowledgements: Vec::new(),
            })
            .await
            .expect("keep-alive publish");
        assert!(keep_alive.message.data_changes.is_empty());
        assert!(keep_alive.message.events.is_empty());
    }

    #[tokio::test]
    async fn writes_respect_node_access() {
        let engine = engine_with_nodes();
        let session = open_session(&engine).await;
        let response = engine
            .write(WriteRequest {
                session_id: session.session_id,
                writes: vec![
                    WriteValue {
                        node_id: "ns=2;s=SetPoint".into(),
                        value: Variant::Double(12.5),
                    },
                    WriteValue {
                        node_id: "ns=2;s=FastUInt1".into(),
                        value: Variant::Int64(1),
                    },
                    WriteValue {
                        node_id: "ns=2;s=Nope".into(),
                        value: Variant::Boolean(true),
                    },
                ],
            })
            .await
            .expect("write");
        assert_eq!(
            response.results,
            vec![
                StatusCode::Good,
                StatusCode::BadNotWritable,
                StatusCode::BadNodeIdUnknown
            ]
        );

        let read = engine
            .read(ReadRequest {
                session_id: session.session_id,
                node_ids: vec!["ns=2;s=SetPoint".into()],
            })
            .await
            .expect("read back");
        assert_eq!(read.results[0].value, Some(Variant::Double(12.5)));
    }

    #[tokio::test]
    async fn monitored_items_track_known_nodes_only() {
        let engine = engine_with_nodes();
        let session = open_session(&engine).await;
        let subscription = engine
            .create_subscription(CreateSubscriptionRequest {
                session_id: session.session_id,
                requested_publishing_interval_ms: 250.0,
                requested_lifetime_count: 10,
                requested_max_keep_alive_count: 3,
            })
            .await
            .expect("subscription created");
        let response = engine
            .create_monitored_items(CreateMonitoredItemsRequest {
                session_id: session.session_id,
                subscription_id: subscription.subscription_id,
                items: vec![
                    MonitoredItemRequest {
                        node_id: "ns=2;s=FastUInt1".into(),
                        sampling_interval_ms: 100.0,
                    },
                    MonitoredItemRequest {
                        node_id: "ns=2;s=Unknown".into(),
                        sampling_interval_ms: 100.0,
                    },
                ],
            })
            .await
            .expect("items created");
        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].status, StatusCode::Good);
        assert_eq!(response.results[1].status, StatusCode::BadNodeIdUnknown);

        let delete = engine
            .delete_monitored_items(DeleteMonitoredItemsRequest {
                session_id: session.session_id,
                subscription_id: subscription.subscription_id,
                monitored_item_ids: vec![response.results[0].monitored_item_id, 999],
            })
            .await
            .expect("delete");
        assert_eq!(
            delete.results,
            vec![StatusCode::Good, StatusCode::BadMonitoredItemIdInvalid]
        );
    }

    #[tokio::test]
    async fn close_session_releases_slot() {
        let engine = engine_with_nodes();
        let session = open_session(&engine).await;
        assert_eq!(engine.session_count(), 1);
        engine
            .close_session(CloseSessionRequest {
                session_id: session.session_id,
                delete_subscriptions: true,
            })
            .await
            .expect("close");
        assert_eq!(engine.session_count(), 0);

        let fault = engine
            .close_session(CloseSessionRequest {
                session_id: session.session_id,
                delete_subscriptions: false,
            })
            .await
            .expect_err("double close faults");
        assert_eq!(fault.code, StatusCode::BadSessionIdInvalid);
    }

    #[tokio::test]
    async fn shutdown_broadcasts_are_recorded_and_block_new_sessions() {
        let engine = engine_with_nodes();
        engine
            .broadcast_shutdown(5, "maintenance window")
            .expect("broadcast");
        assert_eq!(engine.server_state(), ServerState::ShuttingDown);
        assert_eq!(
            engine.shutdown_broadcasts(),
            vec![(5, "maintenance window".to_owned())]
        );

        let fault = engine
            .create_session(CreateSessionRequest {
                client_name: "late".into(),
                requested_timeout_ms: 1_000,
            })
            .await
            .expect_err("no sessions during shutdown");
        assert_eq!(fault.code, StatusCode::BadShutdown);
    }
}
