//! ---
//! sim_section: "02-protocol-engine"
//! sim_subsection: "module"
//! sim_type: "source"
//! sim_scope: "code"
//! sim_description: "Protocol-engine abstraction and reference implementation."
//! sim_version: "v0.1.0-dev"
//! sim_owner: "tbd"
//! ---
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Opaque session identifier, owned and minted by the engine.
pub type SessionId = Uuid;
/// Subscription identifier, unique within the engine.
pub type SubscriptionId = u32;

/// Status codes surfaced by engine operations. Mirrors the subset of the
/// protocol fault space this layer ever observes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum StatusCode {
    Good,
    BadSessionIdInvalid,
    BadSubscriptionIdInvalid,
    BadMonitoredItemIdInvalid,
    BadNodeIdUnknown,
    BadNotWritable,
    BadTooManySessions,
    BadShutdown,
    BadInternalError,
}

impl StatusCode {
    pub fn is_good(self) -> bool {
        self == StatusCode::Good
    }
}

/// The single error type crossing the engine operation surface.
///
/// The instrumentation layer must propagate faults verbatim so that protocol
/// clients always see the engine's native fault reporting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("service fault {code}: {reason}")]
pub struct ServiceFault {
    pub code: StatusCode,
    pub reason: String,
}

impl ServiceFault {
    pub fn new(code: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Result alias for wrapped engine operations.
pub type ServiceResult<T> = Result<T, ServiceFault>;

/// Scalar value carried by simulated nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variant {
    Boolean(bool),
    Int64(i64),
    Double(f64),
    Text(String),
}

/// Value plus quality, as returned by read operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataValue {
    pub value: Option<Variant>,
    pub status: StatusCode,
}

impl DataValue {
    pub fn good(value: Variant) -> Self {
        Self {
            value: Some(value),
            status: StatusCode::Good,
        }
    }

    pub fn bad(status: StatusCode) -> Self {
        Self {
            value: None,
            status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub client_name: String,
    pub requested_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
    pub auth_token: Uuid,
    pub revised_timeout_ms: u64,
    pub server_nonce: Vec<u8>,
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub session_id: SessionId,
    pub requested_publishing_interval_ms: f64,
    pub requested_lifetime_count: u32,
    pub requested_max_keep_alive_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscriptionResponse {
    pub subscription_id: SubscriptionId,
    pub revised_publishing_interval_ms: f64,
    pub revised_lifetime_count: u32,
    pub revised_max_keep_alive_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredItemRequest {
    pub node_id: String,
    pub sampling_interval_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMonitoredItemsRequest {
    pub session_id: SessionId,
    pub subscription_id: SubscriptionId,
    pub items: Vec<MonitoredItemRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredItemResult {
    pub monitored_item_id: u32,
    pub status: StatusCode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMonitoredItemsResponse {
    pub results: Vec<MonitoredItemResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub session_id: SessionId,
    /// (subscription id, sequence number) pairs acknowledged by the client.
    pub acknowledgements: Vec<(SubscriptionId, u32)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChangeNotification {
    pub monitored_item_id: u32,
    pub value: DataValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotification {
    pub event_type: String,
    pub message: String,
}

/// Notification payload partitioned by kind, as delivered to publish responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub sequence_number: u32,
    pub data_changes: Vec<DataChangeNotification>,
    pub events: Vec<EventNotification>,
}

impl NotificationMessage {
    /// Keep-alive message carrying no notification bodies.
    pub fn keep_alive(sequence_number: u32) -> Self {
        Self {
            sequence_number,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResponse {
    pub subscription_id: SubscriptionId,
    pub message: NotificationMessage,
    pub more_notifications: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    pub session_id: SessionId,
    pub node_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResponse {
    pub results: Vec<DataValue>,
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteValue {
    pub node_id: String,
    pub value: Variant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    pub session_id: SessionId,
    pub writes: Vec<WriteValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponse {
    pub results: Vec<StatusCode>,
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMonitoredItemsRequest {
    pub session_id: SessionId,
    pub subscription_id: SubscriptionId,
    pub monitored_item_ids: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMonitoredItemsResponse {
    pub results: Vec<StatusCode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseSessionRequest {
    pub session_id: SessionId,
    pub delete_subscriptions: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloseSessionResponse {}

/// Coarse engine run state broadcast to connected clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerState {
    Running,
    ShuttingDown,
}

/// The session/subscription operation surface this layer instruments.
///
/// The engine dispatches concurrent client operations on independent tasks;
/// implementations must be safe under arbitrary concurrent invocation.
#[async_trait]
pub trait SessionServices: Send + Sync {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> ServiceResult<CreateSessionResponse>;

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> ServiceResult<CreateSubscriptionResponse>;

    async fn create_monitored_items(
        &self,
        request: CreateMonitoredItemsRequest,
    ) -> ServiceResult<CreateMonitoredItemsResponse>;

    async fn publish(&self, request: PublishRequest) -> ServiceResult<PublishResponse>;

    async fn read(&self, request: ReadRequest) -> ServiceResult<ReadResponse>;

    async fn write(&self, request: WriteRequest) -> ServiceResult<WriteResponse>;

    async fn delete_monitored_items(
        &self,
        request: DeleteMonitoredItemsRequest,
    ) -> ServiceResult<DeleteMonitoredItemsResponse>;

    async fn close_session(
        &self,
        request: CloseSessionRequest,
    ) -> ServiceResult<CloseSessionResponse>;
}

/// Control-plane hooks consumed by the shutdown coordinator.
pub trait EngineControl: Send + Sync {
    /// Number of currently live sessions.
    fn session_count(&self) -> usize;

    /// Broadcast the seconds-until-shutdown countdown to connected clients.
    fn broadcast_shutdown(&self, seconds_remaining: u64, reason: &str) -> ServiceResult<()>;

    /// Current coarse run state.
    fn server_state(&self) -> ServerState;
}
