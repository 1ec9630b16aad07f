//! ---
//! sim_section: "02-protocol-engine"
//! sim_subsection: "module"
//! sim_type: "source"
//! sim_scope: "code"
//! sim_description: "Protocol-engine abstraction and reference implementation."
//! sim_version: "v0.1.0-dev"
//! sim_owner: "tbd"
//! ---
//! Connection-oriented protocol-engine surface for PLC-SIM.
//!
//! The real handshake, secure channel, and binary encoding live outside this
//! workspace; this crate defines the operation contracts the orchestration
//! layer wraps, the address-space provider interface fed by the composer, and
//! an in-memory reference engine used by the daemon and the test suites.

pub mod engine;
pub mod provider;
pub mod types;

pub use engine::InMemoryEngine;
pub use provider::{AddressSpaceProvider, EngineContext, NodeDefinition};
pub use types::{
    CloseSessionRequest, CloseSessionResponse, CreateMonitoredItemsRequest,
    CreateMonitoredItemsResponse, CreateSessionRequest, CreateSessionResponse,
    CreateSubscriptionRequest, CreateSubscriptionResponse, DataChangeNotification, DataValue,
    DeleteMonitoredItemsRequest, DeleteMonitoredItemsResponse, EngineControl, EventNotification,
    MonitoredItemRequest, MonitoredItemResult, NotificationMessage, PublishRequest,
    PublishResponse, ReadRequest, ReadResponse, ServerState, ServiceFault, ServiceResult,
    SessionId, SessionServices, StatusCode, SubscriptionId, Variant, WriteRequest, WriteResponse,
    WriteValue,
};
