//! ---
//! sim_section: "04-configuration-orchestration"
//! sim_subsection: "module"
//! sim_type: "source"
//! sim_scope: "code"
//! sim_description: "Orchestration core: composition, instrumentation, shutdown."
//! sim_version: "v0.1.0-dev"
//! sim_owner: "tbd"
//! ---
//! Orchestration core for PLC-SIM.
//!
//! Three concerns live here: composing the address space exposed to clients
//! at startup, instrumenting every session lifecycle operation delegated to
//! the protocol engine, and driving the graceful countdown drain at stop.

pub mod composer;
pub mod interceptor;
pub mod providers;
pub mod shutdown;

pub use composer::{compose, ActivatedProvider};
pub use interceptor::InstrumentedEngine;
pub use shutdown::{ShutdownCoordinator, ShutdownState};
