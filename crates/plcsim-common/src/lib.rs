//! ---
//! sim_section: "01-core-functionality"
//! sim_subsection: "module"
//! sim_type: "source"
//! sim_scope: "code"
//! sim_description: "Shared primitives and utilities for the simulation runtime."
//! sim_version: "v0.1.0-dev"
//! sim_owner: "tbd"
//! ---
//! Core shared primitives for the PLC-SIM orchestration workspace.
//! This crate exposes configuration loading, logging bootstrap, and the
//! dimension-set primitive consumed across the workspace.

pub mod config;
pub mod dimensions;
pub mod logging;

pub use config::{
    AppConfig, FeatureFlags, LoadedAppConfig, LoggingConfig, MetricsConfig, NodeSetConfig,
    ShutdownConfig,
};
pub use dimensions::{base_dimensions, DimensionSet};
pub use logging::{init_tracing, LogFormat};
