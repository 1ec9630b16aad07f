//! ---
//! sim_section: "02-protocol-engine"
//! sim_subsection: "module"
//! sim_type: "source"
//! sim_scope: "code"
//! sim_description: "Protocol-engine abstraction and reference implementation."
//! sim_version: "v0.1.0-dev"
//! sim_owner: "tbd"
//! ---
use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::Variant;

/// Definition of a single addressable node installed by a provider.
#[derive(Debug, Clone)]
pub struct NodeDefinition {
    pub node_id: String,
    pub display_name: String,
    pub writable: bool,
    pub initial_value: Variant,
}

impl NodeDefinition {
    pub fn readonly(node_id: impl Into<String>, display_name: impl Into<String>, value: Variant) -> Self {
        Self {
            node_id: node_id.into(),
            display_name: display_name.into(),
            writable: false,
            initial_value: value,
        }
    }

    pub fn writable(node_id: impl Into<String>, display_name: impl Into<String>, value: Variant) -> Self {
        Self {
            node_id: node_id.into(),
            display_name: display_name.into(),
            writable: true,
            initial_value: value,
        }
    }
}

#[derive(Debug)]
struct NamespaceRecord {
    name: String,
    nodes: Vec<NodeDefinition>,
}

/// Registry of namespaces and nodes populated by address-space providers
/// during composition, then treated as read-only by the engine.
#[derive(Debug, Default)]
pub struct EngineContext {
    namespaces: Mutex<Vec<NamespaceRecord>>,
    nodes: Mutex<HashMap<String, NodeDefinition>>,
}

impl EngineContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a namespace and its nodes, returning the namespace index.
    pub fn register_namespace(&self, name: &str, nodes: Vec<NodeDefinition>) -> u16 {
        let mut node_map = self.nodes.lock();
        for node in &nodes {
            node_map.insert(node.node_id.clone(), node.clone());
        }
        drop(node_map);

        let mut namespaces = self.namespaces.lock();
        namespaces.push(NamespaceRecord {
            name: name.to_owned(),
            nodes,
        });
        (namespaces.len() - 1) as u16
    }

    pub fn namespace_count(&self) -> usize {
        self.namespaces.lock().len()
    }

    pub fn namespace_names(&self) -> Vec<String> {
        self.namespaces
            .lock()
            .iter()
            .map(|record| record.name.clone())
            .collect()
    }

    pub fn node(&self, node_id: &str) -> Option<NodeDefinition> {
        self.nodes.lock().get(node_id).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }
}

/// A pluggable component exposing a subset of the server's addressable model.
pub trait AddressSpaceProvider: Send + Sync {
    /// Stable provider name used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Namespace index assigned when the provider installed its nodes.
    fn namespace_index(&self) -> u16;

    /// Number of nodes the provider installed.
    fn node_count(&self) -> usize;
}
