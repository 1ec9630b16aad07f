//! ---
//! sim_section: "04-configuration-orchestration"
//! sim_subsection: "module"
//! sim_type: "source"
//! sim_scope: "code"
//! sim_description: "Orchestration core: composition, instrumentation, shutdown."
//! sim_version: "v0.1.0-dev"
//! sim_owner: "tbd"
//! ---
//! Concrete address-space providers wired up by the composer.
//!
//! Each factory installs a namespace of node definitions into the
//! [`EngineContext`]; the periodic value generation behind those nodes is the
//! engine's concern, not this layer's.

use std::fs;

use anyhow::{Context, Result};
use plcsim_common::NodeSetConfig;
use plcsim_engine::{AddressSpaceProvider, EngineContext, NodeDefinition};
use plcsim_engine::types::Variant;

/// Factory signature shared by every provider.
pub type ProviderFactory =
    fn(&EngineContext, &NodeSetConfig) -> Result<Box<dyn AddressSpaceProvider>>;

/// Provider handle retained after its nodes are installed.
#[derive(Debug)]
pub struct InstalledProvider {
    name: &'static str,
    namespace_index: u16,
    node_count: usize,
}

impl AddressSpaceProvider for InstalledProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn namespace_index(&self) -> u16 {
        self.namespace_index
    }

    fn node_count(&self) -> usize {
        self.node_count
    }
}

fn install(
    context: &EngineContext,
    name: &'static str,
    namespace: &str,
    nodes: Vec<NodeDefinition>,
) -> Box<dyn AddressSpaceProvider> {
    let node_count = nodes.len();
    let namespace_index = context.register_namespace(namespace, nodes);
    Box::new(InstalledProvider {
        name,
        namespace_index,
        node_count,
    })
}

/// Server identity nodes. Always present, always composed first.
pub fn core_identity(
    context: &EngineContext,
    _config: &NodeSetConfig,
) -> Result<Box<dyn AddressSpaceProvider>> {
    let nodes = vec![
        NodeDefinition::readonly(
            "ns=0;s=ServerName",
            "ServerName",
            Variant::Text("plc-sim".to_owned()),
        ),
        NodeDefinition::readonly(
            "ns=0;s=ServerUptimeSeconds",
            "ServerUptimeSeconds",
            Variant::Int64(0),
        ),
        NodeDefinition::readonly(
            "ns=0;s=SecondsUntilShutdown",
            "SecondsUntilShutdown",
            Variant::Int64(0),
        ),
        NodeDefinition::readonly(
            "ns=0;s=ShutdownReason",
            "ShutdownReason",
            Variant::Text(String::new()),
        ),
    ];
    Ok(install(context, "core-identity", "urn:plcsim:core", nodes))
}

/// Primary simulated telemetry nodes.
pub fn data_simulation(
    context: &EngineContext,
    _config: &NodeSetConfig,
) -> Result<Box<dyn AddressSpaceProvider>> {
    let mut nodes = Vec::new();
    for index in 1..=5u32 {
        nodes.push(NodeDefinition::readonly(
            format!("ns=2;s=FastUInt{index}"),
            format!("FastUInt{index}"),
            Variant::Int64(0),
        ));
    }
    for index in 1..=5u32 {
        nodes.push(NodeDefinition::readonly(
            format!("ns=2;s=SlowUInt{index}"),
            format!("SlowUInt{index}"),
            Variant::Int64(0),
        ));
    }
    nodes.push(NodeDefinition::writable(
        "ns=2;s=SetPoint",
        "SetPoint",
        Variant::Double(0.0),
    ));
    nodes.push(NodeDefinition::readonly(
        "ns=2;s=DipData",
        "DipData",
        Variant::Double(0.0),
    ));
    Ok(install(
        context,
        "data-simulation",
        "urn:plcsim:simulation",
        nodes,
    ))
}

/// Cyclic system events without alarm semantics.
pub fn simple_events(
    context: &EngineContext,
    _config: &NodeSetConfig,
) -> Result<Box<dyn AddressSpaceProvider>> {
    let nodes = vec![NodeDefinition::readonly(
        "ns=3;s=SystemCycleEvent",
        "SystemCycleEvent",
        Variant::Text("idle".to_owned()),
    )];
    Ok(install(
        context,
        "simple-events",
        "urn:plcsim:simple-events",
        nodes,
    ))
}

/// Randomised alarm and condition nodes.
pub fn alarms(
    context: &EngineContext,
    _config: &NodeSetConfig,
) -> Result<Box<dyn AddressSpaceProvider>> {
    let nodes = vec![
        NodeDefinition::readonly(
            "ns=4;s=TemperatureAlarm",
            "TemperatureAlarm",
            Variant::Boolean(false),
        ),
        NodeDefinition::readonly(
            "ns=4;s=PressureAlarm",
            "PressureAlarm",
            Variant::Boolean(false),
        ),
    ];
    Ok(install(context, "alarms", "urn:plcsim:alarms", nodes))
}

/// Full-surface reference nodes for conformance testing.
pub fn reference_test(
    context: &EngineContext,
    _config: &NodeSetConfig,
) -> Result<Box<dyn AddressSpaceProvider>> {
    let nodes = vec![
        NodeDefinition::writable(
            "ns=5;s=Scalar_Boolean",
            "Scalar_Boolean",
            Variant::Boolean(false),
        ),
        NodeDefinition::writable("ns=5;s=Scalar_Int64", "Scalar_Int64", Variant::Int64(0)),
        NodeDefinition::writable("ns=5;s=Scalar_Double", "Scalar_Double", Variant::Double(0.0)),
        NodeDefinition::writable(
            "ns=5;s=Scalar_String",
            "Scalar_String",
            Variant::Text(String::new()),
        ),
    ];
    Ok(install(
        context,
        "reference-test",
        "urn:plcsim:reference-test",
        nodes,
    ))
}

/// Script-driven alarms with a reproducible firing order.
///
/// The script path is validated by the composer before this factory runs;
/// each non-empty, non-comment line declares one alarm node.
pub fn deterministic_alarms(
    context: &EngineContext,
    config: &NodeSetConfig,
) -> Result<Box<dyn AddressSpaceProvider>> {
    let path = config
        .deterministic_alarms_script
        .as_ref()
        .context("deterministic alarms script path missing")?;
    let script = fs::read_to_string(path)
        .with_context(|| format!("unable to read alarm script {}", path.display()))?;
    let mut nodes = Vec::new();
    for (line_no, line) in script.lines().enumerate() {
        let alarm = line.trim();
        if alarm.is_empty() || alarm.starts_with('#') {
            continue;
        }
        nodes.push(NodeDefinition::readonly(
            format!("ns=6;s=DetAlarm_{}", line_no + 1),
            alarm.to_owned(),
            Variant::Boolean(false),
        ));
    }
    Ok(install(
        context,
        "deterministic-alarms",
        "urn:plcsim:deterministic-alarms",
        nodes,
    ))
}
