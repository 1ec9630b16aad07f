//! ---
//! sim_section: "04-configuration-orchestration"
//! sim_subsection: "module"
//! sim_type: "source"
//! sim_scope: "code"
//! sim_description: "Orchestration core: composition, instrumentation, shutdown."
//! sim_version: "v0.1.0-dev"
//! sim_owner: "tbd"
//! ---
//! Address-space composition.
//!
//! The provider registry is declared statically so the composed address
//! space is auditable from this file alone. Composition runs once,
//! single-threaded, before any client traffic; the resulting list is
//! read-only afterwards.

use anyhow::{bail, Context, Result};
use tracing::info;

use plcsim_common::{FeatureFlags, NodeSetConfig};
use plcsim_engine::{AddressSpaceProvider, EngineContext};

use crate::providers::{self, ProviderFactory};

/// Optional features a descriptor can be gated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeatureGate {
    SimpleEvents,
    Alarms,
    ReferenceTest,
    DeterministicAlarms,
}

impl FeatureGate {
    fn enabled(self, features: &FeatureFlags) -> bool {
        match self {
            FeatureGate::SimpleEvents => features.simple_events,
            FeatureGate::Alarms => features.alarms,
            FeatureGate::ReferenceTest => features.reference_test,
            FeatureGate::DeterministicAlarms => features.deterministic_alarms,
        }
    }
}

struct ProviderDescriptor {
    name: &'static str,
    gate: Option<FeatureGate>,
    factory: ProviderFactory,
}

/// Registration order is the activation order; core identity must stay first.
const REGISTRY: &[ProviderDescriptor] = &[
    ProviderDescriptor {
        name: "core-identity",
        gate: None,
        factory: providers::core_identity,
    },
    ProviderDescriptor {
        name: "data-simulation",
        gate: None,
        factory: providers::data_simulation,
    },
    ProviderDescriptor {
        name: "simple-events",
        gate: Some(FeatureGate::SimpleEvents),
        factory: providers::simple_events,
    },
    ProviderDescriptor {
        name: "alarms",
        gate: Some(FeatureGate::Alarms),
        factory: providers::alarms,
    },
    ProviderDescriptor {
        name: "reference-test",
        gate: Some(FeatureGate::ReferenceTest),
        factory: providers::reference_test,
    },
    ProviderDescriptor {
        name: "deterministic-alarms",
        gate: Some(FeatureGate::DeterministicAlarms),
        factory: providers::deterministic_alarms,
    },
];

/// An activated provider together with its stable composition index.
pub struct ActivatedProvider {
    pub index: u16,
    pub name: &'static str,
    pub provider: Box<dyn AddressSpaceProvider>,
}

impl std::fmt::Debug for ActivatedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivatedProvider")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("node_count", &self.provider.node_count())
            .finish()
    }
}

/// Build the ordered provider list for the enabled feature set.
///
/// Indices are assigned in registration order, are unique, and the core
/// identity provider always receives index 0. Configuration problems and
/// factory errors are fatal: the process must not start serving with a
/// partially composed address space.
pub fn compose(
    features: &FeatureFlags,
    node_set: &NodeSetConfig,
    context: &EngineContext,
) -> Result<Vec<ActivatedProvider>> {
    validate_resources(features, node_set)?;

    let mut activated = Vec::new();
    for descriptor in REGISTRY {
        if let Some(gate) = descriptor.gate {
            if !gate.enabled(features) {
                continue;
            }
        }
        let provider = (descriptor.factory)(context, node_set)
            .with_context(|| format!("failed to build provider {}", descriptor.name))?;
        let index = activated.len() as u16;
        info!(
            provider = descriptor.name,
            index,
            namespace = provider.namespace_index(),
            nodes = provider.node_count(),
            "address-space provider activated"
        );
        activated.push(ActivatedProvider {
            index,
            name: descriptor.name,
            provider,
        });
    }
    Ok(activated)
}

/// Resource checks that must fail before any provider is constructed.
fn validate_resources(features: &FeatureFlags, node_set: &NodeSetConfig) -> Result<()> {
    if features.deterministic_alarms {
        let path = match &node_set.deterministic_alarms_script {
            Some(path) if !path.as_os_str().is_empty() => path,
            _ => bail!("deterministic-alarms feature requires node_set.deterministic_alarms_script"),
        };
        if !path.exists() {
            bail!(
                "deterministic-alarms script {} does not exist",
                path.display()
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn all_features() -> FeatureFlags {
        FeatureFlags {
            simple_events: true,
            alarms: true,
            reference_test: true,
            deterministic_alarms: false,
        }
    }

    #[test]
    fn core_identity_is_always_index_zero() {
        for features in [FeatureFlags::default(), all_features()] {
            let context = EngineContext::new();
            let activated =
                compose(&features, &NodeSetConfig::default(), &context).expect("compose");
            assert_eq!(activated[0].name, "core-identity");
            assert_eq!(activated[0].index, 0);
            assert_eq!(activated[1].name, "data-simulation");
        }
    }

    #[test]
    fn indices_are_strictly_increasing_and_unique() {
        let context = EngineContext::new();
        let activated =
            compose(&all_features(), &NodeSetConfig::default(), &context).expect("compose");
        assert_eq!(activated.len(), 5);
        for (position, provider) in activated.iter().enumerate() {
            assert_eq!(provider.index as usize, position);
        }
    }

    #[test]
    fn composition_is_deterministic_for_a_flag_set() {
        let first_names: Vec<&str> = {
            let context = EngineContext::new();
            compose(&all_features(), &NodeSetConfig::default(), &context)
                .expect("compose")
                .iter()
                .map(|provider| provider.name)
                .collect()
        };
        let second_names: Vec<&str> = {
            let context = EngineContext::new();
            compose(&all_features(), &NodeSetConfig::default(), &context)
                .expect("compose")
                .iter()
                .map(|provider| provider.name)
                .collect()
        };
        assert_eq!(first_names, second_names);
        assert_eq!(
            first_names,
            vec![
                "core-identity",
                "data-simulation",
                "simple-events",
                "alarms",
                "reference-test"
            ]
        );
    }

    #[test]
    fn deterministic_alarms_requires_a_script_path() {
        let features = FeatureFlags {
            deterministic_alarms: true,
            ..FeatureFlags::default()
        };
        let context = EngineContext::new();

        let missing = compose(&features, &NodeSetConfig::default(), &context);
        assert!(missing.is_err(), "absent script path must be fatal");
        assert_eq!(context.namespace_count(), 0, "no provider may be returned");

        let empty = compose(
            &features,
            &NodeSetConfig {
                deterministic_alarms_script: Some(PathBuf::new()),
            },
            &context,
        );
        assert!(empty.is_err(), "empty script path must be fatal");

        let nonexistent = compose(
            &features,
            &NodeSetConfig {
                deterministic_alarms_script: Some(PathBuf::from("/nonexistent/alarms.txt")),
            },
            &context,
        );
        assert!(nonexistent.is_err(), "missing script file must be fatal");
        assert_eq!(context.namespace_count(), 0);
    }

    #[test]
    fn deterministic_alarms_composes_with_valid_script() {
        let mut script = tempfile::NamedTempFile::new().expect("script file");
        writeln!(script, "BoilerOverTemp").expect("write");

        let features = FeatureFlags {
            deterministic_alarms: true,
            ..FeatureFlags::default()
        };
        let context = EngineContext::new();
        let activated = compose(
            &features,
            &NodeSetConfig {
                deterministic_alarms_script: Some(script.path().to_path_buf()),
            },
            &context,
        )
        .expect("compose");
        let last = activated.last().expect("providers activated");
        assert_eq!(last.name, "deterministic-alarms");
        assert_eq!(last.index as usize, activated.len() - 1);
    }
}
