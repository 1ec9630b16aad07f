//! ---
//! sim_section: "01-core-functionality"
//! sim_subsection: "module"
//! sim_type: "source"
//! sim_scope: "code"
//! sim_description: "Shared primitives and utilities for the simulation runtime."
//! sim_version: "v0.1.0-dev"
//! sim_owner: "tbd"
//! ---
use indexmap::IndexMap;

use crate::config::AppConfig;

/// Ordered, immutable set of metric dimensions.
///
/// A dimension set is never mutated once shared: [`DimensionSet::merged`]
/// copies the receiver and overlays the argument, leaving both sources
/// untouched so concurrent callers never observe each other's overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DimensionSet {
    entries: IndexMap<String, String>,
}

impl DimensionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion, used when assembling an overlay.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Produce a new set containing the receiver's entries with `overlay`
    /// applied on top. Overlay values win on key collision.
    pub fn merged(&self, overlay: &DimensionSet) -> DimensionSet {
        let mut entries = self.entries.clone();
        for (key, value) in &overlay.entries {
            entries.insert(key.clone(), value.clone());
        }
        DimensionSet { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Resolve a dimension for a metric label, defaulting to the empty string.
    pub fn value_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }
}

impl std::fmt::Display for DimensionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (key, value) in &self.entries {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        Ok(())
    }
}

/// Compute the process-wide base dimension set. Called once at startup; the
/// result is read-only for the lifetime of the process.
pub fn base_dimensions(config: &AppConfig) -> DimensionSet {
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_owned());
    DimensionSet::new()
        .with("host", host)
        .with("app", config.app_name.clone())
        .with("simulation_id", config.simulation_id.clone())
        .with("cluster", config.cluster.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_does_not_mutate_base() {
        let base = DimensionSet::new()
            .with("host", "plc-01")
            .with("app", "plc-sim");
        let snapshot = base.clone();

        let overlay = DimensionSet::new()
            .with("session", "s-1")
            .with("app", "override");
        let merged = base.merged(&overlay);

        assert_eq!(base, snapshot, "base must survive any number of merges");
        assert_eq!(merged.get("session"), Some("s-1"));
        assert_eq!(merged.get("app"), Some("override"));
        assert_eq!(base.get("app"), Some("plc-sim"));
    }

    #[test]
    fn merge_preserves_insertion_order() {
        let base = DimensionSet::new().with("a", "1").with("b", "2");
        let merged = base.merged(&DimensionSet::new().with("c", "3"));
        let keys: Vec<&str> = merged.iter().map(|(key, _)| key).collect();
        assert_eq!(keys, ["a", "b", "c"]);
    }

    #[test]
    fn missing_keys_resolve_to_empty() {
        let set = DimensionSet::new().with("host", "plc-01");
        assert_eq!(set.value_or_empty("session"), "");
        assert_eq!(set.value_or_empty("host"), "plc-01");
    }

    #[test]
    fn base_dimensions_cover_required_keys() {
        let config = AppConfig::default();
        let base = base_dimensions(&config);
        for key in ["host", "app", "simulation_id", "cluster"] {
            assert!(base.get(key).is_some(), "missing base dimension {key}");
        }
    }
}
