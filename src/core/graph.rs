//! The build graph - an explicit registry of targets.
//!
//! One `BuildGraph` holds every registered target for a build. It is an
//! ordinary value rather than process-global state, so independent graphs
//! can coexist in one process (which the test suite relies on).

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::core::target::{Target, TargetBuilder};

/// Registry mapping target names to their declarations.
///
/// Registration is expected only during configuration, before the
/// executor runs; lookups happen concurrently during the run.
#[derive(Debug, Default)]
pub struct BuildGraph {
    targets: RwLock<BTreeMap<String, Arc<Target>>>,
}

impl BuildGraph {
    /// Create an empty graph.
    pub fn new() -> Arc<Self> {
        Arc::new(BuildGraph::default())
    }

    /// Start declaring a target. The returned builder registers it on
    /// [`TargetBuilder::run`].
    pub fn target(&self, name: impl Into<String>) -> TargetBuilder<'_> {
        TargetBuilder::new(self, name.into())
    }

    /// Insert a target, overwriting any previous registration under the
    /// same name.
    pub fn register(&self, target: Arc<Target>) {
        let mut targets = self.targets.write().expect("graph lock poisoned");
        if let Some(previous) = targets.insert(target.name().to_string(), target) {
            tracing::debug!("target `{}` re-registered", previous.name());
        }
    }

    /// Look up a target by name.
    pub fn get(&self, name: &str) -> Option<Arc<Target>> {
        self.targets
            .read()
            .expect("graph lock poisoned")
            .get(name)
            .cloned()
    }

    /// Whether a target with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.targets
            .read()
            .expect("graph lock poisoned")
            .contains_key(name)
    }

    /// Snapshot of all registered targets, sorted by name.
    pub fn targets(&self) -> Vec<(String, Arc<Target>)> {
        self.targets
            .read()
            .expect("graph lock poisoned")
            .iter()
            .map(|(name, target)| (name.clone(), Arc::clone(target)))
            .collect()
    }

    /// Number of registered targets.
    pub fn len(&self) -> usize {
        self.targets.read().expect("graph lock poisoned").len()
    }

    /// Whether the graph has no targets.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let graph = BuildGraph::new();
        assert!(graph.is_empty());

        graph.target("a").phony().run(|_cx| async { Ok(()) });
        graph.target("b").phony().run(|_cx| async { Ok(()) });

        assert_eq!(graph.len(), 2);
        assert!(graph.contains("a"));
        assert!(graph.get("b").is_some());
        assert!(graph.get("c").is_none());
    }

    #[test]
    fn test_register_overwrites() {
        let graph = BuildGraph::new();
        graph.target("a").phony().run(|_cx| async { Ok(()) });
        let second = graph
            .target("a")
            .phony()
            .doc("second")
            .run(|_cx| async { Ok(()) });

        assert_eq!(graph.len(), 1);
        assert_eq!(graph.get("a").unwrap().doc(), second.doc());
    }

    #[test]
    fn test_targets_sorted_by_name() {
        let graph = BuildGraph::new();
        graph.target("zeta").phony().run(|_cx| async { Ok(()) });
        graph.target("alpha").phony().run(|_cx| async { Ok(()) });

        let names: Vec<String> = graph.targets().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
