//! Namespace dependency graph for cascade invalidation.

use std::collections::{BTreeMap, HashSet, VecDeque};

/// Maps a namespace to the namespaces whose cached values derive from it.
#[derive(Clone, Debug, Default)]
pub struct InvalidationGraph {
    dependents: BTreeMap<String, Vec<String>>,
}

impl InvalidationGraph {
    /// Graph with no edges: cascades only clear the namespace itself.
    pub fn empty() -> Self {
        Self::default()
    }

    /// games → leagues, teams, standings; teams → leagues, standings;
    /// players → teams.
    pub fn sports() -> Self {
        Self::empty()
            .with_dependents("games", &["leagues", "teams", "standings"])
            .with_dependents("teams", &["leagues", "standings"])
            .with_dependents("players", &["teams"])
    }

    pub fn with_dependents(mut self, namespace: &str, dependents: &[&str]) -> Self {
        for d in dependents {
            self.add_dependency(namespace, d);
        }
        self
    }

    /// Record that `dependent` must be invalidated whenever `namespace` is.
    pub fn add_dependency(&mut self, namespace: &str, dependent: &str) {
        let list = self.dependents.entry(namespace.to_string()).or_default();
        if !list.iter().any(|d| d == dependent) {
            list.push(dependent.to_string());
        }
    }

    pub fn dependents(&self, namespace: &str) -> &[String] {
        self.dependents
            .get(namespace)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// `namespace` followed by every transitive dependent, breadth first,
    /// each listed once even when the graph has cycles.
    pub fn cascade(&self, namespace: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::from([namespace]);
        while let Some(ns) = queue.pop_front() {
            if !seen.insert(ns) {
                continue;
            }
            order.push(ns.to_string());
            for d in self.dependents(ns) {
                queue.push_back(d.as_str());
            }
        }
        order
    }
}
