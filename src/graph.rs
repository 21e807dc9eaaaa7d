//! Dependency resolution over a project's features.
//!
//! The graph is rebuilt from a fresh feature snapshot on every scheduling pass
//! and never persisted. Dependency ids that do not resolve to a known feature
//! are treated as satisfied: a feature pointing at a deleted dependency must
//! never stall the backlog.

use std::collections::{HashMap, HashSet};

use crate::models::{Feature, FeatureStatus};

/// Index features by id in O(n). On duplicate ids the first declaration wins.
pub fn build_map(features: &[Feature]) -> HashMap<&str, &Feature> {
    let mut map = HashMap::with_capacity(features.len());
    for feature in features {
        map.entry(feature.id.as_str()).or_insert(feature);
    }
    map
}

/// Dependencies of `feature` that exist in `map` and are not yet `verified`,
/// in declaration order. Unknown ids never appear in the result.
pub fn blocking_dependencies(feature: &Feature, map: &HashMap<&str, &Feature>) -> Vec<String> {
    feature
        .dependencies
        .iter()
        .filter(|dep| {
            map.get(dep.as_str())
                .is_some_and(|f| f.status != FeatureStatus::Verified)
        })
        .cloned()
        .collect()
}

/// A snapshot of one project's features with their dependency edges.
#[derive(Debug)]
pub struct FeatureGraph<'a> {
    /// Declaration order, used as the priority tie-break.
    features: &'a [Feature],
    map: HashMap<&'a str, &'a Feature>,
}

impl<'a> FeatureGraph<'a> {
    pub fn build(features: &'a [Feature]) -> Self {
        Self {
            features,
            map: build_map(features),
        }
    }

    pub fn get(&self, id: &str) -> Option<&'a Feature> {
        self.map.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn blocking_dependencies(&self, feature: &Feature) -> Vec<String> {
        blocking_dependencies(feature, &self.map)
    }

    pub fn is_blocked(&self, feature: &Feature) -> bool {
        feature.dependencies.iter().any(|dep| {
            self.map
                .get(dep.as_str())
                .is_some_and(|f| f.status != FeatureStatus::Verified)
        })
    }

    /// Features a loop for `branch_name` may dispatch right now: in `backlog`,
    /// scoped to that branch, not already running and with no blocking
    /// dependencies. Ordered by ascending priority; equal priorities keep
    /// declaration order.
    pub fn ready_candidates(
        &self,
        branch_name: Option<&str>,
        running: &HashSet<String>,
    ) -> Vec<&'a Feature> {
        let mut candidates: Vec<&'a Feature> = self
            .features
            .iter()
            .filter(|f| f.status == FeatureStatus::Backlog)
            .filter(|f| f.branch_name.as_deref() == branch_name)
            .filter(|f| !running.contains(&f.id))
            .filter(|f| !self.is_blocked(f))
            .collect();

        // sort_by_key is stable
        candidates.sort_by_key(|f| f.priority);
        candidates
    }

    /// Dependency cycles among known features, each reported once as the ids
    /// along the cycle starting from its smallest id.
    ///
    /// Advisory only. Members of a cycle simply stay blocked; scheduling never
    /// consults this.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut state: HashMap<&str, Visit> = HashMap::with_capacity(self.map.len());
        let mut stack: Vec<&str> = Vec::new();
        let mut seen: HashSet<Vec<String>> = HashSet::new();
        let mut cycles = Vec::new();

        for feature in self.features {
            if !state.contains_key(feature.id.as_str()) {
                self.visit(
                    feature.id.as_str(),
                    &mut state,
                    &mut stack,
                    &mut seen,
                    &mut cycles,
                );
            }
        }

        cycles
    }

    fn visit(
        &self,
        id: &'a str,
        state: &mut HashMap<&'a str, Visit>,
        stack: &mut Vec<&'a str>,
        seen: &mut HashSet<Vec<String>>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        let Some(feature) = self.get(id) else {
            return;
        };

        state.insert(id, Visit::InProgress);
        stack.push(id);

        for dep in &feature.dependencies {
            let Some(dep_feature) = self.get(dep) else {
                continue;
            };
            let dep_id = dep_feature.id.as_str();
            match state.get(dep_id) {
                None => self.visit(dep_id, state, stack, seen, cycles),
                Some(Visit::InProgress) => {
                    if let Some(start) = stack.iter().position(|s| *s == dep_id) {
                        let cycle = canonical_cycle(&stack[start..]);
                        if seen.insert(cycle.clone()) {
                            cycles.push(cycle);
                        }
                    }
                }
                Some(Visit::Done) => {}
            }
        }

        stack.pop();
        state.insert(id, Visit::Done);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Rotate a cycle so it starts at its smallest id.
fn canonical_cycle(members: &[&str]) -> Vec<String> {
    let start = members
        .iter()
        .enumerate()
        .min_by_key(|(_, id)| **id)
        .map(|(i, _)| i)
        .unwrap_or(0);

    members[start..]
        .iter()
        .chain(members[..start].iter())
        .map(|s| s.to_string())
        .collect()
}
