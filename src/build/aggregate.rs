//! Transitive include and binary collection over link dependencies.

use crate::graph::{BuildGraph, TargetId};
use std::collections::HashSet;
use std::hash::Hash;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    pub includes: Vec<PathBuf>,
    pub binaries: Vec<PathBuf>,
}

/// Depth-first over link dependencies only. A dependency's transitive
/// artifacts come before its own, so the deepest libraries lead the list.
/// Libraries reachable through several paths appear once per path.
pub fn transitive_includes_and_binaries(graph: &BuildGraph, target: TargetId) -> Artifacts {
    let mut artifacts = Artifacts::default();
    for &dependency in &graph.target(target).dependencies {
        let nested = transitive_includes_and_binaries(graph, dependency);
        let dep = graph.target(dependency);
        artifacts.includes.extend(nested.includes);
        artifacts.includes.extend(dep.includes.iter().cloned());
        artifacts.binaries.extend(nested.binaries);
        artifacts.binaries.extend(dep.target_files.iter().cloned());
    }
    artifacts
}

/// Transitive binaries followed by the target's own artifacts.
pub fn link_order(graph: &BuildGraph, target: TargetId) -> Vec<PathBuf> {
    let mut order = transitive_includes_and_binaries(graph, target).binaries;
    order.extend(graph.target(target).target_files.iter().cloned());
    order
}

/// Drop repeats, keeping each item where it first appears.
pub fn dedup_preserving_order<T: Clone + Eq + Hash>(items: &[T]) -> Vec<T> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .iter()
        .filter(|item| seen.insert((*item).clone()))
        .cloned()
        .collect()
}
