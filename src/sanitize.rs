//! Object graph sanitizer: strip ambient contexts before transport
//!
//! Walks every node reachable from the graph's roots and clears the
//! [`AmbientContext`](crate::model::AmbientContext) attached to its details.
//! All other fields, back-references included, are left untouched. Nodes the
//! walk never reaches are dropped from the arena, so the serialized graph is
//! exactly the sanitized one. The walk keeps a visited set so cyclic graphs
//! terminate, and running it twice is the same as running it once.

use crate::model::{NodeId, ObjectGraph};
use std::collections::HashSet;

/// Outcome of a sanitizer pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    /// Nodes reached from the roots
    pub visited: usize,

    /// Nodes whose ambient context was cleared
    pub cleared: usize,

    /// Unreachable nodes dropped from the arena
    pub pruned: usize,
}

/// Strip ambient contexts from every reachable node and drop the rest
pub fn sanitize(graph: &mut ObjectGraph) -> SanitizeReport {
    let mut report = SanitizeReport::default();
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut pending: Vec<NodeId> = graph.roots().to_vec();

    while let Some(id) = pending.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(node) = graph.node_mut(id) else {
            continue;
        };
        report.visited += 1;

        if node.details.contexts.take().is_some() {
            tracing::debug!(kind = %node.kind, id = node.id, "Removed ambient context");
            report.cleared += 1;
        }

        pending.extend(node.references().filter(|r| !visited.contains(r)));
    }

    report.pruned = graph.retain_nodes(&visited);
    if report.pruned > 0 {
        tracing::debug!(pruned = report.pruned, "Dropped unreachable nodes");
    }

    report
}
