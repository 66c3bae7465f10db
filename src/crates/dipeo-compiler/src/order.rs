//! Topological ordering and cycle analysis.
//!
//! Kahn's algorithm with a deterministic tie-break on node ID. Nodes left
//! over after the sort sit on cycles; a cycle is legal only when it passes
//! through a condition node or an iteration-bounded node (a `person_job`
//! with `max_iteration > 1`), in which case its members are annotated as
//! loop nodes rather than rejected.

use crate::error::{CompileError, Result};
use crate::executable::{ExecutableEdge, ExecutableNode, ExecutionHints};
use dipeo_domain::{NodeData, NodeId};
use std::collections::{BTreeMap, BTreeSet};

pub fn order_nodes(
    nodes: &[ExecutableNode],
    edges: &[ExecutableEdge],
) -> Result<(Vec<NodeId>, ExecutionHints)> {
    let mut in_degree: BTreeMap<&NodeId, usize> = nodes.iter().map(|n| (&n.id, 0)).collect();
    let mut successors: BTreeMap<&NodeId, BTreeSet<&NodeId>> =
        nodes.iter().map(|n| (&n.id, BTreeSet::new())).collect();

    for edge in edges {
        // Parallel edges between the same pair count once.
        if let Some(succ) = successors.get_mut(&edge.source_node) {
            if succ.insert(&edge.target_node) {
                *in_degree.entry(&edge.target_node).or_insert(0) += 1;
            }
        }
    }

    let mut ready: BTreeSet<&NodeId> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order: Vec<NodeId> = Vec::with_capacity(nodes.len());

    while let Some(&id) = ready.iter().next() {
        ready.remove(&id);
        order.push(id.clone());
        if let Some(succ) = successors.get(&id) {
            for next in succ.clone() {
                let d = in_degree.get_mut(&next).unwrap();
                *d -= 1;
                if *d == 0 {
                    ready.insert(next);
                }
            }
        }
    }

    if order.len() == nodes.len() {
        return Ok((order, ExecutionHints::default()));
    }

    // Remainder sits on one or more cycles.
    let sorted: BTreeSet<NodeId> = order.iter().cloned().collect();
    let cyclic: Vec<&ExecutableNode> = nodes.iter().filter(|n| !sorted.contains(&n.id)).collect();

    let bounded = cyclic.iter().any(|n| match &n.data {
        NodeData::Condition(_) => true,
        NodeData::PersonJob(d) => d.max_iteration > 1,
        _ => false,
    });
    if !bounded {
        return Err(CompileError::UnboundedCycle {
            nodes: cyclic
                .iter()
                .map(|n| n.label.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        });
    }

    let loop_nodes: Vec<NodeId> = cyclic.iter().map(|n| n.id.clone()).collect();

    // Append cycle members in declaration order so the tie-breaker still
    // covers every node exactly once.
    for node in nodes {
        if !sorted.contains(&node.id) {
            order.push(node.id.clone());
        }
    }

    Ok((order, ExecutionHints { loop_nodes }))
}

/// A condition node participates in a loop when one of its branch targets
/// can reach it again. Used by `detect_max_iterations`.
pub fn is_condition_in_loop(
    condition: &NodeId,
    edges: &[ExecutableEdge],
) -> bool {
    let mut visited = BTreeSet::new();
    let mut stack: Vec<&NodeId> = edges
        .iter()
        .filter(|e| &e.source_node == condition)
        .map(|e| &e.target_node)
        .collect();
    while let Some(id) = stack.pop() {
        if id == condition {
            return true;
        }
        if !visited.insert(id.clone()) {
            continue;
        }
        stack.extend(
            edges
                .iter()
                .filter(|e| &e.source_node == id)
                .map(|e| &e.target_node),
        );
    }
    false
}
