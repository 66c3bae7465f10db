//! Readiness bookkeeping for one execution.
//!
//! The scheduler tracks per-node status, completed-run counts, and
//! per-edge delivery watermarks. An edge *delivers* when its source emits
//! an envelope whose output label matches the edge's source handle; a
//! delivery is *fresh* for a target until the target consumes it at
//! dispatch. Readiness is purely data-driven; the compiler's topological
//! order only breaks ties through the BTree iteration order of IDs.

use dipeo_compiler::{ExecutableDiagram, ExecutableEdge};
use dipeo_domain::{ArrowId, NodeData, NodeId, NodeType, Status};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// What the driving loop should do with a node this round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Dispatch the node's handler.
    Run(NodeId),
    /// The node was re-triggered past its iteration bound.
    MaxIterations(NodeId),
}

pub struct Scheduler {
    diagram: Arc<ExecutableDiagram>,
    statuses: BTreeMap<NodeId, Status>,
    exec_counts: BTreeMap<NodeId, u32>,
    /// Monotonic emission counter per node.
    output_seq: BTreeMap<NodeId, u64>,
    /// Edge -> source emission sequence last delivered on it.
    delivered: BTreeMap<ArrowId, u64>,
    /// Edge -> delivery sequence last consumed by its target.
    consumed: BTreeMap<ArrowId, u64>,
    /// Condition node -> branch label it last selected.
    branches: BTreeMap<NodeId, String>,
    running: BTreeSet<NodeId>,
    loop_nodes: BTreeSet<NodeId>,
}

impl Scheduler {
    pub fn new(diagram: Arc<ExecutableDiagram>) -> Self {
        let statuses = diagram
            .nodes
            .iter()
            .map(|n| (n.id.clone(), Status::Pending))
            .collect();
        let loop_nodes = diagram
            .execution_hints
            .loop_nodes
            .iter()
            .cloned()
            .collect();
        Self {
            diagram,
            statuses,
            exec_counts: BTreeMap::new(),
            output_seq: BTreeMap::new(),
            delivered: BTreeMap::new(),
            consumed: BTreeMap::new(),
            branches: BTreeMap::new(),
            running: BTreeSet::new(),
            loop_nodes,
        }
    }

    pub fn exec_count(&self, node: &NodeId) -> u32 {
        self.exec_counts.get(node).copied().unwrap_or(0)
    }

    pub fn exec_counts(&self) -> BTreeMap<NodeId, u32> {
        self.exec_counts.clone()
    }

    pub fn status(&self, node: &NodeId) -> Status {
        self.statuses.get(node).copied().unwrap_or(Status::Pending)
    }

    pub fn has_running(&self) -> bool {
        !self.running.is_empty()
    }

    fn delivered_seq(&self, edge: &ExecutableEdge) -> u64 {
        self.delivered.get(&edge.id).copied().unwrap_or(0)
    }

    fn is_fresh(&self, edge: &ExecutableEdge) -> bool {
        self.delivered_seq(edge) > self.consumed.get(&edge.id).copied().unwrap_or(0)
    }

    fn has_ever_delivered(&self, edge: &ExecutableEdge) -> bool {
        self.delivered_seq(edge) > 0
    }

    /// Edge contribution per the activation rules: `first` edges drop out
    /// after the target's first run; branch edges only count while their
    /// branch is the condition's latest selection.
    fn contributes(&self, edge: &ExecutableEdge, target_exec_count: u32) -> bool {
        if edge.requires_first_execution && target_exec_count > 0 {
            return false;
        }
        if edge.is_conditional {
            let selected = self.branches.get(&edge.source_node);
            return selected.map(String::as_str) == Some(edge.source_output_label.as_str());
        }
        true
    }

    /// Iteration bound for nodes that carry one.
    fn max_iteration(&self, node: &NodeId) -> Option<u32> {
        self.diagram.get_node(node).and_then(|n| match &n.data {
            NodeData::PersonJob(data) => Some(data.max_iteration),
            _ => None,
        })
    }

    fn is_loop_source(&self, edge: &ExecutableEdge) -> bool {
        self.loop_nodes.contains(&edge.source_node)
    }

    /// Whether a node may be dispatched (again), triggering watermarks
    /// aside.
    fn is_runnable(&self, node: &NodeId) -> bool {
        if self.running.contains(node) {
            return false;
        }
        match self.status(node) {
            Status::Pending => true,
            Status::Running | Status::Paused => false,
            // Loop participants re-run from a completed state.
            Status::Completed => self.loop_nodes.contains(node),
            Status::Failed | Status::Skipped | Status::Aborted | Status::MaxiterReached => false,
        }
    }

    /// Compute this round's decisions. Dispatch order follows the
    /// compiled execution order.
    pub fn poll(&self) -> Vec<Decision> {
        let mut decisions = Vec::new();
        for node_id in &self.diagram.execution_order {
            if !self.is_runnable(node_id) {
                continue;
            }
            let exec_count = self.exec_count(node_id);
            let incoming = self.diagram.incoming_edges(node_id);

            if incoming.is_empty() {
                if exec_count == 0 {
                    decisions.push(Decision::Run(node_id.clone()));
                }
                continue;
            }

            let contributing: Vec<&&ExecutableEdge> = incoming
                .iter()
                .filter(|e| self.contributes(e, exec_count))
                .collect();
            if contributing.is_empty() {
                continue;
            }

            // Every contributing edge must be satisfied: fresh, or (on a
            // re-run) previously delivered from outside the loop. At least
            // one fresh delivery is the trigger.
            let satisfied = contributing.iter().all(|e| {
                self.is_fresh(e)
                    || (exec_count > 0 && self.has_ever_delivered(e) && !self.is_loop_source(e))
            });
            let triggered = contributing.iter().any(|e| self.is_fresh(e));
            if !(satisfied && triggered) {
                continue;
            }

            if let Some(bound) = self.max_iteration(node_id) {
                if exec_count >= bound {
                    decisions.push(Decision::MaxIterations(node_id.clone()));
                    continue;
                }
            }
            decisions.push(Decision::Run(node_id.clone()));
        }
        decisions
    }

    /// The edges whose deliveries feed a node's next run, for input
    /// collection.
    pub fn input_edges(&self, node: &NodeId) -> Vec<&ExecutableEdge> {
        let exec_count = self.exec_count(node);
        self.diagram
            .incoming_edges(node)
            .into_iter()
            .filter(|e| self.contributes(e, exec_count) && self.has_ever_delivered(e))
            .collect()
    }

    /// Mark a node dispatched: set it running and consume the deliveries
    /// it is about to read.
    pub fn mark_dispatched(&mut self, node: &NodeId) {
        self.running.insert(node.clone());
        self.statuses.insert(node.clone(), Status::Running);
        let exec_count = self.exec_count(node);
        let to_consume: Vec<(ArrowId, u64)> = self
            .diagram
            .incoming_edges(node)
            .into_iter()
            .filter(|e| self.contributes(e, exec_count))
            .map(|e| (e.id.clone(), self.delivered_seq(e)))
            .collect();
        for (edge_id, seq) in to_consume {
            self.consumed.insert(edge_id, seq);
        }
    }

    /// Record a completed run and deliver its envelope on the outgoing
    /// edges whose source handle matches the output label.
    pub fn record_completion(&mut self, node: &NodeId, output_label: &str) {
        self.running.remove(node);
        self.statuses.insert(node.clone(), Status::Completed);
        *self.exec_counts.entry(node.clone()).or_insert(0) += 1;

        let seq = self.output_seq.entry(node.clone()).or_insert(0);
        *seq += 1;
        let seq = *seq;

        let is_condition = self
            .diagram
            .get_node(node)
            .map(|n| n.node_type() == NodeType::Condition)
            .unwrap_or(false);
        if is_condition {
            self.branches.insert(node.clone(), output_label.to_string());
        }

        let matching: Vec<ArrowId> = self
            .diagram
            .outgoing_edges(node)
            .into_iter()
            .filter(|e| e.source_output_label.as_str() == output_label)
            .map(|e| e.id.clone())
            .collect();
        for edge_id in matching {
            self.delivered.insert(edge_id, seq);
        }
    }

    /// Record a failed run. The error envelope is delivered only on edges
    /// that opted into `continue_on_error`.
    pub fn record_failure(&mut self, node: &NodeId) {
        self.running.remove(node);
        self.statuses.insert(node.clone(), Status::Failed);

        let seq = self.output_seq.entry(node.clone()).or_insert(0);
        *seq += 1;
        let seq = *seq;
        let opted_in: Vec<ArrowId> = self
            .diagram
            .outgoing_edges(node)
            .into_iter()
            .filter(|e| e.continue_on_error())
            .map(|e| e.id.clone())
            .collect();
        for edge_id in opted_in {
            self.delivered.insert(edge_id, seq);
        }
    }

    /// A node failure is fatal unless the node has no successors or every
    /// successor edge opted into `continue_on_error`.
    pub fn failure_is_fatal(&self, node: &NodeId) -> bool {
        let outgoing = self.diagram.outgoing_edges(node);
        !outgoing.is_empty() && !outgoing.iter().all(|e| e.continue_on_error())
    }

    /// Park a node that hit its iteration bound, consuming the trigger so
    /// it does not re-fire every round.
    pub fn record_max_iterations(&mut self, node: &NodeId) {
        self.park(node, Status::MaxiterReached);
    }

    /// Skip a node on request; it becomes terminal without running.
    pub fn record_skipped(&mut self, node: &NodeId) {
        self.park(node, Status::Skipped);
    }

    fn park(&mut self, node: &NodeId, status: Status) {
        self.statuses.insert(node.clone(), status);
        let exec_count = self.exec_count(node);
        let to_consume: Vec<(ArrowId, u64)> = self
            .diagram
            .incoming_edges(node)
            .into_iter()
            .filter(|e| self.contributes(e, exec_count))
            .map(|e| (e.id.clone(), self.delivered_seq(e)))
            .collect();
        for (edge_id, seq) in to_consume {
            self.consumed.insert(edge_id, seq);
        }
    }

    /// Mark still-running nodes failed during an abort.
    pub fn drain_running(&mut self) -> Vec<NodeId> {
        let drained: Vec<NodeId> = self.running.iter().cloned().collect();
        for node in &drained {
            self.statuses.insert(node.clone(), Status::Failed);
        }
        self.running.clear();
        drained
    }
}
