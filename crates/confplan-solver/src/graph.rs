//! Dependency graph construction and validation.
//!
//! Builds the flat task DAG every analytical engine walks: adjacency in both
//! directions, a deterministic topological order, and transitive closures.
//!
//! Determinism matters here. Kahn's ready set is kept ordered so that ties
//! resolve by ascending task id; two loads of the same plan always produce
//! the same order, which keeps critical-path tie-breaks and Monte Carlo
//! walks reproducible.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use confplan_core::{Dependency, DependencyType, PlanError, PlanSnapshot, Result, TaskId};

/// An edge of the dependency DAG.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub from: TaskId,
    pub to: TaskId,
    pub dep_type: DependencyType,
}

/// A problem observed while building the graph leniently.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphDiagnostic {
    /// An edge referenced a task that does not exist; the edge was dropped.
    DanglingEdge { from: TaskId, to: TaskId },
    /// An edge participated in a cycle; the edge was dropped to restore
    /// acyclicity.
    CycleEdgeExcluded { from: TaskId, to: TaskId },
}

impl std::fmt::Display for GraphDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphDiagnostic::DanglingEdge { from, to } => {
                write!(f, "dropped edge {from} -> {to}: endpoint missing")
            }
            GraphDiagnostic::CycleEdgeExcluded { from, to } => {
                write!(f, "dropped edge {from} -> {to}: breaks a dependency cycle")
            }
        }
    }
}

/// The flat, schedulable dependency graph of one plan.
#[derive(Clone, Debug)]
pub struct TaskGraph {
    /// All task ids, ascending.
    pub node_ids: Vec<TaskId>,
    /// task id -> outgoing edges
    pub successors: HashMap<TaskId, Vec<Edge>>,
    /// task id -> incoming edges
    pub predecessors: HashMap<TaskId, Vec<Edge>>,
    /// Kahn order, ties broken by ascending task id.
    pub topo_order: Vec<TaskId>,
}

impl TaskGraph {
    /// Build the graph, failing with `CycleDetected` when the edge set is
    /// not a DAG and with `TaskNotFound` on a dangling endpoint.
    pub fn build(snapshot: &PlanSnapshot) -> Result<Self> {
        for dep in &snapshot.dependencies {
            for endpoint in [&dep.predecessor, &dep.successor] {
                if snapshot.get_task(endpoint).is_none() {
                    return Err(PlanError::TaskNotFound(endpoint.clone()));
                }
            }
        }
        let (graph, diagnostics) = Self::assemble(snapshot, snapshot.dependencies.clone());
        if let Some(GraphDiagnostic::CycleEdgeExcluded { .. }) = diagnostics.first() {
            let cyclic = cycle_nodes(snapshot);
            return Err(PlanError::CycleDetected(cyclic));
        }
        Ok(graph)
    }

    /// Build the graph for analytical loads: dangling and cycle-forming
    /// edges are excluded instead of failing, and each exclusion is
    /// reported.
    pub fn build_lenient(snapshot: &PlanSnapshot) -> (Self, Vec<GraphDiagnostic>) {
        let mut diagnostics = Vec::new();
        let edges: Vec<Dependency> = snapshot
            .dependencies
            .iter()
            .filter(|dep| {
                let ok = snapshot.get_task(&dep.predecessor).is_some()
                    && snapshot.get_task(&dep.successor).is_some();
                if !ok {
                    diagnostics.push(GraphDiagnostic::DanglingEdge {
                        from: dep.predecessor.clone(),
                        to: dep.successor.clone(),
                    });
                }
                ok
            })
            .cloned()
            .collect();

        let (graph, mut cycle_diags) = Self::assemble(snapshot, edges);
        diagnostics.append(&mut cycle_diags);
        (graph, diagnostics)
    }

    /// Shared assembly: drops cycle-forming edges (lex-largest first) until
    /// Kahn covers every node, reporting each drop.
    fn assemble(
        snapshot: &PlanSnapshot,
        mut edges: Vec<Dependency>,
    ) -> (Self, Vec<GraphDiagnostic>) {
        let mut node_ids: Vec<TaskId> = snapshot.tasks.iter().map(|t| t.id.clone()).collect();
        node_ids.sort_unstable();

        let mut diagnostics = Vec::new();
        loop {
            match kahn_order(&node_ids, &edges) {
                Ok(topo_order) => {
                    let mut successors: HashMap<TaskId, Vec<Edge>> = HashMap::new();
                    let mut predecessors: HashMap<TaskId, Vec<Edge>> = HashMap::new();
                    for id in &node_ids {
                        successors.insert(id.clone(), Vec::new());
                        predecessors.insert(id.clone(), Vec::new());
                    }
                    for dep in &edges {
                        let edge = Edge {
                            from: dep.predecessor.clone(),
                            to: dep.successor.clone(),
                            dep_type: dep.dep_type,
                        };
                        successors
                            .get_mut(&dep.predecessor)
                            .expect("endpoints validated")
                            .push(edge.clone());
                        predecessors
                            .get_mut(&dep.successor)
                            .expect("endpoints validated")
                            .push(edge);
                    }
                    // Deterministic adjacency iteration.
                    for list in successors.values_mut() {
                        list.sort_by(|a, b| a.to.cmp(&b.to));
                    }
                    for list in predecessors.values_mut() {
                        list.sort_by(|a, b| a.from.cmp(&b.from));
                    }
                    return (
                        Self {
                            node_ids,
                            successors,
                            predecessors,
                            topo_order,
                        },
                        diagnostics,
                    );
                }
                Err(residual) => {
                    // Drop the lex-largest edge inside the residual
                    // (cyclic) subgraph and retry.
                    let residual: BTreeSet<&TaskId> = residual.iter().collect();
                    let victim = edges
                        .iter()
                        .enumerate()
                        .filter(|(_, d)| {
                            residual.contains(&d.predecessor) && residual.contains(&d.successor)
                        })
                        .max_by(|(_, a), (_, b)| {
                            (&a.predecessor, &a.successor).cmp(&(&b.predecessor, &b.successor))
                        })
                        .map(|(i, _)| i);
                    match victim {
                        Some(i) => {
                            let dropped = edges.remove(i);
                            diagnostics.push(GraphDiagnostic::CycleEdgeExcluded {
                                from: dropped.predecessor,
                                to: dropped.successor,
                            });
                        }
                        // Residual without an internal edge cannot happen in
                        // a real cycle; bail out rather than spin.
                        None => {
                            let order = node_ids.clone();
                            return (
                                Self {
                                    node_ids: order.clone(),
                                    successors: HashMap::new(),
                                    predecessors: HashMap::new(),
                                    topo_order: order,
                                },
                                diagnostics,
                            );
                        }
                    }
                }
            }
        }
    }

    pub fn successor_edges(&self, task_id: &str) -> &[Edge] {
        self.successors.get(task_id).map_or(&[], Vec::as_slice)
    }

    pub fn predecessor_edges(&self, task_id: &str) -> &[Edge] {
        self.predecessors.get(task_id).map_or(&[], Vec::as_slice)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.successors.contains_key(task_id)
    }

    /// Transitive successors of a task (the task itself excluded).
    pub fn downstream_closure(&self, task_id: &str) -> BTreeSet<TaskId> {
        self.closure(task_id, |g, id| g.successor_edges(id).iter().map(|e| &e.to))
    }

    /// Transitive predecessors of a task (the task itself excluded).
    pub fn upstream_closure(&self, task_id: &str) -> BTreeSet<TaskId> {
        self.closure(task_id, |g, id| {
            g.predecessor_edges(id).iter().map(|e| &e.from)
        })
    }

    fn closure<'a, I, F>(&'a self, task_id: &str, neighbours: F) -> BTreeSet<TaskId>
    where
        F: Fn(&'a Self, &str) -> I,
        I: Iterator<Item = &'a TaskId>,
    {
        let mut seen: BTreeSet<TaskId> = BTreeSet::new();
        let mut queue: VecDeque<TaskId> = VecDeque::new();
        queue.push_back(task_id.to_string());
        while let Some(current) = queue.pop_front() {
            for next in neighbours(self, &current) {
                if seen.insert(next.clone()) {
                    queue.push_back(next.clone());
                }
            }
        }
        seen.remove(task_id);
        seen
    }

    /// Whether adding `from -> to` would create a cycle: true iff `from` is
    /// reachable from `to`.
    pub fn would_cycle(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        self.downstream_closure(to).contains(from)
    }
}

/// Kahn's algorithm with an ordered ready set. Returns the residual node set
/// on failure (the nodes involved in at least one cycle).
fn kahn_order(node_ids: &[TaskId], edges: &[Dependency]) -> std::result::Result<Vec<TaskId>, Vec<TaskId>> {
    let mut in_degree: BTreeMap<&TaskId, usize> = node_ids.iter().map(|id| (id, 0)).collect();
    let mut successors: BTreeMap<&TaskId, Vec<&TaskId>> = BTreeMap::new();
    for dep in edges {
        *in_degree.entry(&dep.successor).or_insert(0) += 1;
        successors
            .entry(&dep.predecessor)
            .or_default()
            .push(&dep.successor);
    }

    // Ordered ready set: the smallest ready id is always scheduled next.
    let mut ready: BTreeSet<&TaskId> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut order: Vec<TaskId> = Vec::with_capacity(node_ids.len());
    while let Some(id) = ready.pop_first() {
        order.push(id.clone());
        if let Some(succs) = successors.get(id) {
            for &succ in succs {
                let deg = in_degree.get_mut(succ).expect("all nodes registered");
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(succ);
                }
            }
        }
    }

    if order.len() == node_ids.len() {
        Ok(order)
    } else {
        let placed: BTreeSet<&TaskId> = order.iter().collect();
        Err(node_ids
            .iter()
            .filter(|id| !placed.contains(id))
            .cloned()
            .collect())
    }
}

/// Nodes participating in cycles, for error reporting.
fn cycle_nodes(snapshot: &PlanSnapshot) -> Vec<TaskId> {
    let node_ids: Vec<TaskId> = snapshot.tasks.iter().map(|t| t.id.clone()).collect();
    match kahn_order(&node_ids, &snapshot.dependencies) {
        Ok(_) => Vec::new(),
        Err(residual) => residual,
    }
}
