//! Dependency Graph (L2, §4.2). Owns the cells→(reads,writes) map, the
//! last-writer-wins `writer_of` map, and the derived `edges`. Invariants
//! G1 (acyclic), G2 (writer consistency), G3 (reads→edges) are maintained
//! by rebuilding edges from the source maps on every mutation rather than
//! attempting incremental patching — this trades a little CPU (irrelevant
//! at notebook-cell scale) for eliminating an entire class of partial-
//! mutation bugs, matching §9's own preference for dry-run over rollback.

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

pub type CellId = String;

#[derive(Debug, Clone)]
struct CellRecord {
    reads: BTreeSet<String>,
    writes: BTreeSet<String>,
    registration_order: u64,
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    cells: HashMap<CellId, CellRecord>,
    writer_of: HashMap<String, CellId>,
    graph: DiGraph<CellId, ()>,
    node_indices: HashMap<CellId, NodeIndex>,
    next_registration_order: u64,
}

/// Outcome of a cycle dry-run: either the update is safe, or it would close
/// a cycle through the given path (`a -> b -> ... -> a`).
pub enum CycleCheck {
    Ok,
    WouldCycle(Vec<CellId>),
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure function: computes the edge set as if `(cell_id, reads, writes)`
    /// were applied, and reports whether a directed cycle would result.
    /// Does not mutate any state.
    pub fn would_create_cycle(
        &self,
        cell_id: &str,
        reads: &BTreeSet<String>,
        writes: &BTreeSet<String>,
    ) -> CycleCheck {
        let mut shadow_writer_of = self.writer_of.clone();
        shadow_writer_of.retain(|_, owner| owner != cell_id);
        for v in writes {
            shadow_writer_of.insert(v.clone(), cell_id.to_string());
        }

        let mut shadow_cells: HashMap<&str, (&BTreeSet<String>, &BTreeSet<String>)> = self
            .cells
            .iter()
            .map(|(id, rec)| (id.as_str(), (&rec.reads, &rec.writes)))
            .collect();
        shadow_cells.insert(cell_id, (reads, writes));

        let (graph, indices) = build_graph(&shadow_cells, &shadow_writer_of);
        find_cycle_through(&graph, &indices, cell_id)
    }

    /// Mutates the graph to reflect `(cell_id, reads, writes)`.
    /// Precondition: `would_create_cycle` returned `CycleCheck::Ok` for the
    /// same arguments. Returns diagnostics (non-blocking notes about
    /// variables whose producer shifted away from another cell).
    pub fn update_cell(
        &mut self,
        cell_id: &str,
        reads: BTreeSet<String>,
        writes: BTreeSet<String>,
    ) -> Vec<String> {
        let registration_order = match self.cells.get(cell_id) {
            Some(existing) => existing.registration_order,
            None => {
                let order = self.next_registration_order;
                self.next_registration_order += 1;
                order
            }
        };

        let mut diagnostics = Vec::new();
        self.writer_of.retain(|_, owner| owner != cell_id);
        for v in &writes {
            if let Some(previous) = self.writer_of.insert(v.clone(), cell_id.to_string()) {
                if previous != cell_id {
                    diagnostics.push(format!(
                        "{v} is now produced by {cell_id} (was {previous})"
                    ));
                }
            }
        }

        self.cells.insert(
            cell_id.to_string(),
            CellRecord {
                reads,
                writes,
                registration_order,
            },
        );

        self.recompute_edges();
        diagnostics
    }

    /// Strips the cell from all maps. Namespace bindings are untouched —
    /// see the Open Question decision in DESIGN.md.
    pub fn remove_cell(&mut self, cell_id: &str) {
        self.cells.remove(cell_id);
        self.writer_of.retain(|_, owner| owner != cell_id);
        self.recompute_edges();
    }

    pub fn contains(&self, cell_id: &str) -> bool {
        self.cells.contains_key(cell_id)
    }

    pub fn reads_writes(&self, cell_id: &str) -> Option<(Vec<String>, Vec<String>)> {
        self.cells
            .get(cell_id)
            .map(|r| (r.reads.iter().cloned().collect(), r.writes.iter().cloned().collect()))
    }

    /// Root plus its transitive descendants in `edges`, topologically
    /// ordered with ties broken by registration order (stable).
    pub fn cascade_order(&self, root: &str) -> Vec<CellId> {
        if !self.node_indices.contains_key(root) {
            return vec![root.to_string()];
        }

        let reachable = self.reachable_from(root);

        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
        for &idx in &reachable {
            in_degree.insert(idx, 0);
        }
        for &idx in &reachable {
            for succ in self.graph.neighbors(idx) {
                if reachable.contains(&succ) {
                    *in_degree.get_mut(&succ).unwrap() += 1;
                }
            }
        }

        let mut order = Vec::with_capacity(reachable.len());
        let mut frontier: Vec<NodeIndex> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&idx, _)| idx)
            .collect();

        while !frontier.is_empty() {
            frontier.sort_by_key(|&idx| self.registration_order_of(idx));
            let mut next_frontier = Vec::new();
            for idx in frontier.drain(..) {
                order.push(self.graph[idx].clone());
                for succ in self.graph.neighbors(idx) {
                    if let Some(deg) = in_degree.get_mut(&succ) {
                        *deg -= 1;
                        if *deg == 0 {
                            next_frontier.push(succ);
                        }
                    }
                }
            }
            frontier = next_frontier;
        }

        order
    }

    pub fn direct_dependencies(&self, cell_id: &str) -> Vec<CellId> {
        let Some(&idx) = self.node_indices.get(cell_id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, petgraph::Direction::Incoming)
            .map(|n| self.graph[n].clone())
            .collect()
    }

    pub fn direct_dependents(&self, cell_id: &str) -> Vec<CellId> {
        let Some(&idx) = self.node_indices.get(cell_id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, petgraph::Direction::Outgoing)
            .map(|n| self.graph[n].clone())
            .collect()
    }

    fn registration_order_of(&self, idx: NodeIndex) -> u64 {
        let id = &self.graph[idx];
        self.cells
            .get(id)
            .map(|r| r.registration_order)
            .unwrap_or(u64::MAX)
    }

    fn reachable_from(&self, root: &str) -> HashSet<NodeIndex> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        if let Some(&start) = self.node_indices.get(root) {
            visited.insert(start);
            queue.push_back(start);
        }
        while let Some(idx) = queue.pop_front() {
            for succ in self.graph.neighbors(idx) {
                if visited.insert(succ) {
                    queue.push_back(succ);
                }
            }
        }
        visited
    }

    fn recompute_edges(&mut self) {
        let view: HashMap<&str, (&BTreeSet<String>, &BTreeSet<String>)> = self
            .cells
            .iter()
            .map(|(id, rec)| (id.as_str(), (&rec.reads, &rec.writes)))
            .collect();
        let (graph, indices) = build_graph(&view, &self.writer_of);
        self.graph = graph;
        self.node_indices = indices;
    }
}

/// Builds a fresh petgraph from a cells view and a writer map. An edge
/// `producer -> consumer` exists per variable read whose writer is known,
/// excluding self-edges (§9 Open Question: self-writes are not cyclic).
fn build_graph(
    cells: &HashMap<&str, (&BTreeSet<String>, &BTreeSet<String>)>,
    writer_of: &HashMap<String, CellId>,
) -> (DiGraph<CellId, ()>, HashMap<CellId, NodeIndex>) {
    let mut graph = DiGraph::new();
    let mut indices = HashMap::new();
    for &id in cells.keys() {
        let idx = graph.add_node(id.to_string());
        indices.insert(id.to_string(), idx);
    }
    for (&consumer, (reads, _writes)) in cells {
        for v in *reads {
            if let Some(producer) = writer_of.get(v) {
                if producer != consumer {
                    if let (Some(&p_idx), Some(&c_idx)) =
                        (indices.get(producer.as_str()), indices.get(consumer))
                    {
                        graph.add_edge(p_idx, c_idx, ());
                    }
                }
            }
        }
    }
    (graph, indices)
}

fn find_cycle_through(
    graph: &DiGraph<CellId, ()>,
    indices: &HashMap<CellId, NodeIndex>,
    cell_id: &str,
) -> CycleCheck {
    let Some(&target) = indices.get(cell_id) else {
        return CycleCheck::Ok;
    };
    for scc in kosaraju_scc(graph) {
        if scc.len() > 1 && scc.contains(&target) {
            // Rotate so the path starts at cell_id and reads in edge order.
            let mut path: Vec<CellId> = Vec::with_capacity(scc.len() + 1);
            let start_pos = scc.iter().position(|&n| n == target).unwrap_or(0);
            for i in 0..scc.len() {
                path.push(graph[scc[(start_pos + i) % scc.len()]].clone());
            }
            path.push(graph[target].clone());
            return CycleCheck::WouldCycle(path);
        }
    }
    CycleCheck::Ok
}

impl CycleCheck {
    pub fn is_cycle(&self) -> bool {
        matches!(self, CycleCheck::WouldCycle(_))
    }

    /// Formats as `"a -> b -> ... -> a"` for user display (§4.2).
    pub fn describe(&self) -> Option<String> {
        match self {
            CycleCheck::Ok => None,
            CycleCheck::WouldCycle(path) => Some(path.join(" -> ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(reads: &[&str], writes: &[&str]) -> (BTreeSet<String>, BTreeSet<String>) {
        (
            reads.iter().map(|s| s.to_string()).collect(),
            writes.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn simple_chain_cascade_order() {
        let mut g = DependencyGraph::new();
        let (r, w) = deps(&[], &["x"]);
        g.update_cell("a", r, w);
        let (r, w) = deps(&["x"], &["y"]);
        g.update_cell("b", r, w);

        assert_eq!(g.cascade_order("a"), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn diamond_orders_join_after_both_branches() {
        let mut g = DependencyGraph::new();
        g.update_cell("a", BTreeSet::new(), BTreeSet::from(["x".to_string()]));
        g.update_cell(
            "b",
            BTreeSet::from(["x".to_string()]),
            BTreeSet::from(["y".to_string()]),
        );
        g.update_cell(
            "c",
            BTreeSet::from(["x".to_string()]),
            BTreeSet::from(["z".to_string()]),
        );
        g.update_cell(
            "d",
            BTreeSet::from(["y".to_string(), "z".to_string()]),
            BTreeSet::new(),
        );

        let order = g.cascade_order("a");
        let pos = |id: &str| order.iter().position(|c| c == id).unwrap();
        assert_eq!(order[0], "a");
        assert!(pos("d") > pos("b"));
        assert!(pos("d") > pos("c"));
    }

    #[test]
    fn cycle_is_rejected_and_graph_unchanged() {
        let mut g = DependencyGraph::new();
        g.update_cell(
            "a",
            BTreeSet::from(["y".to_string()]),
            BTreeSet::from(["x".to_string()]),
        );

        let (r, w) = deps(&["x"], &["y"]);
        let check = g.would_create_cycle("b", &r, &w);
        assert!(check.is_cycle());
        assert!(!g.contains("b"));
    }

    #[test]
    fn self_edge_is_not_cyclic() {
        let mut g = DependencyGraph::new();
        let (r, w) = deps(&["x"], &["x"]);
        let check = g.would_create_cycle("a", &r, &w);
        assert!(!check.is_cycle());
        g.update_cell("a", r, w);
        assert_eq!(g.cascade_order("a"), vec!["a".to_string()]);
    }

    #[test]
    fn last_writer_wins_updates_edges() {
        let mut g = DependencyGraph::new();
        g.update_cell("a", BTreeSet::new(), BTreeSet::from(["x".to_string()]));
        g.update_cell(
            "b",
            BTreeSet::from(["x".to_string()]),
            BTreeSet::new(),
        );
        assert_eq!(g.direct_dependencies("b"), vec!["a".to_string()]);

        // c steals x from a.
        let diagnostics =
            g.update_cell("c", BTreeSet::new(), BTreeSet::from(["x".to_string()]));
        assert!(!diagnostics.is_empty());
        assert_eq!(g.direct_dependencies("b"), vec!["c".to_string()]);
    }

    #[test]
    fn remove_cell_clears_edges() {
        let mut g = DependencyGraph::new();
        g.update_cell("a", BTreeSet::new(), BTreeSet::from(["x".to_string()]));
        g.update_cell(
            "b",
            BTreeSet::from(["x".to_string()]),
            BTreeSet::new(),
        );
        g.remove_cell("a");
        assert!(!g.contains("a"));
        assert!(g.direct_dependencies("b").is_empty());
    }
}
