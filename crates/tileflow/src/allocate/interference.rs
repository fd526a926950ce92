//! Storage conflicts that emission order alone cannot see.
//!
//! Codegen serializes every graph, so two branches with no path between them
//! come out one after the other even though either could run first. Here each
//! graph of the hierarchy is checked on its own: a tensor is attributed to the
//! nodes that reference it, and two tensors may only share storage when every
//! reference of one reaches every reference of the other.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};

use crate::dataflow::{AttachedEdge, Block, Graph, NodeId, NodeKind, NodeRef};
use crate::error::FlowResult;
use crate::walk::{walk_block, EdgeRole, GraphVisitor};

#[derive(Debug, Default)]
pub(crate) struct Interference {
    conflicts: HashSet<(String, String)>,
    /// Last instruction position each graph output has to survive to.
    pub(crate) sink_ends: HashMap<String, usize>,
}

impl Interference {
    pub(crate) fn conflicts(&self, a: &str, b: &str) -> bool {
        self.conflicts.contains(&pair(a, b))
    }

    fn insert(&mut self, a: &str, b: &str) {
        if a != b && self.conflicts.insert(pair(a, b)) {
            trace!("{a} and {b} are referenced by unordered nodes");
        }
    }

    fn keep_sink(&mut self, name: &str, end: usize) {
        let slot = self.sink_ends.entry(name.to_string()).or_insert(end);
        *slot = (*slot).max(end);
    }
}

fn pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

pub(crate) fn analyze_graph(graph: &Graph) -> FlowResult<Interference> {
    let mut out = Interference::default();
    let end = graph_len(graph).saturating_sub(1);
    scan_graph(graph, 0, end, &HashSet::new(), &mut out)?;
    debug!(
        "interference: {} unordered pairs, {} graph outputs",
        out.conflicts.len(),
        out.sink_ends.len()
    );
    Ok(out)
}

pub(crate) fn analyze_block(block: &Block) -> FlowResult<Interference> {
    let mut out = Interference::default();
    scan_block(block, 0, &mut out)?;
    debug!(
        "interference: {} unordered pairs, {} graph outputs",
        out.conflicts.len(),
        out.sink_ends.len()
    );
    Ok(out)
}

/// A node referencing a tensor. References from inside a block node are
/// ordered by the graphs nested in that block, not by this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Site {
    node: usize,
    nested: bool,
}

fn scan_block(block: &Block, start: usize, out: &mut Interference) -> FlowResult<()> {
    let end = (start + block_len(block)).saturating_sub(1);
    let body_start = start + block.loads().len() + block.iteration_vars().len();
    let stored: HashSet<&str> = block
        .stores()
        .iter()
        .map(|edge| edge.source().name())
        .collect();
    scan_graph(block.body(), body_start, end, &stored, out)
}

/// `start` is the position of the graph's first instruction and `scope_end`
/// the last position of the scope its outputs must survive.
fn scan_graph(
    graph: &Graph,
    start: usize,
    scope_end: usize,
    stored: &HashSet<&str>,
    out: &mut Interference,
) -> FlowResult<()> {
    let nodes = graph.nodes();
    let position: HashMap<NodeId, usize> = nodes
        .iter()
        .enumerate()
        .map(|(idx, node)| (node.id(), idx))
        .collect();
    let mut successors = vec![Vec::new(); nodes.len()];
    for edge in graph.edges() {
        if let (Some(from), Some(to)) = (
            position.get(&edge.from().id()),
            position.get(&edge.to().id()),
        ) {
            successors[*from].push(*to);
        }
    }
    let order: Vec<&NodeRef> = graph.topological_order()?;
    let order: Vec<usize> = order
        .iter()
        .filter_map(|node| position.get(&node.id()).copied())
        .collect();
    let reach = reachability(&order, &successors);

    let mut sites: Vec<(String, Vec<Site>)> = Vec::new();
    for (idx, node) in nodes.iter().enumerate() {
        let direct = Site {
            node: idx,
            nested: false,
        };
        match node.kind() {
            NodeKind::Tensor(tensor) => {
                add_site(&mut sites, tensor.name(), direct);
                if successors[idx].is_empty() && !stored.contains(tensor.name()) {
                    out.keep_sink(tensor.name(), scope_end);
                }
            }
            NodeKind::Compute { operands, .. } => {
                for tensor in operands.iter().filter_map(|operand| operand.as_tensor()) {
                    add_site(&mut sites, tensor.name(), direct);
                }
            }
            NodeKind::Block(block) => {
                let mut names = TensorNames::default();
                walk_block(block, &mut names);
                let nested = Site {
                    node: idx,
                    nested: true,
                };
                for name in &names.0 {
                    add_site(&mut sites, name, nested);
                }
            }
        }
    }

    for (idx, (left, left_sites)) in sites.iter().enumerate() {
        for (right, right_sites) in &sites[idx + 1..] {
            let ordered = precedes(&reach, left_sites, right_sites)
                || precedes(&reach, right_sites, left_sites);
            if !ordered {
                out.insert(left, right);
            }
        }
    }

    let mut pos = start;
    for idx in order {
        match nodes[idx].kind() {
            NodeKind::Tensor(_) => {}
            NodeKind::Compute { .. } => pos += 1,
            NodeKind::Block(block) => {
                scan_block(block, pos, out)?;
                pos += block_len(block);
            }
        }
    }
    Ok(())
}

fn add_site(sites: &mut Vec<(String, Vec<Site>)>, name: &str, site: Site) {
    match sites.iter_mut().find(|(seen, _)| seen == name) {
        Some((_, list)) if !list.contains(&site) => list.push(site),
        Some(_) => {}
        None => sites.push((name.to_string(), vec![site])),
    }
}

/// Whether every reference in `before` reaches every reference in `after`.
fn precedes(reach: &[Vec<bool>], before: &[Site], after: &[Site]) -> bool {
    before.iter().all(|first| {
        after.iter().all(|second| {
            (first.node == second.node && first.nested && second.nested)
                || reach[first.node][second.node]
        })
    })
}

/// `reach[u][v]` is true when a non-empty path leads from `u` to `v`.
fn reachability(order: &[usize], successors: &[Vec<usize>]) -> Vec<Vec<bool>> {
    let count = successors.len();
    let mut reach = vec![vec![false; count]; count];
    for &node in order.iter().rev() {
        for &next in &successors[node] {
            let below = reach[next].clone();
            let row = &mut reach[node];
            row[next] = true;
            for (target, reachable) in below.into_iter().enumerate() {
                row[target] |= reachable;
            }
        }
    }
    reach
}

/// Instructions a block expands to; matches what codegen emits for it.
fn block_len(block: &Block) -> usize {
    block.loads().len()
        + block.stores().len()
        + 2 * block.iteration_vars().len()
        + graph_len(block.body())
}

fn graph_len(graph: &Graph) -> usize {
    graph
        .nodes()
        .iter()
        .map(|node| match node.kind() {
            NodeKind::Tensor(_) => 0,
            NodeKind::Compute { .. } => 1,
            NodeKind::Block(block) => block_len(block),
        })
        .sum()
}

/// Every tensor name inside a block, in walk order.
#[derive(Default)]
struct TensorNames(Vec<String>);

impl TensorNames {
    fn add(&mut self, name: &str) {
        if !self.0.iter().any(|seen| seen == name) {
            self.0.push(name.to_string());
        }
    }
}

impl GraphVisitor for TensorNames {
    fn on_node(&mut self, _graph: &Graph, node: &NodeRef) {
        if let Some(tensor) = node.as_tensor() {
            self.add(tensor.name());
        }
    }

    fn on_attached_edge(&mut self, _block: &Block, _role: EdgeRole, edge: &AttachedEdge) {
        self.add(edge.source().name());
        self.add(edge.dest().name());
    }
}

#[cfg(test)]
mod tests {
    use super::reachability;

    #[test]
    fn reachability_follows_paths_not_just_edges() {
        // 0 -> 1 -> 2, 3 on its own
        let successors = vec![vec![1], vec![2], Vec::new(), Vec::new()];
        let reach = reachability(&[0, 3, 1, 2], &successors);
        assert!(reach[0][2]);
        assert!(reach[1][2]);
        assert!(!reach[2][0]);
        assert!(!reach[0][3] && !reach[3][0]);
        assert!(!reach[0][0]);
    }
}
