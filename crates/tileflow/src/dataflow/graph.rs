use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use log::debug;

use crate::allocate::{self, AllocateOptions, AllocationPlan};
use crate::codegen::{self, Instruction};
use crate::dataflow::edge::Edge;
use crate::dataflow::node::{NodeId, NodeKind, NodeRef};
use crate::error::{FlowError, FlowResult};
use crate::tensor::TensorRef;

/// Dependency graph over nodes of one tier.
///
/// Nodes and edges are appended; [`Graph::connect`] validates the whole graph
/// and fixes a deterministic topological order that every later pass follows.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<NodeRef>,
    index: HashMap<NodeId, usize>,
    edges: Vec<Edge>,
    order: Option<Vec<usize>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: &NodeRef) -> FlowResult<()> {
        if self.index.contains_key(&node.id()) {
            return Err(FlowError::DuplicateNode { node: node.label() });
        }
        if let Some(tensor) = node.as_tensor() {
            let clash = self
                .nodes
                .iter()
                .filter_map(|existing| existing.as_tensor())
                .any(|existing| existing.name() == tensor.name());
            if clash {
                return Err(FlowError::DuplicateNode { node: node.label() });
            }
        }
        self.index.insert(node.id(), self.nodes.len());
        self.nodes.push(Arc::clone(node));
        self.order = None;
        Ok(())
    }

    pub fn add_nodes<'a>(&mut self, nodes: impl IntoIterator<Item = &'a NodeRef>) -> FlowResult<()> {
        for node in nodes {
            self.add_node(node)?;
        }
        Ok(())
    }

    pub fn add_edge(&mut self, edge: Edge) -> FlowResult<()> {
        for end in [edge.from(), edge.to()] {
            if !self.index.contains_key(&end.id()) {
                return Err(FlowError::DanglingEdge {
                    from: edge.from().label(),
                    to: edge.to().label(),
                    missing: end.label(),
                });
            }
        }
        self.edges.push(edge);
        self.order = None;
        Ok(())
    }

    pub fn add_edges(&mut self, edges: impl IntoIterator<Item = Edge>) -> FlowResult<()> {
        for edge in edges {
            self.add_edge(edge)?;
        }
        Ok(())
    }

    /// Validates the graph and computes its topological order.
    ///
    /// Ready nodes are taken in insertion order, so identically built graphs
    /// always produce the same order.
    pub fn connect(&mut self) -> FlowResult<()> {
        self.order = None;
        for edge in &self.edges {
            if let (Some(from), Some(to)) = (edge.from().as_tensor(), edge.to().as_tensor()) {
                if from.tier() != to.tier() {
                    return Err(FlowError::TierMismatch {
                        from: from.name().to_string(),
                        from_tier: from.tier(),
                        to: to.name().to_string(),
                        to_tier: to.tier(),
                    });
                }
            }
        }
        self.check_operands_linked()?;

        let count = self.nodes.len();
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut in_degree = vec![0usize; count];
        for edge in &self.edges {
            let from = self.position(edge.from())?;
            let to = self.position(edge.to())?;
            successors[from].push(to);
            in_degree[to] += 1;
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|idx| in_degree[*idx] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(current) = ready.pop_first() {
            order.push(current);
            for next in &successors[current] {
                in_degree[*next] -= 1;
                if in_degree[*next] == 0 {
                    ready.insert(*next);
                }
            }
        }
        if order.len() < count {
            let nodes = (0..count)
                .filter(|idx| in_degree[*idx] > 0)
                .map(|idx| self.nodes[idx].label())
                .collect();
            return Err(FlowError::Cycle { nodes });
        }

        debug!(
            "graph connected: {}",
            order
                .iter()
                .map(|idx| self.nodes[*idx].label())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        self.order = Some(order);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.order.is_some()
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn topological_order(&self) -> FlowResult<Vec<&NodeRef>> {
        let order = self.order.as_ref().ok_or(FlowError::NotConnected {
            operation: "topological ordering",
        })?;
        Ok(order.iter().map(|idx| &self.nodes[*idx]).collect())
    }

    /// Instruction sequence for this graph; block nodes expand to their loop
    /// nests at their topological position.
    pub fn codegen(&self) -> FlowResult<Vec<Instruction>> {
        if !self.is_connected() {
            return Err(FlowError::NotConnected { operation: "codegen" });
        }
        let mut out = Vec::new();
        codegen::emit_graph(self, &mut out)?;
        Ok(out)
    }

    pub fn allocate_var(&self) -> FlowResult<AllocationPlan> {
        self.allocate_var_with(&AllocateOptions::default())
    }

    pub fn allocate_var_with(&self, options: &AllocateOptions) -> FlowResult<AllocationPlan> {
        if !self.is_connected() {
            return Err(FlowError::NotConnected {
                operation: "allocation",
            });
        }
        let instructions = self.codegen()?;
        allocate::allocate_graph(self, &instructions, options)
    }

    /// Tensors reachable by name from an enclosing block: tensor nodes plus
    /// the outward endpoints of nested blocks.
    pub(crate) fn visible_tensors(&self) -> Vec<&TensorRef> {
        let mut visible = Vec::new();
        for node in &self.nodes {
            match node.kind() {
                NodeKind::Tensor(tensor) => visible.push(tensor),
                NodeKind::Block(block) => {
                    visible.extend(block.loads().iter().map(|edge| edge.source()));
                    visible.extend(block.stores().iter().map(|edge| edge.dest()));
                }
                NodeKind::Compute { .. } => {}
            }
        }
        visible
    }

    fn position(&self, node: &NodeRef) -> FlowResult<usize> {
        self.index
            .get(&node.id())
            .copied()
            .ok_or_else(|| FlowError::DanglingEdge {
                from: node.label(),
                to: node.label(),
                missing: node.label(),
            })
    }

    fn check_operands_linked(&self) -> FlowResult<()> {
        for node in &self.nodes {
            let NodeKind::Compute { op, operands } = node.kind() else {
                continue;
            };
            for operand in operands {
                let linked = self.index.contains_key(&operand.id())
                    && self.edges.iter().any(|edge| {
                        (edge.from().id() == operand.id() && edge.to().id() == node.id())
                            || (edge.from().id() == node.id() && edge.to().id() == operand.id())
                    });
                if !linked {
                    return Err(FlowError::UnlinkedOperand {
                        op: op.name().to_string(),
                        operand: operand.label(),
                    });
                }
            }
        }
        Ok(())
    }
}
