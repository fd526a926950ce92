use crate::dataflow::{AttachedEdge, Block, Graph, NodeRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeRole {
    Load,
    Store,
}

/// Read-only visitor over a graph/block hierarchy in insertion order.
pub trait GraphVisitor {
    fn on_graph(&mut self, _graph: &Graph) {}
    fn on_node(&mut self, _graph: &Graph, _node: &NodeRef) {}
    fn on_block(&mut self, _block: &Block) {}
    fn on_attached_edge(&mut self, _block: &Block, _role: EdgeRole, _edge: &AttachedEdge) {}
}

pub fn walk_graph<V: GraphVisitor + ?Sized>(graph: &Graph, visitor: &mut V) {
    visitor.on_graph(graph);
    for node in graph.nodes() {
        visitor.on_node(graph, node);
        if let Some(block) = node.as_block() {
            walk_block(block, visitor);
        }
    }
}

pub fn walk_block<V: GraphVisitor + ?Sized>(block: &Block, visitor: &mut V) {
    visitor.on_block(block);
    for edge in block.loads() {
        visitor.on_attached_edge(block, EdgeRole::Load, edge);
    }
    walk_graph(block.body(), visitor);
    for edge in block.stores() {
        visitor.on_attached_edge(block, EdgeRole::Store, edge);
    }
}
