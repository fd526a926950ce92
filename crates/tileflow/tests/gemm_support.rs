#![allow(dead_code)]

use std::ops::Range;

use tileflow::{
    AccessMap, AttachedEdge, Block, DType, Edge, Graph, IterVarRef, IterationVar, Layout, Node,
    NodeRef, Tensor, TensorRef, Tier,
};

pub fn tensor(name: &str, shape: &[usize], tier: Tier) -> TensorRef {
    Tensor::new(name, shape.to_vec(), Layout::RowMajor, tier).expect("valid tensor")
}

pub fn tensor_of(name: &str, shape: &[usize], tier: Tier, dtype: DType) -> TensorRef {
    Tensor::with_dtype(name, shape.to_vec(), Layout::RowMajor, tier, dtype).expect("valid tensor")
}

pub fn var(name: &str, range: Range<i64>) -> IterVarRef {
    IterationVar::new(name, range).expect("valid iteration var")
}

/// Access map walking dimension `dim` with a single loop variable.
pub fn along(dim: usize, var: &IterVarRef) -> AccessMap {
    AccessMap::new(vec![dim], vec![vec![1]], vec![0], vec![var.clone()]).expect("valid access map")
}

pub fn attach(source: &TensorRef, dest: &TensorRef, access: AccessMap) -> AttachedEdge {
    AttachedEdge::new(source, dest, access).expect("valid attached edge")
}

/// Connected `acc += a * b` graph over tensor nodes for the three tensors.
pub fn gemm_graph(a: &TensorRef, b: &TensorRef, acc: &TensorRef) -> Graph {
    let a = Node::tensor(a);
    let b = Node::tensor(b);
    let acc = Node::tensor(acc);
    let gemm = Node::gemm(&a, &b, &acc).expect("gemm operands");
    let mut graph = Graph::new();
    graph
        .add_nodes([&a, &b, &acc, &gemm])
        .expect("add gemm nodes");
    graph
        .add_edges([
            Edge::new(&a, &gemm),
            Edge::new(&b, &gemm),
            Edge::new(&gemm, &acc),
        ])
        .expect("add gemm edges");
    graph.connect().expect("connect gemm graph");
    graph
}

pub fn single_node_graph(node: &NodeRef) -> Graph {
    let mut graph = Graph::new();
    graph.add_node(node).expect("add node");
    graph.connect().expect("connect single node graph");
    graph
}

/// Register block over `i in [0, 1)` inside a shared graph, wrapped by a
/// global block over `k in [0, 1)`. All tiles are 16x16 f32.
pub fn nested_gemm() -> Block {
    let k = var("k", 0..1);
    let i = var("i", 0..1);

    let g_a = tensor("gA", &[16, 16], Tier::Global);
    let g_b = tensor("gB", &[16, 16], Tier::Global);
    let g_c = tensor("gC", &[16, 16], Tier::Global);
    let s_a = tensor("sA", &[16, 16], Tier::Shared);
    let s_b = tensor("sB", &[16, 16], Tier::Shared);
    let s_c = tensor("sC", &[16, 16], Tier::Shared);
    let r_a = tensor("rA", &[16, 16], Tier::Register);
    let r_b = tensor("rB", &[16, 16], Tier::Register);
    let r_c = tensor("rC", &[16, 16], Tier::Register);

    let register_block = Block::new(
        vec![
            attach(&s_a, &r_a, along(0, &i)),
            attach(&s_b, &r_b, along(0, &i)),
        ],
        gemm_graph(&r_a, &r_b, &r_c),
        vec![attach(&r_c, &s_c, along(0, &i))],
        vec![i],
    )
    .expect("register block");
    let shared_graph = single_node_graph(&Node::block(register_block));

    Block::new(
        vec![
            attach(&g_a, &s_a, along(0, &k)),
            attach(&g_b, &s_b, along(1, &k)),
        ],
        shared_graph,
        vec![attach(&s_c, &g_c, along(0, &k))],
        vec![k],
    )
    .expect("global block")
}

/// Bulk global block whose shared body converts `sA -> sB (f16) -> sC`.
pub fn convert_chain() -> Block {
    let g_a = tensor("gA", &[16, 16], Tier::Global);
    let g_c = tensor("gC", &[16, 16], Tier::Global);
    let s_a = Node::tensor(&tensor("sA", &[16, 16], Tier::Shared));
    let s_b = Node::tensor(&tensor_of("sB", &[16, 16], Tier::Shared, DType::F16));
    let s_c = Node::tensor(&tensor("sC", &[16, 16], Tier::Shared));
    let narrow = Node::convert(&s_a, &s_b).expect("narrowing convert");
    let widen = Node::convert(&s_b, &s_c).expect("widening convert");

    let mut body = Graph::new();
    body.add_nodes([&s_a, &s_b, &s_c, &narrow, &widen])
        .expect("add convert nodes");
    body.add_edges([
        Edge::new(&s_a, &narrow),
        Edge::new(&narrow, &s_b),
        Edge::new(&s_b, &widen),
        Edge::new(&widen, &s_c),
    ])
    .expect("add convert edges");
    body.connect().expect("connect convert chain");

    let s_a = s_a.as_tensor().expect("tensor node").clone();
    let s_c = s_c.as_tensor().expect("tensor node").clone();
    Block::new(
        vec![attach(&g_a, &s_a, AccessMap::bulk())],
        body,
        vec![attach(&s_c, &g_c, AccessMap::bulk())],
        Vec::new(),
    )
    .expect("convert block")
}
