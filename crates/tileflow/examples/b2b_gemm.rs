use anyhow::Result;
use tileflow::{
    expand, render, AccessMap, AttachedEdge, Block, Edge, Graph, IterVarRef, IterationVar, Layout,
    Node, RenderOptions, Tensor, TensorRef, TraceEvent, Tier,
};

// D = (A x B) x E over 16-row tiles. The first register block reduces over
// K into rC and parks it in shared memory; the second reloads it and sweeps
// the columns of E.
fn main() -> Result<()> {
    env_logger::init();

    let k = IterationVar::new("k", 0..4)?;
    let n = IterationVar::new("n", 0..4)?;

    let g_a = tile("gA", [16, 64], Tier::Global)?;
    let g_b = tile("gB", [64, 16], Tier::Global)?;
    let g_e = tile("gE", [16, 64], Tier::Global)?;
    let g_d = tile("gD", [16, 64], Tier::Global)?;
    let s_a = tile("sA", [16, 64], Tier::Shared)?;
    let s_b = tile("sB", [64, 16], Tier::Shared)?;
    let s_c = tile("sC", [16, 16], Tier::Shared)?;
    let s_e = tile("sE", [16, 64], Tier::Shared)?;
    let s_d = tile("sD", [16, 64], Tier::Shared)?;

    let first = Block::new(
        vec![
            AttachedEdge::new(&s_a, &tile("rA", [16, 16], Tier::Register)?, along(1, &k)?)?,
            AttachedEdge::new(&s_b, &tile("rB", [16, 16], Tier::Register)?, along(0, &k)?)?,
        ],
        gemm_graph("rA", "rB", "rC")?,
        vec![AttachedEdge::new(
            &tile("rC", [16, 16], Tier::Register)?,
            &s_c,
            AccessMap::bulk(),
        )?],
        vec![k],
    )?;
    let second = Block::new(
        vec![
            AttachedEdge::new(&s_c, &tile("rP", [16, 16], Tier::Register)?, AccessMap::bulk())?,
            AttachedEdge::new(&s_e, &tile("rE", [16, 16], Tier::Register)?, along(1, &n)?)?,
        ],
        gemm_graph("rP", "rE", "rD")?,
        vec![AttachedEdge::new(
            &tile("rD", [16, 16], Tier::Register)?,
            &s_d,
            along(1, &n)?,
        )?],
        vec![n],
    )?;

    let first = Node::block(first);
    let second = Node::block(second);
    let mut shared_graph = Graph::new();
    shared_graph.add_nodes([&first, &second])?;
    shared_graph.add_edge(Edge::new(&first, &second))?;
    shared_graph.connect()?;

    let kernel = Block::new(
        vec![
            AttachedEdge::new(&g_a, &s_a, AccessMap::bulk())?,
            AttachedEdge::new(&g_b, &s_b, AccessMap::bulk())?,
            AttachedEdge::new(&g_e, &s_e, AccessMap::bulk())?,
        ],
        shared_graph,
        vec![AttachedEdge::new(&s_d, &g_d, AccessMap::bulk())?],
        Vec::new(),
    )?;

    let instructions = kernel.codegen()?;
    print!("{}", render(&instructions, &RenderOptions::default()));

    let gemms = expand(&instructions)?
        .iter()
        .filter(|event| matches!(event, TraceEvent::Compute { .. }))
        .count();
    println!("\nexecuted gemms: {gemms}");

    for alloc in kernel.allocate_var()?.iter() {
        println!(
            "{:<3} {:<8} offset {:>5} size {:>5} live {}..={}",
            alloc.name,
            alloc.tier.to_string(),
            alloc.offset,
            alloc.size,
            alloc.live_range.start,
            alloc.live_range.end
        );
    }
    Ok(())
}

fn tile(name: &str, shape: [usize; 2], tier: Tier) -> Result<TensorRef> {
    Ok(Tensor::new(name, shape.to_vec(), Layout::RowMajor, tier)?)
}

fn along(dim: usize, var: &IterVarRef) -> Result<AccessMap> {
    Ok(AccessMap::new(
        vec![dim],
        vec![vec![1]],
        vec![0],
        vec![var.clone()],
    )?)
}

fn gemm_graph(a: &str, b: &str, acc: &str) -> Result<Graph> {
    let a = Node::tensor(&tile(a, [16, 16], Tier::Register)?);
    let b = Node::tensor(&tile(b, [16, 16], Tier::Register)?);
    let acc = Node::tensor(&tile(acc, [16, 16], Tier::Register)?);
    let gemm = Node::gemm(&a, &b, &acc)?;
    let mut graph = Graph::new();
    graph.add_nodes([&a, &b, &acc, &gemm])?;
    graph.add_edges([
        Edge::new(&a, &gemm),
        Edge::new(&b, &gemm),
        Edge::new(&gemm, &acc),
    ])?;
    graph.connect()?;
    Ok(graph)
}
