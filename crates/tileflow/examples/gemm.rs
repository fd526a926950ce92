use anyhow::Result;
use tileflow::codegen::collect_block_transfers;
use tileflow::{
    render, render_declarations, AccessMap, AttachedEdge, Block, Edge, Graph, IterVarRef,
    IterationVar, Layout, Node, RenderOptions, Tensor, TensorRef, Tier,
};

// 64x64x64 GEMM: the global block walks K in 16-wide slabs, the register
// block walks 16x16 output tiles of each slab.
fn main() -> Result<()> {
    env_logger::init();

    let k = IterationVar::new("k", 0..4)?;
    let i = IterationVar::new("i", 0..4)?;
    let j = IterationVar::new("j", 0..4)?;

    let g_a = tile("gA", [64, 64], Tier::Global)?;
    let g_b = tile("gB", [64, 64], Tier::Global)?;
    let g_c = tile("gC", [64, 64], Tier::Global)?;
    let s_a = tile("sA", [64, 16], Tier::Shared)?;
    let s_b = tile("sB", [16, 64], Tier::Shared)?;
    let s_c = tile("sC", [64, 64], Tier::Shared)?;
    let r_a = tile("rA", [16, 16], Tier::Register)?;
    let r_b = tile("rB", [16, 16], Tier::Register)?;
    let r_c = tile("rC", [16, 16], Tier::Register)?;

    let a = Node::tensor(&r_a);
    let b = Node::tensor(&r_b);
    let acc = Node::tensor(&r_c);
    let gemm = Node::gemm(&a, &b, &acc)?;
    let mut register_graph = Graph::new();
    register_graph.add_nodes([&a, &b, &acc, &gemm])?;
    register_graph.add_edges([
        Edge::new(&a, &gemm),
        Edge::new(&b, &gemm),
        Edge::new(&gemm, &acc),
    ])?;
    register_graph.connect()?;

    let output_tile = AccessMap::new(
        vec![0, 1],
        vec![vec![1, 0], vec![0, 1]],
        vec![0, 0],
        vec![i.clone(), j.clone()],
    )?;
    let register_block = Block::new(
        vec![
            AttachedEdge::new(&s_a, &r_a, along(0, &i)?)?,
            AttachedEdge::new(&s_b, &r_b, along(1, &j)?)?,
        ],
        register_graph,
        vec![AttachedEdge::new(&r_c, &s_c, output_tile)?],
        vec![i, j],
    )?;

    let mut shared_graph = Graph::new();
    shared_graph.add_node(&Node::block(register_block))?;
    shared_graph.connect()?;

    let kernel = Block::new(
        vec![
            AttachedEdge::new(&g_a, &s_a, along(1, &k)?)?,
            AttachedEdge::new(&g_b, &s_b, along(0, &k)?)?,
        ],
        shared_graph,
        vec![AttachedEdge::new(&s_c, &g_c, AccessMap::bulk())?],
        vec![k],
    )?;

    let instructions = kernel.codegen()?;
    let plan = kernel.allocate_var()?;
    print!(
        "{}",
        render_declarations(&plan, &collect_block_transfers(&kernel))
    );
    println!();
    print!("{}", render(&instructions, &RenderOptions::default()));
    println!();
    println!("{}", plan.to_json_string()?);
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
