mod gemm_support;

use gemm_support::{convert_chain, nested_gemm, single_node_graph};
use tileflow::codegen::{collect_block_transfers, collect_transfers};
use tileflow::{
    expand, instructions_to_json, render, render_declarations, FlowError, Instruction, Node,
    RenderOptions,
};

const NESTED_KERNEL: &str = "\
for (int k = 0; k < 1; ++k) {
    g2s_gA_sA(gA, sA, {k, 0});
    g2s_gB_sB(gB, sB, {0, k});
    __copy_async_wait();
    __syncthreads();
    for (int i = 0; i < 1; ++i) {
        s2r_sA_rA(sA, rA, {i, 0});
        s2r_sB_rB(sB, rB, {i, 0});
        __syncthreads();
        compute::gemm(rA, rB, rC);
        r2s_rC_sC(rC, sC, {i, 0});
        __syncthreads();
    }
    s2g_sC_gC(sC, gC, {k, 0});
}
";

#[test]
fn nested_kernel_renders_with_barriers() {
    let instructions = nested_gemm().codegen().expect("codegen succeeds");
    let text = render(&instructions, &RenderOptions::default());
    assert_eq!(text, NESTED_KERNEL);
}

#[test]
fn barriers_and_indent_are_configurable() {
    let instructions = nested_gemm().codegen().expect("codegen succeeds");
    let options = RenderOptions {
        indent_width: 2,
        emit_barriers: false,
    };
    let text = render(&instructions, &options);
    assert!(!text.contains("__syncthreads"));
    assert!(!text.contains("__copy_async_wait"));
    assert!(text.contains("\n    compute::gemm(rA, rB, rC);\n"));
}

#[test]
fn declarations_cover_storage_and_transfers() {
    let block = convert_chain();
    let plan = block.allocate_var().expect("allocation succeeds");
    let transfers = collect_block_transfers(&block);
    let text = render_declarations(&plan, &transfers);

    assert!(text.contains("__shared__ alignas(16) char shared_pool["));
    assert!(text.contains("float* sA = reinterpret_cast<float*>(shared_pool + 0);"));
    assert!(text.contains("half* sB = reinterpret_cast<half*>(shared_pool + 1024);"));
    assert!(text.contains("G2SLoader_gA_sA g2s_gA_sA;\n"));
    assert!(text.contains("S2GStorer_sC_gC s2g_sC_gC;\n"));
}

#[test]
fn transfers_are_collected_once_per_pair() {
    let graph = single_node_graph(&Node::block(nested_gemm()));
    let transfers = collect_transfers(&graph);
    let names: Vec<String> = transfers.iter().map(|decl| decl.instance_name()).collect();
    assert_eq!(
        names,
        vec![
            "g2s_gA_sA",
            "g2s_gB_sB",
            "s2r_sA_rA",
            "s2r_sB_rB",
            "r2s_rC_sC",
            "s2g_sC_gC"
        ]
    );
}

#[test]
fn instructions_serialize_to_tagged_json() {
    let instructions = nested_gemm().codegen().expect("codegen succeeds");
    let json = instructions_to_json(&instructions).expect("json");
    assert!(json.contains("\"type\": \"loop_begin\""));
    assert!(json.contains("\"kind\": \"global_to_shared\""));
    assert!(json.contains("\"op\": \"gemm\""));

    let parsed: Vec<Instruction> = serde_json::from_str(&json).expect("parse back");
    assert_eq!(parsed.len(), instructions.len());
}

#[test]
fn trace_rejects_unbalanced_loops() {
    let dangling_end = vec![Instruction::LoopEnd {
        var: "i".to_string(),
    }];
    assert!(matches!(
        expand(&dangling_end),
        Err(FlowError::UnbalancedLoop { .. })
    ));

    let unclosed = vec![Instruction::LoopBegin {
        var: "i".to_string(),
        low: 0,
        high: 2,
    }];
    assert!(matches!(
        expand(&unclosed),
        Err(FlowError::UnbalancedLoop { .. })
    ));

    let crossed = vec![
        Instruction::LoopBegin {
            var: "i".to_string(),
            low: 0,
            high: 2,
        },
        Instruction::LoopBegin {
            var: "j".to_string(),
            low: 0,
            high: 2,
        },
        Instruction::LoopEnd {
            var: "i".to_string(),
        },
        Instruction::LoopEnd {
            var: "j".to_string(),
        },
    ];
    assert!(matches!(
        expand(&crossed),
        Err(FlowError::UnbalancedLoop { .. })
    ));
}
