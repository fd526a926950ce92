use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::allocate::AllocationPlan;
use crate::codegen::{Instruction, Transfer};
use crate::dataflow::{AttachedEdge, Block, Graph, TransferKind};
use crate::tensor::Tier;
use crate::walk::{walk_block, walk_graph, EdgeRole, GraphVisitor};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub indent_width: usize,
    /// Insert `__syncthreads()` after runs of loads and shared-memory stores.
    pub emit_barriers: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            indent_width: 4,
            emit_barriers: true,
        }
    }
}

/// Renders an instruction stream as CUDA-flavoured loop text.
pub fn render(instructions: &[Instruction], options: &RenderOptions) -> String {
    let mut printer = Printer {
        out: String::new(),
        depth: 0,
        indent_width: options.indent_width,
    };
    let mut pending_loads: Vec<TransferKind> = Vec::new();
    let mut pending_stores = false;

    for inst in instructions {
        if options.emit_barriers {
            if !matches!(inst, Instruction::Load(_)) && !pending_loads.is_empty() {
                printer.load_barrier(&pending_loads);
                pending_loads.clear();
            }
            if !matches!(inst, Instruction::Store(_)) && pending_stores {
                printer.line("__syncthreads();");
                pending_stores = false;
            }
        }
        match inst {
            Instruction::LoopBegin { var, low, high } => {
                printer.line(&format!(
                    "for (int {var} = {low}; {var} < {high}; ++{var}) {{"
                ));
                printer.depth += 1;
            }
            Instruction::LoopEnd { .. } => {
                printer.depth = printer.depth.saturating_sub(1);
                printer.line("}");
            }
            Instruction::Load(transfer) => {
                printer.line(&transfer_call(transfer));
                pending_loads.push(transfer.kind);
            }
            Instruction::Store(transfer) => {
                printer.line(&transfer_call(transfer));
                if transfer.kind == TransferKind::RegisterToShared {
                    pending_stores = true;
                }
            }
            Instruction::Compute {
                op,
                operands,
                result,
            } => {
                let mut args = operands.clone();
                args.push(result.clone());
                printer.line(&format!("compute::{op}({});", args.join(", ")));
            }
        }
    }
    if options.emit_barriers {
        if !pending_loads.is_empty() {
            printer.load_barrier(&pending_loads);
        }
        if pending_stores {
            printer.line("__syncthreads();");
        }
    }
    printer.out
}

struct Printer {
    out: String,
    depth: usize,
    indent_width: usize,
}

impl Printer {
    fn line(&mut self, text: &str) {
        let pad = " ".repeat(self.depth * self.indent_width);
        self.out.push_str(&pad);
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn load_barrier(&mut self, kinds: &[TransferKind]) {
        if kinds.contains(&TransferKind::GlobalToShared) {
            self.line("__copy_async_wait();");
        }
        self.line("__syncthreads();");
    }
}

fn transfer_call(transfer: &Transfer) -> String {
    let coords: Vec<String> = transfer.index.dims().iter().map(|e| e.to_string()).collect();
    format!(
        "{}({}, {}, {{{}}});",
        transfer_instance(transfer.kind, &transfer.source, &transfer.dest),
        transfer.source,
        transfer.dest,
        coords.join(", ")
    )
}

fn transfer_instance(kind: TransferKind, source: &str, dest: &str) -> String {
    format!("{}_{source}_{dest}", kind.short())
}

/// A distinct copier object needed by the rendered kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferDecl {
    pub kind: TransferKind,
    pub source: String,
    pub dest: String,
}

impl TransferDecl {
    pub fn type_name(&self) -> String {
        let role = if self.kind.is_inward() { "Loader" } else { "Storer" };
        format!(
            "{}{role}_{}_{}",
            self.kind.short().to_ascii_uppercase(),
            self.source,
            self.dest
        )
    }

    pub fn instance_name(&self) -> String {
        transfer_instance(self.kind, &self.source, &self.dest)
    }
}

#[derive(Default)]
struct TransferCollector {
    seen: HashSet<TransferDecl>,
    decls: Vec<TransferDecl>,
}

impl GraphVisitor for TransferCollector {
    fn on_attached_edge(&mut self, _block: &Block, _role: EdgeRole, edge: &AttachedEdge) {
        let decl = TransferDecl {
            kind: edge.kind(),
            source: edge.source().name().to_string(),
            dest: edge.dest().name().to_string(),
        };
        if self.seen.insert(decl.clone()) {
            self.decls.push(decl);
        }
    }
}

/// Distinct transfers of a hierarchy, in walk order.
pub fn collect_transfers(graph: &Graph) -> Vec<TransferDecl> {
    let mut collector = TransferCollector::default();
    walk_graph(graph, &mut collector);
    collector.decls
}

pub fn collect_block_transfers(block: &Block) -> Vec<TransferDecl> {
    let mut collector = TransferCollector::default();
    walk_block(block, &mut collector);
    collector.decls
}

/// Storage pools, per-tensor views into them and copier declarations.
pub fn render_declarations(plan: &AllocationPlan, transfers: &[TransferDecl]) -> String {
    let mut out = String::new();
    for tier in [Tier::Global, Tier::Shared, Tier::Register] {
        let footprint = plan.footprint(tier);
        if footprint == 0 {
            continue;
        }
        let qualifier = if tier == Tier::Shared { "__shared__ " } else { "" };
        out.push_str(&format!(
            "{qualifier}alignas(16) char {tier}_pool[{footprint}];\n"
        ));
    }
    for alloc in plan.iter() {
        out.push_str(&format!(
            "{dtype}* {name} = reinterpret_cast<{dtype}*>({tier}_pool + {offset}); // {shape:?}, {size} bytes\n",
            dtype = alloc.dtype,
            name = alloc.name,
            tier = alloc.tier,
            offset = alloc.offset,
            shape = alloc.shape,
            size = alloc.size,
        ));
    }
    for decl in transfers {
        out.push_str(&format!("{} {};\n", decl.type_name(), decl.instance_name()));
    }
    out
}
