//! Storage planning: liveness over the emitted schedule and DAG interference,
//! then first-fit offset packing per memory tier.

mod interference;
pub mod liveness;

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

pub use liveness::LiveRange;

use crate::codegen::Instruction;
use crate::dataflow::{AttachedEdge, Block, Graph, NodeRef};
use crate::env;
use crate::error::{FlowError, FlowResult};
use crate::tensor::{DType, TensorRef, Tier};
use crate::walk::{walk_block, walk_graph, EdgeRole, GraphVisitor};

use self::interference::Interference;

/// Knobs of [`Graph::allocate_var_with`] and [`Block::allocate_var_with`].
///
/// Fields missing from a deserialized value take their defaults, so
/// `{"shared_capacity": 49152}` is a complete configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocateOptions {
    /// Byte alignment of every offset.
    pub alignment: usize,
    /// Let tensors that never interfere share storage. Defaults to on unless
    /// the `TILEFLOW_NO_SLOT_REUSE` environment variable is truthy.
    pub reuse_slots: bool,
    pub shared_capacity: Option<usize>,
    pub register_capacity: Option<usize>,
}

impl Default for AllocateOptions {
    fn default() -> Self {
        Self {
            alignment: 16,
            reuse_slots: env::default_slot_reuse(),
            shared_capacity: None,
            register_capacity: None,
        }
    }
}

impl AllocateOptions {
    fn capacity(&self, tier: Tier) -> Option<usize> {
        match tier {
            Tier::Shared => self.shared_capacity,
            Tier::Register => self.register_capacity,
            Tier::Global => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub name: String,
    pub tier: Tier,
    pub dtype: DType,
    pub shape: Vec<usize>,
    /// Byte offset into the tier's storage pool.
    pub offset: usize,
    /// Size in bytes.
    pub size: usize,
    pub live_range: LiveRange,
}

impl Allocation {
    pub fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Storage decisions for every tensor of a hierarchy, in declaration order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AllocationPlan {
    allocations: Vec<Allocation>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl AllocationPlan {
    pub fn get(&self, name: &str) -> Option<&Allocation> {
        self.index.get(name).map(|idx| &self.allocations[*idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Allocation> {
        self.allocations.iter()
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// Bytes of storage the tier needs: the highest end offset in it.
    pub fn footprint(&self, tier: Tier) -> usize {
        self.allocations
            .iter()
            .filter(|alloc| alloc.tier == tier)
            .map(Allocation::end)
            .max()
            .unwrap_or(0)
    }

    pub fn to_json_string(&self) -> FlowResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn push(&mut self, allocation: Allocation) {
        self.index
            .insert(allocation.name.clone(), self.allocations.len());
        self.allocations.push(allocation);
    }
}

pub(crate) fn allocate_graph(
    graph: &Graph,
    instructions: &[Instruction],
    options: &AllocateOptions,
) -> FlowResult<AllocationPlan> {
    let mut collector = TensorCollector::default();
    walk_graph(graph, &mut collector);
    let interference = interference::analyze_graph(graph)?;
    plan(collector.finish()?, instructions, &interference, options)
}

pub(crate) fn allocate_block(
    block: &Block,
    instructions: &[Instruction],
    options: &AllocateOptions,
) -> FlowResult<AllocationPlan> {
    let mut collector = TensorCollector::default();
    walk_block(block, &mut collector);
    let interference = interference::analyze_block(block)?;
    plan(collector.finish()?, instructions, &interference, options)
}

/// Every distinct tensor of a hierarchy, keyed by name.
#[derive(Default)]
struct TensorCollector {
    tensors: HashMap<String, TensorRef>,
    order: Vec<String>,
    conflict: Option<String>,
}

impl TensorCollector {
    fn record(&mut self, tensor: &TensorRef) {
        match self.tensors.get(tensor.name()) {
            Some(existing) if **existing != **tensor => {
                self.conflict.get_or_insert_with(|| tensor.name().to_string());
            }
            Some(_) => {}
            None => {
                self.tensors
                    .insert(tensor.name().to_string(), Arc::clone(tensor));
                self.order.push(tensor.name().to_string());
            }
        }
    }

    fn finish(self) -> FlowResult<(HashMap<String, TensorRef>, Vec<String>)> {
        match self.conflict {
            Some(name) => Err(FlowError::TensorNameConflict { name }),
            None => Ok((self.tensors, self.order)),
        }
    }
}

impl GraphVisitor for TensorCollector {
    fn on_node(&mut self, _graph: &Graph, node: &NodeRef) {
        if let Some(tensor) = node.as_tensor() {
            self.record(tensor);
        }
    }

    fn on_attached_edge(&mut self, _block: &Block, _role: EdgeRole, edge: &AttachedEdge) {
        self.record(edge.source());
        self.record(edge.dest());
    }
}

fn plan(
    (tensors, walk_order): (HashMap<String, TensorRef>, Vec<String>),
    instructions: &[Instruction],
    interference: &Interference,
    options: &AllocateOptions,
) -> FlowResult<AllocationPlan> {
    let mut liveness = liveness::analyze(instructions, &tensors)?;
    for (name, end) in &interference.sink_ends {
        liveness.keep_live(name, *end);
    }
    let whole = LiveRange::new(0, instructions.len().saturating_sub(1));
    let mut declared = liveness.order.clone();
    declared.extend(
        walk_order
            .into_iter()
            .filter(|name| !liveness.ranges.contains_key(name)),
    );

    let alignment = options.alignment.max(1);
    let mut plan = AllocationPlan::default();
    let mut global_cursor = 0usize;
    for name in declared {
        let Some(tensor) = tensors.get(&name) else {
            continue;
        };
        let live_range = liveness.ranges.get(&name).copied().unwrap_or(whole);
        let size = tensor.byte_len();
        let offset = match tensor.tier() {
            Tier::Global => {
                let offset = align_up(global_cursor, alignment);
                global_cursor = offset + size;
                offset
            }
            tier => {
                let busy = plan
                    .iter()
                    .filter(|placed| placed.tier == tier)
                    .filter(|placed| {
                        !options.reuse_slots
                            || placed.live_range.overlaps(&live_range)
                            || interference.conflicts(&placed.name, &name)
                    })
                    .map(|placed| (placed.offset, placed.end()));
                first_fit(busy, size, alignment)
            }
        };
        debug!(
            "{} {} tensor {name}: offset {offset}, {size} bytes, live {}..={}",
            tensor.tier(),
            tensor.dtype(),
            live_range.start,
            live_range.end
        );
        plan.push(Allocation {
            name,
            tier: tensor.tier(),
            dtype: tensor.dtype(),
            shape: tensor.shape().to_vec(),
            offset,
            size,
            live_range,
        });
    }

    for tier in [Tier::Shared, Tier::Register] {
        let required = plan.footprint(tier);
        if let Some(capacity) = options.capacity(tier) {
            if required > capacity {
                return Err(FlowError::CapacityExceeded {
                    tier,
                    required,
                    capacity,
                });
            }
        }
    }
    info!(
        "allocation plan: {} tensors, global {} bytes, shared {} bytes, register {} bytes",
        plan.len(),
        plan.footprint(Tier::Global),
        plan.footprint(Tier::Shared),
        plan.footprint(Tier::Register)
    );
    Ok(plan)
}

/// Lowest aligned offset where `size` bytes avoid every busy interval.
fn first_fit(busy: impl Iterator<Item = (usize, usize)>, size: usize, alignment: usize) -> usize {
    let mut busy: Vec<(usize, usize)> = busy.collect();
    busy.sort_unstable();
    let mut offset = 0;
    for (start, end) in busy {
        if end <= offset {
            continue;
        }
        if start >= offset + size {
            break;
        }
        offset = align_up(end, alignment);
    }
    offset
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}
