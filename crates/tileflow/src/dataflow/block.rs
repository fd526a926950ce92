use std::collections::HashSet;

use log::{debug, info};

use crate::access::AccessMap;
use crate::allocate::{self, AllocateOptions, AllocationPlan};
use crate::codegen::{self, Instruction};
use crate::dataflow::edge::AttachedEdge;
use crate::dataflow::graph::Graph;
use crate::error::{FlowError, FlowResult};
use crate::var::IterVarRef;

/// A loop nest around a connected body graph, with the cross-tier transfers
/// that feed it and drain it.
///
/// Iteration vars are ordered outermost first. Each transfer is placed at the
/// innermost loop its access map refers to: loads open that loop level and
/// stores close it. Transfers with loop-invariant maps run once, outside the
/// whole nest.
#[derive(Debug, Clone)]
pub struct Block {
    loads: Vec<AttachedEdge>,
    body: Graph,
    stores: Vec<AttachedEdge>,
    iteration_vars: Vec<IterVarRef>,
}

impl Block {
    pub fn new(
        loads: Vec<AttachedEdge>,
        body: Graph,
        stores: Vec<AttachedEdge>,
        iteration_vars: Vec<IterVarRef>,
    ) -> FlowResult<Self> {
        if !body.is_connected() {
            return Err(FlowError::NotConnected {
                operation: "block construction",
            });
        }
        let mut seen = HashSet::new();
        if let Some(var) = iteration_vars.iter().find(|var| !seen.insert(var.name())) {
            return Err(FlowError::DuplicateIterationVar {
                name: var.name().to_string(),
                context: "block".to_string(),
            });
        }

        let visible = body.visible_tensors();
        let interface = loads
            .iter()
            .map(|edge| ("load destination", edge.dest()))
            .chain(stores.iter().map(|edge| ("store source", edge.source())));
        for (role, tensor) in interface {
            match visible.iter().find(|seen| seen.name() == tensor.name()) {
                None => {
                    return Err(FlowError::MissingBlockTensor {
                        role,
                        tensor: tensor.name().to_string(),
                    })
                }
                Some(found) if ***found != **tensor => {
                    return Err(FlowError::TensorNameConflict {
                        name: tensor.name().to_string(),
                    })
                }
                Some(_) => {}
            }
        }

        for edge in loads.iter().chain(&stores) {
            for var in edge.access().iteration_vars() {
                let bound = iteration_vars
                    .iter()
                    .any(|own| own.name() == var.name() && own.range() == var.range());
                if !bound {
                    return Err(FlowError::UnboundIterationVar {
                        var: var.name().to_string(),
                        context: format!("access {}", edge.label()),
                    });
                }
            }
        }

        let block = Self {
            loads,
            body,
            stores,
            iteration_vars,
        };
        for edge in block.loads.iter().chain(&block.stores) {
            debug!(
                "{}: {} {} placed at depth {}",
                block.label(),
                edge.kind(),
                edge.label(),
                block.placement_depth(edge.access())
            );
        }
        info!(
            "{}: {} loads, {} body nodes, {} stores",
            block.label(),
            block.loads.len(),
            block.body.nodes().len(),
            block.stores.len()
        );
        Ok(block)
    }

    pub fn loads(&self) -> &[AttachedEdge] {
        &self.loads
    }

    pub fn body(&self) -> &Graph {
        &self.body
    }

    pub fn stores(&self) -> &[AttachedEdge] {
        &self.stores
    }

    pub fn iteration_vars(&self) -> &[IterVarRef] {
        &self.iteration_vars
    }

    /// Number of enclosing block loops a transfer with this map runs inside;
    /// 0 for loop-invariant maps.
    pub fn placement_depth(&self, access: &AccessMap) -> usize {
        access
            .iteration_vars()
            .iter()
            .filter_map(|var| {
                self.iteration_vars
                    .iter()
                    .position(|own| own.name() == var.name())
            })
            .map(|position| position + 1)
            .max()
            .unwrap_or(0)
    }

    pub fn label(&self) -> String {
        let names: Vec<&str> = self.iteration_vars.iter().map(|var| var.name()).collect();
        format!("block[{}]", names.join(", "))
    }

    pub fn codegen(&self) -> FlowResult<Vec<Instruction>> {
        let mut out = Vec::new();
        codegen::emit_block(self, &mut out)?;
        Ok(out)
    }

    pub fn allocate_var(&self) -> FlowResult<AllocationPlan> {
        self.allocate_var_with(&AllocateOptions::default())
    }

    pub fn allocate_var_with(&self, options: &AllocateOptions) -> FlowResult<AllocationPlan> {
        let instructions = self.codegen()?;
        allocate::allocate_block(self, &instructions, options)
    }
}
