//! Concrete execution trace of an instruction stream.

use std::collections::HashMap;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::codegen::{Instruction, Transfer};
use crate::dataflow::{OpKind, TransferKind};
use crate::error::{FlowError, FlowResult};

/// One executed step with every tile index evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEvent {
    Load {
        source: String,
        dest: String,
        kind: TransferKind,
        tile: Vec<i64>,
    },
    Store {
        source: String,
        dest: String,
        kind: TransferKind,
        tile: Vec<i64>,
    },
    Compute {
        op: OpKind,
        operands: Vec<String>,
        result: String,
    },
}

/// Runs every loop over its range and records loads, stores and computes in
/// execution order.
pub fn expand(instructions: &[Instruction]) -> FlowResult<Vec<TraceEvent>> {
    let loop_ends = match_loops(instructions)?;
    let mut bindings = HashMap::new();
    let mut events = Vec::new();
    run(instructions, &loop_ends, 0, instructions.len(), &mut bindings, &mut events)?;
    Ok(events)
}

/// Maps each `LoopBegin` position to the position of its `LoopEnd`.
fn match_loops(instructions: &[Instruction]) -> FlowResult<HashMap<usize, usize>> {
    let mut open: Vec<(usize, &str)> = Vec::new();
    let mut ends = HashMap::new();
    for (pos, inst) in instructions.iter().enumerate() {
        match inst {
            Instruction::LoopBegin { var, .. } => open.push((pos, var.as_str())),
            Instruction::LoopEnd { var } => match open.pop() {
                Some((begin, name)) if name == var.as_str() => {
                    ends.insert(begin, pos);
                }
                _ => return Err(FlowError::UnbalancedLoop { var: var.clone() }),
            },
            _ => {}
        }
    }
    if let Some((_, var)) = open.pop() {
        return Err(FlowError::UnbalancedLoop {
            var: var.to_string(),
        });
    }
    Ok(ends)
}

fn run(
    instructions: &[Instruction],
    loop_ends: &HashMap<usize, usize>,
    start: usize,
    end: usize,
    bindings: &mut HashMap<String, i64>,
    events: &mut Vec<TraceEvent>,
) -> FlowResult<()> {
    let mut pos = start;
    while pos < end {
        match &instructions[pos] {
            Instruction::LoopBegin { var, low, high } => {
                let close = loop_ends
                    .get(&pos)
                    .copied()
                    .ok_or_else(|| FlowError::UnbalancedLoop { var: var.clone() })?;
                let shadowed = bindings.get(var).copied();
                for value in *low..*high {
                    bindings.insert(var.clone(), value);
                    run(instructions, loop_ends, pos + 1, close, bindings, events)?;
                }
                match shadowed {
                    Some(value) => bindings.insert(var.clone(), value),
                    None => bindings.remove(var),
                };
                pos = close + 1;
                continue;
            }
            Instruction::LoopEnd { .. } => {}
            Instruction::Load(transfer) => {
                let (source, dest, kind, tile) = evaluate(transfer, bindings)?;
                events.push(TraceEvent::Load {
                    source,
                    dest,
                    kind,
                    tile,
                });
            }
            Instruction::Store(transfer) => {
                let (source, dest, kind, tile) = evaluate(transfer, bindings)?;
                events.push(TraceEvent::Store {
                    source,
                    dest,
                    kind,
                    tile,
                });
            }
            Instruction::Compute {
                op,
                operands,
                result,
            } => events.push(TraceEvent::Compute {
                op: *op,
                operands: operands.clone(),
                result: result.clone(),
            }),
        }
        pos += 1;
    }
    Ok(())
}

fn evaluate(
    transfer: &Transfer,
    bindings: &HashMap<String, i64>,
) -> FlowResult<(String, String, TransferKind, Vec<i64>)> {
    let tile = transfer.index.evaluate(bindings)?;
    trace!(
        "{} {} -> {} at {:?}",
        transfer.kind,
        transfer.source,
        transfer.dest,
        tile
    );
    Ok((
        transfer.source.clone(),
        transfer.dest.clone(),
        transfer.kind,
        tile,
    ))
}
