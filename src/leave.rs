//! Leave injection.
//!
//! Every control transfer that exits protected regions must unwind them
//! one at a time: a `return`, a `throw` that no enclosing try phase
//! catches, or an unconditional `jump` whose target lies outside the
//! region gets one `leave` per region it exits, innermost first,
//! immediately before it.
//!
//! Inserting shifts every later statement, so insertion goes through
//! [`InstructionList::insert`], which re-indexes the label table before
//! the scan moves on.

use tracing::{debug, trace};

use crate::cfg::region::{self, Phase, RegionArena, RegionId, RegionTracker};
use crate::error::{CodegenError, Result};
use crate::ir::{InstructionList, LabelIndex, Opcode, Statement};

/// A transfer that may exit regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exit {
    Return,
    Throw,
    /// Unconditional jump to a statement index.
    Jump(usize),
}

impl Exit {
    /// Exit performed by `stmt`, if it can leave a region at all.
    pub fn of(stmt: &Statement, labels: &LabelIndex) -> Result<Option<Exit>> {
        Ok(match stmt.op {
            Opcode::Return => Some(Exit::Return),
            Opcode::Throw | Opcode::Rethrow => Some(Exit::Throw),
            Opcode::Jump => match stmt.branch_target() {
                Some(target) => Some(Exit::Jump(labels.resolve(target)?)),
                None => None,
            },
            _ => None,
        })
    }
}

/// Regions `exit` leaves, innermost first, given the open `stack`
/// (innermost first, as produced by [`region::stack_at`]).
///
/// Finally phases are never unwound again: the region was already left
/// when its finally block started.
pub fn exit_chain(
    arena: &RegionArena,
    stack: &[(RegionId, Phase)],
    exit: Exit,
    labels: &LabelIndex,
    index: usize,
) -> Result<Vec<RegionId>> {
    let mut chain = Vec::new();
    for &(id, phase) in stack {
        let region = arena.get(id);
        match exit {
            Exit::Return => {
                if phase != Phase::Finally {
                    chain.push(id);
                }
            }
            Exit::Throw => match phase {
                Phase::Try if region.catch_label.is_some() => break,
                Phase::Finally => {}
                _ => chain.push(id),
            },
            Exit::Jump(target) => {
                if contains(arena, id, phase, target, labels)? {
                    break;
                }
                if phase == Phase::Finally {
                    return Err(CodegenError::RegionCrossingBranch {
                        opcode: Opcode::Jump.to_string(),
                        index,
                    });
                }
                chain.push(id);
            }
        }
    }
    Ok(chain)
}

/// Whether statement `target` lies inside the part of region `id` that is
/// currently executing.
fn contains(
    arena: &RegionArena,
    id: RegionId,
    phase: Phase,
    target: usize,
    labels: &LabelIndex,
) -> Result<bool> {
    let region = arena.get(id);
    let end = labels.resolve(&region.end_label)?;
    let finally = match &region.finally_label {
        Some(label) => Some(labels.resolve(label)?),
        None => None,
    };
    Ok(match (phase, finally) {
        (Phase::Finally, Some(f)) => f < target && target < end,
        _ => region.start < target && target < finally.unwrap_or(end),
    })
}

/// Insert the `leave` statements the list needs.
///
/// Leaves already present directly before a transfer are counted, so
/// running the pass twice changes nothing.
pub fn inject_leaves(statements: Vec<Statement>) -> Result<InstructionList> {
    let mut list = InstructionList::new(statements)?;
    let mut tracker = RegionTracker::new();
    let mut inserted = 0usize;
    let mut i = 0;
    while i < list.len() {
        let state = tracker.step(&list[i], i)?;
        let stack = region::stack_at(tracker.arena(), state);
        if stack.is_empty() {
            i += 1;
            continue;
        }

        let stmt = &list[i];
        if stmt.op.is_conditional_branch() || stmt.op == Opcode::Switch {
            if let Some(target) = stmt.branch_target() {
                let t = list.resolve(target)?;
                let chain = exit_chain(tracker.arena(), &stack, Exit::Jump(t), list.labels(), i)?;
                if !chain.is_empty() {
                    return Err(CodegenError::RegionCrossingBranch {
                        opcode: stmt.op.to_string(),
                        index: i,
                    });
                }
            }
            i += 1;
            continue;
        }

        let Some(exit) = Exit::of(stmt, list.labels())? else {
            i += 1;
            continue;
        };
        let needed = exit_chain(tracker.arena(), &stack, exit, list.labels(), i)?.len();
        let present = list.as_slice()[..i]
            .iter()
            .rev()
            .take_while(|s| s.op == Opcode::Leave)
            .count();
        let missing = needed.saturating_sub(present);
        for _ in 0..missing {
            list.insert(i, Statement::leave())?;
        }
        if missing > 0 {
            trace!(index = i, leaves = missing, op = %list[i + missing].op, "injected leave");
        }
        inserted += missing;
        i += missing + 1;
    }
    tracker.finish()?;
    debug!(inserted, "leave injection");
    Ok(list)
}
