//! Exception-handling regions recovered from a flat statement list.
//!
//! A `try` statement opens a region whose descriptor names its catch,
//! finally and end labels. Scanning forward, the region's phase advances
//! when its catch or finally label is crossed, and the region closes at
//! `endfinally` (when it has a finally block) or at its end label.
//!
//! Regions live in an arena and point at their parent by index, so the
//! leave injector and the CFG builder can still inspect a region after the
//! scan has moved past it.

use crate::error::{CodegenError, Result};
use crate::ir::{Opcode, Operand, Statement};

pub type RegionId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Try,
    Catch,
    Finally,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub parent: Option<RegionId>,
    /// Phase the parent was in when this region opened.
    pub parent_phase: Option<Phase>,
    /// Index of the `try` statement.
    pub start: usize,
    pub catch_label: Option<String>,
    pub finally_label: Option<String>,
    pub end_label: String,
}

impl Region {
    fn from_descriptor(
        stmt: &Statement,
        index: usize,
    ) -> Result<(Option<String>, Option<String>, String)> {
        let label = |op: &Operand| op.label_name().map(str::to_string);
        let mismatch = |detail: &str| CodegenError::RegionMismatch {
            index,
            detail: detail.to_string(),
        };
        let [catch, finally, end] = stmt.operands.as_slice() else {
            return Err(mismatch("malformed try descriptor"));
        };
        let end = label(end).ok_or_else(|| mismatch("try without an end label"))?;
        let (catch, finally) = (label(catch), label(finally));
        if catch.is_none() && finally.is_none() {
            return Err(mismatch("try without catch or finally"));
        }
        Ok((catch, finally, end))
    }

    fn owns(&self, label: &str) -> bool {
        self.catch_label.as_deref() == Some(label)
            || self.finally_label.as_deref() == Some(label)
            || self.end_label == label
    }
}

/// Active region and its phase at some statement.
pub type RegionState = Option<(RegionId, Phase)>;

#[derive(Clone, Debug, Default)]
pub struct RegionArena {
    regions: Vec<Region>,
}

impl RegionArena {
    pub fn get(&self, id: RegionId) -> &Region {
        &self.regions[id]
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RegionId, &Region)> {
        self.regions.iter().enumerate()
    }

    /// Regions strictly enclosing `id`, innermost first.
    pub fn ancestors(&self, id: RegionId) -> impl Iterator<Item = RegionId> + '_ {
        std::iter::successors(self.regions[id].parent, move |&p| self.regions[p].parent)
    }
}

// ─── Tracker ──────────────────────────────────────────────────────

/// Forward scan state: the stack of open regions with their phases.
#[derive(Clone, Debug, Default)]
pub struct RegionTracker {
    arena: RegionArena,
    stack: Vec<(RegionId, Phase)>,
}

impl RegionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arena(&self) -> &RegionArena {
        &self.arena
    }

    /// Open regions, outermost first.
    pub fn active(&self) -> &[(RegionId, Phase)] {
        &self.stack
    }

    pub fn current(&self) -> RegionState {
        self.stack.last().copied()
    }

    /// Advance over statement `index`, returning the region state the
    /// statement itself belongs to.
    ///
    /// Catch/finally labels belong to the phase they open; an end label
    /// closing a region belongs to the parent. A `try` belongs to the
    /// enclosing region and `endfinally` to the finally phase it closes.
    pub fn step(&mut self, stmt: &Statement, index: usize) -> Result<RegionState> {
        if let Some(label) = stmt.label_name() {
            self.cross_label(label, index)?;
        }
        let state = self.current();
        match stmt.op {
            Opcode::Try => {
                let (catch_label, finally_label, end_label) = Region::from_descriptor(stmt, index)?;
                let id = self.arena.regions.len();
                self.arena.regions.push(Region {
                    parent: state.map(|(r, _)| r),
                    parent_phase: state.map(|(_, p)| p),
                    start: index,
                    catch_label,
                    finally_label,
                    end_label,
                });
                self.stack.push((id, Phase::Try));
            }
            Opcode::EndFinally => match self.stack.last() {
                Some(&(_, Phase::Finally)) => {
                    self.stack.pop();
                }
                _ => {
                    return Err(CodegenError::RegionMismatch {
                        index,
                        detail: "endfinally outside of a finally block".into(),
                    })
                }
            },
            _ => {}
        }
        Ok(state)
    }

    fn cross_label(&mut self, label: &str, index: usize) -> Result<()> {
        let mismatch = |detail: String| CodegenError::RegionMismatch { index, detail };
        if let Some(&(id, phase)) = self.stack.last() {
            let region = &self.arena.regions[id];
            if region.catch_label.as_deref() == Some(label) {
                if phase != Phase::Try {
                    return Err(mismatch(format!(
                        "catch label '{}' after {:?} phase",
                        label, phase
                    )));
                }
                if let Some(top) = self.stack.last_mut() {
                    top.1 = Phase::Catch;
                }
                return Ok(());
            }
            if region.finally_label.as_deref() == Some(label) {
                if phase == Phase::Finally {
                    return Err(mismatch(format!("finally label '{}' crossed twice", label)));
                }
                if let Some(top) = self.stack.last_mut() {
                    top.1 = Phase::Finally;
                }
                return Ok(());
            }
            if region.end_label == label {
                if region.finally_label.is_some() {
                    return Err(mismatch(format!(
                        "end label '{}' reached before endfinally",
                        label
                    )));
                }
                self.stack.pop();
                return Ok(());
            }
        }
        // A label owned by an outer region, or one that looks like a phase
        // boundary but belongs to no open region, means the nesting broke.
        let owned_elsewhere = self
            .stack
            .iter()
            .rev()
            .skip(1)
            .any(|&(id, _)| self.arena.regions[id].owns(label));
        if owned_elsewhere || is_phase_marker(label) {
            return Err(mismatch(format!(
                "label '{}' does not belong to the innermost region",
                label
            )));
        }
        Ok(())
    }

    /// Fails if any region is still open at the end of the list.
    pub fn finish(self) -> Result<RegionArena> {
        if let Some(&(id, _)) = self.stack.last() {
            return Err(CodegenError::RegionMismatch {
                index: self.arena.regions[id].start,
                detail: "region never closed".into(),
            });
        }
        Ok(self.arena)
    }
}

/// Catch/finally labels carry their phase in the name.
pub fn is_phase_marker(label: &str) -> bool {
    label.ends_with("_catch") || label.ends_with("_finally")
}

/// Region state of every statement, plus the closed arena.
pub fn scan(statements: &[Statement]) -> Result<(Vec<RegionState>, RegionArena)> {
    let mut tracker = RegionTracker::new();
    let mut states = Vec::with_capacity(statements.len());
    for (i, stmt) in statements.iter().enumerate() {
        states.push(tracker.step(stmt, i)?);
    }
    Ok((states, tracker.finish()?))
}

/// Open regions at `state`, innermost first, with the phase each is in.
pub fn stack_at(arena: &RegionArena, state: RegionState) -> Vec<(RegionId, Phase)> {
    let mut out = Vec::new();
    let Some((mut id, mut phase)) = state else {
        return out;
    };
    loop {
        out.push((id, phase));
        let region = arena.get(id);
        match (region.parent, region.parent_phase) {
            (Some(parent), Some(parent_phase)) => {
                id = parent;
                phase = parent_phase;
            }
            _ => break,
        }
    }
    out
}
