//! Register packing.
//!
//! Lowering hands out a fresh virtual register for every local and
//! temporary. The packer maps them onto the bounded physical register file:
//! registers whose live intervals do not overlap share a slot, and the
//! lowest free slot always wins so the frame stays small.

pub mod live;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use crate::cfg::Cfg;
use crate::error::{CodegenError, Result};
use crate::ir::Statement;

pub use live::{Interval, Liveness};

/// Outcome of packing one function.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Packing {
    /// Physical registers used; every slot is below this.
    pub count: u32,
    /// Virtual register to physical slot.
    pub assignment: BTreeMap<u32, u32>,
    /// Live interval of every virtual register.
    pub intervals: BTreeMap<u32, Interval>,
}

impl Packing {
    /// Virtual registers sharing `slot`, in assignment order.
    pub fn owners(&self, slot: u32) -> Vec<u32> {
        self.assignment
            .iter()
            .filter(|&(_, &s)| s == slot)
            .map(|(&v, _)| v)
            .collect()
    }

    /// Pairs of virtual registers that share a slot while both are live.
    pub fn conflicts(&self) -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        for slot in 0..self.count {
            let owners = self.owners(slot);
            for (i, a) in owners.iter().enumerate() {
                for b in &owners[i + 1..] {
                    if self.intervals[a].overlaps(&self.intervals[b]) {
                        out.push((*a, *b));
                    }
                }
            }
        }
        out
    }
}

/// Slot bookkeeping during the condensing walk.
struct SlotFile {
    limit: usize,
    owners: Vec<Vec<u32>>,
    held: BTreeSet<u32>,
    free: BTreeSet<u32>,
}

impl SlotFile {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            owners: Vec::new(),
            held: BTreeSet::new(),
            free: BTreeSet::new(),
        }
    }

    /// Lowest free slot none of whose previous owners overlap `iv`, or a
    /// fresh one.
    fn claim(
        &mut self,
        reg: u32,
        iv: Interval,
        intervals: &BTreeMap<u32, Interval>,
    ) -> Option<u32> {
        let reusable = self.free.iter().copied().find(|&slot| {
            self.owners[slot as usize]
                .iter()
                .all(|o| !intervals[o].overlaps(&iv))
        });
        let slot = match reusable {
            Some(slot) => {
                self.free.remove(&slot);
                slot
            }
            None => {
                if self.owners.len() >= self.limit {
                    return None;
                }
                self.owners.push(Vec::new());
                (self.owners.len() - 1) as u32
            }
        };
        self.owners[slot as usize].push(reg);
        self.held.insert(slot);
        Some(slot)
    }

    /// Release every held slot whose owners have all ended by `index`.
    fn release(&mut self, index: usize, intervals: &BTreeMap<u32, Interval>) {
        let done: Vec<u32> = self
            .held
            .iter()
            .copied()
            .filter(|&slot| {
                self.owners[slot as usize]
                    .iter()
                    .all(|o| intervals[o].to <= index)
            })
            .collect();
        for slot in done {
            self.held.remove(&slot);
            self.free.insert(slot);
        }
    }

    fn count(&self) -> u32 {
        self.owners.len() as u32
    }
}

/// Pack the registers of `statements` into at most `max_registers` slots,
/// rewriting every register operand in place.
pub fn pack(
    function: &str,
    statements: &mut [Statement],
    cfg: &Cfg,
    max_registers: usize,
) -> Result<Packing> {
    let liveness = Liveness::compute(statements, cfg);
    let intervals = live::intervals(statements, cfg, &liveness);

    let mut slots = SlotFile::new(max_registers);
    let mut assignment: BTreeMap<u32, u32> = BTreeMap::new();

    for (i, stmt) in statements.iter().enumerate() {
        for access in stmt.register_accesses() {
            let reg = access.reg;
            if assignment.contains_key(&reg) {
                continue;
            }
            let iv = intervals[&reg];
            let slot = slots.claim(reg, iv, &intervals).ok_or_else(|| {
                CodegenError::RegisterExhausted {
                    function: function.to_string(),
                    limit: max_registers,
                }
            })?;
            trace!(reg, slot, from = iv.from, to = iv.to, "assign register");
            assignment.insert(reg, slot);
        }
        slots.release(i, &intervals);
    }

    for stmt in statements.iter_mut() {
        stmt.map_registers(|r| assignment.get(&r).copied().unwrap_or(r));
    }

    let packing = Packing {
        count: slots.count(),
        assignment,
        intervals,
    };
    debug!(
        function,
        virtual_registers = packing.assignment.len(),
        physical = packing.count,
        "registers packed"
    );
    Ok(packing)
}
