//! Register liveness.
//!
//! Block-level live sets come from a backward dataflow over the CFG (so a
//! value carried around a loop stays live across every back-edge). Each
//! virtual register then gets one interval over statement indices: every
//! touch, plus a synthetic touch at the head of each block it is live into
//! and at the tail of each block it is live out of.

use std::collections::{BTreeMap, BTreeSet};

use crate::cfg::Cfg;
use crate::ir::{Access, Statement};

/// Inclusive range of statement indices a register must keep its slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interval {
    pub from: usize,
    pub to: usize,
}

impl Interval {
    pub fn at(index: usize) -> Self {
        Self {
            from: index,
            to: index,
        }
    }

    pub fn touch(&mut self, index: usize) {
        self.from = self.from.min(index);
        self.to = self.to.max(index);
    }

    /// Intervals that only meet at an endpoint do not overlap: the later
    /// register is written by the statement that last reads the earlier.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.from < other.to && other.from < self.to
    }
}

/// Per-block live-in/live-out register sets.
#[derive(Clone, Debug, Default)]
pub struct Liveness {
    pub live_in: Vec<BTreeSet<u32>>,
    pub live_out: Vec<BTreeSet<u32>>,
    /// Registers written by at least one statement.
    pub written: BTreeSet<u32>,
}

impl Liveness {
    pub fn compute(statements: &[Statement], cfg: &Cfg) -> Self {
        let n = cfg.len();
        let mut uses = vec![BTreeSet::new(); n];
        let mut defs = vec![BTreeSet::new(); n];
        let mut written = BTreeSet::new();

        for (b, block) in cfg.blocks().iter().enumerate() {
            for stmt in &statements[block.from..=block.to] {
                let accesses = stmt.register_accesses();
                // Reads of a statement happen before its writes.
                for a in accesses.iter().filter(|a| a.access == Access::Read) {
                    if !defs[b].contains(&a.reg) {
                        uses[b].insert(a.reg);
                    }
                }
                for a in accesses.iter().filter(|a| a.access == Access::Write) {
                    defs[b].insert(a.reg);
                    written.insert(a.reg);
                }
            }
        }

        let mut live_in: Vec<BTreeSet<u32>> = vec![BTreeSet::new(); n];
        let mut live_out: Vec<BTreeSet<u32>> = vec![BTreeSet::new(); n];
        let mut changed = true;
        while changed {
            changed = false;
            for b in (0..n).rev() {
                let out: BTreeSet<u32> = cfg
                    .successors(b)
                    .into_iter()
                    .flat_map(|s| live_in[s].iter().copied())
                    .collect();
                let mut inn = uses[b].clone();
                inn.extend(out.difference(&defs[b]).copied());
                if inn != live_in[b] || out != live_out[b] {
                    live_in[b] = inn;
                    live_out[b] = out;
                    changed = true;
                }
            }
        }

        Self {
            live_in,
            live_out,
            written,
        }
    }
}

/// One interval per register that appears in `statements`.
pub fn intervals(
    statements: &[Statement],
    cfg: &Cfg,
    liveness: &Liveness,
) -> BTreeMap<u32, Interval> {
    fn touch(reg: u32, at: usize, out: &mut BTreeMap<u32, Interval>) {
        out.entry(reg)
            .and_modify(|iv| iv.touch(at))
            .or_insert_with(|| Interval::at(at));
    }

    let mut out = BTreeMap::new();

    for (i, stmt) in statements.iter().enumerate() {
        for a in stmt.register_accesses() {
            touch(a.reg, i, &mut out);
        }
    }

    // Registers never written cannot carry a value across a boundary.
    for (b, block) in cfg.blocks().iter().enumerate() {
        for &reg in liveness.live_in[b].intersection(&liveness.written) {
            touch(reg, block.from, &mut out);
        }
        for &reg in liveness.live_out[b].intersection(&liveness.written) {
            touch(reg, block.to, &mut out);
        }
    }
    out
}
