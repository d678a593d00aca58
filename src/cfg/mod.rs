//! Basic blocks and control-flow edges over a flat statement list.
//!
//! A block starts at every meta-label and right after every statement that
//! exits a block. Edges come from each block's terminal statement, plus
//! exceptional edges from protected code to its handler. The graph is a
//! `petgraph` digraph with one extra node standing for "leaves the
//! function by exception".

pub mod region;
#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::fmt::Write;

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use tracing::debug;

use crate::error::{CodegenError, Result};
use crate::ir::{LabelIndex, Opcode, Operand, Statement, Value};
use crate::leave::{exit_chain, Exit};

use self::region::{Phase, RegionArena, RegionId, RegionState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Fallthrough,
    Branch,
    /// `leave` into the finally block of the region it exits.
    Leave,
    /// `endfinally` back to the code after the leave that entered it.
    EndFinally,
    Throw,
    Switch,
    /// Any protected statement may raise into its handler.
    Exceptional,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CfgNode {
    Block(usize),
    /// Control leaves the function through an unhandled exception.
    Exit,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicBlock {
    pub id: usize,
    /// First statement index.
    pub from: usize,
    /// Last statement index, inclusive.
    pub to: usize,
    /// Region state of the first statement.
    pub region: RegionState,
}

impl BasicBlock {
    pub fn len(&self) -> usize {
        self.to - self.from + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, index: usize) -> bool {
        self.from <= index && index <= self.to
    }
}

#[derive(Debug)]
pub struct Cfg {
    blocks: Vec<BasicBlock>,
    regions: RegionArena,
    states: Vec<RegionState>,
    block_of: Vec<usize>,
    graph: DiGraph<CfgNode, EdgeKind>,
    nodes: Vec<NodeIndex>,
    exit: NodeIndex,
}

// ─── Construction ─────────────────────────────────────────────────

impl Cfg {
    /// Build the CFG of `statements`; `constants` supplies switch tables.
    pub fn build(statements: &[Statement], constants: &[Value]) -> Result<Cfg> {
        let (states, regions) = region::scan(statements)?;
        let labels = LabelIndex::build(statements)?;
        let mut blocks = split_blocks(statements);
        for b in &mut blocks {
            b.region = states[b.from];
        }

        let mut block_of = vec![0; statements.len()];
        for b in &blocks {
            for slot in &mut block_of[b.from..=b.to] {
                *slot = b.id;
            }
        }

        let mut graph = DiGraph::new();
        let nodes: Vec<NodeIndex> = blocks
            .iter()
            .map(|b| graph.add_node(CfgNode::Block(b.id)))
            .collect();
        let exit = graph.add_node(CfgNode::Exit);

        let mut cfg = Cfg {
            blocks,
            regions,
            states,
            block_of,
            graph,
            nodes,
            exit,
        };
        cfg.connect(statements, constants, &labels)?;
        debug!(
            blocks = cfg.blocks.len(),
            edges = cfg.graph.edge_count(),
            regions = cfg.regions.len(),
            "cfg built"
        );
        Ok(cfg)
    }

    fn connect(
        &mut self,
        statements: &[Statement],
        constants: &[Value],
        labels: &LabelIndex,
    ) -> Result<()> {
        let count = self.blocks.len();
        // Blocks execution resumes at after each region's finally completes.
        let mut continuations: BTreeMap<RegionId, Vec<usize>> = BTreeMap::new();
        let mut end_finally_blocks = Vec::new();

        for id in 0..count {
            let to = self.blocks[id].to;
            let terminal = &statements[to];
            let next = (id + 1 < count).then_some(id + 1);

            match terminal.op {
                op if op.is_conditional_branch() => {
                    if let Some(n) = next {
                        self.edge(id, CfgNode::Block(n), EdgeKind::Fallthrough);
                    }
                    let target = self.label_block(terminal, labels)?;
                    self.edge(id, CfgNode::Block(target), EdgeKind::Branch);
                }
                Opcode::Jump => {
                    let target = self.label_block(terminal, labels)?;
                    self.edge(id, CfgNode::Block(target), EdgeKind::Branch);
                }
                Opcode::Leave => {
                    if let Some(n) = next {
                        self.edge(id, CfgNode::Block(n), EdgeKind::Fallthrough);
                    }
                    let region = self.region_left_by(statements, to, labels)?;
                    if let Some(finally) = self.regions.get(region).finally_label.clone() {
                        let target = self.block_of[labels.resolve(&finally)?];
                        self.edge(id, CfgNode::Block(target), EdgeKind::Leave);
                        if let Some(n) = next {
                            continuations.entry(region).or_default().push(n);
                        }
                    }
                }
                Opcode::Throw | Opcode::Rethrow => {
                    let handler = self.catching_handler(self.states[to], labels)?;
                    let node = handler.map_or(CfgNode::Exit, CfgNode::Block);
                    self.edge(id, node, EdgeKind::Throw);
                }
                Opcode::Switch => {
                    if let Some(n) = next {
                        self.edge(id, CfgNode::Block(n), EdgeKind::Fallthrough);
                    }
                    for target in switch_targets(terminal, constants) {
                        let block = self.block_of[labels.resolve(&target)?];
                        self.edge(id, CfgNode::Block(block), EdgeKind::Switch);
                    }
                }
                Opcode::Return => {}
                Opcode::EndFinally => end_finally_blocks.push(id),
                _ => {
                    if let Some(n) = next {
                        self.edge(id, CfgNode::Block(n), EdgeKind::Fallthrough);
                    }
                }
            }

            // Protected code may raise anywhere.
            if let Some((r, phase)) = self.states[to] {
                let region = self.regions.get(r);
                let handler = match phase {
                    Phase::Try => region.catch_label.as_ref().or(region.finally_label.as_ref()),
                    Phase::Catch => region.finally_label.as_ref(),
                    Phase::Finally => None,
                };
                if let Some(label) = handler.cloned() {
                    let target = self.block_of[labels.resolve(&label)?];
                    if target != id {
                        self.edge(id, CfgNode::Block(target), EdgeKind::Exceptional);
                    }
                }
            }
        }

        for id in end_finally_blocks {
            let to = self.blocks[id].to;
            let Some((region, _)) = self.states[to] else {
                return Err(CodegenError::RegionMismatch {
                    index: to,
                    detail: "endfinally outside of a region".into(),
                });
            };
            match continuations.get(&region) {
                Some(targets) => {
                    for &t in targets {
                        self.edge(id, CfgNode::Block(t), EdgeKind::EndFinally);
                    }
                }
                // Only reachable by exception: it keeps propagating.
                None => self.edge(id, CfgNode::Exit, EdgeKind::EndFinally),
            }
        }
        Ok(())
    }

    fn edge(&mut self, from: usize, to: CfgNode, kind: EdgeKind) {
        let target = match to {
            CfgNode::Block(b) => self.nodes[b],
            CfgNode::Exit => self.exit,
        };
        // First edge between two nodes keeps its kind.
        if self.graph.find_edge(self.nodes[from], target).is_none() {
            self.graph.add_edge(self.nodes[from], target, kind);
        }
    }

    fn label_block(&self, stmt: &Statement, labels: &LabelIndex) -> Result<usize> {
        let target = stmt
            .branch_target()
            .ok_or_else(|| CodegenError::unresolved(format!("<{} without target>", stmt.op)))?;
        Ok(self.block_of[labels.resolve(target)?])
    }

    /// The region the `leave` at `index` exits.
    ///
    /// Leaves come in runs before the transfer they serve; the k-th leave
    /// of a run exits the k-th region of that transfer's exit chain.
    fn region_left_by(
        &self,
        statements: &[Statement],
        index: usize,
        labels: &LabelIndex,
    ) -> Result<RegionId> {
        let k = statements[..index]
            .iter()
            .rev()
            .take_while(|s| s.op == Opcode::Leave)
            .count();
        let transfer = (index..statements.len()).find(|&j| statements[j].op != Opcode::Leave);
        if let Some(j) = transfer {
            if let Some(exit) = Exit::of(&statements[j], labels)? {
                let stack = region::stack_at(&self.regions, self.states[j]);
                let chain = exit_chain(&self.regions, &stack, exit, labels, j)?;
                if let Some(&r) = chain.get(k) {
                    return Ok(r);
                }
            }
        }
        // A lone leave exits the innermost region not already in finally.
        region::stack_at(&self.regions, self.states[index])
            .into_iter()
            .filter(|&(_, phase)| phase != Phase::Finally)
            .nth(k)
            .map(|(r, _)| r)
            .ok_or_else(|| CodegenError::RegionMismatch {
                index,
                detail: "leave without a region to exit".into(),
            })
    }

    /// Block of the nearest catch handler whose try phase is active.
    fn catching_handler(&self, state: RegionState, labels: &LabelIndex) -> Result<Option<usize>> {
        for (r, phase) in region::stack_at(&self.regions, state) {
            let region = self.regions.get(r);
            if let (Phase::Try, Some(catch)) = (phase, &region.catch_label) {
                return Ok(Some(self.block_of[labels.resolve(catch)?]));
            }
        }
        Ok(None)
    }
}

fn split_blocks(statements: &[Statement]) -> Vec<BasicBlock> {
    let mut blocks = Vec::new();
    let mut start = 0;
    let push = |from: usize, to: usize, blocks: &mut Vec<BasicBlock>| {
        blocks.push(BasicBlock {
            id: blocks.len(),
            from,
            to,
            region: None,
        });
    };
    for (i, stmt) in statements.iter().enumerate() {
        if stmt.is_label() && i > start {
            push(start, i - 1, &mut blocks);
            start = i;
        }
        if stmt.op.exits_block() {
            push(start, i, &mut blocks);
            start = i + 1;
        }
    }
    if start < statements.len() {
        push(start, statements.len() - 1, &mut blocks);
    }
    blocks
}

/// Label names a `switch` can dispatch to through its jump table.
fn switch_targets(stmt: &Statement, constants: &[Value]) -> Vec<String> {
    fn collect(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::Label(name) => out.push(name.clone()),
            Value::Array(a) => a.items.iter().for_each(|v| collect(v, out)),
            Value::Table(t) => t.entries.iter().for_each(|(_, v)| collect(v, out)),
            _ => {}
        }
    }
    let mut out = Vec::new();
    match stmt.operands.get(1) {
        Some(Operand::FunctionConstant(k)) => {
            if let Some(table) = constants.get(*k as usize) {
                collect(table, &mut out);
            }
        }
        Some(Operand::Immediate(v)) => collect(v, &mut out),
        _ => {}
    }
    out
}

// ─── Queries ──────────────────────────────────────────────────────

impl Cfg {
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn regions(&self) -> &RegionArena {
        &self.regions
    }

    /// Region state of statement `index`.
    pub fn state(&self, index: usize) -> RegionState {
        self.states[index]
    }

    pub fn block_of(&self, index: usize) -> usize {
        self.block_of[index]
    }

    pub fn graph(&self) -> &DiGraph<CfgNode, EdgeKind> {
        &self.graph
    }

    /// Successor blocks in ascending order, without the exit node.
    pub fn successors(&self, block: usize) -> Vec<usize> {
        self.neighbors(block, Direction::Outgoing)
    }

    pub fn predecessors(&self, block: usize) -> Vec<usize> {
        self.neighbors(block, Direction::Incoming)
    }

    fn neighbors(&self, block: usize, dir: Direction) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .graph
            .neighbors_directed(self.nodes[block], dir)
            .filter_map(|n| match self.graph[n] {
                CfgNode::Block(b) => Some(b),
                CfgNode::Exit => None,
            })
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Whether an exception can escape the function from `block`.
    pub fn exits_function(&self, block: usize) -> bool {
        self.graph
            .edges(self.nodes[block])
            .any(|e| e.target() == self.exit)
    }

    /// Every edge as `(from, to, kind)`, sorted.
    pub fn edges(&self) -> Vec<(usize, CfgNode, EdgeKind)> {
        let mut out: Vec<(usize, CfgNode, EdgeKind)> = self
            .graph
            .edge_references()
            .filter_map(|e| match self.graph[e.source()] {
                CfgNode::Block(b) => Some((b, self.graph[e.target()], *e.weight())),
                CfgNode::Exit => None,
            })
            .collect();
        out.sort_by_key(|&(b, to, _)| {
            (
                b,
                match to {
                    CfgNode::Block(t) => t,
                    CfgNode::Exit => usize::MAX,
                },
            )
        });
        out
    }

    /// Human-readable block listing, one block per line.
    pub fn dump(&self, statements: &[Statement]) -> String {
        let mut out = String::new();
        for b in &self.blocks {
            let head = statements[b.from]
                .label_name()
                .map(|l| format!(" {}", l))
                .unwrap_or_default();
            let region = match self.states[b.to] {
                Some((r, phase)) => format!(" region {} {:?}", r, phase).to_lowercase(),
                None => String::new(),
            };
            let _ = write!(out, "block {} [{}..={}]{}{} ->", b.id, b.from, b.to, head, region);
            let succ: Vec<String> = self
                .edges()
                .into_iter()
                .filter(|(from, _, _)| *from == b.id)
                .map(|(_, to, kind)| match to {
                    CfgNode::Block(t) => format!(" {} ({:?})", t, kind),
                    CfgNode::Exit => format!(" exit ({:?})", kind),
                })
                .collect();
            if succ.is_empty() {
                out.push_str(" none");
            } else {
                out.push_str(&succ.join(","));
            }
            out.push('\n');
        }
        out
    }
}
