//! IL: the register-machine instruction model.
//!
//! Three-address form over an unbounded set of virtual registers. Control
//! flow is flat: meta-label statements mark positions and branches name
//! them with `Label` operands until fixup turns them into offsets.
//!
//! A `Statement` is one opcode plus up to three operands. Whether operand 0
//! is written is a property of the opcode (see [`opcode::Output`]); this
//! module turns that into per-register read/write accesses for the passes
//! that need liveness.

pub mod list;
pub mod opcode;
pub mod value;

use std::fmt;

use crate::error::{CodegenError, Result};
use crate::types::Ty;

pub use list::{InstructionList, LabelIndex};
pub use opcode::{Opcode, Output};
pub use value::{ArrayBuilder, TableBuilder, Value};

// ─── Operand ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Immediate(Value),
    /// Virtual register before packing, physical register after.
    Register(u32, Ty),
    /// Method input slot. Slot 0 is the return value of non-void methods.
    Input(u32, Ty),
    /// Field of `this` by per-type field index.
    Field(u32, Ty),
    /// Entry of the function-local constant pool.
    FunctionConstant(u32),
    This(Ty),
    /// The in-flight exception inside a catch handler.
    Exception,
    /// Jump target; only valid before fixup.
    Label(String),
}

impl Operand {
    pub fn imm(value: Value) -> Self {
        Operand::Immediate(value)
    }

    pub fn int(v: i32) -> Self {
        Operand::Immediate(Value::I32(v))
    }

    pub fn label(name: impl Into<String>) -> Self {
        Operand::Label(name.into())
    }

    pub fn null() -> Self {
        Operand::Immediate(Value::Null)
    }

    pub fn register(&self) -> Option<u32> {
        match self {
            Operand::Register(r, _) => Some(*r),
            _ => None,
        }
    }

    pub fn label_name(&self) -> Option<&str> {
        match self {
            Operand::Label(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_label(&self) -> bool {
        matches!(self, Operand::Label(_))
    }

    /// Inferred type where the operand carries one.
    pub fn ty(&self) -> Option<Ty> {
        match self {
            Operand::Register(_, ty)
            | Operand::Input(_, ty)
            | Operand::Field(_, ty)
            | Operand::This(ty) => Some(ty.clone()),
            Operand::Immediate(v) => v.ty(),
            Operand::Exception => Some(Ty::Object),
            Operand::FunctionConstant(_) | Operand::Label(_) => None,
        }
    }

    /// True for operands that can only be read: immediates, constants, labels.
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Operand::Immediate(_) | Operand::FunctionConstant(_) | Operand::Label(_)
        )
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Immediate(v) => write!(f, "{}", v),
            Operand::Register(r, _) => write!(f, "r{}", r),
            Operand::Input(i, _) => write!(f, "in{}", i),
            Operand::Field(i, _) => write!(f, "f{}", i),
            Operand::FunctionConstant(i) => write!(f, "c{}", i),
            Operand::This(_) => write!(f, "this"),
            Operand::Exception => write!(f, "exc"),
            Operand::Label(name) => write!(f, "@{}", name),
        }
    }
}

// ─── Register accesses ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// One register touched by a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegAccess {
    pub operand: usize,
    pub reg: u32,
    pub access: Access,
}

// ─── Statement ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub op: Opcode,
    pub operands: Vec<Operand>,
    pub comment: Option<String>,
    /// Emitted by the code generator itself (e.g. fallthrough traps) rather
    /// than for a source construct.
    pub synthetic: bool,
}

impl Statement {
    pub fn new(op: Opcode, operands: Vec<Operand>) -> Self {
        debug_assert_eq!(op.arity(), operands.len(), "arity of {}", op);
        Self {
            op,
            operands,
            comment: None,
            synthetic: false,
        }
    }

    pub fn label(name: impl Into<String>) -> Self {
        Self::new(Opcode::Label, vec![Operand::label(name)])
    }

    pub fn jump(target: impl Into<String>) -> Self {
        Self::new(Opcode::Jump, vec![Operand::label(target)])
    }

    pub fn leave() -> Self {
        Self::new(Opcode::Leave, vec![])
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    pub fn is_label(&self) -> bool {
        self.op == Opcode::Label
    }

    /// Name of a meta-label statement.
    pub fn label_name(&self) -> Option<&str> {
        if self.is_label() {
            self.operands.first().and_then(Operand::label_name)
        } else {
            None
        }
    }

    /// Jump target of a branch, still symbolic.
    pub fn branch_target(&self) -> Option<&str> {
        if self.op.is_branch() {
            self.operands.last().and_then(Operand::label_name)
        } else {
            None
        }
    }

    pub fn check_arity(&self) -> Result<()> {
        if self.operands.len() != self.op.arity() {
            return Err(CodegenError::Arity {
                opcode: self.op.to_string(),
                expected: self.op.arity(),
                found: self.operands.len(),
            });
        }
        Ok(())
    }

    /// Every register this statement reads or writes, in operand order.
    ///
    /// Operand 0 follows the opcode's [`Output`] rule; every other register
    /// operand is a read.
    pub fn register_accesses(&self) -> Vec<RegAccess> {
        let mut out = Vec::new();
        for (i, operand) in self.operands.iter().enumerate() {
            let (reg, access) = match (i, self.op.output(), operand) {
                (0, Output::Write, Operand::Register(r, _)) => (*r, Access::Write),
                (0, Output::Rebind, Operand::Immediate(Value::RegisterIndex(r))) => {
                    (*r, Access::Write)
                }
                (0 | 1, Output::Range, Operand::Register(r, _)) => (*r, Access::Write),
                (_, _, Operand::Register(r, _)) => (*r, Access::Read),
                _ => continue,
            };
            out.push(RegAccess {
                operand: i,
                reg,
                access,
            });
        }
        out
    }

    /// Rewrite every register reference (including the `reref` destination
    /// index) through `map`.
    pub fn map_registers(&mut self, mut map: impl FnMut(u32) -> u32) {
        for operand in &mut self.operands {
            match operand {
                Operand::Register(r, _) => *r = map(*r),
                Operand::Immediate(Value::RegisterIndex(r)) => *r = map(*r),
                _ => {}
            }
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.label_name() {
            return write!(f, "{}:", name);
        }
        write!(f, "{}", self.op)?;
        for (i, operand) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{}{}", sep, operand)?;
        }
        if let Some(comment) = &self.comment {
            write!(f, "  ; {}", comment)?;
        }
        Ok(())
    }
}

/// Render a statement list, one per line, labels flush left.
pub fn listing(statements: &[Statement]) -> String {
    let mut out = String::new();
    for stmt in statements {
        if stmt.is_label() {
            out.push_str(&format!("{}\n", stmt));
        } else {
            out.push_str(&format!("    {}\n", stmt));
        }
    }
    out
}

// ─── Tests ────────────────────────────────────────────────────────
