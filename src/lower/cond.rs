//! Branch-on-condition lowering.
//!
//! One routine serves both "jump if true" and "jump if false" callers:
//! `!` flips the requested polarity, `&&`/`||` stage their operands through
//! a skip label, and relational operators become fused compare-and-branch
//! opcodes (inverted when jumping on false).

use crate::error::Result;
use crate::ir::{Opcode, Operand};
use crate::tree::{Expr, ExprKind, Literal, LogicalOp, UnaryOp};

use super::Lowerer;

impl<'a> Lowerer<'a> {
    /// Emit code that jumps to `target` exactly when `cond` evaluates to
    /// `when`, and falls through otherwise.
    pub(crate) fn branch(&mut self, cond: &Expr, target: &str, when: bool) -> Result<()> {
        match &cond.kind {
            ExprKind::Literal(Literal::Bool(b)) => {
                if *b == when {
                    self.emit_jump(target);
                }
                Ok(())
            }
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand,
            } => self.branch(operand, target, !when),
            ExprKind::Logical { op, lhs, rhs } => {
                // `a && b` jumps on false as soon as either side is false;
                // `a || b` jumps on true as soon as either side is true.
                let short_circuits = matches!(
                    (op, when),
                    (LogicalOp::And, false) | (LogicalOp::Or, true)
                );
                if short_circuits {
                    self.branch(lhs, target, when)?;
                    self.branch(rhs, target, when)
                } else {
                    let kind = match op {
                        LogicalOp::And => "and",
                        LogicalOp::Or => "or",
                    };
                    let n = self.next_construct();
                    let skip = Self::label_name(kind, n, "skip");
                    self.branch(lhs, &skip, !when)?;
                    self.branch(rhs, target, when)?;
                    self.emit_label(&skip);
                    Ok(())
                }
            }
            ExprKind::Binary { op, lhs, rhs } if op.is_relational() => {
                let Some(mut jump) = Self::binary_opcode(*op, false).branch_for() else {
                    return self.branch_on_value(cond, target, when);
                };
                let a = self.expr(lhs)?;
                let a = self.pin(a, std::slice::from_ref(rhs.as_ref()));
                let b = self.expr(rhs)?;
                if !when {
                    jump = jump.inverted().unwrap_or(jump);
                }
                self.emit(jump, vec![a, b, Operand::label(target)]);
                Ok(())
            }
            _ => self.branch_on_value(cond, target, when),
        }
    }

    fn branch_on_value(&mut self, cond: &Expr, target: &str, when: bool) -> Result<()> {
        let v = self.expr(cond)?;
        let op = if when {
            Opcode::JumpTrue
        } else {
            Opcode::JumpFalse
        };
        self.emit(op, vec![v, Operand::label(target)]);
        Ok(())
    }
}
