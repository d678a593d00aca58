//! Calls, delegate invocation and object construction.
//!
//! Arguments are evaluated left to right into operands first and only then
//! pushed with `arg`, so nested calls inside arguments never interleave
//! their own `arg` sequences with ours. An argument read in place is pinned
//! to a temporary when a later argument writes it.

use tracing::trace;

use crate::error::Result;
use crate::ir::{Opcode, Operand, Value};
use crate::tree::{CtorRef, Expr, ExprKind, SymbolKind};
use crate::types::Ty;

use super::Lowerer;

impl<'a> Lowerer<'a> {
    pub(crate) fn call(
        &mut self,
        e: &Expr,
        callee: &Expr,
        args: &[Expr],
        into: Option<Operand>,
    ) -> Result<Operand> {
        let ret = self.type_of(e);
        let method = self
            .symbol(callee.id)
            .filter(|sym| sym.kind == SymbolKind::Method);

        let Some(sym) = method else {
            // Anything else being called is a delegate value.
            let delegate = self.expr(callee)?;
            let delegate = self.pin(delegate, args);
            self.push_args(args)?;
            return Ok(if ret.is_void() {
                self.emit(Opcode::CallDelegateVoid, vec![delegate]);
                Operand::null()
            } else {
                let dst = self.dest(into, &ret);
                self.emit(Opcode::CallDelegate, vec![dst.clone(), delegate]);
                dst
            });
        };

        if sym.implicit {
            self.declare_implicit(sym.index, &sym.name);
        }
        let target = Operand::imm(Value::Method(sym.index));

        let receiver = if sym.is_static {
            None
        } else {
            Some(match &callee.kind {
                ExprKind::Member { object, .. } => {
                    let object = self.expr(object)?;
                    self.pin(object, args)
                }
                _ => Operand::This(self.this_ty()),
            })
        };

        match receiver {
            Some(object) if sym.is_virtual => {
                self.push_args(args)?;
                if ret.is_void() {
                    self.emit(Opcode::CallVirtVoid, vec![object, target]);
                    Ok(Operand::null())
                } else {
                    let dst = self.dest(into, &ret);
                    self.emit(Opcode::CallVirt, vec![dst.clone(), object, target]);
                    Ok(dst)
                }
            }
            receiver => {
                // Static dispatch: the receiver, if any, is the first argument.
                let mut values = Vec::with_capacity(args.len() + 1);
                values.extend(receiver);
                for (i, arg) in args.iter().enumerate() {
                    let v = self.expr(arg)?;
                    values.push(self.pin(v, &args[i + 1..]));
                }
                for v in values {
                    self.emit(Opcode::Arg, vec![v]);
                }
                if ret.is_void() {
                    self.emit(Opcode::CallVoid, vec![target]);
                    Ok(Operand::null())
                } else {
                    let dst = self.dest(into, &ret);
                    self.emit(Opcode::Call, vec![dst.clone(), target]);
                    Ok(dst)
                }
            }
        }
    }

    /// `new T(args)`: allocate, then run the constructor on the new object.
    pub(crate) fn new_object(
        &mut self,
        class: &Ty,
        ctor: Option<CtorRef>,
        args: &[Expr],
        into: Option<Operand>,
    ) -> Result<Operand> {
        let dst = self.dest(into, class);
        self.emit(
            Opcode::New,
            vec![dst.clone(), Operand::imm(Value::Type(class.to_string()))],
        );
        if let Some(ctor) = ctor {
            if ctor.implicit {
                self.declare_implicit(ctor.index, &format!("{}::.ctor", class));
            }
            self.push_args(args)?;
            self.emit(
                Opcode::CallVirtVoid,
                vec![dst.clone(), Operand::imm(Value::Method(ctor.index))],
            );
        }
        Ok(dst)
    }

    fn push_args(&mut self, args: &[Expr]) -> Result<()> {
        let mut values = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let v = self.expr(arg)?;
            values.push(self.pin(v, &args[i + 1..]));
        }
        for v in values {
            self.emit(Opcode::Arg, vec![v]);
        }
        Ok(())
    }

    fn declare_implicit(&mut self, index: u32, name: &str) {
        if self.module.declare(index, name, true) {
            trace!(index, name, "declared implicit callee");
        }
    }
}
