//! Emission primitives, label naming, scopes and literal conversion.

use crate::error::{CodegenError, Result};
use crate::ir::{Opcode, Operand, Statement, Value};
use crate::span::Span;
use crate::tree::{Expr, ExprKind, Literal, NodeId, Symbol};
use crate::types::Ty;

use super::{Binding, Lowerer, Scope};

impl<'a> Lowerer<'a> {
    // ── Emission ──────────────────────────────────────────────────

    pub(crate) fn emit(&mut self, op: Opcode, operands: Vec<Operand>) {
        self.code.push(Statement::new(op, operands));
    }

    pub(crate) fn emit_stmt(&mut self, stmt: Statement) {
        self.code.push(stmt);
    }

    pub(crate) fn emit_label(&mut self, name: &str) {
        self.code.push(Statement::label(name));
    }

    pub(crate) fn emit_jump(&mut self, target: &str) {
        self.code.push(Statement::jump(target));
    }

    /// Attach a comment to the last statement when comments are enabled.
    pub(crate) fn annotate(&mut self, comment: impl FnOnce() -> String) {
        if self.comments {
            if let Some(last) = self.code.last_mut() {
                last.comment = Some(comment());
            }
        }
    }

    /// False right after an unconditional exit: anything emitted now is dead
    /// until the next label.
    pub(crate) fn reachable(&self) -> bool {
        self.code
            .last()
            .map_or(true, |s| !s.op.is_unconditional_exit())
    }

    // ── Label generation ──────────────────────────────────────────

    /// Claim the next construct number.
    pub(crate) fn next_construct(&mut self) -> u32 {
        let n = self.label_counter;
        self.label_counter += 1;
        n
    }

    pub(crate) fn label_name(kind: &str, n: u32, part: &str) -> String {
        format!("{}{}_{}", kind, n, part)
    }

    // ── Registers and constants ───────────────────────────────────

    pub(crate) fn new_register(&mut self, ty: Ty) -> Operand {
        let r = self.next_register;
        self.next_register += 1;
        Operand::Register(r, ty)
    }

    /// `into` if the caller supplied one, a fresh temporary otherwise.
    pub(crate) fn dest(&mut self, into: Option<Operand>, ty: &Ty) -> Operand {
        match into {
            Some(dst) => dst,
            None => self.new_register(ty.clone()),
        }
    }

    pub(crate) fn add_constant(&mut self, value: Value) -> u32 {
        if let Some(i) = self.constants.iter().position(|c| *c == value) {
            return i as u32;
        }
        self.constants.push(value);
        (self.constants.len() - 1) as u32
    }

    /// Store `src` into `dst`: reference types rebind, value types copy.
    pub(crate) fn copy_into(&mut self, dst: &Operand, src: Operand, ty: &Ty) {
        if *dst == src {
            return;
        }
        if ty.is_reference() {
            let target = match dst {
                Operand::Register(r, _) => Operand::imm(Value::RegisterIndex(*r)),
                other => other.clone(),
            };
            self.emit(Opcode::ReRef, vec![target, src]);
        } else {
            self.emit(Opcode::Move, vec![dst.clone(), src]);
        }
    }

    /// Hand `value` to the caller, copying it into `into` if one was given.
    pub(crate) fn finish(&mut self, value: Operand, into: Option<Operand>, ty: &Ty) -> Operand {
        match into {
            Some(dst) => {
                self.copy_into(&dst, value, ty);
                dst
            }
            None => value,
        }
    }

    // ── Evaluation order ──────────────────────────────────────────

    /// Copy `value` into a fresh register if evaluating `later` could write
    /// the local, parameter or field it reads in place. Operands are
    /// evaluated left to right but read only when the consumer runs.
    pub(crate) fn pin(&mut self, value: Operand, later: &[Expr]) -> Operand {
        let clobbered = match &value {
            Operand::Field(..) => later.iter().any(|e| e.any(&writes_field)),
            Operand::Input(..) => later.iter().any(|e| e.any(&writes_variable)),
            Operand::Register(r, _) if self.register_names.contains_key(r) => {
                later.iter().any(|e| e.any(&writes_variable))
            }
            _ => false,
        };
        if !clobbered {
            return value;
        }
        let ty = value.ty().unwrap_or(Ty::Object);
        let t = self.new_register(ty.clone());
        self.copy_into(&t, value, &ty);
        t
    }

    // ── Scopes ────────────────────────────────────────────────────

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Pop the innermost scope, nullifying its registers if the exit point
    /// is reachable.
    pub(crate) fn pop_scope(&mut self) {
        if let Some(scope) = self.scopes.pop() {
            if self.reachable() {
                self.nullify_bindings(&scope.bindings);
            }
        }
    }

    /// Nullify every scope deeper than `depth` without popping them
    /// (`break`/`continue` out of nested blocks).
    pub(crate) fn nullify_scopes_from(&mut self, depth: usize) {
        let regs: Vec<(String, Binding)> = self
            .scopes
            .iter()
            .skip(depth)
            .rev()
            .flat_map(|s| s.bindings.iter().cloned())
            .collect();
        self.nullify_bindings(&regs);
    }

    fn nullify_bindings(&mut self, bindings: &[(String, Binding)]) {
        for (name, binding) in bindings {
            if let Binding::Register(r, ty) = binding {
                let reg = Operand::Register(*r, ty.clone());
                self.emit(Opcode::Nullify, vec![reg.clone(), reg]);
                self.annotate(|| name.clone());
            }
        }
    }

    /// Allocate a register for a new local and bind it in the current scope.
    pub(crate) fn declare_local(&mut self, name: &str, ty: &Ty) -> Operand {
        let r = self.next_register;
        self.next_register += 1;
        self.register_names.insert(r, name.to_string());
        self.bind(name, Binding::Register(r, ty.clone()));
        Operand::Register(r, ty.clone())
    }

    pub(crate) fn bind(&mut self, name: &str, binding: Binding) {
        if self.scopes.is_empty() {
            self.push_scope();
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.bindings.push((name.to_string(), binding));
        }
    }

    /// Innermost binding of `name`.
    pub(crate) fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|s| s.bindings.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, b)| b)
    }

    // ── Oracle access ─────────────────────────────────────────────

    pub(crate) fn symbol(&self, id: NodeId) -> Option<&'a Symbol> {
        self.oracle.symbol(id)
    }

    pub(crate) fn type_of(&self, e: &Expr) -> Ty {
        self.oracle
            .type_of(e.id)
            .cloned()
            .or_else(|| self.symbol(e.id).map(|s| s.ty.clone()))
            .unwrap_or(Ty::Object)
    }

    pub(crate) fn this_ty(&self) -> Ty {
        Ty::Named(self.method.class.clone())
    }

    // ── Literals ──────────────────────────────────────────────────

    /// Immediate for a literal of static type `ty`.
    pub(crate) fn literal_value(lit: &Literal, ty: &Ty, span: Span) -> Result<Value> {
        Ok(match lit {
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Char(c) => match ty {
                Ty::Char | Ty::Object => Value::Char(*c),
                _ => Self::int_value(*c as i64, ty, span)?,
            },
            Literal::Int(v) => Self::int_value(*v, ty, span)?,
            Literal::UInt(v) => match ty {
                Ty::U64 => Value::U64(*v),
                _ => Self::int_value(*v as i64, ty, span)?,
            },
            Literal::Float(f) => match ty {
                Ty::F32 => Value::F32(*f as f32),
                _ => Value::F64(*f),
            },
            Literal::String(s) => Value::String(s.clone()),
            Literal::Null => Value::Null,
        })
    }

    fn int_value(v: i64, ty: &Ty, span: Span) -> Result<Value> {
        Ok(match ty {
            Ty::I8 => Value::I8(v as i8),
            Ty::U8 => Value::U8(v as u8),
            Ty::I16 => Value::I16(v as i16),
            Ty::U16 => Value::U16(v as u16),
            Ty::I32 | Ty::Object => Value::I32(v as i32),
            Ty::U32 => Value::U32(v as u32),
            Ty::I64 => Value::I64(v),
            Ty::U64 => Value::U64(v as u64),
            Ty::F32 => Value::F32(v as f32),
            Ty::F64 => Value::F64(v as f64),
            Ty::Char => Value::Char(char::from_u32(v as u32).unwrap_or('\0')),
            other => {
                return Err(CodegenError::unsupported(
                    format!("integer literal of type {}", other),
                    span,
                ))
            }
        })
    }
}

fn writes_variable(kind: &ExprKind) -> bool {
    matches!(kind, ExprKind::Assign { .. } | ExprKind::IncDec { .. })
}

/// Calls and constructors may write fields of `this` too.
fn writes_field(kind: &ExprKind) -> bool {
    writes_variable(kind) || matches!(kind, ExprKind::Call { .. } | ExprKind::New { .. })
}
