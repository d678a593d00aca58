//! Expression lowering and assignable places.

use crate::error::{CodegenError, Result};
use crate::ir::{ArrayBuilder, Opcode, Operand, TableBuilder, Value};
use crate::tree::{BinaryOp, Expr, ExprKind, Literal, SymbolKind, UnaryOp};
use crate::types::Ty;

use super::{Binding, Lowerer};

/// Where an assignable expression lives.
#[derive(Clone, Debug)]
pub(crate) enum Place {
    /// Register, input slot or field of `this`: read and written in place.
    Direct(Operand, Ty),
    Static {
        field: u32,
        ty: Ty,
    },
    Field {
        object: Operand,
        field: u32,
        ty: Ty,
    },
    Property {
        object: Operand,
        property: u32,
        ty: Ty,
    },
    StaticProperty {
        property: u32,
        ty: Ty,
    },
    Element {
        collection: Operand,
        key: Operand,
        table: bool,
        ty: Ty,
    },
}

impl Place {
    pub(crate) fn ty(&self) -> &Ty {
        match self {
            Place::Direct(_, ty)
            | Place::Static { ty, .. }
            | Place::Field { ty, .. }
            | Place::Property { ty, .. }
            | Place::StaticProperty { ty, .. }
            | Place::Element { ty, .. } => ty,
        }
    }
}

// ─── Expression emission ──────────────────────────────────────────

impl<'a> Lowerer<'a> {
    pub(crate) fn expr(&mut self, e: &Expr) -> Result<Operand> {
        self.lower_expr(e, None)
    }

    pub(crate) fn expr_into(&mut self, e: &Expr, dst: Operand) -> Result<Operand> {
        self.lower_expr(e, Some(dst))
    }

    /// Expression in statement position; its value is dropped.
    pub(crate) fn expr_stmt(&mut self, e: &Expr) -> Result<()> {
        match &e.kind {
            // Postfix and prefix agree when nobody reads the result.
            ExprKind::IncDec {
                target, increment, ..
            } => {
                self.inc_dec(target, *increment, true, None)?;
            }
            _ => {
                self.expr(e)?;
            }
        }
        Ok(())
    }

    /// Lower `e`, returning the operand holding its value. When `into` is
    /// given the value ends up there and `into` is returned.
    pub(crate) fn lower_expr(&mut self, e: &Expr, into: Option<Operand>) -> Result<Operand> {
        let ty = self.type_of(e);
        match &e.kind {
            ExprKind::Literal(lit) => {
                let v = Self::literal_value(lit, &ty, e.span)?;
                Ok(self.finish(Operand::imm(v), into, &ty))
            }
            ExprKind::Name(name) => self.name(e, name, into),
            ExprKind::This => Ok(self.finish(Operand::This(ty.clone()), into, &ty)),
            ExprKind::Unary { op, operand } => self.unary(*op, operand, &ty, into),
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, &ty, into),
            ExprKind::Logical { .. } => self.materialize_bool(e, into),
            ExprKind::Assign { target, op, value } => self.assign(target, *op, value, into),
            ExprKind::IncDec {
                target,
                increment,
                prefix,
            } => self.inc_dec(target, *increment, *prefix, into),
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                let n = self.next_construct();
                let else_label = Self::label_name("cond", n, "else");
                let end_label = Self::label_name("cond", n, "end");
                let dst = self.dest(into, &ty);
                self.branch(cond, &else_label, false)?;
                self.expr_into(then_expr, dst.clone())?;
                self.emit_jump(&end_label);
                self.emit_label(&else_label);
                self.expr_into(else_expr, dst.clone())?;
                self.emit_label(&end_label);
                Ok(dst)
            }
            ExprKind::Member { object, name } => self.member(e, object, name, into),
            ExprKind::Index { object, index } => {
                let place = self.index_place(object, index, &ty)?;
                self.load(&place, into)
            }
            ExprKind::Call { callee, args } => self.call(e, callee, args, into),
            ExprKind::New {
                ty: class,
                ctor,
                args,
            } => self.new_object(class, *ctor, args, into),
            ExprKind::NewArray { len, .. } => {
                let n = self.expr(len)?;
                let dst = self.dest(into, &ty);
                self.emit(Opcode::NewArray, vec![dst.clone(), n]);
                Ok(dst)
            }
            ExprKind::ArrayLiteral { elem, items } => self.array_literal(elem, items, &ty, into),
            ExprKind::TableLiteral {
                key,
                value,
                entries,
            } => self.table_literal(key, value, entries, &ty, into),
            ExprKind::Cast { ty: target, expr } => {
                if self.type_of(expr) == *target {
                    return self.lower_expr(expr, into);
                }
                let v = self.expr(expr)?;
                let dst = self.dest(into, target);
                self.emit(
                    Opcode::Convert,
                    vec![dst.clone(), v, Operand::imm(Value::Type(target.to_string()))],
                );
                Ok(dst)
            }
            ExprKind::Is { expr, ty: test } => self.type_test(Opcode::Is, expr, test, &ty, into),
            ExprKind::As { expr, ty: test } => self.type_test(Opcode::As, expr, test, &ty, into),
            ExprKind::TypeOf(t) => {
                let dst = self.dest(into, &ty);
                self.emit(
                    Opcode::TypeOf,
                    vec![dst.clone(), Operand::imm(Value::Type(t.to_string()))],
                );
                Ok(dst)
            }
            ExprKind::Unsupported(what) => Err(CodegenError::unsupported(what.clone(), e.span)),
        }
    }

    // ── Names and members ─────────────────────────────────────────

    fn name(&mut self, e: &Expr, name: &str, into: Option<Operand>) -> Result<Operand> {
        let ty = self.type_of(e);
        let Some(sym) = self.symbol(e.id) else {
            return self.local(e, name, into);
        };
        match sym.kind {
            SymbolKind::Local => self.local(e, name, into),
            SymbolKind::Parameter => {
                let slot = self.method.input_slot(sym.index);
                Ok(self.finish(Operand::Input(slot, sym.ty.clone()), into, &ty))
            }
            SymbolKind::Field | SymbolKind::Property => {
                let place = self.place(e)?;
                self.load(&place, into)
            }
            SymbolKind::Method => {
                let target = if sym.is_static {
                    Operand::null()
                } else {
                    Operand::This(self.this_ty())
                };
                let dst = self.dest(into, &ty);
                self.emit(
                    Opcode::Bind,
                    vec![dst.clone(), target, Operand::imm(Value::Method(sym.index))],
                );
                Ok(dst)
            }
            SymbolKind::Type => Err(CodegenError::unsupported(
                format!("type '{}' used as a value", name),
                e.span,
            )),
        }
    }

    fn local(&mut self, e: &Expr, name: &str, into: Option<Operand>) -> Result<Operand> {
        match self.lookup(name).cloned() {
            Some(Binding::Register(r, ty)) => {
                Ok(self.finish(Operand::Register(r, ty.clone()), into, &ty))
            }
            Some(Binding::Constant(v)) => {
                let ty = self.type_of(e);
                Ok(self.finish(Operand::imm(v), into, &ty))
            }
            None => Err(CodegenError::UnknownSymbol {
                name: name.to_string(),
                span: e.span,
            }),
        }
    }

    fn member(
        &mut self,
        e: &Expr,
        object: &Expr,
        name: &str,
        into: Option<Operand>,
    ) -> Result<Operand> {
        let ty = self.type_of(e);
        match self.symbol(e.id) {
            Some(sym) if sym.kind == SymbolKind::Method => {
                let target = if sym.is_static {
                    Operand::null()
                } else {
                    self.expr(object)?
                };
                let dst = self.dest(into, &ty);
                self.emit(
                    Opcode::Bind,
                    vec![dst.clone(), target, Operand::imm(Value::Method(sym.index))],
                );
                Ok(dst)
            }
            Some(_) => {
                let place = self.place(e)?;
                self.load(&place, into)
            }
            None if name == "Length"
                && matches!(self.type_of(object), Ty::Array(_) | Ty::String) =>
            {
                let v = self.expr(object)?;
                let dst = self.dest(into, &ty);
                self.emit(Opcode::ArrayLen, vec![dst.clone(), v]);
                Ok(dst)
            }
            None => Err(CodegenError::UnknownSymbol {
                name: name.to_string(),
                span: e.span,
            }),
        }
    }

    // ── Operators ─────────────────────────────────────────────────

    pub(crate) fn binary_opcode(op: BinaryOp, strings: bool) -> Opcode {
        match op {
            BinaryOp::Add if strings => Opcode::Concat,
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Mod => Opcode::Mod,
            BinaryOp::BitAnd => Opcode::And,
            BinaryOp::BitOr => Opcode::Or,
            BinaryOp::BitXor => Opcode::Xor,
            BinaryOp::Shl => Opcode::Shl,
            BinaryOp::Shr => Opcode::Shr,
            BinaryOp::Eq => Opcode::Eq,
            BinaryOp::Ne => Opcode::Ne,
            BinaryOp::Lt => Opcode::Lt,
            BinaryOp::Le => Opcode::Le,
            BinaryOp::Gt => Opcode::Gt,
            BinaryOp::Ge => Opcode::Ge,
        }
    }

    fn unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        ty: &Ty,
        into: Option<Operand>,
    ) -> Result<Operand> {
        let opcode = match op {
            UnaryOp::Plus => return self.lower_expr(operand, into),
            UnaryOp::Neg => Opcode::Neg,
            UnaryOp::Not => Opcode::Not,
            UnaryOp::BitNot => Opcode::BitNot,
        };
        let v = self.expr(operand)?;
        let dst = self.dest(into, ty);
        self.emit(opcode, vec![dst.clone(), v]);
        Ok(dst)
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        ty: &Ty,
        into: Option<Operand>,
    ) -> Result<Operand> {
        let strings = self.type_of(lhs).is_string() || self.type_of(rhs).is_string();
        let a = self.expr(lhs)?;
        let a = self.pin(a, std::slice::from_ref(rhs));
        let b = self.expr(rhs)?;
        let dst = self.dest(into, ty);
        self.emit(Self::binary_opcode(op, strings), vec![dst.clone(), a, b]);
        Ok(dst)
    }

    /// `&&`/`||` in value position: branch, then store `true`/`false`.
    fn materialize_bool(&mut self, e: &Expr, into: Option<Operand>) -> Result<Operand> {
        let n = self.next_construct();
        let false_label = Self::label_name("bool", n, "false");
        let end_label = Self::label_name("bool", n, "end");
        let dst = self.dest(into, &Ty::Bool);
        self.branch(e, &false_label, false)?;
        self.emit(Opcode::Move, vec![dst.clone(), Operand::imm(Value::Bool(true))]);
        self.emit_jump(&end_label);
        self.emit_label(&false_label);
        self.emit(Opcode::Move, vec![dst.clone(), Operand::imm(Value::Bool(false))]);
        self.emit_label(&end_label);
        Ok(dst)
    }

    fn type_test(
        &mut self,
        op: Opcode,
        expr: &Expr,
        test: &Ty,
        ty: &Ty,
        into: Option<Operand>,
    ) -> Result<Operand> {
        let v = self.expr(expr)?;
        let dst = self.dest(into, ty);
        self.emit(
            op,
            vec![dst.clone(), v, Operand::imm(Value::Type(test.to_string()))],
        );
        Ok(dst)
    }

    // ── Assignment ────────────────────────────────────────────────

    fn assign(
        &mut self,
        target: &Expr,
        op: Option<BinaryOp>,
        value: &Expr,
        into: Option<Operand>,
    ) -> Result<Operand> {
        let place = self.place(target)?;
        let place = self.pin_place(place, std::slice::from_ref(value));
        let ty = place.ty().clone();
        let result = match op {
            None => match &place {
                Place::Direct(dst @ Operand::Register(..), _) if !ty.is_reference() => {
                    self.expr_into(value, dst.clone())?
                }
                _ => {
                    let v = self.expr(value)?;
                    self.store(&place, v.clone());
                    v
                }
            },
            Some(op) => {
                let strings = ty.is_string() || self.type_of(value).is_string();
                let opcode = Self::binary_opcode(op, strings);
                let current = self.load(&place, None)?;
                let current = self.pin(current, std::slice::from_ref(value));
                let rhs = self.expr(value)?;
                match &place {
                    Place::Direct(dst @ Operand::Register(..), _) => {
                        self.emit(opcode, vec![dst.clone(), current, rhs]);
                        dst.clone()
                    }
                    _ => {
                        let t = self.new_register(ty.clone());
                        self.emit(opcode, vec![t.clone(), current, rhs]);
                        self.store(&place, t.clone());
                        t
                    }
                }
            }
        };
        Ok(self.finish(result, into, &ty))
    }

    fn inc_dec(
        &mut self,
        target: &Expr,
        increment: bool,
        prefix: bool,
        into: Option<Operand>,
    ) -> Result<Operand> {
        let place = self.place(target)?;
        let ty = place.ty().clone();
        let op = if increment { Opcode::Add } else { Opcode::Sub };
        let one = Operand::imm(Self::literal_value(&Literal::Int(1), &ty, target.span)?);
        match &place {
            Place::Direct(dst @ Operand::Register(..), _) => {
                if prefix {
                    self.emit(op, vec![dst.clone(), dst.clone(), one]);
                    Ok(self.finish(dst.clone(), into, &ty))
                } else if into.as_ref() == Some(dst) {
                    // `y = y++`: the old value must survive the increment.
                    let old = self.new_register(ty.clone());
                    self.emit(Opcode::Move, vec![old.clone(), dst.clone()]);
                    self.emit(op, vec![dst.clone(), dst.clone(), one]);
                    Ok(self.finish(old, into, &ty))
                } else {
                    let old = self.dest(into, &ty);
                    self.emit(Opcode::Move, vec![old.clone(), dst.clone()]);
                    self.emit(op, vec![dst.clone(), dst.clone(), one]);
                    Ok(old)
                }
            }
            _ => {
                let current = self.load(&place, None)?;
                let old = if prefix {
                    current
                } else {
                    let t = self.new_register(ty.clone());
                    self.emit(Opcode::Move, vec![t.clone(), current]);
                    t
                };
                let updated = self.new_register(ty.clone());
                self.emit(op, vec![updated.clone(), old.clone(), one]);
                self.store(&place, updated.clone());
                let result = if prefix { updated } else { old };
                Ok(self.finish(result, into, &ty))
            }
        }
    }

    // ── Places ────────────────────────────────────────────────────

    pub(crate) fn place(&mut self, target: &Expr) -> Result<Place> {
        let ty = self.type_of(target);
        match &target.kind {
            ExprKind::Name(name) => {
                let Some(sym) = self.symbol(target.id) else {
                    return self.local_place(target, name);
                };
                match sym.kind {
                    SymbolKind::Local => self.local_place(target, name),
                    SymbolKind::Parameter => {
                        let slot = self.method.input_slot(sym.index);
                        Ok(Place::Direct(Operand::Input(slot, sym.ty.clone()), sym.ty.clone()))
                    }
                    SymbolKind::Field if sym.is_static => Ok(Place::Static {
                        field: sym.index,
                        ty,
                    }),
                    SymbolKind::Field => {
                        Ok(Place::Direct(Operand::Field(sym.index, ty.clone()), ty))
                    }
                    SymbolKind::Property if sym.is_static => Ok(Place::StaticProperty {
                        property: sym.index,
                        ty,
                    }),
                    SymbolKind::Property => Ok(Place::Property {
                        object: Operand::This(self.this_ty()),
                        property: sym.index,
                        ty,
                    }),
                    SymbolKind::Method | SymbolKind::Type => Err(CodegenError::unsupported(
                        format!("assignment to '{}'", name),
                        target.span,
                    )),
                }
            }
            ExprKind::Member { object, name } => {
                let sym = self.symbol(target.id).ok_or_else(|| CodegenError::UnknownSymbol {
                    name: name.clone(),
                    span: target.span,
                })?;
                match sym.kind {
                    SymbolKind::Field if sym.is_static => Ok(Place::Static {
                        field: sym.index,
                        ty,
                    }),
                    SymbolKind::Field if matches!(object.kind, ExprKind::This) => {
                        Ok(Place::Direct(Operand::Field(sym.index, ty.clone()), ty))
                    }
                    SymbolKind::Field => {
                        let object = self.expr(object)?;
                        Ok(Place::Field {
                            object,
                            field: sym.index,
                            ty,
                        })
                    }
                    SymbolKind::Property if sym.is_static => Ok(Place::StaticProperty {
                        property: sym.index,
                        ty,
                    }),
                    SymbolKind::Property => {
                        let object = self.expr(object)?;
                        Ok(Place::Property {
                            object,
                            property: sym.index,
                            ty,
                        })
                    }
                    _ => Err(CodegenError::unsupported(
                        format!("member '{}' is not assignable", name),
                        target.span,
                    )),
                }
            }
            ExprKind::Index { object, index } => self.index_place(object, index, &ty),
            _ => Err(CodegenError::unsupported("assignment target", target.span)),
        }
    }

    fn local_place(&self, target: &Expr, name: &str) -> Result<Place> {
        match self.lookup(name) {
            Some(Binding::Register(r, ty)) => {
                Ok(Place::Direct(Operand::Register(*r, ty.clone()), ty.clone()))
            }
            Some(Binding::Constant(_)) => Err(CodegenError::unsupported(
                format!("assignment to constant '{}'", name),
                target.span,
            )),
            None => Err(CodegenError::UnknownSymbol {
                name: name.to_string(),
                span: target.span,
            }),
        }
    }

    fn index_place(&mut self, object: &Expr, index: &Expr, ty: &Ty) -> Result<Place> {
        let table = matches!(self.type_of(object), Ty::Table(..));
        let collection = self.expr(object)?;
        let collection = self.pin(collection, std::slice::from_ref(index));
        let key = self.expr(index)?;
        Ok(Place::Element {
            collection,
            key,
            table,
            ty: ty.clone(),
        })
    }

    /// Pin the object and key operands of `place` against `later`.
    fn pin_place(&mut self, place: Place, later: &[Expr]) -> Place {
        match place {
            Place::Field { object, field, ty } => Place::Field {
                object: self.pin(object, later),
                field,
                ty,
            },
            Place::Property {
                object,
                property,
                ty,
            } => Place::Property {
                object: self.pin(object, later),
                property,
                ty,
            },
            Place::Element {
                collection,
                key,
                table,
                ty,
            } => Place::Element {
                collection: self.pin(collection, later),
                key: self.pin(key, later),
                table,
                ty,
            },
            other => other,
        }
    }

    pub(crate) fn load(&mut self, place: &Place, into: Option<Operand>) -> Result<Operand> {
        let (op, operands_after_dst, ty) = match place {
            Place::Direct(operand, ty) => return Ok(self.finish(operand.clone(), into, ty)),
            Place::Static { field, ty } => (
                Opcode::GetStatic,
                vec![Operand::imm(Value::FieldRef(*field))],
                ty,
            ),
            Place::Field { object, field, ty } => (
                Opcode::GetField,
                vec![object.clone(), Operand::imm(Value::FieldRef(*field))],
                ty,
            ),
            Place::Property {
                object,
                property,
                ty,
            } => (
                Opcode::GetProperty,
                vec![object.clone(), Operand::imm(Value::Property(*property))],
                ty,
            ),
            Place::StaticProperty { property, ty } => (
                Opcode::GetStaticProperty,
                vec![Operand::imm(Value::Property(*property))],
                ty,
            ),
            Place::Element {
                collection,
                key,
                table,
                ty,
            } => (
                if *table {
                    Opcode::TableGet
                } else {
                    Opcode::ArrayGet
                },
                vec![collection.clone(), key.clone()],
                ty,
            ),
        };
        let dst = self.dest(into, ty);
        let mut operands = vec![dst.clone()];
        operands.extend(operands_after_dst);
        self.emit(op, operands);
        Ok(dst)
    }

    pub(crate) fn store(&mut self, place: &Place, value: Operand) {
        match place {
            Place::Direct(dst, ty) => self.copy_into(dst, value, ty),
            Place::Static { field, .. } => self.emit(
                Opcode::SetStatic,
                vec![Operand::imm(Value::FieldRef(*field)), value],
            ),
            Place::Field { object, field, .. } => self.emit(
                Opcode::SetField,
                vec![object.clone(), Operand::imm(Value::FieldRef(*field)), value],
            ),
            Place::Property {
                object, property, ..
            } => self.emit(
                Opcode::SetProperty,
                vec![object.clone(), Operand::imm(Value::Property(*property)), value],
            ),
            Place::StaticProperty { property, .. } => self.emit(
                Opcode::SetStaticProperty,
                vec![Operand::imm(Value::Property(*property)), value],
            ),
            Place::Element {
                collection,
                key,
                table,
                ..
            } => {
                let op = if *table {
                    Opcode::TableSet
                } else {
                    Opcode::ArraySet
                };
                self.emit(op, vec![collection.clone(), key.clone(), value]);
            }
        }
    }

    // ── Aggregates ────────────────────────────────────────────────

    fn array_literal(
        &mut self,
        elem: &Ty,
        items: &[Expr],
        ty: &Ty,
        into: Option<Operand>,
    ) -> Result<Operand> {
        if items.iter().all(|i| matches!(i.kind, ExprKind::Literal(_))) {
            let mut builder = ArrayBuilder::new(elem.clone());
            for item in items {
                if let ExprKind::Literal(lit) = &item.kind {
                    builder.push(Self::literal_value(lit, elem, item.span)?);
                }
            }
            let k = self.add_constant(Value::Array(builder));
            return Ok(self.finish(Operand::FunctionConstant(k), into, ty));
        }
        let dst = self.dest(into, ty);
        self.emit(
            Opcode::NewArray,
            vec![dst.clone(), Operand::int(items.len() as i32)],
        );
        for (i, item) in items.iter().enumerate() {
            let v = self.expr(item)?;
            self.emit(Opcode::ArraySet, vec![dst.clone(), Operand::int(i as i32), v]);
        }
        Ok(dst)
    }

    fn table_literal(
        &mut self,
        key_ty: &Ty,
        value_ty: &Ty,
        entries: &[(Expr, Expr)],
        ty: &Ty,
        into: Option<Operand>,
    ) -> Result<Operand> {
        let literal = |e: &Expr| matches!(e.kind, ExprKind::Literal(_));
        if entries.iter().all(|(k, v)| literal(k) && literal(v)) {
            let mut builder = TableBuilder::new(key_ty.clone(), value_ty.clone());
            for (k, v) in entries {
                if let (ExprKind::Literal(kl), ExprKind::Literal(vl)) = (&k.kind, &v.kind) {
                    builder.insert(
                        Self::literal_value(kl, key_ty, k.span)?,
                        Self::literal_value(vl, value_ty, v.span)?,
                    );
                }
            }
            let k = self.add_constant(Value::Table(builder));
            return Ok(self.finish(Operand::FunctionConstant(k), into, ty));
        }
        let dst = self.dest(into, ty);
        self.emit(Opcode::NewTable, vec![dst.clone()]);
        for (k, v) in entries {
            let key = self.expr(k)?;
            let key = self.pin(key, std::slice::from_ref(v));
            let value = self.expr(v)?;
            self.emit(Opcode::TableSet, vec![dst.clone(), key, value]);
        }
        Ok(dst)
    }
}
