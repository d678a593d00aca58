//! Block, statement, switch and try lowering.

use tracing::warn;

use crate::error::{CodegenError, Result};
use crate::ir::{Opcode, Operand, Statement, TableBuilder, Value};
use crate::span::Span;
use crate::tree::{
    Block, CaseLabel, CatchClause, Expr, ExprKind, Stmt, StmtKind, SwitchSection,
};
use crate::types::Ty;

use super::{Binding, Breakable, HandlerPhase, Lowerer};

// ─── Blocks and statements ────────────────────────────────────────

impl<'a> Lowerer<'a> {
    pub(crate) fn block(&mut self, block: &Block) -> Result<()> {
        self.push_scope();
        for stmt in &block.stmts {
            self.stmt(stmt)?;
        }
        self.pop_scope();
        Ok(())
    }

    pub(crate) fn stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::Block(block) => self.block(block),
            StmtKind::Local {
                name,
                ty,
                init,
                is_const,
            } => self.local_decl(name, ty, init.as_ref(), *is_const, stmt.span),
            StmtKind::Expr(e) => self.expr_stmt(e),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.if_stmt(cond, then_branch, else_branch.as_deref()),
            StmtKind::While { cond, body } => self.while_stmt(cond, body),
            StmtKind::DoWhile { body, cond } => self.do_while_stmt(body, cond),
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => self.for_stmt(init, cond.as_ref(), step, body),
            StmtKind::Foreach {
                var,
                var_ty,
                collection,
                body,
            } => self.foreach_stmt(var, var_ty, collection, body),
            StmtKind::Switch { subject, sections } => self.switch_stmt(subject, sections),
            StmtKind::Break => self.break_stmt(stmt.span),
            StmtKind::Continue => self.continue_stmt(stmt.span),
            StmtKind::Return(value) => self.return_stmt(value.as_ref()),
            StmtKind::Throw(Some(e)) => {
                let v = self.expr(e)?;
                self.emit(Opcode::Throw, vec![v]);
                Ok(())
            }
            StmtKind::Throw(None) => {
                if !self.handlers.contains(&HandlerPhase::Catch) {
                    return Err(CodegenError::unsupported(
                        "rethrow outside of a catch clause",
                        stmt.span,
                    ));
                }
                self.emit(Opcode::Rethrow, vec![]);
                Ok(())
            }
            StmtKind::Try {
                body,
                catches,
                finally,
            } => self.try_stmt(body, catches, finally.as_ref()),
            StmtKind::Empty => Ok(()),
            StmtKind::Unsupported(what) => Err(CodegenError::unsupported(what.clone(), stmt.span)),
        }
    }

    fn local_decl(
        &mut self,
        name: &str,
        ty: &Ty,
        init: Option<&Expr>,
        is_const: bool,
        span: Span,
    ) -> Result<()> {
        if is_const {
            let value = match init.map(|e| &e.kind) {
                Some(ExprKind::Literal(lit)) => Self::literal_value(lit, ty, span)?,
                _ => {
                    return Err(CodegenError::NonLiteralConstant {
                        name: name.to_string(),
                        span,
                    })
                }
            };
            self.bind(name, Binding::Constant(value));
            return Ok(());
        }

        // The initializer is lowered before the name is bound.
        let r = self.next_register;
        self.next_register += 1;
        if let Some(init) = init {
            self.expr_into(init, Operand::Register(r, ty.clone()))?;
            self.annotate(|| format!("{} {}", ty, name));
        }
        self.register_names.insert(r, name.to_string());
        self.bind(name, Binding::Register(r, ty.clone()));
        Ok(())
    }

    // ── Conditionals and loops ────────────────────────────────────

    fn if_stmt(
        &mut self,
        cond: &Expr,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
    ) -> Result<()> {
        let n = self.next_construct();
        let end = Self::label_name("if", n, "end");
        match else_branch {
            None => {
                self.branch(cond, &end, false)?;
                self.stmt(then_branch)?;
            }
            Some(else_branch) => {
                let else_label = Self::label_name("if", n, "else");
                self.branch(cond, &else_label, false)?;
                self.stmt(then_branch)?;
                if self.reachable() {
                    self.emit_jump(&end);
                }
                self.emit_label(&else_label);
                self.stmt(else_branch)?;
            }
        }
        self.emit_label(&end);
        Ok(())
    }

    fn loop_body(&mut self, body: &Stmt, break_label: &str, continue_label: &str) -> Result<()> {
        self.breakables.push(Breakable {
            break_label: break_label.to_string(),
            continue_label: Some(continue_label.to_string()),
            depth: self.scopes.len(),
        });
        let result = self.stmt(body);
        self.breakables.pop();
        result
    }

    fn while_stmt(&mut self, cond: &Expr, body: &Stmt) -> Result<()> {
        let n = self.next_construct();
        let cond_label = Self::label_name("while", n, "cond");
        let end = Self::label_name("while", n, "end");
        self.emit_label(&cond_label);
        self.branch(cond, &end, false)?;
        self.loop_body(body, &end, &cond_label)?;
        if self.reachable() {
            self.emit_jump(&cond_label);
        }
        self.emit_label(&end);
        Ok(())
    }

    fn do_while_stmt(&mut self, body: &Stmt, cond: &Expr) -> Result<()> {
        let n = self.next_construct();
        let body_label = Self::label_name("do", n, "body");
        let cond_label = Self::label_name("do", n, "cond");
        let end = Self::label_name("do", n, "end");
        self.emit_label(&body_label);
        self.loop_body(body, &end, &cond_label)?;
        self.emit_label(&cond_label);
        self.branch(cond, &body_label, true)?;
        self.emit_label(&end);
        Ok(())
    }

    fn for_stmt(
        &mut self,
        init: &[Stmt],
        cond: Option<&Expr>,
        step: &[Expr],
        body: &Stmt,
    ) -> Result<()> {
        let n = self.next_construct();
        let cond_label = Self::label_name("for", n, "cond");
        let step_label = Self::label_name("for", n, "step");
        let end = Self::label_name("for", n, "end");

        self.push_scope();
        for stmt in init {
            self.stmt(stmt)?;
        }
        self.emit_label(&cond_label);
        if let Some(cond) = cond {
            self.branch(cond, &end, false)?;
        }
        self.loop_body(body, &end, &step_label)?;
        self.emit_label(&step_label);
        for e in step {
            self.expr_stmt(e)?;
        }
        self.emit_jump(&cond_label);
        self.emit_label(&end);
        self.pop_scope();
        Ok(())
    }

    /// `foreach` over an array or string: index loop with `alen`/`aget`.
    fn foreach_stmt(
        &mut self,
        var: &str,
        var_ty: &Ty,
        collection: &Expr,
        body: &Stmt,
    ) -> Result<()> {
        let seq_ty = self.type_of(collection);
        if !matches!(seq_ty, Ty::Array(_) | Ty::String) {
            return Err(CodegenError::unsupported(
                format!("foreach over {}", seq_ty),
                collection.span,
            ));
        }
        let n = self.next_construct();
        let cond_label = Self::label_name("foreach", n, "cond");
        let step_label = Self::label_name("foreach", n, "step");
        let end = Self::label_name("foreach", n, "end");

        self.push_scope();
        let seq_name = format!("foreach{}$seq", n);
        let seq = self.declare_local(&seq_name, &seq_ty);
        self.expr_into(collection, seq.clone())?;
        let index = self.new_register(Ty::I32);
        let len = self.new_register(Ty::I32);
        self.emit(Opcode::Move, vec![index.clone(), Operand::int(0)]);
        self.emit(Opcode::ArrayLen, vec![len.clone(), seq.clone()]);

        self.emit_label(&cond_label);
        self.emit(
            Opcode::JumpGe,
            vec![index.clone(), len, Operand::label(&end)],
        );
        self.breakables.push(Breakable {
            break_label: end.clone(),
            continue_label: Some(step_label.clone()),
            depth: self.scopes.len(),
        });
        self.push_scope();
        let item = self.declare_local(var, var_ty);
        self.emit(Opcode::ArrayGet, vec![item, seq, index.clone()]);
        let result = self.stmt(body);
        self.pop_scope();
        self.breakables.pop();
        result?;

        self.emit_label(&step_label);
        self.emit(
            Opcode::Add,
            vec![index.clone(), index, Operand::int(1)],
        );
        self.emit_jump(&cond_label);
        self.emit_label(&end);
        self.pop_scope();
        Ok(())
    }

    // ── Jumps out of constructs ───────────────────────────────────

    fn break_stmt(&mut self, span: Span) -> Result<()> {
        let Some(target) = self.breakables.last() else {
            return Err(CodegenError::NoEnclosingTarget {
                keyword: "break",
                span,
            });
        };
        let (label, depth) = (target.break_label.clone(), target.depth);
        self.nullify_scopes_from(depth);
        self.emit_jump(&label);
        Ok(())
    }

    fn continue_stmt(&mut self, span: Span) -> Result<()> {
        let target = self
            .breakables
            .iter()
            .rev()
            .find_map(|b| b.continue_label.clone().map(|l| (l, b.depth)));
        let Some((label, depth)) = target else {
            return Err(CodegenError::NoEnclosingTarget {
                keyword: "continue",
                span,
            });
        };
        self.nullify_scopes_from(depth);
        self.emit_jump(&label);
        Ok(())
    }

    /// The result goes to input slot 0, rebinding it.
    fn return_stmt(&mut self, value: Option<&Expr>) -> Result<()> {
        if let Some(e) = value {
            let v = self.expr(e)?;
            let ret = Operand::Input(0, self.method.return_ty.clone());
            self.emit(Opcode::ReRef, vec![ret, v]);
        }
        self.emit(Opcode::Return, vec![]);
        Ok(())
    }
}

// ─── Switch ───────────────────────────────────────────────────────

impl<'a> Lowerer<'a> {
    /// String subjects dispatch through a label-valued jump table constant;
    /// everything else compares case by case in source order.
    fn switch_stmt(&mut self, subject: &Expr, sections: &[SwitchSection]) -> Result<()> {
        let n = self.next_construct();
        let end = Self::label_name("switch", n, "end");
        let subject_ty = self.type_of(subject);
        let value = self.expr(subject)?;
        if sections.is_empty() {
            warn!(function = %self.method.name, "switch without sections");
            return Ok(());
        }

        let case_labels: Vec<String> = (0..sections.len())
            .map(|i| Self::label_name("switch", n, &format!("case{}", i)))
            .collect();
        let default = sections
            .iter()
            .position(|s| s.labels.contains(&CaseLabel::Default))
            .map_or_else(|| end.clone(), |i| case_labels[i].clone());

        if subject_ty.is_string() {
            let mut table = TableBuilder::new(Ty::String, Ty::I32);
            for (section, target) in sections.iter().zip(&case_labels) {
                for label in &section.labels {
                    if let CaseLabel::Case(lit) = label {
                        let key = Self::literal_value(lit, &Ty::String, subject.span)?;
                        table.insert(key, Value::label(target));
                    }
                }
            }
            let k = self.add_constant(Value::Table(table));
            self.emit(Opcode::Switch, vec![value, Operand::FunctionConstant(k)]);
        } else {
            for (section, target) in sections.iter().zip(&case_labels) {
                for label in &section.labels {
                    if let CaseLabel::Case(lit) = label {
                        let case = Self::literal_value(lit, &subject_ty, subject.span)?;
                        self.emit(
                            Opcode::JumpEq,
                            vec![value.clone(), Operand::imm(case), Operand::label(target)],
                        );
                    }
                }
            }
        }
        self.emit_jump(&default);

        self.push_scope();
        self.breakables.push(Breakable {
            break_label: end.clone(),
            continue_label: None,
            depth: self.scopes.len(),
        });
        let mut result = Ok(());
        for (section, target) in sections.iter().zip(&case_labels) {
            result = self.switch_section(section, target);
            if result.is_err() {
                break;
            }
        }
        self.breakables.pop();
        result?;
        self.emit_label(&end);
        self.pop_scope();
        Ok(())
    }

    fn switch_section(&mut self, section: &SwitchSection, label: &str) -> Result<()> {
        self.emit_label(label);
        for stmt in &section.body {
            self.stmt(stmt)?;
        }
        if !section.body.last().is_some_and(Stmt::is_explicit_exit) {
            self.emit_stmt(
                Statement::new(
                    Opcode::Trap,
                    vec![Operand::imm(Value::String("illegal fallthrough".into()))],
                )
                .synthetic(),
            );
        }
        Ok(())
    }
}

// ─── Try / catch / finally ────────────────────────────────────────

impl<'a> Lowerer<'a> {
    /// Layout: `try`, body, jump to end, catch handlers, finally body,
    /// `endfinally`, end label.
    fn try_stmt(
        &mut self,
        body: &Block,
        catches: &[CatchClause],
        finally: Option<&Block>,
    ) -> Result<()> {
        let n = self.next_construct();
        let catch_label = (!catches.is_empty()).then(|| Self::label_name("try", n, "catch"));
        let finally_label = finally.map(|_| Self::label_name("try", n, "finally"));
        let end = Self::label_name("try", n, "end");

        let descriptor = |label: &Option<String>| match label {
            Some(l) => Operand::label(l),
            None => Operand::null(),
        };
        self.emit(
            Opcode::Try,
            vec![
                descriptor(&catch_label),
                descriptor(&finally_label),
                Operand::label(&end),
            ],
        );

        self.handlers.push(HandlerPhase::Try);
        let result = self.try_parts(n, body, catches, catch_label, finally, finally_label, &end);
        self.handlers.pop();
        result?;
        self.emit_label(&end);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn try_parts(
        &mut self,
        n: u32,
        body: &Block,
        catches: &[CatchClause],
        catch_label: Option<String>,
        finally: Option<&Block>,
        finally_label: Option<String>,
        end: &str,
    ) -> Result<()> {
        self.block(body)?;
        if self.reachable() {
            self.emit_jump(end);
        }
        if let Some(label) = catch_label {
            self.set_handler_phase(HandlerPhase::Catch);
            self.emit_label(&label);
            self.catch_clauses(n, catches, end)?;
        }
        if let (Some(label), Some(finally)) = (finally_label, finally) {
            self.set_handler_phase(HandlerPhase::Finally);
            self.emit_label(&label);
            self.block(finally)?;
            self.emit(Opcode::EndFinally, vec![]);
        }
        Ok(())
    }

    fn set_handler_phase(&mut self, phase: HandlerPhase) {
        if let Some(top) = self.handlers.last_mut() {
            *top = phase;
        }
    }

    /// All clauses share one handler entry: typed clauses test the
    /// exception with `is` and fall to the next clause, and an exception no
    /// clause accepts is rethrown.
    fn catch_clauses(&mut self, n: u32, catches: &[CatchClause], end: &str) -> Result<()> {
        for (j, clause) in catches.iter().enumerate() {
            if j > 0 {
                self.emit_label(&Self::label_name("try", n, &format!("clause{}", j)));
            }
            if let Some(ty) = &clause.ty {
                let next = Self::label_name("try", n, &format!("clause{}", j + 1));
                let matched = self.new_register(Ty::Bool);
                self.emit(
                    Opcode::Is,
                    vec![
                        matched.clone(),
                        Operand::Exception,
                        Operand::imm(Value::Type(ty.to_string())),
                    ],
                );
                self.emit(Opcode::JumpFalse, vec![matched, Operand::label(next)]);
            }

            self.push_scope();
            if let Some(var) = &clause.var {
                let ty = clause.ty.clone().unwrap_or(Ty::Object);
                let reg = self.declare_local(var, &ty);
                self.copy_into(&reg, Operand::Exception, &ty);
            }
            for stmt in &clause.body.stmts {
                self.stmt(stmt)?;
            }
            self.pop_scope();
            if self.reachable() {
                self.emit_jump(end);
            }
        }
        if catches.last().is_some_and(|c| c.ty.is_some()) {
            self.emit_label(&Self::label_name("try", n, &format!("clause{}", catches.len())));
            self.emit(Opcode::Rethrow, vec![]);
        }
        Ok(())
    }
}
