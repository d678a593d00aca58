//! Resolved method trees handed over by the front-end.
//!
//! Parsing and type checking happen upstream. What arrives here is one
//! [`Method`] per source method, whose expressions carry a [`NodeId`] that
//! the [`SymbolOracle`] maps to a resolved [`Symbol`] (for identifiers and
//! member accesses) and to a static type (for every expression).
//!
//! [`SymbolTable`] is the plain-data oracle the CLI deserializes from a JSON
//! unit; [`TreeBuilder`] assembles trees and their table programmatically.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::span::Span;
use crate::types::Ty;

pub type NodeId = u32;

// ─── Unit ─────────────────────────────────────────────────────────

/// One compilation unit: methods plus the resolution tables for them.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Unit {
    /// Source file name, used when rendering diagnostics.
    #[serde(default)]
    pub file: String,
    /// Original source text, if the front-end kept it.
    #[serde(default)]
    pub source: Option<String>,
    pub methods: Vec<Method>,
    #[serde(default)]
    pub symbols: SymbolTable,
}

// ─── Declarations ─────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Method {
    /// Stable index in the module's method table.
    pub index: u32,
    pub name: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub is_static: bool,
    pub params: Vec<Param>,
    pub return_ty: Ty,
    pub body: Block,
    #[serde(default)]
    pub span: Span,
}

impl Method {
    /// Input slot of parameter `position`: slot 0 holds the return value of
    /// non-void methods.
    pub fn input_slot(&self, position: u32) -> u32 {
        if self.return_ty.is_void() {
            position
        } else {
            position + 1
        }
    }

    pub fn input_count(&self) -> u32 {
        self.input_slot(self.params.len() as u32)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Ty,
    #[serde(default)]
    pub by_ref: bool,
}

// ─── Statements ───────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    #[serde(default)]
    pub span: Span,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self {
            stmts,
            span: Span::dummy(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stmt {
    pub kind: StmtKind,
    #[serde(default)]
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self {
            kind,
            span: Span::dummy(),
        }
    }

    pub fn block(stmts: Vec<Stmt>) -> Self {
        Self::new(StmtKind::Block(Block::new(stmts)))
    }

    pub fn expr(e: Expr) -> Self {
        Self::new(StmtKind::Expr(e))
    }

    pub fn local(name: impl Into<String>, ty: Ty, init: Option<Expr>) -> Self {
        Self::new(StmtKind::Local {
            name: name.into(),
            ty,
            init,
            is_const: false,
        })
    }

    /// Statements after which control never reaches the next one.
    pub fn is_explicit_exit(&self) -> bool {
        matches!(
            self.kind,
            StmtKind::Break | StmtKind::Continue | StmtKind::Return(_) | StmtKind::Throw(_)
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum StmtKind {
    Block(Block),
    Local {
        name: String,
        ty: Ty,
        init: Option<Expr>,
        #[serde(default)]
        is_const: bool,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Vec<Stmt>,
        cond: Option<Expr>,
        step: Vec<Expr>,
        body: Box<Stmt>,
    },
    Foreach {
        var: String,
        var_ty: Ty,
        collection: Expr,
        body: Box<Stmt>,
    },
    Switch {
        subject: Expr,
        sections: Vec<SwitchSection>,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    /// `throw e;`, or a bare `throw;` (rethrow) inside a catch clause.
    Throw(Option<Expr>),
    Try {
        body: Block,
        catches: Vec<CatchClause>,
        finally: Option<Block>,
    },
    Empty,
    /// A construct the front-end accepts but the target VM cannot express
    /// (`goto`, `lock`, `yield`, ...). Lowering it is a fatal error.
    Unsupported(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwitchSection {
    pub labels: Vec<CaseLabel>,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CaseLabel {
    Case(Literal),
    Default,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatchClause {
    /// Exception type filter; `None` catches everything.
    pub ty: Option<Ty>,
    pub var: Option<String>,
    pub body: Block,
}

// ─── Expressions ──────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Expr {
    pub id: NodeId,
    pub kind: ExprKind,
    #[serde(default)]
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Bool(bool),
    Char(char),
    /// Integer literal; its width comes from the expression's static type.
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Null,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

/// Constructor invoked by a `new` expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CtorRef {
    pub index: u32,
    /// Compiler-provided constructor, not declared in source.
    #[serde(default)]
    pub implicit: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),
    /// Identifier; what it names comes from the oracle.
    Name(String),
    This,
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `target = value`, or `target op= value` for compound assignment.
    Assign {
        target: Box<Expr>,
        op: Option<BinaryOp>,
        value: Box<Expr>,
    },
    IncDec {
        target: Box<Expr>,
        increment: bool,
        prefix: bool,
    },
    Conditional {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        name: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    New {
        ty: Ty,
        ctor: Option<CtorRef>,
        args: Vec<Expr>,
    },
    NewArray {
        elem: Ty,
        len: Box<Expr>,
    },
    ArrayLiteral {
        elem: Ty,
        items: Vec<Expr>,
    },
    TableLiteral {
        key: Ty,
        value: Ty,
        entries: Vec<(Expr, Expr)>,
    },
    Cast {
        ty: Ty,
        expr: Box<Expr>,
    },
    Is {
        expr: Box<Expr>,
        ty: Ty,
    },
    As {
        expr: Box<Expr>,
        ty: Ty,
    },
    TypeOf(Ty),
    /// Lambdas, `await`, pattern matching and similar: fatal when lowered.
    Unsupported(String),
}

impl Expr {
    /// True if `pred` holds for this expression or any subexpression.
    pub fn any(&self, pred: &dyn Fn(&ExprKind) -> bool) -> bool {
        if pred(&self.kind) {
            return true;
        }
        match &self.kind {
            ExprKind::Literal(_)
            | ExprKind::Name(_)
            | ExprKind::This
            | ExprKind::TypeOf(_)
            | ExprKind::Unsupported(_) => false,
            ExprKind::Unary { operand: e, .. }
            | ExprKind::IncDec { target: e, .. }
            | ExprKind::Member { object: e, .. }
            | ExprKind::NewArray { len: e, .. }
            | ExprKind::Cast { expr: e, .. }
            | ExprKind::Is { expr: e, .. }
            | ExprKind::As { expr: e, .. } => e.any(pred),
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Logical { lhs, rhs, .. } => {
                lhs.any(pred) || rhs.any(pred)
            }
            ExprKind::Assign { target, value, .. } => target.any(pred) || value.any(pred),
            ExprKind::Index { object, index } => object.any(pred) || index.any(pred),
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => cond.any(pred) || then_expr.any(pred) || else_expr.any(pred),
            ExprKind::Call { callee, args } => callee.any(pred) || args.iter().any(|a| a.any(pred)),
            ExprKind::New { args, .. } => args.iter().any(|a| a.any(pred)),
            ExprKind::ArrayLiteral { items, .. } => items.iter().any(|i| i.any(pred)),
            ExprKind::TableLiteral { entries, .. } => {
                entries.iter().any(|(k, v)| k.any(pred) || v.any(pred))
            }
        }
    }
}

// ─── Symbol oracle ────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolKind {
    Local,
    Parameter,
    Field,
    Property,
    Method,
    Type,
}

/// A resolved identifier.
///
/// `index` is the parameter position, the per-type field index, the
/// property index or the module method index, depending on `kind`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub name: String,
    /// Declared type; the return type for methods.
    pub ty: Ty,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub is_virtual: bool,
    /// Member the compiler declares implicitly (default constructors,
    /// auto-property accessors).
    #[serde(default)]
    pub implicit: bool,
}

impl Symbol {
    pub fn new(kind: SymbolKind, name: impl Into<String>, ty: Ty) -> Self {
        Self {
            kind,
            name: name.into(),
            ty,
            is_static: false,
            index: 0,
            is_virtual: false,
            implicit: false,
        }
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = index;
        self
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    pub fn with_virtual(mut self, is_virtual: bool) -> Self {
        self.is_virtual = is_virtual;
        self
    }

    pub fn with_implicit(mut self, implicit: bool) -> Self {
        self.implicit = implicit;
        self
    }
}

/// Resolution and typing results of the front-end.
///
/// Shared read-only across worker threads while a module compiles.
pub trait SymbolOracle: Sync {
    fn symbol(&self, id: NodeId) -> Option<&Symbol>;
    fn type_of(&self, id: NodeId) -> Option<&Ty>;
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    #[serde(default)]
    pub symbols: BTreeMap<NodeId, Symbol>,
    #[serde(default)]
    pub types: BTreeMap<NodeId, Ty>,
}

impl SymbolTable {
    pub fn insert_symbol(&mut self, id: NodeId, symbol: Symbol) {
        self.symbols.insert(id, symbol);
    }

    pub fn insert_type(&mut self, id: NodeId, ty: Ty) {
        self.types.insert(id, ty);
    }
}

impl SymbolOracle for SymbolTable {
    fn symbol(&self, id: NodeId) -> Option<&Symbol> {
        self.symbols.get(&id)
    }

    fn type_of(&self, id: NodeId) -> Option<&Ty> {
        self.types.get(&id)
    }
}

// ─── TreeBuilder ──────────────────────────────────────────────────

/// Allocates node ids and records symbols/types while building trees.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    next_id: NodeId,
    table: SymbolTable,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self) -> &SymbolTable {
        &self.table
    }

    pub fn finish(self) -> SymbolTable {
        self.table
    }

    /// A typed expression node.
    pub fn expr(&mut self, kind: ExprKind, ty: Ty) -> Expr {
        let id = self.next_id;
        self.next_id += 1;
        self.table.insert_type(id, ty);
        Expr {
            id,
            kind,
            span: Span::dummy(),
        }
    }

    /// A typed node that also resolves to `symbol`.
    pub fn resolved(&mut self, kind: ExprKind, symbol: Symbol) -> Expr {
        let e = self.expr(kind, symbol.ty.clone());
        self.table.insert_symbol(e.id, symbol);
        e
    }

    // ── Literals ──

    pub fn lit(&mut self, lit: Literal, ty: Ty) -> Expr {
        self.expr(ExprKind::Literal(lit), ty)
    }

    pub fn int(&mut self, v: i64) -> Expr {
        self.lit(Literal::Int(v), Ty::I32)
    }

    pub fn bool(&mut self, v: bool) -> Expr {
        self.lit(Literal::Bool(v), Ty::Bool)
    }

    pub fn string(&mut self, s: &str) -> Expr {
        self.lit(Literal::String(s.to_string()), Ty::String)
    }

    pub fn null(&mut self) -> Expr {
        self.lit(Literal::Null, Ty::Null)
    }

    // ── Names ──

    pub fn local(&mut self, name: &str, ty: Ty) -> Expr {
        let sym = Symbol::new(SymbolKind::Local, name, ty);
        self.resolved(ExprKind::Name(name.to_string()), sym)
    }

    pub fn param(&mut self, name: &str, position: u32, ty: Ty) -> Expr {
        let sym = Symbol::new(SymbolKind::Parameter, name, ty).with_index(position);
        self.resolved(ExprKind::Name(name.to_string()), sym)
    }

    /// Instance field of `this`, named directly.
    pub fn field(&mut self, name: &str, index: u32, ty: Ty) -> Expr {
        let sym = Symbol::new(SymbolKind::Field, name, ty).with_index(index);
        self.resolved(ExprKind::Name(name.to_string()), sym)
    }

    pub fn static_field(&mut self, name: &str, index: u32, ty: Ty) -> Expr {
        let sym = Symbol::new(SymbolKind::Field, name, ty)
            .with_index(index)
            .with_static(true);
        self.resolved(ExprKind::Name(name.to_string()), sym)
    }

    pub fn this(&mut self, class: &str) -> Expr {
        self.expr(ExprKind::This, Ty::Named(class.to_string()))
    }

    /// `object.name` resolving to `symbol`.
    pub fn member(&mut self, object: Expr, name: &str, symbol: Symbol) -> Expr {
        self.resolved(
            ExprKind::Member {
                object: Box::new(object),
                name: name.to_string(),
            },
            symbol,
        )
    }

    // ── Operators ──

    pub fn unary(&mut self, op: UnaryOp, operand: Expr, ty: Ty) -> Expr {
        self.expr(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            ty,
        )
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Expr, rhs: Expr, ty: Ty) -> Expr {
        self.expr(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ty,
        )
    }

    /// Relational comparison; always `bool`.
    pub fn compare(&mut self, op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        self.binary(op, lhs, rhs, Ty::Bool)
    }

    pub fn logical(&mut self, op: LogicalOp, lhs: Expr, rhs: Expr) -> Expr {
        self.expr(
            ExprKind::Logical {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            Ty::Bool,
        )
    }

    pub fn not(&mut self, operand: Expr) -> Expr {
        self.unary(UnaryOp::Not, operand, Ty::Bool)
    }

    pub fn assign(&mut self, target: Expr, value: Expr) -> Expr {
        let ty = self.table.type_of(target.id).cloned().unwrap_or(Ty::Object);
        self.expr(
            ExprKind::Assign {
                target: Box::new(target),
                op: None,
                value: Box::new(value),
            },
            ty,
        )
    }

    pub fn compound(&mut self, target: Expr, op: BinaryOp, value: Expr) -> Expr {
        let ty = self.table.type_of(target.id).cloned().unwrap_or(Ty::Object);
        self.expr(
            ExprKind::Assign {
                target: Box::new(target),
                op: Some(op),
                value: Box::new(value),
            },
            ty,
        )
    }

    pub fn inc(&mut self, target: Expr, prefix: bool) -> Expr {
        let ty = self.table.type_of(target.id).cloned().unwrap_or(Ty::I32);
        self.expr(
            ExprKind::IncDec {
                target: Box::new(target),
                increment: true,
                prefix,
            },
            ty,
        )
    }

    // ── Calls ──

    /// Call of a static method by name.
    pub fn call_static(&mut self, name: &str, index: u32, ret: Ty, args: Vec<Expr>) -> Expr {
        let sym = Symbol::new(SymbolKind::Method, name, ret.clone())
            .with_index(index)
            .with_static(true);
        let callee = self.resolved(ExprKind::Name(name.to_string()), sym);
        self.expr(
            ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
            ret,
        )
    }

    /// Call of an instance method on `object`.
    pub fn call_method(
        &mut self,
        object: Expr,
        name: &str,
        index: u32,
        ret: Ty,
        args: Vec<Expr>,
    ) -> Expr {
        let sym = Symbol::new(SymbolKind::Method, name, ret.clone())
            .with_index(index)
            .with_virtual(true);
        let callee = self.member(object, name, sym);
        self.expr(
            ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
            ret,
        )
    }

    pub fn new_object(&mut self, class: &str, ctor: Option<CtorRef>, args: Vec<Expr>) -> Expr {
        let ty = Ty::Named(class.to_string());
        self.expr(
            ExprKind::New {
                ty: ty.clone(),
                ctor,
                args,
            },
            ty,
        )
    }
}
