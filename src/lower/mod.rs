//! Lowerer: turns one resolved method tree into a flat IL statement list.
//!
//! Output is still symbolic: virtual registers are numbered from 0 with no
//! bound, branches name meta-labels, and member/type references are meta
//! immediates. The later phases (leave injection, packing, fixup, link)
//! make it executable.
//!
//! Labels are `<kind><counter>_<part>` with one counter per function, so
//! the same method always lowers to the same text.

mod call;
mod cond;
mod expr;
mod helpers;
mod stmt;
#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::CodegenOptions;
use crate::error::Result;
use crate::ir::{Statement, Value};
use crate::module::ModuleContext;
use crate::tree::{Method, SymbolOracle};
use crate::types::Ty;

// ─── Output ───────────────────────────────────────────────────────

/// A lowered but not yet packed function.
#[derive(Clone, Debug)]
pub struct LoweredFunction {
    pub index: u32,
    pub name: String,
    pub statements: Vec<Statement>,
    /// Function-local constant pool, addressed by `FunctionConstant`.
    pub constants: Vec<Value>,
    pub inputs: u32,
    /// Virtual registers allocated (all indices are below this).
    pub virtual_registers: u32,
    /// Debug names of registers bound to locals.
    pub register_names: BTreeMap<u32, String>,
}

// ─── Scopes and targets ───────────────────────────────────────────

#[derive(Clone, Debug)]
pub(crate) enum Binding {
    Register(u32, Ty),
    /// `const` local: uses become immediates, no register.
    Constant(Value),
}

#[derive(Debug, Default)]
pub(crate) struct Scope {
    /// Declaration order matters: scope exit nullifies in this order.
    pub(crate) bindings: Vec<(String, Binding)>,
}

/// A construct `break` (and possibly `continue`) can target.
#[derive(Debug)]
pub(crate) struct Breakable {
    pub(crate) break_label: String,
    pub(crate) continue_label: Option<String>,
    /// Scope depth when the construct was entered.
    pub(crate) depth: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HandlerPhase {
    Try,
    Catch,
    Finally,
}

// ─── Lowerer ──────────────────────────────────────────────────────

pub struct Lowerer<'a> {
    pub(crate) method: &'a Method,
    pub(crate) oracle: &'a dyn SymbolOracle,
    pub(crate) module: &'a ModuleContext,
    /// Attach source-level comments to statements.
    pub(crate) comments: bool,
    /// Accumulated statements.
    pub(crate) code: Vec<Statement>,
    pub(crate) constants: Vec<Value>,
    /// Next virtual register.
    pub(crate) next_register: u32,
    pub(crate) register_names: BTreeMap<u32, String>,
    pub(crate) scopes: Vec<Scope>,
    pub(crate) breakables: Vec<Breakable>,
    /// Phase of each enclosing try statement, innermost last.
    pub(crate) handlers: Vec<HandlerPhase>,
    /// Monotonic counter shared by every labelled construct.
    pub(crate) label_counter: u32,
}

impl<'a> Lowerer<'a> {
    pub fn new(
        method: &'a Method,
        oracle: &'a dyn SymbolOracle,
        module: &'a ModuleContext,
        options: &CodegenOptions,
    ) -> Self {
        Self {
            method,
            oracle,
            module,
            comments: options.comments,
            code: Vec::new(),
            constants: Vec::new(),
            next_register: 0,
            register_names: BTreeMap::new(),
            scopes: Vec::new(),
            breakables: Vec::new(),
            handlers: Vec::new(),
            label_counter: 0,
        }
    }

    /// Lower the method body, appending an implicit `return` if control can
    /// fall off its end.
    pub fn lower(mut self) -> Result<LoweredFunction> {
        let method = self.method;
        self.block(&method.body)?;
        if self.reachable() {
            self.emit(crate::ir::Opcode::Return, vec![]);
        }
        debug!(
            function = %method.name,
            statements = self.code.len(),
            registers = self.next_register,
            constants = self.constants.len(),
            "lowered"
        );
        Ok(LoweredFunction {
            index: method.index,
            name: method.name.clone(),
            statements: self.code,
            constants: self.constants,
            inputs: method.input_count(),
            virtual_registers: self.next_register,
            register_names: self.register_names,
        })
    }
}

/// Lower one method against the shared module context.
pub fn lower_method(
    method: &Method,
    oracle: &dyn SymbolOracle,
    module: &ModuleContext,
    options: &CodegenOptions,
) -> Result<LoweredFunction> {
    Lowerer::new(method, oracle, module, options).lower()
}
