//! Module-level compilation.
//!
//! The [`ModuleContext`] is the only state shared between functions: an
//! insertion-ordered function table behind a `Mutex`. Functions compile
//! independently (on the rayon pool when enabled), then a sequential link
//! step in method-index order interns type names and turns the remaining
//! meta values into integer indices, so the output does not depend on
//! scheduling.

use std::sync::{Mutex, PoisonError};

use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::CodegenOptions;
use crate::error::FunctionError;
use crate::ir::{Operand, Statement, Value};
use crate::pipeline;
use crate::tree::{Method, Unit};

// ─── Function table ───────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionEntry {
    pub index: u32,
    pub name: String,
    /// Discovered through a call, with no body in this unit.
    pub implicit: bool,
}

#[derive(Debug, Default)]
pub struct ModuleContext {
    functions: Mutex<IndexMap<u32, FunctionEntry>>,
}

impl ModuleContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context with every method of `methods` declared, in index order.
    pub fn from_methods(methods: &[Method]) -> Self {
        let ctx = Self::new();
        let mut sorted: Vec<&Method> = methods.iter().collect();
        sorted.sort_by_key(|m| m.index);
        for m in sorted {
            ctx.declare(m.index, &m.name, false);
        }
        ctx
    }

    /// Register a function. Returns false when `index` is already known.
    pub fn declare(&self, index: u32, name: &str, implicit: bool) -> bool {
        let mut table = self.functions.lock().unwrap_or_else(PoisonError::into_inner);
        if table.contains_key(&index) {
            return false;
        }
        table.insert(
            index,
            FunctionEntry {
                index,
                name: name.to_string(),
                implicit,
            },
        );
        true
    }

    /// Snapshot of the table, ordered by function index.
    pub fn functions(&self) -> Vec<FunctionEntry> {
        let table = self.functions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<FunctionEntry> = table.values().cloned().collect();
        out.sort_by_key(|f| f.index);
        out
    }

    pub fn len(&self) -> usize {
        self.functions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─── Compiled output ──────────────────────────────────────────────

/// A finished function: packed, fixed up, immutable.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledFunction {
    pub index: u32,
    pub name: String,
    pub statements: Vec<Statement>,
    /// Physical registers the frame needs.
    pub registers: u32,
    /// Input slots, including the return slot of non-void methods.
    pub inputs: u32,
    pub constants: Vec<Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledModule {
    /// Functions with bodies, ordered by index.
    pub functions: Vec<CompiledFunction>,
    /// Every known function, including implicit callees.
    pub declarations: Vec<FunctionEntry>,
    /// Type names in first-use order; position is the type index.
    pub types: Vec<String>,
    /// Index of the entry-point method, if the unit has one.
    pub entry_point: Option<u32>,
}

impl CompiledModule {
    pub fn function(&self, name: &str) -> Option<&CompiledFunction> {
        self.functions.iter().find(|f| f.name == name)
    }
}

// ─── Compilation ──────────────────────────────────────────────────

/// Compile every method of `unit` and link the result.
pub fn compile_module(
    unit: &Unit,
    options: &CodegenOptions,
) -> Result<CompiledModule, FunctionError> {
    let ctx = ModuleContext::from_methods(&unit.methods);
    let compile = |m: &Method| {
        pipeline::compile_function(m, &unit.symbols, &ctx, options).map_err(|source| {
            FunctionError {
                function: m.name.clone(),
                source,
            }
        })
    };

    let mut functions: Vec<CompiledFunction> = if options.parallel {
        unit.methods.par_iter().map(compile).collect::<Result<_, _>>()?
    } else {
        unit.methods.iter().map(compile).collect::<Result<_, _>>()?
    };
    functions.sort_by_key(|f| f.index);

    let types = link(&mut functions);
    let entry_point = find_entry_point(&unit.methods, &options.entry_point);
    let declarations = ctx.functions();

    info!(
        functions = functions.len(),
        declared = declarations.len(),
        types = types.len(),
        "module compiled"
    );
    Ok(CompiledModule {
        functions,
        declarations,
        types,
        entry_point,
    })
}

/// The static method named `name` with the lowest index.
pub fn find_entry_point(methods: &[Method], name: &str) -> Option<u32> {
    methods
        .iter()
        .filter(|m| m.is_static && m.name == name)
        .map(|m| m.index)
        .min()
}

// ─── Link ─────────────────────────────────────────────────────────

#[derive(Default)]
struct TypeTable {
    names: IndexMap<String, u32>,
}

impl TypeTable {
    fn intern(&mut self, name: &str) -> u32 {
        if let Some(&index) = self.names.get(name) {
            return index;
        }
        let index = self.names.len() as u32;
        self.names.insert(name.to_string(), index);
        index
    }
}

fn link_value(value: &mut Value, types: &mut TypeTable) {
    match value {
        Value::Type(name) => *value = Value::I32(types.intern(name) as i32),
        Value::Method(i) | Value::Property(i) | Value::FieldRef(i) => {
            *value = Value::I32(*i as i32)
        }
        Value::Array(a) => a.items.iter_mut().for_each(|v| link_value(v, types)),
        Value::Table(t) => t.entries.iter_mut().for_each(|(k, v)| {
            link_value(k, types);
            link_value(v, types);
        }),
        _ => {}
    }
}

/// Resolve meta values of already-sorted functions; returns the type table.
fn link(functions: &mut [CompiledFunction]) -> Vec<String> {
    let mut types = TypeTable::default();
    for f in functions.iter_mut() {
        for stmt in &mut f.statements {
            for operand in &mut stmt.operands {
                if let Operand::Immediate(value) = operand {
                    link_value(value, &mut types);
                }
            }
        }
        for value in &mut f.constants {
            link_value(value, &mut types);
        }
    }
    debug!(types = types.names.len(), "linked");
    types.names.into_keys().collect()
}
