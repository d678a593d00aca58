//! Per-function phase ordering.
//!
//! tree → lowered IR → leave injection → CFG → register packing → fixup.

use tracing::debug_span;

use crate::cfg::Cfg;
use crate::config::CodegenOptions;
use crate::error::Result;
use crate::fixup::fixup;
use crate::leave::inject_leaves;
use crate::lower::{lower_method, LoweredFunction};
use crate::module::{CompiledFunction, ModuleContext};
use crate::pack::pack;
use crate::tree::{Method, SymbolOracle};

/// Lower `method` and make its region exits explicit.
///
/// The result still uses virtual registers and symbolic labels; it is what
/// `regil lower` prints.
pub fn lower_function(
    method: &Method,
    oracle: &dyn SymbolOracle,
    module: &ModuleContext,
    options: &CodegenOptions,
) -> Result<LoweredFunction> {
    let mut lowered = lower_method(method, oracle, module, options)?;
    lowered.statements = inject_leaves(lowered.statements)?.into_statements();
    Ok(lowered)
}

/// Pack and fix up a lowered function.
pub fn finish_function(
    lowered: LoweredFunction,
    options: &CodegenOptions,
) -> Result<CompiledFunction> {
    let LoweredFunction {
        index,
        name,
        mut statements,
        mut constants,
        inputs,
        ..
    } = lowered;
    let cfg = Cfg::build(&statements, &constants)?;
    let packing = pack(&name, &mut statements, &cfg, options.max_registers)?;
    let statements = fixup(statements, &mut constants, options)?;
    Ok(CompiledFunction {
        index,
        name,
        statements,
        registers: packing.count,
        inputs,
        constants,
    })
}

pub fn compile_function(
    method: &Method,
    oracle: &dyn SymbolOracle,
    module: &ModuleContext,
    options: &CodegenOptions,
) -> Result<CompiledFunction> {
    let _span = debug_span!("function", name = %method.name, index = method.index).entered();
    let lowered = lower_function(method, oracle, module, options)?;
    finish_function(lowered, options)
}
