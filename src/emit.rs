//! Textual IL.
//!
//! One directive or statement per line. A module starts with its entry
//! point, type table and function table, then every function body:
//!
//! ```text
//! .function 0 Inc
//! .registers 1
//! .inputs 2
//! .code
//!     add r0, in1, 1
//!     reref in0, r0
//!     return
//! .end
//! ```

use std::fmt::Write;

use crate::ir::listing;
use crate::lower::LoweredFunction;
use crate::module::{CompiledFunction, CompiledModule};

/// Render one finished function.
pub fn emit_function(f: &CompiledFunction) -> String {
    let mut out = String::new();
    let _ = writeln!(out, ".function {} {}", f.index, f.name);
    let _ = writeln!(out, ".registers {}", f.registers);
    let _ = writeln!(out, ".inputs {}", f.inputs);
    if !f.constants.is_empty() {
        out.push_str(".constants\n");
        for (i, c) in f.constants.iter().enumerate() {
            let _ = writeln!(out, "    c{} {}", i, c);
        }
    }
    out.push_str(".code\n");
    for stmt in &f.statements {
        let _ = writeln!(out, "    {}", stmt);
    }
    out.push_str(".end\n");
    out
}

/// Render a linked module.
pub fn emit_module(m: &CompiledModule) -> String {
    let mut out = String::new();
    if let Some(entry) = m.entry_point {
        let _ = writeln!(out, ".entry {}", entry);
    }
    for (i, name) in m.types.iter().enumerate() {
        let _ = writeln!(out, ".type {} {}", i, name);
    }
    for d in m.declarations.iter().filter(|d| d.implicit) {
        let _ = writeln!(out, ".import {} {}", d.index, d.name);
    }
    for f in &m.functions {
        out.push('\n');
        out.push_str(&emit_function(f));
    }
    out
}

/// Pre-pack listing: virtual registers, labels and label operands intact.
pub fn emit_lowered(f: &LoweredFunction) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        ".function {} {}  ; {} virtual registers",
        f.index, f.name, f.virtual_registers
    );
    for (i, c) in f.constants.iter().enumerate() {
        let _ = writeln!(out, "    c{} {}", i, c);
    }
    out.push_str(&listing(&f.statements));
    out.push_str(".end\n");
    out
}
