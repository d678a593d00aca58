//! Label and jump fixup.
//!
//! Runs once per function after packing. A pre-step folds adjacent
//! `nullify` statements into ranges. Pass 1 assigns every meta-label the
//! index of the next emitted statement, drops the labels and strips dead
//! runs after unconditional exits. Pass 2 rewrites label operands: `try`
//! descriptors get absolute indices, branches get offsets relative to the
//! branch itself, and label values inside constants become absolute
//! indices.

use std::collections::BTreeMap;

use tracing::debug;

use crate::config::CodegenOptions;
use crate::error::{CodegenError, Result};
use crate::ir::{Opcode, Operand, Statement, Value};

// ─── Nullify merging ──────────────────────────────────────────────

fn nullify_range(stmt: &Statement, index: usize) -> Result<(u32, u32)> {
    let malformed = |detail: &str| CodegenError::MalformedNullify {
        index,
        detail: detail.to_string(),
    };
    match stmt.operands.as_slice() {
        [Operand::Register(first, _), Operand::Register(last, _)] => {
            if first > last {
                return Err(malformed("descending register range"));
            }
            Ok((*first, *last))
        }
        _ => Err(malformed("endpoints must be registers")),
    }
}

/// Fold runs of `nullify` over contiguous ascending registers into one
/// range statement.
pub fn merge_nullify(statements: Vec<Statement>) -> Result<Vec<Statement>> {
    let mut out: Vec<Statement> = Vec::with_capacity(statements.len());
    let mut open: Option<(u32, u32)> = None;
    for (i, stmt) in statements.into_iter().enumerate() {
        if stmt.op != Opcode::Nullify {
            open = None;
            out.push(stmt);
            continue;
        }
        let (first, last) = nullify_range(&stmt, i)?;
        if let (Some((start, end)), Some(prev)) = (open, out.last_mut()) {
            if first == end + 1 {
                prev.operands[1] = stmt.operands[1].clone();
                open = Some((start, last));
                continue;
            }
        }
        open = Some((first, last));
        out.push(stmt);
    }
    Ok(out)
}

// ─── Label resolution ─────────────────────────────────────────────

/// Pass 1: strip labels (and dead runs), recording where each label lands.
fn place_labels(
    statements: Vec<Statement>,
    strip_unreachable: bool,
) -> (Vec<Statement>, BTreeMap<String, usize>, usize) {
    let mut out = Vec::with_capacity(statements.len());
    let mut positions = BTreeMap::new();
    let mut dead = false;
    let mut stripped = 0;
    for stmt in statements {
        if let Some(name) = stmt.label_name() {
            positions.insert(name.to_string(), out.len());
            dead = false;
            continue;
        }
        if dead && (strip_unreachable || stmt.synthetic) {
            stripped += 1;
            continue;
        }
        if stmt.op.is_unconditional_exit() {
            dead = true;
        }
        out.push(stmt);
    }
    (out, positions, stripped)
}

fn resolve(positions: &BTreeMap<String, usize>, label: &str) -> Result<usize> {
    positions
        .get(label)
        .copied()
        .ok_or_else(|| CodegenError::unresolved(label))
}

fn resolve_value(value: &mut Value, positions: &BTreeMap<String, usize>) -> Result<()> {
    if !value.contains_label() {
        return Ok(());
    }
    value.resolve_labels(&mut |label: &str| Ok(Value::I32(resolve(positions, label)? as i32)))
}

/// Resolve every label of a packed function; `constants` is the function's
/// constant pool and is rewritten in place.
pub fn fixup(
    statements: Vec<Statement>,
    constants: &mut [Value],
    options: &CodegenOptions,
) -> Result<Vec<Statement>> {
    let statements = if options.merge_nullify {
        merge_nullify(statements)?
    } else {
        for (i, stmt) in statements.iter().enumerate() {
            if stmt.op == Opcode::Nullify {
                nullify_range(stmt, i)?;
            }
        }
        statements
    };

    let (mut out, positions, stripped) = place_labels(statements, options.strip_unreachable);

    for (i, stmt) in out.iter_mut().enumerate() {
        let op = stmt.op;
        for operand in &mut stmt.operands {
            match operand {
                Operand::Label(name) => {
                    let target = resolve(&positions, name)?;
                    let value = match op {
                        Opcode::Try => target as i32,
                        op if op.is_branch() => target as i32 - i as i32,
                        _ => {
                            return Err(CodegenError::LabelOperand {
                                opcode: op.to_string(),
                                index: i,
                            })
                        }
                    };
                    *operand = Operand::Immediate(Value::I32(value));
                }
                Operand::Immediate(value) => resolve_value(value, &positions)?,
                _ => {}
            }
        }
    }

    for value in constants.iter_mut() {
        resolve_value(value, &positions)?;
    }

    debug!(
        statements = out.len(),
        labels = positions.len(),
        stripped,
        "fixup"
    );
    Ok(out)
}
