//! Typed immediates and aggregate constants.
//!
//! Scalars map 1:1 to VM immediates. Aggregates (`Array`, `Table`) are
//! builders that live in a function's constant pool and may hold `Label`
//! elements until fixup replaces them with instruction indices. The meta
//! kinds (`Label`, `Type`, `Method`, `Property`, `FieldRef`,
//! `RegisterIndex`) never reach the emitted stream: fixup and the module
//! link step rewrite them to plain integers.

use std::fmt;

use crate::error::Result;
use crate::types::Ty;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    // ── Scalars ──
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Char(char),
    String(String),
    Null,

    // ── Aggregates ──
    Array(ArrayBuilder),
    Table(TableBuilder),

    // ── Meta (pre-fixup only) ──
    /// Instruction position, resolved by fixup.
    Label(String),
    /// Type by qualified name, resolved to a module type index at link.
    Type(String),
    Method(u32),
    Property(u32),
    FieldRef(u32),
    /// A register named by index; the destination form of `reref`.
    RegisterIndex(u32),
}

impl Value {
    pub fn label(name: impl Into<String>) -> Self {
        Value::Label(name.into())
    }

    /// Static type of a scalar immediate. Meta kinds have none.
    pub fn ty(&self) -> Option<Ty> {
        Some(match self {
            Value::I8(_) => Ty::I8,
            Value::U8(_) => Ty::U8,
            Value::I16(_) => Ty::I16,
            Value::U16(_) => Ty::U16,
            Value::I32(_) => Ty::I32,
            Value::U32(_) => Ty::U32,
            Value::I64(_) => Ty::I64,
            Value::U64(_) => Ty::U64,
            Value::F32(_) => Ty::F32,
            Value::F64(_) => Ty::F64,
            Value::Bool(_) => Ty::Bool,
            Value::Char(_) => Ty::Char,
            Value::String(_) => Ty::String,
            Value::Null => Ty::Null,
            Value::Array(a) => Ty::Array(Box::new(a.elem.clone())),
            Value::Table(t) => Ty::Table(Box::new(t.key.clone()), Box::new(t.value.clone())),
            _ => return None,
        })
    }

    pub fn is_meta(&self) -> bool {
        matches!(
            self,
            Value::Label(_)
                | Value::Type(_)
                | Value::Method(_)
                | Value::Property(_)
                | Value::FieldRef(_)
                | Value::RegisterIndex(_)
        )
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Table(_))
    }

    /// True if this value, or anything nested in it, is still a label.
    pub fn contains_label(&self) -> bool {
        match self {
            Value::Label(_) => true,
            Value::Array(a) => a.items.iter().any(Value::contains_label),
            Value::Table(t) => t
                .entries
                .iter()
                .any(|(k, v)| k.contains_label() || v.contains_label()),
            _ => false,
        }
    }

    /// Replace every nested `Label` with the value `resolve` yields for it.
    pub fn resolve_labels(&mut self, resolve: &mut dyn FnMut(&str) -> Result<Value>) -> Result<()> {
        match self {
            Value::Label(name) => {
                *self = resolve(name)?;
            }
            Value::Array(a) => {
                for item in &mut a.items {
                    item.resolve_labels(resolve)?;
                }
            }
            Value::Table(t) => {
                for (key, value) in &mut t.entries {
                    key.resolve_labels(resolve)?;
                    value.resolve_labels(resolve)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Integer view used by constant folding of switch cases and indices.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I8(v) => Some(*v as i64),
            Value::U8(v) => Some(*v as i64),
            Value::I16(v) => Some(*v as i64),
            Value::U16(v) => Some(*v as i64),
            Value::I32(v) => Some(*v as i64),
            Value::U32(v) => Some(*v as i64),
            Value::I64(v) => Some(*v),
            Value::U64(v) => i64::try_from(*v).ok(),
            Value::Char(c) => Some(*c as i64),
            _ => None,
        }
    }
}

// ─── Aggregate builders ───────────────────────────────────────────

/// Ordered array constant.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayBuilder {
    pub elem: Ty,
    pub items: Vec<Value>,
}

impl ArrayBuilder {
    pub fn new(elem: Ty) -> Self {
        Self {
            elem,
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, value: Value) {
        self.items.push(value);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Keyed table constant. Keys keep first-insertion order; inserting an
/// existing key replaces its value in place.
#[derive(Debug, Clone, PartialEq)]
pub struct TableBuilder {
    pub key: Ty,
    pub value: Ty,
    pub entries: Vec<(Value, Value)>,
}

impl TableBuilder {
    pub fn new(key: Ty, value: Ty) -> Self {
        Self {
            key,
            value,
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, key: Value, value: Value) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─── Display ──────────────────────────────────────────────────────

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I8(v) => write!(f, "i8 {}", v),
            Value::U8(v) => write!(f, "u8 {}", v),
            Value::I16(v) => write!(f, "i16 {}", v),
            Value::U16(v) => write!(f, "u16 {}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "u32 {}", v),
            Value::I64(v) => write!(f, "i64 {}", v),
            Value::U64(v) => write!(f, "u64 {}", v),
            Value::F32(v) => write!(f, "f32 {}", v),
            Value::F64(v) => write!(f, "f64 {}", v),
            Value::Bool(v) => write!(f, "bool {}", v),
            Value::Char(c) => write!(f, "char {:?}", c),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Null => write!(f, "null"),
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, item) in a.items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Table(t) => {
                write!(f, "{{")?;
                for (i, (k, v)) in t.entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Label(name) => write!(f, "@{}", name),
            Value::Type(name) => write!(f, "type {}", name),
            Value::Method(i) => write!(f, "method {}", i),
            Value::Property(i) => write!(f, "prop {}", i),
            Value::FieldRef(i) => write!(f, "field {}", i),
            Value::RegisterIndex(i) => write!(f, "#r{}", i),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodegenError;

    #[test]
    fn tagged_rendering() {
        assert_eq!(Value::I32(7).to_string(), "7");
        assert_eq!(Value::I8(-3).to_string(), "i8 -3");
        assert_eq!(Value::U64(9).to_string(), "u64 9");
        assert_eq!(Value::F32(1.5).to_string(), "f32 1.5");
        assert_eq!(Value::String("a\"b".into()).to_string(), "\"a\\\"b\"");
        assert_eq!(Value::Char('x').to_string(), "char 'x'");
        assert_eq!(Value::Null.to_string(), "null");
    }

    #[test]
    fn table_insert_replaces_existing_key() {
        let mut t = TableBuilder::new(Ty::String, Ty::I32);
        t.insert(Value::String("a".into()), Value::I32(1));
        t.insert(Value::String("b".into()), Value::I32(2));
        t.insert(Value::String("a".into()), Value::I32(3));
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(&Value::String("a".into())), Some(&Value::I32(3)));
        assert_eq!(t.entries[0].0, Value::String("a".into()));
    }

    #[test]
    fn nested_labels_resolve() {
        let mut inner = ArrayBuilder::new(Ty::I32);
        inner.push(Value::label("x"));
        let mut t = TableBuilder::new(Ty::String, Ty::Array(Box::new(Ty::I32)));
        t.insert(Value::String("k".into()), Value::Array(inner));
        let mut v = Value::Table(t);
        assert!(v.contains_label());

        v.resolve_labels(&mut |name| {
            assert_eq!(name, "x");
            Ok(Value::I32(12))
        })
        .unwrap();
        assert!(!v.contains_label());
        assert_eq!(v.to_string(), "{\"k\": [12]}");
    }

    #[test]
    fn resolve_propagates_errors() {
        let mut v = Value::label("missing");
        let err = v
            .resolve_labels(&mut |name| Err(CodegenError::unresolved(name)))
            .unwrap_err();
        assert_eq!(err, CodegenError::unresolved("missing"));
    }
}
