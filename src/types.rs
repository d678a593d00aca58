use std::fmt;

use serde::{Deserialize, Serialize};

/// Static types as reported by the front-end's type oracle.
///
/// The code generator only needs enough of the type to pick immediates,
/// comparison semantics, and whether assignment copies a value or rebinds a
/// reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    Void,
    Bool,
    Char,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    String,
    Object,
    Null,
    /// A class, struct, interface or delegate type by qualified name.
    Named(String),
    Array(Box<Ty>),
    /// Keyed table (dictionary) type.
    Table(Box<Ty>, Box<Ty>),
}

impl Ty {
    pub fn is_void(&self) -> bool {
        matches!(self, Ty::Void)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Ty::String)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Ty::I8 | Ty::U8 | Ty::I16 | Ty::U16 | Ty::I32 | Ty::U32 | Ty::I64 | Ty::U64 | Ty::Char
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Ty::F32 | Ty::F64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    /// Reference types are assigned with `reref` (the slot is rebound);
    /// value types are copied with `move`.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Ty::String | Ty::Object | Ty::Null | Ty::Named(_) | Ty::Array(_) | Ty::Table(_, _)
        )
    }

    /// Element type of an array or value type of a table.
    pub fn element(&self) -> Option<&Ty> {
        match self {
            Ty::Array(elem) => Some(elem),
            Ty::Table(_, value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => write!(f, "void"),
            Ty::Bool => write!(f, "bool"),
            Ty::Char => write!(f, "char"),
            Ty::I8 => write!(f, "i8"),
            Ty::U8 => write!(f, "u8"),
            Ty::I16 => write!(f, "i16"),
            Ty::U16 => write!(f, "u16"),
            Ty::I32 => write!(f, "i32"),
            Ty::U32 => write!(f, "u32"),
            Ty::I64 => write!(f, "i64"),
            Ty::U64 => write!(f, "u64"),
            Ty::F32 => write!(f, "f32"),
            Ty::F64 => write!(f, "f64"),
            Ty::String => write!(f, "string"),
            Ty::Object => write!(f, "object"),
            Ty::Null => write!(f, "null"),
            Ty::Named(name) => write!(f, "{}", name),
            Ty::Array(elem) => write!(f, "{}[]", elem),
            Ty::Table(key, value) => write!(f, "table<{}, {}>", key, value),
        }
    }
}
