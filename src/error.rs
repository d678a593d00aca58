use crate::span::Span;

/// Fatal code generation faults.
///
/// The front-end has already validated the program, so everything here is an
/// internal error: it aborts the function being compiled and, with it, the
/// whole module.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodegenError {
    #[error("unsupported construct: {construct}")]
    Unsupported { construct: String, span: Span },

    #[error("unknown symbol '{name}'")]
    UnknownSymbol { name: String, span: Span },

    #[error("constant '{name}' requires a literal initializer")]
    NonLiteralConstant { name: String, span: Span },

    #[error("'{keyword}' outside of a loop or switch")]
    NoEnclosingTarget { keyword: &'static str, span: Span },

    #[error("unresolved label '{label}'")]
    UnresolvedLabel { label: String },

    #[error("label '{label}' is defined more than once")]
    DuplicateLabel { label: String },

    #[error("label operand in '{opcode}' at instruction {index}")]
    LabelOperand { opcode: String, index: usize },

    #[error("region stack mismatch at instruction {index}: {detail}")]
    RegionMismatch { index: usize, detail: String },

    #[error("'{opcode}' at instruction {index} branches out of a protected region")]
    RegionCrossingBranch { opcode: String, index: usize },

    #[error("function '{function}' needs more than {limit} registers")]
    RegisterExhausted { function: String, limit: usize },

    #[error("malformed nullify range at instruction {index}: {detail}")]
    MalformedNullify { index: usize, detail: String },

    #[error("statement '{opcode}' expects {expected} operands, found {found}")]
    Arity {
        opcode: String,
        expected: usize,
        found: usize,
    },
}

impl CodegenError {
    pub fn unsupported(construct: impl Into<String>, span: Span) -> Self {
        CodegenError::Unsupported {
            construct: construct.into(),
            span,
        }
    }

    pub fn unresolved(label: impl Into<String>) -> Self {
        CodegenError::UnresolvedLabel {
            label: label.into(),
        }
    }

    /// Source location of the offending construct, when the error has one.
    pub fn span(&self) -> Option<Span> {
        match self {
            CodegenError::Unsupported { span, .. }
            | CodegenError::UnknownSymbol { span, .. }
            | CodegenError::NonLiteralConstant { span, .. }
            | CodegenError::NoEnclosingTarget { span, .. } => Some(*span),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CodegenError>;

/// A codegen error tagged with the function it aborted.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("in function '{function}': {source}")]
pub struct FunctionError {
    pub function: String,
    #[source]
    pub source: CodegenError,
}
