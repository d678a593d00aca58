//! The IL opcode set and its static classification.
//!
//! Every opcode has a fixed arity and a fixed rule for operand 0. Liveness
//! scanning, the CFG builder and fixup all read these tables instead of
//! matching on opcodes themselves.

use std::fmt;

/// How operand 0 of an opcode is treated by liveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    /// Operand 0 is an ordinary input (or there are no operands).
    None,
    /// Operand 0 is the destination.
    Write,
    /// `reref`: a write only when operand 0 is an immediate register index.
    Rebind,
    /// `nullify`: both range endpoints are written.
    Range,
}

/// 70 IL opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    // ── Meta ──
    Label,

    // ── Moves ──
    Move,
    ReRef,
    Convert,
    Nullify,

    // ── Arithmetic ──
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Concat,

    // ── Bitwise ──
    And,
    Or,
    Xor,
    Shl,
    Shr,
    BitNot,

    // ── Logical ──
    Not,

    // ── Comparison ──
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // ── Arrays and tables ──
    NewArray,
    NewTable,
    ArrayGet,
    ArraySet,
    ArrayLen,
    TableGet,
    TableSet,
    TableHas,

    // ── Objects and types ──
    New,
    TypeOf,
    Is,
    As,
    Bind,

    // ── Invocation ──
    Arg,
    Call,
    CallVoid,
    CallVirt,
    CallVirtVoid,
    CallDelegate,
    CallDelegateVoid,

    // ── Member access ──
    GetField,
    SetField,
    GetStatic,
    SetStatic,
    GetProperty,
    SetProperty,
    GetStaticProperty,
    SetStaticProperty,

    // ── Control transfer ──
    Jump,
    JumpTrue,
    JumpFalse,
    JumpEq,
    JumpNe,
    JumpLt,
    JumpLe,
    JumpGt,
    JumpGe,
    Switch,
    Return,

    // ── Exceptions ──
    Try,
    Leave,
    EndFinally,
    Throw,
    Rethrow,
    Trap,
}

impl Opcode {
    pub const ALL: [Opcode; 70] = [
        Opcode::Label,
        Opcode::Move,
        Opcode::ReRef,
        Opcode::Convert,
        Opcode::Nullify,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Neg,
        Opcode::Concat,
        Opcode::And,
        Opcode::Or,
        Opcode::Xor,
        Opcode::Shl,
        Opcode::Shr,
        Opcode::BitNot,
        Opcode::Not,
        Opcode::Eq,
        Opcode::Ne,
        Opcode::Lt,
        Opcode::Le,
        Opcode::Gt,
        Opcode::Ge,
        Opcode::NewArray,
        Opcode::NewTable,
        Opcode::ArrayGet,
        Opcode::ArraySet,
        Opcode::ArrayLen,
        Opcode::TableGet,
        Opcode::TableSet,
        Opcode::TableHas,
        Opcode::New,
        Opcode::TypeOf,
        Opcode::Is,
        Opcode::As,
        Opcode::Bind,
        Opcode::Arg,
        Opcode::Call,
        Opcode::CallVoid,
        Opcode::CallVirt,
        Opcode::CallVirtVoid,
        Opcode::CallDelegate,
        Opcode::CallDelegateVoid,
        Opcode::GetField,
        Opcode::SetField,
        Opcode::GetStatic,
        Opcode::SetStatic,
        Opcode::GetProperty,
        Opcode::SetProperty,
        Opcode::GetStaticProperty,
        Opcode::SetStaticProperty,
        Opcode::Jump,
        Opcode::JumpTrue,
        Opcode::JumpFalse,
        Opcode::JumpEq,
        Opcode::JumpNe,
        Opcode::JumpLt,
        Opcode::JumpLe,
        Opcode::JumpGt,
        Opcode::JumpGe,
        Opcode::Switch,
        Opcode::Return,
        Opcode::Try,
        Opcode::Leave,
        Opcode::EndFinally,
        Opcode::Throw,
        Opcode::Rethrow,
        Opcode::Trap,
    ];

    /// Number of operands every statement with this opcode carries.
    pub fn arity(self) -> usize {
        use Opcode::*;
        match self {
            Return | Leave | EndFinally | Rethrow => 0,
            Label | NewTable | Arg | CallVoid | CallDelegateVoid | Jump | Throw | Trap => 1,
            Move | ReRef | Nullify | Neg | BitNot | Not | NewArray | ArrayLen | New | TypeOf
            | Call | CallVirtVoid | CallDelegate | GetStatic | SetStatic | GetStaticProperty
            | SetStaticProperty | JumpTrue | JumpFalse | Switch => 2,
            Convert | Add | Sub | Mul | Div | Mod | Concat | And | Or | Xor | Shl | Shr | Eq
            | Ne | Lt | Le | Gt | Ge | ArrayGet | ArraySet | TableGet | TableSet | TableHas
            | Is | As | Bind | CallVirt | GetField | SetField | GetProperty | SetProperty
            | JumpEq | JumpNe | JumpLt | JumpLe | JumpGt | JumpGe | Try => 3,
        }
    }

    pub fn output(self) -> Output {
        use Opcode::*;
        match self {
            ReRef => Output::Rebind,
            Nullify => Output::Range,
            Move | Convert | Add | Sub | Mul | Div | Mod | Neg | Concat | And | Or | Xor | Shl
            | Shr | BitNot | Not | Eq | Ne | Lt | Le | Gt | Ge | NewArray | NewTable
            | ArrayGet | ArrayLen | TableGet | TableHas | New | TypeOf | Is | As | Bind | Call
            | CallVirt | CallDelegate | GetField | GetStatic | GetProperty
            | GetStaticProperty => Output::Write,
            _ => Output::None,
        }
    }

    /// Whether operand 0 is (or may be) a destination.
    pub fn has_lvalue(self) -> bool {
        self.output() != Output::None
    }

    /// Opcodes that must end their basic block.
    pub fn exits_block(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Jump | JumpTrue
                | JumpFalse
                | JumpEq
                | JumpNe
                | JumpLt
                | JumpLe
                | JumpGt
                | JumpGe
                | Switch
                | Return
                | Leave
                | EndFinally
                | Throw
                | Rethrow
        )
    }

    /// Control never falls through to the next instruction.
    pub fn is_unconditional_exit(self) -> bool {
        matches!(
            self,
            Opcode::Jump | Opcode::Return | Opcode::Throw | Opcode::Rethrow
        )
    }

    /// Branches whose last operand is a jump target.
    pub fn is_branch(self) -> bool {
        self == Opcode::Jump || self.is_conditional_branch()
    }

    pub fn is_conditional_branch(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            JumpTrue | JumpFalse | JumpEq | JumpNe | JumpLt | JumpLe | JumpGt | JumpGe
        )
    }

    pub fn is_throw(self) -> bool {
        matches!(self, Opcode::Throw | Opcode::Rethrow)
    }

    /// Fused compare-and-branch for a relational opcode.
    pub fn branch_for(self) -> Option<Opcode> {
        use Opcode::*;
        Some(match self {
            Eq => JumpEq,
            Ne => JumpNe,
            Lt => JumpLt,
            Le => JumpLe,
            Gt => JumpGt,
            Ge => JumpGe,
            _ => return None,
        })
    }

    /// Branch taken exactly when `self` is not taken.
    pub fn inverted(self) -> Option<Opcode> {
        use Opcode::*;
        Some(match self {
            JumpTrue => JumpFalse,
            JumpFalse => JumpTrue,
            JumpEq => JumpNe,
            JumpNe => JumpEq,
            JumpLt => JumpGe,
            JumpGe => JumpLt,
            JumpLe => JumpGt,
            JumpGt => JumpLe,
            _ => return None,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Label => "label",
            Move => "move",
            ReRef => "reref",
            Convert => "convert",
            Nullify => "nullify",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Mod => "mod",
            Neg => "neg",
            Concat => "concat",
            And => "and",
            Or => "or",
            Xor => "xor",
            Shl => "shl",
            Shr => "shr",
            BitNot => "bnot",
            Not => "not",
            Eq => "eq",
            Ne => "ne",
            Lt => "lt",
            Le => "le",
            Gt => "gt",
            Ge => "ge",
            NewArray => "newarray",
            NewTable => "newtable",
            ArrayGet => "aget",
            ArraySet => "aset",
            ArrayLen => "alen",
            TableGet => "tget",
            TableSet => "tset",
            TableHas => "thas",
            New => "new",
            TypeOf => "typeof",
            Is => "is",
            As => "as",
            Bind => "bind",
            Arg => "arg",
            Call => "call",
            CallVoid => "callv",
            CallVirt => "callvirt",
            CallVirtVoid => "callvirtv",
            CallDelegate => "calldel",
            CallDelegateVoid => "calldelv",
            GetField => "getfield",
            SetField => "setfield",
            GetStatic => "getstatic",
            SetStatic => "setstatic",
            GetProperty => "getprop",
            SetProperty => "setprop",
            GetStaticProperty => "getsprop",
            SetStaticProperty => "setsprop",
            Jump => "jump",
            JumpTrue => "jt",
            JumpFalse => "jf",
            JumpEq => "jeq",
            JumpNe => "jne",
            JumpLt => "jlt",
            JumpLe => "jle",
            JumpGt => "jgt",
            JumpGe => "jge",
            Switch => "switch",
            Return => "return",
            Try => "try",
            Leave => "leave",
            EndFinally => "endfinally",
            Throw => "throw",
            Rethrow => "rethrow",
            Trap => "trap",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exits_are_branches_or_eh() {
        for op in Opcode::ALL {
            if op.is_branch() {
                assert!(op.exits_block(), "{} should end its block", op);
            }
        }
        assert!(Opcode::Leave.exits_block());
        assert!(Opcode::EndFinally.exits_block());
        assert!(!Opcode::Try.exits_block());
        assert!(!Opcode::Trap.exits_block());
    }

    #[test]
    fn inversion_is_an_involution() {
        for op in Opcode::ALL {
            if let Some(inv) = op.inverted() {
                assert_eq!(inv.inverted(), Some(op));
                assert_eq!(op.arity(), inv.arity());
            }
        }
        assert_eq!(Opcode::JumpLt.inverted(), Some(Opcode::JumpGe));
    }

    #[test]
    fn relational_ops_have_fused_branches() {
        assert_eq!(Opcode::Lt.branch_for(), Some(Opcode::JumpLt));
        assert_eq!(Opcode::Add.branch_for(), None);
    }

    #[test]
    fn lvalue_classification() {
        assert_eq!(Opcode::Add.output(), Output::Write);
        assert_eq!(Opcode::ReRef.output(), Output::Rebind);
        assert_eq!(Opcode::Nullify.output(), Output::Range);
        assert_eq!(Opcode::SetField.output(), Output::None);
        assert!(!Opcode::Arg.has_lvalue());
        assert!(Opcode::Call.has_lvalue());
    }

    #[test]
    fn outputs_need_an_operand() {
        for op in Opcode::ALL {
            if op.has_lvalue() {
                assert!(op.arity() >= 1, "{} writes operand 0 but has none", op);
            }
        }
    }
}
