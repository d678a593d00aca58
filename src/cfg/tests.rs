use super::*;
use crate::ir::TableBuilder;
use crate::types::Ty;

fn r(n: u32) -> Operand {
    Operand::Register(n, Ty::I32)
}

fn mov(dst: u32, v: i32) -> Statement {
    Statement::new(Opcode::Move, vec![r(dst), Operand::int(v)])
}

fn ret() -> Statement {
    Statement::new(Opcode::Return, vec![])
}

fn try_stmt(catch: Option<&str>, finally: Option<&str>, end: &str) -> Statement {
    let op = |l: Option<&str>| l.map_or(Operand::null(), Operand::label);
    Statement::new(Opcode::Try, vec![op(catch), op(finally), Operand::label(end)])
}

#[test]
fn if_else_forms_a_diamond() {
    let stmts = vec![
        Statement::new(
            Opcode::JumpGe,
            vec![
                Operand::Input(1, Ty::I32),
                Operand::Input(2, Ty::I32),
                Operand::label("if0_else"),
            ],
        ),
        mov(0, 1),
        Statement::jump("if0_end"),
        Statement::label("if0_else"),
        mov(0, 2),
        Statement::label("if0_end"),
        ret(),
    ];
    let cfg = Cfg::build(&stmts, &[]).unwrap();
    assert_eq!(cfg.len(), 4);
    assert_eq!(cfg.blocks()[1], BasicBlock { id: 1, from: 1, to: 2, region: None });
    assert_eq!(cfg.successors(0), vec![1, 2]);
    assert_eq!(cfg.successors(1), vec![3]);
    assert_eq!(cfg.successors(2), vec![3]);
    assert!(cfg.successors(3).is_empty());
    assert_eq!(cfg.predecessors(3), vec![1, 2]);
    assert_eq!(cfg.block_of(4), 2);
}

#[test]
fn loop_back_edge() {
    let stmts = vec![
        Statement::label("while0_cond"),
        Statement::new(
            Opcode::JumpGe,
            vec![r(0), Operand::int(10), Operand::label("while0_end")],
        ),
        Statement::new(Opcode::Add, vec![r(0), r(0), Operand::int(1)]),
        Statement::jump("while0_cond"),
        Statement::label("while0_end"),
        ret(),
    ];
    let cfg = Cfg::build(&stmts, &[]).unwrap();
    assert_eq!(cfg.successors(1), vec![0]);
    assert_eq!(cfg.predecessors(0), vec![1]);
    assert_eq!(cfg.successors(0), vec![1, 2]);
}

#[test]
fn finally_returns_to_the_leave_continuation() {
    let stmts = vec![
        try_stmt(None, Some("try0_finally"), "try0_end"),
        mov(0, 1),
        Statement::leave(),
        Statement::jump("try0_end"),
        Statement::label("try0_finally"),
        Statement::new(Opcode::EndFinally, vec![]),
        Statement::label("try0_end"),
        ret(),
    ];
    let cfg = Cfg::build(&stmts, &[]).unwrap();
    assert_eq!(cfg.len(), 4);
    assert_eq!(cfg.successors(0), vec![1, 2]);
    assert_eq!(cfg.successors(2), vec![1]);
    assert!(cfg.successors(1).contains(&3));
    assert_eq!(cfg.state(1), Some((0, Phase::Try)));
    assert_eq!(cfg.state(5), Some((0, Phase::Finally)));
    assert_eq!(cfg.state(7), None);
}

#[test]
fn throw_goes_to_catch_handler() {
    let stmts = vec![
        try_stmt(Some("try0_catch"), None, "try0_end"),
        Statement::new(Opcode::Throw, vec![Operand::Register(0, Ty::Object)]),
        Statement::label("try0_catch"),
        Statement::leave(),
        Statement::jump("try0_end"),
        Statement::label("try0_end"),
        ret(),
    ];
    let cfg = Cfg::build(&stmts, &[]).unwrap();
    assert_eq!(cfg.successors(0), vec![1]);
    assert!(!cfg.exits_function(0));
    assert_eq!(cfg.successors(1), vec![2]);
    assert_eq!(cfg.successors(2), vec![3]);
    assert!(cfg
        .edges()
        .contains(&(0, CfgNode::Block(1), EdgeKind::Throw)));
}

#[test]
fn uncaught_throw_exits_the_function() {
    let stmts = vec![Statement::new(
        Opcode::Throw,
        vec![Operand::Register(0, Ty::Object)],
    )];
    let cfg = Cfg::build(&stmts, &[]).unwrap();
    assert!(cfg.exits_function(0));
    assert!(cfg.successors(0).is_empty());
}

#[test]
fn switch_reaches_every_table_target() {
    let mut table = TableBuilder::new(Ty::String, Ty::I32);
    table.insert(Value::String("a".into()), Value::label("switch0_case0"));
    table.insert(Value::String("b".into()), Value::label("switch0_case1"));
    let stmts = vec![
        Statement::new(
            Opcode::Switch,
            vec![Operand::Register(0, Ty::String), Operand::FunctionConstant(0)],
        ),
        Statement::jump("switch0_end"),
        Statement::label("switch0_case0"),
        ret(),
        Statement::label("switch0_case1"),
        ret(),
        Statement::label("switch0_end"),
        ret(),
    ];
    let cfg = Cfg::build(&stmts, &[Value::Table(table)]).unwrap();
    assert_eq!(cfg.successors(0), vec![1, 2, 3]);
    assert_eq!(cfg.successors(1), vec![4]);
}

#[test]
fn unknown_branch_target_is_fatal() {
    let stmts = vec![Statement::jump("missing")];
    assert!(matches!(
        Cfg::build(&stmts, &[]),
        Err(CodegenError::UnresolvedLabel { .. })
    ));
}

#[test]
fn dump_lists_every_block() {
    let stmts = vec![
        mov(0, 1),
        Statement::jump("done"),
        Statement::label("done"),
        ret(),
    ];
    let cfg = Cfg::build(&stmts, &[]).unwrap();
    let text = cfg.dump(&stmts);
    assert_eq!(
        text,
        "block 0 [0..=1] -> 1 (Branch)\nblock 1 [2..=3] done -> none\n"
    );
}
