use pretty_assertions::assert_eq;

use super::*;
use crate::error::CodegenError;
use crate::span::Span;
use crate::tree::{
    BinaryOp, Block, CaseLabel, CatchClause, CtorRef, Expr, ExprKind, Literal, LogicalOp, Param,
    Stmt, StmtKind, SwitchSection, SymbolTable, TreeBuilder,
};

fn param(name: &str, ty: Ty) -> Param {
    Param {
        name: name.into(),
        ty,
        by_ref: false,
    }
}

fn method(params: Vec<Param>, return_ty: Ty, body: Vec<Stmt>) -> Method {
    Method {
        index: 0,
        name: "F".into(),
        class: "C".into(),
        is_static: true,
        params,
        return_ty,
        body: Block::new(body),
        span: Span::dummy(),
    }
}

fn try_lower(m: &Method, table: &SymbolTable) -> Result<LoweredFunction> {
    let ctx = ModuleContext::new();
    lower_method(m, table, &ctx, &CodegenOptions::default())
}

fn lower(m: &Method, table: &SymbolTable) -> LoweredFunction {
    try_lower(m, table).unwrap()
}

fn text(f: &LoweredFunction) -> Vec<String> {
    f.statements.iter().map(|s| s.to_string()).collect()
}

fn ret(e: Expr) -> Stmt {
    Stmt::new(StmtKind::Return(Some(e)))
}

fn call_void(b: &mut TreeBuilder, name: &str, index: u32) -> Stmt {
    Stmt::expr(b.call_static(name, index, Ty::Void, vec![]))
}

#[test]
fn increment_function() {
    let mut b = TreeBuilder::new();
    let x = b.param("x", 0, Ty::I32);
    let one = b.int(1);
    let sum = b.binary(BinaryOp::Add, x, one, Ty::I32);
    let m = method(vec![param("x", Ty::I32)], Ty::I32, vec![ret(sum)]);
    let f = lower(&m, &b.finish());
    assert_eq!(text(&f), vec!["add r0, in1, 1", "reref in0, r0", "return"]);
    assert_eq!(f.virtual_registers, 1);
    assert_eq!(f.inputs, 2);
}

#[test]
fn if_else_with_fused_inverted_compare() {
    let mut b = TreeBuilder::new();
    let a = b.param("a", 0, Ty::I32);
    let bb = b.param("b", 1, Ty::I32);
    let cond = b.compare(BinaryOp::Lt, a, bb);
    let x1 = b.local("x", Ty::I32);
    let one = b.int(1);
    let set1 = b.assign(x1, one);
    let x2 = b.local("x", Ty::I32);
    let two = b.int(2);
    let set2 = b.assign(x2, two);
    let body = vec![
        Stmt::local("x", Ty::I32, None),
        Stmt::new(StmtKind::If {
            cond,
            then_branch: Box::new(Stmt::block(vec![Stmt::expr(set1)])),
            else_branch: Some(Box::new(Stmt::block(vec![Stmt::expr(set2)]))),
        }),
    ];
    let m = method(
        vec![param("a", Ty::I32), param("b", Ty::I32)],
        Ty::Void,
        body,
    );
    let f = lower(&m, &b.finish());
    assert_eq!(
        text(&f),
        vec![
            "jge in0, in1, @if0_else",
            "move r0, 1",
            "jump @if0_end",
            "if0_else:",
            "move r0, 2",
            "if0_end:",
            "nullify r0, r0",
            "return",
        ]
    );
    assert_eq!(f.register_names.get(&0).map(String::as_str), Some("x"));
}

#[test]
fn short_circuit_and_or() {
    let mut b = TreeBuilder::new();
    let a = b.param("a", 0, Ty::Bool);
    let c = b.param("b", 1, Ty::Bool);
    let both = b.logical(LogicalOp::And, a, c);
    let call_g = call_void(&mut b, "G", 1);
    let a2 = b.param("a", 0, Ty::Bool);
    let c2 = b.param("b", 1, Ty::Bool);
    let either = b.logical(LogicalOp::Or, a2, c2);
    let call_h = call_void(&mut b, "H", 2);
    let body = vec![
        Stmt::new(StmtKind::If {
            cond: both,
            then_branch: Box::new(call_g),
            else_branch: None,
        }),
        Stmt::new(StmtKind::If {
            cond: either,
            then_branch: Box::new(call_h),
            else_branch: None,
        }),
    ];
    let m = method(
        vec![param("a", Ty::Bool), param("b", Ty::Bool)],
        Ty::Void,
        body,
    );
    let f = lower(&m, &b.finish());
    assert_eq!(
        text(&f),
        vec![
            "jf in0, @if0_end",
            "jf in1, @if0_end",
            "callv method 1",
            "if0_end:",
            "jt in0, @or2_skip",
            "jf in1, @if1_end",
            "or2_skip:",
            "callv method 2",
            "if1_end:",
            "return",
        ]
    );
}

#[test]
fn logical_value_is_materialized() {
    let mut b = TreeBuilder::new();
    let a = b.param("a", 0, Ty::Bool);
    let c = b.param("b", 1, Ty::Bool);
    let both = b.logical(LogicalOp::And, a, c);
    let m = method(
        vec![param("a", Ty::Bool), param("b", Ty::Bool)],
        Ty::Bool,
        vec![ret(both)],
    );
    let f = lower(&m, &b.finish());
    assert_eq!(
        text(&f),
        vec![
            "jf in1, @bool0_false",
            "jf in2, @bool0_false",
            "move r0, bool true",
            "jump @bool0_end",
            "bool0_false:",
            "move r0, bool false",
            "bool0_end:",
            "reref in0, r0",
            "return",
        ]
    );
}

#[test]
fn while_with_break_nullifies_inner_scope() {
    let mut b = TreeBuilder::new();
    let zero = b.int(0);
    let i1 = b.local("i", Ty::I32);
    let ten = b.int(10);
    let cond = b.compare(BinaryOp::Lt, i1, ten);
    let i2 = b.local("i", Ty::I32);
    let two = b.int(2);
    let doubled = b.binary(BinaryOp::Mul, i2, two, Ty::I32);
    let t = b.local("t", Ty::I32);
    let six = b.int(6);
    let big = b.compare(BinaryOp::Gt, t, six);
    let i3 = b.local("i", Ty::I32);
    let step = b.inc(i3, false);

    let body = vec![
        Stmt::local("i", Ty::I32, Some(zero)),
        Stmt::new(StmtKind::While {
            cond,
            body: Box::new(Stmt::block(vec![
                Stmt::local("t", Ty::I32, Some(doubled)),
                Stmt::new(StmtKind::If {
                    cond: big,
                    then_branch: Box::new(Stmt::new(StmtKind::Break)),
                    else_branch: None,
                }),
                Stmt::expr(step),
            ])),
        }),
    ];
    let f = lower(&method(vec![], Ty::Void, body), &b.finish());
    assert_eq!(
        text(&f),
        vec![
            "move r0, 0",
            "while0_cond:",
            "jge r0, 10, @while0_end",
            "mul r1, r0, 2",
            "jle r1, 6, @if1_end",
            "nullify r1, r1",
            "jump @while0_end",
            "if1_end:",
            "add r0, r0, 1",
            "nullify r1, r1",
            "jump @while0_cond",
            "while0_end:",
            "nullify r0, r0",
            "return",
        ]
    );
}

#[test]
fn foreach_walks_an_array_by_index() {
    let mut b = TreeBuilder::new();
    let zero = b.int(0);
    let arr_ty = Ty::Array(Box::new(Ty::I32));
    let arr = b.param("arr", 0, arr_ty.clone());
    let sum = b.local("sum", Ty::I32);
    let v = b.local("v", Ty::I32);
    let add = b.compound(sum, BinaryOp::Add, v);
    let body = vec![
        Stmt::local("sum", Ty::I32, Some(zero)),
        Stmt::new(StmtKind::Foreach {
            var: "v".into(),
            var_ty: Ty::I32,
            collection: arr,
            body: Box::new(Stmt::block(vec![Stmt::expr(add)])),
        }),
    ];
    let f = lower(&method(vec![param("arr", arr_ty)], Ty::Void, body), &b.finish());
    assert_eq!(
        text(&f),
        vec![
            "move r0, 0",
            "reref #r1, in0",
            "move r2, 0",
            "alen r3, r1",
            "foreach0_cond:",
            "jge r2, r3, @foreach0_end",
            "aget r4, r1, r2",
            "add r0, r0, r4",
            "nullify r4, r4",
            "foreach0_step:",
            "add r2, r2, 1",
            "jump @foreach0_cond",
            "foreach0_end:",
            "nullify r1, r1",
            "nullify r0, r0",
            "return",
        ]
    );
}

#[test]
fn string_switch_uses_a_jump_table() {
    let mut b = TreeBuilder::new();
    let s = b.param("s", 0, Ty::String);
    let section = |label: CaseLabel, value: Expr| SwitchSection {
        labels: vec![label],
        body: vec![ret(value)],
    };
    let sections = vec![
        section(CaseLabel::Case(Literal::String("a".into())), b.int(1)),
        section(CaseLabel::Case(Literal::String("b".into())), b.int(2)),
        section(CaseLabel::Default, b.int(3)),
    ];
    let body = vec![Stmt::new(StmtKind::Switch {
        subject: s,
        sections,
    })];
    let f = lower(&method(vec![param("s", Ty::String)], Ty::I32, body), &b.finish());
    assert_eq!(
        text(&f),
        vec![
            "switch in1, c0",
            "jump @switch0_case2",
            "switch0_case0:",
            "reref in0, 1",
            "return",
            "switch0_case1:",
            "reref in0, 2",
            "return",
            "switch0_case2:",
            "reref in0, 3",
            "return",
            "switch0_end:",
            "return",
        ]
    );
    assert_eq!(f.constants.len(), 1);
    match &f.constants[0] {
        Value::Table(t) => {
            assert_eq!(t.len(), 2);
            assert_eq!(
                t.get(&Value::String("b".into())),
                Some(&Value::label("switch0_case1"))
            );
        }
        other => panic!("expected a jump table, got {:?}", other),
    }
}

#[test]
fn integer_switch_chains_compares_and_traps_fallthrough() {
    let mut b = TreeBuilder::new();
    let x = b.param("x", 0, Ty::I32);
    let g = call_void(&mut b, "G", 1);
    let sections = vec![
        SwitchSection {
            labels: vec![CaseLabel::Case(Literal::Int(1))],
            body: vec![g],
        },
        SwitchSection {
            labels: vec![CaseLabel::Case(Literal::Int(2))],
            body: vec![Stmt::new(StmtKind::Break)],
        },
    ];
    let body = vec![Stmt::new(StmtKind::Switch {
        subject: x,
        sections,
    })];
    let f = lower(&method(vec![param("x", Ty::I32)], Ty::Void, body), &b.finish());
    assert_eq!(
        text(&f),
        vec![
            "jeq in0, 1, @switch0_case0",
            "jeq in0, 2, @switch0_case1",
            "jump @switch0_end",
            "switch0_case0:",
            "callv method 1",
            "trap \"illegal fallthrough\"",
            "switch0_case1:",
            "jump @switch0_end",
            "switch0_end:",
            "return",
        ]
    );
    assert!(f.statements[5].synthetic);
    assert!(!f.statements[4].synthetic);
}

#[test]
fn try_finally_around_throw() {
    let mut b = TreeBuilder::new();
    let ex_ty = Ty::Named("Exception".into());
    let ex = b.param("ex", 0, ex_ty.clone());
    let g = call_void(&mut b, "G", 1);
    let body = vec![Stmt::new(StmtKind::Try {
        body: Block::new(vec![Stmt::new(StmtKind::Throw(Some(ex)))]),
        catches: vec![],
        finally: Some(Block::new(vec![g])),
    })];
    let f = lower(&method(vec![param("ex", ex_ty)], Ty::Void, body), &b.finish());
    assert_eq!(
        text(&f),
        vec![
            "try null, @try0_finally, @try0_end",
            "throw in0",
            "try0_finally:",
            "callv method 1",
            "endfinally",
            "try0_end:",
            "return",
        ]
    );
}

#[test]
fn typed_catch_clauses_test_and_rethrow() {
    let mut b = TreeBuilder::new();
    let g = call_void(&mut b, "G", 1);
    let k = call_void(&mut b, "K", 2);
    let body = vec![Stmt::new(StmtKind::Try {
        body: Block::new(vec![g]),
        catches: vec![
            CatchClause {
                ty: Some(Ty::Named("IOError".into())),
                var: Some("e".into()),
                body: Block::new(vec![Stmt::new(StmtKind::Throw(None))]),
            },
            CatchClause {
                ty: None,
                var: None,
                body: Block::new(vec![k]),
            },
        ],
        finally: None,
    })];
    let f = lower(&method(vec![], Ty::Void, body), &b.finish());
    assert_eq!(
        text(&f),
        vec![
            "try @try0_catch, null, @try0_end",
            "callv method 1",
            "jump @try0_end",
            "try0_catch:",
            "is r0, exc, type IOError",
            "jf r0, @try0_clause1",
            "reref #r1, exc",
            "rethrow",
            "try0_clause1:",
            "callv method 2",
            "jump @try0_end",
            "try0_end:",
            "return",
        ]
    );
}

#[test]
fn only_typed_clauses_rethrow_unmatched() {
    let mut b = TreeBuilder::new();
    let g = call_void(&mut b, "G", 1);
    let body = vec![Stmt::new(StmtKind::Try {
        body: Block::new(vec![g]),
        catches: vec![CatchClause {
            ty: Some(Ty::Named("IOError".into())),
            var: None,
            body: Block::new(vec![]),
        }],
        finally: None,
    })];
    let f = lower(&method(vec![], Ty::Void, body), &b.finish());
    let listing = text(&f);
    assert_eq!(
        &listing[listing.len() - 4..],
        &["try0_clause1:", "rethrow", "try0_end:", "return"]
    );
}

#[test]
fn objects_calls_and_implicit_constructors() {
    let mut b = TreeBuilder::new();
    let point = Ty::Named("Point".into());
    let created = b.new_object(
        "Point",
        Some(CtorRef {
            index: 9,
            implicit: true,
        }),
        vec![],
    );
    let p = b.local("p", point.clone());
    let one = b.int(1);
    let moved = b.call_method(p, "Move", 4, Ty::Void, vec![one]);
    let body = vec![
        Stmt::local("p", point, Some(created)),
        Stmt::expr(moved),
    ];
    let m = method(vec![], Ty::Void, body);
    let table = b.finish();
    let ctx = ModuleContext::new();
    let f = lower_method(&m, &table, &ctx, &CodegenOptions::default()).unwrap();
    assert_eq!(
        text(&f),
        vec![
            "new r0, type Point",
            "callvirtv r0, method 9",
            "arg 1",
            "callvirtv r0, method 4",
            "nullify r0, r0",
            "return",
        ]
    );
    let declared = ctx.functions();
    assert_eq!(declared.len(), 1);
    assert_eq!(declared[0].name, "Point::.ctor");
    assert!(declared[0].implicit);
}

#[test]
fn string_addition_is_concat() {
    let mut b = TreeBuilder::new();
    let s = b.param("s", 0, Ty::String);
    let x = b.string("x");
    let joined = b.binary(BinaryOp::Add, s, x, Ty::String);
    let m = method(vec![param("s", Ty::String)], Ty::String, vec![ret(joined)]);
    let f = lower(&m, &b.finish());
    assert_eq!(f.statements[0].to_string(), "concat r0, in1, \"x\"");
}

#[test]
fn const_locals_become_immediates() {
    let mut b = TreeBuilder::new();
    let five = b.int(5);
    let k = b.local("K", Ty::I32);
    let one = b.int(1);
    let sum = b.binary(BinaryOp::Add, k, one, Ty::I32);
    let body = vec![
        Stmt::new(StmtKind::Local {
            name: "K".into(),
            ty: Ty::I32,
            init: Some(five),
            is_const: true,
        }),
        ret(sum),
    ];
    let f = lower(&method(vec![], Ty::I32, body), &b.finish());
    assert_eq!(text(&f), vec!["add r0, 5, 1", "reref in0, r0", "return"]);
}

#[test]
fn const_local_needs_a_literal() {
    let mut b = TreeBuilder::new();
    let one = b.int(1);
    let two = b.int(2);
    let sum = b.binary(BinaryOp::Add, one, two, Ty::I32);
    let body = vec![Stmt::new(StmtKind::Local {
        name: "K".into(),
        ty: Ty::I32,
        init: Some(sum),
        is_const: true,
    })];
    let err = try_lower(&method(vec![], Ty::Void, body), &b.finish()).unwrap_err();
    assert!(matches!(err, CodegenError::NonLiteralConstant { ref name, .. } if name == "K"));
}

#[test]
fn unsupported_constructs_are_fatal() {
    let mut b = TreeBuilder::new();
    let lambda = b.expr(ExprKind::Unsupported("lambda".into()), Ty::Object);
    let m = method(vec![], Ty::Void, vec![Stmt::expr(lambda)]);
    let err = try_lower(&m, &b.finish()).unwrap_err();
    assert!(matches!(err, CodegenError::Unsupported { .. }));

    let m = method(vec![], Ty::Void, vec![Stmt::new(StmtKind::Throw(None))]);
    assert!(matches!(
        try_lower(&m, &SymbolTable::default()),
        Err(CodegenError::Unsupported { .. })
    ));
}

#[test]
fn break_outside_loop_has_no_target() {
    let m = method(vec![], Ty::Void, vec![Stmt::new(StmtKind::Break)]);
    assert!(matches!(
        try_lower(&m, &SymbolTable::default()),
        Err(CodegenError::NoEnclosingTarget {
            keyword: "break",
            ..
        })
    ));
}

#[test]
fn unknown_local_is_reported() {
    let mut b = TreeBuilder::new();
    let ghost = b.local("ghost", Ty::I32);
    let m = method(vec![], Ty::Void, vec![Stmt::expr(ghost)]);
    let err = try_lower(&m, &b.finish()).unwrap_err();
    assert!(matches!(err, CodegenError::UnknownSymbol { ref name, .. } if name == "ghost"));
}

#[test]
fn operand_is_read_before_a_later_increment() {
    // return x + x++;
    let mut b = TreeBuilder::new();
    let x = b.param("x", 0, Ty::I32);
    let x2 = b.param("x", 0, Ty::I32);
    let post = b.inc(x2, false);
    let sum = b.binary(BinaryOp::Add, x, post, Ty::I32);
    let m = method(vec![param("x", Ty::I32)], Ty::I32, vec![ret(sum)]);
    let f = lower(&m, &b.finish());
    assert_eq!(
        text(&f),
        vec![
            "move r0, in1",
            "move r1, in1",
            "add r2, r1, 1",
            "move in1, r2",
            "add r3, r0, r1",
            "reref in0, r3",
            "return",
        ]
    );
}

#[test]
fn arguments_keep_left_to_right_values() {
    // G(x, x++);
    let mut b = TreeBuilder::new();
    let x = b.param("x", 0, Ty::I32);
    let x2 = b.param("x", 0, Ty::I32);
    let post = b.inc(x2, false);
    let call = Stmt::expr(b.call_static("G", 1, Ty::Void, vec![x, post]));
    let m = method(vec![param("x", Ty::I32)], Ty::Void, vec![call]);
    let f = lower(&m, &b.finish());
    assert_eq!(
        text(&f),
        vec![
            "move r0, in0",
            "move r1, in0",
            "add r2, r1, 1",
            "move in0, r2",
            "arg r0",
            "arg r1",
            "callv method 1",
            "return",
        ]
    );
}

#[test]
fn self_assigned_postfix_leaves_the_local_unchanged() {
    // int y = 1; y = y++; return y;
    let mut b = TreeBuilder::new();
    let one = b.int(1);
    let y = b.local("y", Ty::I32);
    let y2 = b.local("y", Ty::I32);
    let post = b.inc(y2, false);
    let set = b.assign(y, post);
    let y3 = b.local("y", Ty::I32);
    let m = method(
        vec![],
        Ty::I32,
        vec![Stmt::local("y", Ty::I32, Some(one)), Stmt::expr(set), ret(y3)],
    );
    let f = lower(&m, &b.finish());
    assert_eq!(
        text(&f),
        vec![
            "move r0, 1",
            "move r1, r0",
            "add r0, r0, 1",
            "move r0, r1",
            "reref in0, r0",
            "return",
        ]
    );
}

#[test]
fn operands_without_later_writes_are_not_copied() {
    // return x + y;
    let mut b = TreeBuilder::new();
    let x = b.param("x", 0, Ty::I32);
    let y = b.param("y", 1, Ty::I32);
    let sum = b.binary(BinaryOp::Add, x, y, Ty::I32);
    let m = method(
        vec![param("x", Ty::I32), param("y", Ty::I32)],
        Ty::I32,
        vec![ret(sum)],
    );
    let f = lower(&m, &b.finish());
    assert_eq!(text(&f), vec!["add r0, in1, in2", "reref in0, r0", "return"]);
}
