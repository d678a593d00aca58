//! End-to-end scenarios: tree in, packed and fixed-up IL out.

use pretty_assertions::assert_eq;

use regil::error::CodegenError;
use regil::ir::{Operand, Value};
use regil::pipeline::lower_function;
use regil::span::Span;
use regil::tree::{
    BinaryOp, Block, CaseLabel, CatchClause, CtorRef, Expr, Literal, Method, Param, Stmt,
    StmtKind, SwitchSection, TreeBuilder, Unit,
};
use regil::types::Ty;
use regil::{compile_module, compile_unit, CodegenOptions, ModuleContext};

fn method(
    index: u32,
    name: &str,
    params: Vec<(&str, Ty)>,
    return_ty: Ty,
    body: Vec<Stmt>,
) -> Method {
    Method {
        index,
        name: name.into(),
        class: "Program".into(),
        is_static: true,
        params: params
            .into_iter()
            .map(|(name, ty)| Param {
                name: name.into(),
                ty,
                by_ref: false,
            })
            .collect(),
        return_ty,
        body: Block::new(body),
        span: Span::dummy(),
    }
}

fn ret(e: Expr) -> Stmt {
    Stmt::new(StmtKind::Return(Some(e)))
}

fn unit(methods: Vec<Method>, b: TreeBuilder) -> Unit {
    Unit {
        file: "test.json".into(),
        source: None,
        methods,
        symbols: b.finish(),
    }
}

fn text(statements: &[regil::ir::Statement]) -> Vec<String> {
    statements.iter().map(|s| s.to_string()).collect()
}

fn inc(b: &mut TreeBuilder) -> Method {
    let x = b.param("x", 0, Ty::I32);
    let one = b.int(1);
    let sum = b.binary(BinaryOp::Add, x, one, Ty::I32);
    method(0, "Inc", vec![("x", Ty::I32)], Ty::I32, vec![ret(sum)])
}

#[test]
fn throw_inside_try_finally_gets_a_leave() {
    let mut b = TreeBuilder::new();
    let ex_ty = Ty::Named("Exception".into());
    let ex = b.param("ex", 0, ex_ty.clone());
    let g = Stmt::expr(b.call_static("G", 1, Ty::Void, vec![]));
    let m = method(
        0,
        "F",
        vec![("ex", ex_ty)],
        Ty::Void,
        vec![Stmt::new(StmtKind::Try {
            body: Block::new(vec![Stmt::new(StmtKind::Throw(Some(ex)))]),
            catches: vec![],
            finally: Some(Block::new(vec![g])),
        })],
    );
    let table = b.finish();
    let lowered = lower_function(
        &m,
        &table,
        &ModuleContext::new(),
        &CodegenOptions::default(),
    )
    .unwrap();
    assert_eq!(
        text(&lowered.statements),
        vec![
            "try null, @try0_finally, @try0_end",
            "leave",
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
fn string_switch_table_holds_absolute_indices() {
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
    let m = method(
        0,
        "Pick",
        vec![("s", Ty::String)],
        Ty::I32,
        vec![Stmt::new(StmtKind::Switch {
            subject: s,
            sections,
        })],
    );
    let module = compile_module(&unit(vec![m], b), &CodegenOptions::default()).unwrap();
    let f = module.function("Pick").unwrap();
    assert_eq!(
        text(&f.statements),
        vec![
            "switch in1, c0",
            "jump 5",
            "reref in0, 1",
            "return",
            "reref in0, 2",
            "return",
            "reref in0, 3",
            "return",
            "return",
        ]
    );
    assert_eq!(f.constants.len(), 1);
    assert_eq!(f.constants[0].to_string(), r#"{"a": 2, "b": 4}"#);
    assert_eq!(f.registers, 0);
}

#[test]
fn try_catch_offsets_after_fixup() {
    let mut b = TreeBuilder::new();
    let g = Stmt::expr(b.call_static("G", 1, Ty::Void, vec![]));
    let k = Stmt::expr(b.call_static("K", 2, Ty::Void, vec![]));
    let m = method(
        0,
        "F",
        vec![],
        Ty::Void,
        vec![Stmt::new(StmtKind::Try {
            body: Block::new(vec![g]),
            catches: vec![CatchClause {
                ty: None,
                var: None,
                body: Block::new(vec![k]),
            }],
            finally: None,
        })],
    );
    let module = compile_module(&unit(vec![m], b), &CodegenOptions::default()).unwrap();
    assert_eq!(
        text(&module.functions[0].statements),
        vec![
            "try 4, null, 7",
            "callv 1",
            "leave",
            "jump 4",
            "callv 2",
            "leave",
            "jump 1",
            "return",
        ]
    );
}

#[test]
fn module_text() {
    let mut b = TreeBuilder::new();
    let inc = inc(&mut b);
    let created = b.new_object(
        "Point",
        Some(CtorRef {
            index: 9,
            implicit: true,
        }),
        vec![],
    );
    let arg = b.int(41);
    let call = b.call_static("Inc", 0, Ty::I32, vec![arg]);
    let main = method(
        1,
        "Main",
        vec![],
        Ty::Void,
        vec![
            Stmt::local("p", Ty::Named("Point".into()), Some(created)),
            Stmt::expr(call),
        ],
    );
    let unit = unit(vec![main, inc], b);
    let text = compile_unit(&unit, &CodegenOptions::default()).unwrap();
    insta::assert_snapshot!(text, @r"
    .entry 1
    .type 0 Point
    .import 9 Point::.ctor

    .function 0 Inc
    .registers 1
    .inputs 2
    .code
        add r0, in1, 1
        reref in0, r0
        return
    .end

    .function 1 Main
    .registers 2
    .inputs 0
    .code
        new r0, 0
        callvirtv r0, 9
        arg 41
        call r1, 0
        nullify r0, r0
        return
    .end
    ");
}

/// Three locals live at once, then summed.
fn three_live(b: &mut TreeBuilder) -> Method {
    let one = b.int(1);
    let two = b.int(2);
    let three = b.int(3);
    let a = b.local("a", Ty::I32);
    let bb = b.local("b", Ty::I32);
    let c = b.local("c", Ty::I32);
    let ab = b.binary(BinaryOp::Add, a, bb, Ty::I32);
    let abc = b.binary(BinaryOp::Add, ab, c, Ty::I32);
    method(
        0,
        "Sum",
        vec![],
        Ty::I32,
        vec![
            Stmt::local("a", Ty::I32, Some(one)),
            Stmt::local("b", Ty::I32, Some(two)),
            Stmt::local("c", Ty::I32, Some(three)),
            ret(abc),
        ],
    )
}

#[test]
fn register_exhaustion_names_the_function() {
    let mut b = TreeBuilder::new();
    let m = three_live(&mut b);
    let unit = unit(vec![m], b);

    let tight = CodegenOptions {
        max_registers: 2,
        ..CodegenOptions::default()
    };
    let err = compile_module(&unit, &tight).unwrap_err();
    assert_eq!(err.function, "Sum");
    assert!(matches!(
        err.source,
        CodegenError::RegisterExhausted { limit: 2, .. }
    ));

    let module = compile_module(&unit, &CodegenOptions::default()).unwrap();
    let f = &module.functions[0];
    assert!(f.registers >= 3 && f.registers <= 256);
}

#[test]
fn no_labels_survive_fixup() {
    let mut b = TreeBuilder::new();
    let i = b.local("i", Ty::I32);
    let zero = b.int(0);
    let ten = b.int(10);
    let cond = b.compare(BinaryOp::Lt, i, ten);
    let i2 = b.local("i", Ty::I32);
    let step = b.inc(i2, false);
    let g = Stmt::expr(b.call_static("G", 1, Ty::Void, vec![]));
    let m = method(
        0,
        "Loop",
        vec![],
        Ty::Void,
        vec![
            Stmt::local("i", Ty::I32, Some(zero)),
            Stmt::new(StmtKind::While {
                cond,
                body: Box::new(Stmt::block(vec![g, Stmt::expr(step)])),
            }),
        ],
    );
    let module = compile_module(&unit(vec![m], b), &CodegenOptions::default()).unwrap();
    for f in &module.functions {
        for stmt in &f.statements {
            assert!(!stmt.is_label());
            for operand in &stmt.operands {
                assert!(!matches!(operand, Operand::Label(_)));
                if let Operand::Immediate(v) = operand {
                    assert!(!v.contains_label());
                }
            }
        }
        assert!(f.constants.iter().all(|c: &Value| !c.contains_label()));
    }
}

#[test]
fn parallel_and_sequential_builds_agree() {
    let mut b = TreeBuilder::new();
    let mut methods = vec![inc(&mut b)];
    for index in 1..12u32 {
        let created = b.new_object(
            &format!("T{}", index % 3),
            Some(CtorRef {
                index: 100 + index % 3,
                implicit: true,
            }),
            vec![],
        );
        let arg = b.int(index as i64);
        let call = b.call_static("Inc", 0, Ty::I32, vec![arg]);
        methods.push(method(
            index,
            &format!("M{}", index),
            vec![],
            Ty::Void,
            vec![
                Stmt::local("o", Ty::Named(format!("T{}", index % 3)), Some(created)),
                Stmt::expr(call),
            ],
        ));
    }
    let unit = unit(methods, b);
    let parallel = compile_unit(&unit, &CodegenOptions::default()).unwrap();
    let sequential = compile_unit(
        &unit,
        &CodegenOptions {
            parallel: false,
            ..CodegenOptions::default()
        },
    )
    .unwrap();
    assert_eq!(parallel, sequential);
    assert!(parallel.starts_with(".type 0 T1\n.type 1 T2\n.type 2 T0\n"));
}
