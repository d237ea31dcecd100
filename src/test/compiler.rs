use crate::compiler::{build, CompileOptions, Compiler};
use crate::error::Error;
use crate::frame::CodeFrame;
use crate::instruction::{Instruction, InstructionType as T, RunState};
use crate::symbol::SymbolMap;

use super::*;

fn compile(v: u32, script: &Script) -> (CodeFrame, SymbolMap) {
    let options = CompileOptions::new(version(v)).with_source_file("main.ad");
    Compiler::new(&options).compile(script).unwrap()
}

fn kinds(frame: &CodeFrame) -> Vec<T> {
    frame.instructions().map(|(_, ins)| ins.kind()).collect()
}

/// Hands back a fixed tree and remembers the text it was given.
struct FixedParser {
    script: Option<Script>,
    diagnostics: Vec<Diagnostic>,
    seen: String,
}
impl Parser for FixedParser {
    fn parse(&mut self, text: &str) -> (Option<Script>, Vec<Diagnostic>) {
        self.seen = text.to_owned();
        (self.script.clone(), self.diagnostics.clone())
    }
}

#[test]
fn test_portable_script_all_versions() {
    let script = portable_script();
    for v in AdhocVersion::MIN..=AdhocVersion::MAX {
        let (frame, _) = compile(v as u32, &script);
        frame.check().unwrap_or_else(|e| panic!("version {v}: {e}"));
        assert!(matches!(frame.last_instruction(), Some(Instruction::SetState { state: RunState::Exit } | Instruction::SetStateOld { state: RunState::Exit })));
    }
}

#[test]
fn test_modern_script_needs_version_12() {
    let script = modern_script();
    let (frame, symbols) = compile(12, &script);
    frame.check().unwrap();
    assert!(symbols.get("__mul__").is_some());
    let kinds = kinds(&frame);
    for kind in [T::DoubleConst, T::MapConst, T::MapInsert, T::BoolConst, T::ArrayConst, T::ArrayPush, T::UIntConst, T::ULongConst,
        T::FunctionConst, T::ListAssign, T::ElementPush, T::StringPush, T::LogicalOr] {
        assert!(kinds.contains(&kind), "missing {kind}");
    }

    let options = CompileOptions::new(version(11));
    let err = Compiler::new(&options).compile(&script).unwrap_err();
    assert!(err.message.contains("not supported by adhoc version 11"), "{err}");
}

#[test]
fn test_if_else_targets() {
    let body = vec![StatementKind::If {
        test: Expression::ident("a"),
        consequent: Box::new(expr_stmt(Expression::int(1), 1)),
        alternate: Some(Box::new(expr_stmt(Expression::int(2), 2))),
    }.at_line(1)];
    let (frame, _) = compile(12, &script(body));
    let ins: Vec<_> = frame.instructions().map(|(_, x)| x).collect();
    // 0 eval, 1 jif, 2 int, 3 pop, 4 leave, 5 jump, 6 int, 7 pop, 8 leave
    assert_eq!(*ins[1], Instruction::JumpIfFalse { target: 5 });
    assert_eq!(*ins[5], Instruction::Jump { target: 8 });
}

#[test]
fn test_old_if_without_else() {
    let body = vec![StatementKind::If {
        test: Expression::ident("a"),
        consequent: Box::new(StatementKind::Block(vec![]).at_line(1)),
        alternate: None,
    }.at_line(1)];
    let (frame, _) = compile(10, &script(body));
    assert_eq!(kinds(&frame), [T::VariableEval, T::JumpIfFalse, T::Jump, T::SetState]);
    let ins: Vec<_> = frame.instructions().map(|(_, x)| x).collect();
    assert_eq!(*ins[1], Instruction::JumpIfFalse { target: 2 });
    assert_eq!(*ins[2], Instruction::Jump { target: 2 });
}

#[test]
fn test_for_loop_continue() {
    let init = var("i", Expression::int(0), 1);
    let update = expr(ExpressionKind::Update { op: UpdateOperator::Increment, prefix: false, argument: ident("i") });
    let body = vec![StatementKind::For {
        init: Some(Box::new(init)),
        test: Some(binary(BinaryOperator::Lt, ident("i"), Box::new(Expression::int(3)))),
        update: vec![update],
        body: Box::new(StatementKind::Continue.at_line(2)),
    }.at_line(1)];
    let (frame, symbols) = compile(12, &script(body));
    let ins: Vec<_> = frame.instructions().map(|(_, x)| x).collect();
    // 0 int, 1 push, 2 assign_pop, 3 eval, 4 int, 5 op, 6 jif, 7 continue, 8 push, 9 incr, 10 pop, 11 jump
    assert_eq!(*ins[7], Instruction::Jump { target: 7 });
    assert_eq!(*ins[11], Instruction::Jump { target: 2 });
    assert_eq!(*ins[6], Instruction::JumpIfFalse { target: 11 });
    assert!(symbols.get("__post_incr__").is_some());
}

fn case(test: Option<i32>, body: Vec<Statement>, line: u32) -> SwitchCase {
    SwitchCase { test: test.map(Expression::int), body, range: Range { line, ..Range::default() } }
}

#[test]
fn test_foreach_break_continue() {
    let body = StatementKind::Block(vec![StatementKind::Continue.at_line(2), StatementKind::Break.at_line(3)]).at_line(2);
    let foreach = StatementKind::Foreach {
        target: Pattern::Identifier(Identifier::new("x")),
        iterable: Expression::ident("xs").at_line(1),
        body: Box::new(body),
    };
    let (frame, symbols) = compile(12, &script(vec![foreach.clone().at_line(1)]));
    frame.check().unwrap();
    assert!(symbols.get("iterator").is_some() && symbols.get("fetch_next").is_some() && symbols.get("in#0").is_some());

    let ins: Vec<_> = frame.instructions().map(|(_, x)| x).collect();
    // 0 xs, 1 .iterator, 2-3 in#0 = , 4 in#0, 5 .fetch_next, 6 jif, 7 in#0, 8 eval, 9-10 x = , 11 continue, 12 break, 13 leave, 14 jump
    assert_eq!(&kinds(&frame)[..11], [T::VariableEval, T::AttributeEval, T::VariablePush, T::AssignPop, T::VariableEval,
        T::AttributeEval, T::JumpIfFalse, T::VariableEval, T::Eval, T::VariablePush, T::AssignPop]);
    assert_eq!(*ins[6], Instruction::JumpIfFalse { target: 14 });
    assert_eq!(*ins[11], Instruction::Jump { target: 13 });
    assert_eq!(*ins[12], Instruction::Jump { target: 14 });
    assert_eq!(*ins[14], Instruction::Jump { target: 3 });
    assert_eq!(ins[15].kind(), T::Leave);

    let options = CompileOptions::new(version(11));
    let err = Compiler::new(&options).compile(&script(vec![foreach.at_line(7)])).unwrap_err();
    assert_eq!(err.line, Some(7));
}

#[test]
fn test_switch_break_continue() {
    let switch = StatementKind::Switch {
        discriminant: Expression::ident("b"),
        cases: vec![
            case(Some(1), vec![StatementKind::Continue.at_line(3)], 3),
            case(Some(2), vec![StatementKind::Break.at_line(4)], 4),
            case(None, vec![StatementKind::Break.at_line(5)], 5),
        ],
    }.at_line(2);
    let body = StatementKind::Block(vec![switch]).at_line(1);
    let (frame, symbols) = compile(12, &script(vec![StatementKind::While { test: Expression::ident("a"), body: Box::new(body) }.at_line(1)]));
    frame.check().unwrap();
    assert!(symbols.get("__eq__").is_some() && symbols.get("case#0").is_some());

    let ins: Vec<_> = frame.instructions().map(|(_, x)| x).collect();
    // 0 a, 1 jif, 2-4 case#0 = b, 5-8 case 1, 9-12 case 2, 13 default, 14 continue, 15 break, 16 break, 17-18 leave, 19 jump
    assert_eq!(*ins[1], Instruction::JumpIfFalse { target: 19 });
    assert_eq!(*ins[8], Instruction::JumpIfTrue { target: 13 });
    assert_eq!(*ins[12], Instruction::JumpIfTrue { target: 14 });
    assert_eq!(*ins[13], Instruction::Jump { target: 15 });
    assert_eq!(*ins[14], Instruction::Jump { target: -1 });
    assert_eq!(*ins[15], Instruction::Jump { target: 16 });
    assert_eq!(*ins[16], Instruction::Jump { target: 16 });
    assert_eq!((ins[17].kind(), ins[18].kind()), (T::Leave, T::Leave));
    assert_eq!(*ins[19], Instruction::Jump { target: -1 });
    assert_eq!(frame.instructions().nth(8).map(|(line, _)| line), Some(3));
}

#[test]
fn test_switch_without_default() {
    let switch = StatementKind::Switch { discriminant: Expression::ident("b"), cases: vec![case(Some(1), vec![StatementKind::Break.at_line(2)], 2)] };
    let (frame, symbols) = compile(10, &script(vec![switch.at_line(1)]));
    assert!(symbols.get("==").is_some());
    assert_eq!(kinds(&frame), [T::VariablePush, T::VariableEval, T::Assign, T::Pop, T::VariableEval, T::IntConst, T::BinaryOperator,
        T::JumpIfTrue, T::Jump, T::Jump, T::SetState]);
    let ins: Vec<_> = frame.instructions().map(|(_, x)| x).collect();
    assert_eq!(*ins[7], Instruction::JumpIfTrue { target: 8 });
    assert_eq!(*ins[8], Instruction::Jump { target: 9 });
    assert_eq!(*ins[9], Instruction::Jump { target: 9 });
}

#[test]
fn test_switch_errors() {
    let options = CompileOptions::new(version(12));
    let continue_only = StatementKind::Switch { discriminant: Expression::ident("b"), cases: vec![case(None, vec![StatementKind::Continue.at_line(3)], 2)] };
    let err = Compiler::new(&options).compile(&script(vec![continue_only.at_line(1)])).unwrap_err();
    assert_eq!(err.line, Some(3));
    assert!(err.message.contains("continue"), "{err}");

    let two_defaults = StatementKind::Switch { discriminant: Expression::ident("b"), cases: vec![case(None, vec![], 2), case(None, vec![], 4)] };
    let err = Compiler::new(&options).compile(&script(vec![two_defaults.at_line(1)])).unwrap_err();
    assert_eq!(err.line, Some(4));
}

#[test]
fn test_try_catch() {
    let body = vec![StatementKind::Try {
        block: vec![StatementKind::Throw(expr(ExpressionKind::String("bad".into()))).at_line(2)],
        param: Some(Identifier::new("e")),
        handler: Some(vec![StatementKind::Print(vec![Expression::ident("e")]).at_line(3)]),
    }.at_line(1)];
    let (frame, _) = compile(12, &script(body));
    let kinds = kinds(&frame);
    assert_eq!(&kinds[..10], [T::TryCatch, T::StringConst, T::Throw, T::Leave, T::SetState, T::Jump, T::IntConst, T::VariablePush, T::Assign, T::VariablePush]);
    let ins: Vec<_> = frame.instructions().map(|(_, x)| x).collect();
    assert_eq!(*ins[0], Instruction::TryCatch { target: 4 });
    let Instruction::VariablePush { symbols, .. } = ins[9] else { panic!() };
    assert_eq!(symbols[0].name(), "catch#0");
}

#[test]
fn test_modules_and_classes() {
    let body = vec![
        StatementKind::Module {
            path: vec![Identifier::new("main"), Identifier::new("util")],
            body: vec![StatementKind::Static { name: Identifier::new("count"), value: Some(Expression::int(0)) }.at_line(2)],
        }.at_line(1),
        StatementKind::Class { name: Identifier::new("Car"), extends: None, body: vec![
            StatementKind::Attribute { name: Identifier::new("speed"), value: None }.at_line(4),
        ] }.at_line(3),
    ];
    let (frame, _) = compile(12, &script(body));
    let listing: Vec<String> = frame.instructions().map(|(_, x)| x.to_string()).collect();
    assert_eq!(listing[0], "MODULE_DEFINE: main,util,main::util");
    assert_eq!(listing[1], "STATIC_DEFINE: count");
    assert!(listing.iter().any(|x| x == "CLASS_DEFINE: Car extends System,Object,System::Object"));
    assert!(listing.iter().any(|x| x == "ATTRIBUTE_DEFINE: speed"));
    assert!(frame.instructions().any(|(_, x)| *x == Instruction::Leave { depth: 1, rewind: 1 }));

    let (frame, _) = compile(9, &script(vec![StatementKind::Class { name: Identifier::new("Car"), extends: None, body: vec![] }.at_line(1)]));
    assert_eq!(frame.instructions().next().map(|(_, x)| x.to_string()).unwrap(), "CLASS_DEFINE: Car extends Object");
}

#[test]
fn test_import_alias() {
    let import = |alias: Option<&str>| StatementKind::Import {
        path: vec![Identifier::new("main"), Identifier::new("pdistd")],
        target: Identifier::new("MGameParameter"),
        alias: alias.map(Identifier::new),
    }.at_line(1);
    let (frame, _) = compile(12, &script(vec![import(None)]));
    let Some((_, Instruction::Import { alias: Some(alias), path, .. })) = frame.instructions().next() else { panic!() };
    assert_eq!(alias.name(), "nil");
    assert_eq!(path.last().unwrap().name(), "main::pdistd");

    let (frame, _) = compile(9, &script(vec![import(None)]));
    assert!(matches!(frame.instructions().next(), Some((_, Instruction::Import { alias: None, .. }))));
    let options = CompileOptions::new(version(9));
    assert!(Compiler::new(&options).compile(&script(vec![import(Some("P"))])).is_err());
}

#[test]
fn test_method_self_slot() {
    let method = Subroutine {
        name: Some(Identifier::new("onLoad")),
        params: vec![Parameter { name: Identifier::new("context"), default: None, rest: false }],
        body: SubroutineBody::Block(vec![var("x", Expression::int(1), 2)]),
        range: Range::default(),
    };
    let body = vec![StatementKind::Method(method).at_line(1)];

    let (frame, _) = compile(10, &script(body.clone()));
    let inner = frame.instructions().find_map(|(_, x)| x.frame()).unwrap();
    assert_eq!(inner.sizes().local_storage, 3); // context, self, x
    let (frame, _) = compile(12, &script(body));
    let inner = frame.instructions().find_map(|(_, x)| x.frame()).unwrap();
    assert_eq!(inner.sizes().local_storage, 3); // self, context, x
}

#[test]
fn test_build_pipeline() {
    let mut parser = FixedParser { script: Some(portable_script()), diagnostics: vec![], seen: String::new() };
    let options = CompileOptions::new(version(13)).with_source_file("main.ad").with_build_time(build_time());
    let bytes = build("#define GREETING \"hi\"\nGREETING\n", &options, &mut parser).unwrap();
    assert_eq!(parser.seen, "\n\"hi\"\n");
    assert_eq!(&bytes[..8], b"ADCH013\0");
}

#[test]
fn test_build_fails_on_diagnostics() {
    let diagnostic = Diagnostic { start: 0, end: 1, message: "unexpected token".into() };
    let mut parser = FixedParser { script: Some(portable_script()), diagnostics: vec![diagnostic], seen: String::new() };
    let options = CompileOptions::new(version(12)).with_source_file("main.ad");
    assert!(matches!(build("x", &options, &mut parser), Err(Error::Parse(_))));

    let options = CompileOptions::new(version(12)).with_source_file("main.ad");
    let mut parser = FixedParser { script: Some(script(vec![])), diagnostics: vec![], seen: String::new() };
    assert!(matches!(build("#if 1\n", &options, &mut parser), Err(Error::Preprocessor(_))));
}

#[test]
fn test_nested_closure_captures() {
    let literal = |body: SubroutineBody| expr(ExpressionKind::Function(Box::new(Subroutine { name: None, params: vec![], body, range: Range::default() })));
    let inner = literal(SubroutineBody::Expression(ident("x")));
    let middle = literal(SubroutineBody::Block(vec![StatementKind::Return(Some(inner)).at_line(3)]));
    let (frame, _) = compile(12, &script(vec![var("x", Expression::int(1), 1), var("f", middle, 2)]));

    let ins: Vec<_> = frame.instructions().map(|(_, x)| x).collect();
    assert!(matches!(ins[3], Instruction::VariableEval { index: 1, .. }));
    let Instruction::FunctionConst { frame: middle } = ins[4] else { panic!("expected a function literal") };
    assert_eq!(middle.signature(), "()[x]");
    let inner = middle.instructions().find_map(|(_, x)| x.frame()).unwrap();
    assert_eq!(inner.signature(), "()[x]");
    assert!(middle.instructions().any(|(_, x)| matches!(x, Instruction::VariableEval { index: -1, .. })));
}
