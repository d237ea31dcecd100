use time::OffsetDateTime;

use crate::ast::*;
use crate::version::AdhocVersion;

mod codegen;
mod compiler;

fn version(v: u32) -> AdhocVersion {
    AdhocVersion::new(v).unwrap()
}

/// Thu Mar  7 09:05:02 2024 UTC
fn build_time() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1709802302).unwrap()
}

fn expr(kind: ExpressionKind) -> Expression {
    Expression::new(kind, Range::default())
}
fn boxed(kind: ExpressionKind) -> Box<Expression> {
    Box::new(expr(kind))
}
fn ident(name: &str) -> Box<Expression> {
    Box::new(Expression::ident(name))
}
fn binary(op: BinaryOperator, left: Box<Expression>, right: Box<Expression>) -> Expression {
    expr(ExpressionKind::Binary { op, left, right })
}

fn var(name: &str, init: Expression, line: u32) -> Statement {
    StatementKind::Variable(vec![VariableDeclarator { target: Pattern::Identifier(Identifier::new(name)), init: Some(init) }]).at_line(line)
}
fn expr_stmt(e: Expression, line: u32) -> Statement {
    StatementKind::Expression(e.at_line(line)).at_line(line)
}

fn script(body: Vec<Statement>) -> Script {
    Script { body, range: Range::default() }
}

/// A script using only constructs every format version can express.
fn portable_script() -> Script {
    let print = |args: Vec<Expression>, line| StatementKind::Print(args).at_line(line);
    let function = Subroutine {
        name: Some(Identifier::new("f")),
        params: vec![],
        body: SubroutineBody::Block(vec![StatementKind::Return(Some(Expression::ident("a"))).at_line(5)]),
        range: Range::default(),
    };
    let loop_body = vec![
        expr_stmt(expr(ExpressionKind::Assign { op: AssignOperator::Compound(BinaryOperator::Add), target: ident("a"), value: Box::new(Expression::int(1)) }), 4),
        StatementKind::If {
            test: binary(BinaryOperator::Eq, ident("a"), Box::new(Expression::int(5))),
            consequent: Box::new(StatementKind::Break.at_line(4)),
            alternate: None,
        }.at_line(4),
    ];
    script(vec![
        var("a", Expression::int(1), 1),
        var("b", binary(BinaryOperator::Add, ident("a"), Box::new(Expression::int(2))), 2),
        StatementKind::If {
            test: binary(BinaryOperator::Gt, ident("b"), ident("a")),
            consequent: Box::new(print(vec![Expression::ident("a"), Expression::ident("b")], 3)),
            alternate: Some(Box::new(print(vec![expr(ExpressionKind::String("hi".into()))], 3))),
        }.at_line(3),
        StatementKind::While {
            test: binary(BinaryOperator::Lt, ident("a"), Box::new(Expression::int(10))),
            body: Box::new(StatementKind::Block(loop_body).at_line(4)),
        }.at_line(4),
        StatementKind::Function(function).at_line(5),
        expr_stmt(expr(ExpressionKind::Call { callee: ident("f"), arguments: vec![] }), 6),
    ])
}

/// A script exercising the literals and instructions of version 12 and later.
fn modern_script() -> Script {
    let closure = Subroutine {
        name: None,
        params: vec![Parameter { name: Identifier::new("x"), default: None, rest: false }],
        body: SubroutineBody::Expression(Box::new(binary(BinaryOperator::Mul, ident("x"), ident("k")))),
        range: Range::default(),
    };
    script(vec![
        var("k", expr(ExpressionKind::Double(2.5)), 1),
        var("m", expr(ExpressionKind::Map(vec![(expr(ExpressionKind::Symbol("key".into())), expr(ExpressionKind::Bool(true)))])), 2),
        var("list", expr(ExpressionKind::Array(vec![Expression::int(1), expr(ExpressionKind::UInt(2)), expr(ExpressionKind::ULong(3))])), 3),
        var("scale", expr(ExpressionKind::Function(Box::new(closure))), 4),
        StatementKind::Variable(vec![VariableDeclarator {
            target: Pattern::List { elements: vec![Identifier::new("first"), Identifier::new("rest")], rest: true },
            init: Some(Expression::ident("list")),
        }]).at_line(5),
        expr_stmt(expr(ExpressionKind::Assign {
            op: AssignOperator::Assign,
            target: boxed(ExpressionKind::Element { object: ident("list"), index: Box::new(Expression::int(0)) }),
            value: boxed(ExpressionKind::Template(vec![TemplatePart::Text("v=".into()), TemplatePart::Expression(Expression::ident("first"))])),
        }), 6),
        expr_stmt(expr(ExpressionKind::Logical { op: LogicalOperator::Or, left: ident("m"), right: boxed(ExpressionKind::Nil) }), 7),
    ])
}
