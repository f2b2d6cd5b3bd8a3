use crate::compiler::ast::{BinOp, Expr, Stat};
use crate::compiler::parser::Parser;

fn parse(src: &str) -> Vec<Stat> {
    Parser::new(src, "test").parse_chunk().expect("parse")
}

#[test]
fn parses_local_declaration() {
    let block = parse("local x, y = 1, 2");
    assert_eq!(block.len(), 1);
    match &block[0] {
        Stat::Local { names, exprs, .. } => {
            assert_eq!(names, &["x".to_string(), "y".to_string()]);
            assert_eq!(exprs, &[Expr::Int(1), Expr::Int(2)]);
        }
        other => panic!("expected Local, got {other:?}"),
    }
}

#[test]
fn folds_constant_arithmetic() {
    let block = parse("return 1 + 2 * 3");
    match &block[0] {
        Stat::Return { exprs, .. } => assert_eq!(exprs, &[Expr::Int(7)]),
        other => panic!("expected Return, got {other:?}"),
    }
}

#[test]
fn does_not_fold_across_variables() {
    let block = parse("return x + 1");
    match &block[0] {
        Stat::Return { exprs, .. } => match &exprs[0] {
            Expr::Binary(BinOp::Add, lhs, rhs, _) => {
                assert_eq!(**lhs, Expr::Name("x".into()));
                assert_eq!(**rhs, Expr::Int(1));
            }
            other => panic!("expected unfolded Binary, got {other:?}"),
        },
        other => panic!("expected Return, got {other:?}"),
    }
}

#[test]
fn parses_numeric_for_and_if() {
    let block = parse("for i=1,10 do if i == 5 then break end end");
    assert_eq!(block.len(), 1);
    match &block[0] {
        Stat::NumericFor { var, body, .. } => {
            assert_eq!(var, "i");
            assert_eq!(body.len(), 1);
            assert!(matches!(body[0], Stat::If { .. }));
        }
        other => panic!("expected NumericFor, got {other:?}"),
    }
}

#[test]
fn parses_function_call_and_method_call() {
    let block = parse("f(1, 2); obj:m()");
    assert_eq!(block.len(), 2);
    assert!(matches!(&block[0], Stat::Expr(Expr::Call { .. })));
    assert!(matches!(&block[1], Stat::Expr(Expr::MethodCall { .. })));
}

#[test]
fn parses_table_constructor_fields() {
    let block = parse("return {1, 2, x = 3, [4] = 5}");
    match &block[0] {
        Stat::Return { exprs, .. } => match &exprs[0] {
            Expr::Table(fields) => assert_eq!(fields.len(), 4),
            other => panic!("expected Table, got {other:?}"),
        },
        other => panic!("expected Return, got {other:?}"),
    }
}

#[test]
fn rejects_malformed_syntax() {
    assert!(Parser::new("local x =", "test").parse_chunk().is_err());
    assert!(Parser::new("if true then", "test").parse_chunk().is_err());
}
