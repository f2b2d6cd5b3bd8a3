use crate::compiler::lexer::Lexer;
use crate::compiler::token::TokenKind;

fn kinds(src: &str) -> Vec<TokenKind> {
    let mut lexer = Lexer::new(src, "test");
    let mut out = Vec::new();
    loop {
        let tok = lexer.next_token().expect("lex");
        let done = tok.kind == TokenKind::Eof;
        out.push(tok.kind);
        if done {
            break;
        }
    }
    out
}

#[test]
fn lexes_keywords_and_names() {
    assert_eq!(
        kinds("local x = 1"),
        vec![TokenKind::Local, TokenKind::Name("x".into()), TokenKind::Assign, TokenKind::Int(1), TokenKind::Eof]
    );
}

#[test]
fn lexes_two_char_operators_greedily() {
    assert_eq!(kinds("a ~= b"), vec![TokenKind::Name("a".into()), TokenKind::Ne, TokenKind::Name("b".into()), TokenKind::Eof]);
    assert_eq!(kinds(".."), vec![TokenKind::Concat, TokenKind::Eof]);
    assert_eq!(kinds("..."), vec![TokenKind::Ellipsis, TokenKind::Eof]);
    assert_eq!(kinds("//"), vec![TokenKind::DSlash, TokenKind::Eof]);
}

#[test]
fn lexes_string_literals_with_escapes() {
    assert_eq!(kinds(r#""hi\n""#), vec![TokenKind::Str("hi\n".into()), TokenKind::Eof]);
}

#[test]
fn lexes_float_and_hex_literals() {
    assert_eq!(kinds("3.5"), vec![TokenKind::Float(3.5), TokenKind::Eof]);
    assert_eq!(kinds("0xff"), vec![TokenKind::Int(255), TokenKind::Eof]);
}

#[test]
fn skips_line_and_block_comments() {
    assert_eq!(kinds("-- comment\n1"), vec![TokenKind::Int(1), TokenKind::Eof]);
    assert_eq!(kinds("--[[ block \n comment ]]2"), vec![TokenKind::Int(2), TokenKind::Eof]);
}

#[test]
fn lookahead_does_not_consume() {
    let mut lexer = Lexer::new("return 1", "test");
    assert_eq!(lexer.lookahead().unwrap().kind, TokenKind::Return);
    assert_eq!(lexer.lookahead().unwrap().kind, TokenKind::Return);
    assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Return);
    assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Int(1));
}
