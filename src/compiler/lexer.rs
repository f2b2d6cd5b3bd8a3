//! Hand-written lexer: UTF-8 source bytes in, a one-token-lookahead stream
//! of `(line, kind, lexeme)` out.
//!
//! Grounded on `original_source`'s lexer (token kinds, escape processing,
//! long-bracket handling) and styled after the teacher's
//! `compiler/parser/lua_token_kind.rs` naming. Produces [`Token`]s directly
//! rather than the teacher's index-based interned lexemes, since this
//! crate's [`crate::lua_value::StringInterner`] lives on the VM side, not
//! the lexer side.

use super::error::{CompileError, CompileResult};
use super::token::{Token, TokenKind};

pub struct Lexer<'a> {
    chunk_name: String,
    src: &'a [u8],
    pos: usize,
    line: u32,
    lookahead: Option<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, chunk_name: &str) -> Self {
        let bytes = src.as_bytes();
        // Skip a leading shebang line, as the reference implementation does.
        let start = if bytes.starts_with(b"#") {
            bytes.iter().position(|&b| b == b'\n').map(|i| i + 1).unwrap_or(bytes.len())
        } else {
            0
        };
        Lexer { chunk_name: chunk_name.to_string(), src: &bytes[start..], pos: 0, line: 1, lookahead: None }
    }

    fn err(&self, line: u32, msg: impl Into<String>) -> CompileError {
        CompileError::new(&self.chunk_name, line, msg)
    }

    fn peek_byte(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek_byte()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
        }
        Some(b)
    }

    fn matches(&mut self, b: u8) -> bool {
        if self.peek_byte() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn lookahead(&mut self) -> CompileResult<&Token> {
        if self.lookahead.is_none() {
            let t = self.scan_token()?;
            self.lookahead = Some(t);
        }
        Ok(self.lookahead.as_ref().unwrap())
    }

    pub fn next_token(&mut self) -> CompileResult<Token> {
        if let Some(t) = self.lookahead.take() {
            return Ok(t);
        }
        self.scan_token()
    }

    /// Peek the token *after* the current lookahead, without consuming
    /// either. Used only where the grammar is locally ambiguous on one
    /// token (table-constructor `Name '=' exp` vs. `exp` starting with a
    /// bare name) — everywhere else this parser sticks to one token of
    /// lookahead, per spec.
    pub fn peek_second(&mut self) -> CompileResult<Token> {
        self.lookahead()?;
        let (save_pos, save_line) = (self.pos, self.line);
        let second = self.scan_token()?;
        self.pos = save_pos;
        self.line = save_line;
        Ok(second)
    }

    fn skip_trivia(&mut self) -> CompileResult<()> {
        loop {
            match self.peek_byte() {
                Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n') => {
                    self.bump();
                }
                Some(b'-') if self.peek_at(1) == Some(b'-') => {
                    self.pos += 2;
                    if self.peek_byte() == Some(b'[') {
                        if let Some(level) = self.long_bracket_level() {
                            self.read_long_bracket(level)?;
                            continue;
                        }
                    }
                    while let Some(b) = self.peek_byte() {
                        if b == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// If positioned at `[=*[`, consume the opening bracket and return its
    /// `=` level; otherwise leave position unchanged.
    fn long_bracket_level(&mut self) -> Option<usize> {
        let save = self.pos;
        if self.peek_byte() != Some(b'[') {
            return None;
        }
        let mut p = self.pos + 1;
        let mut level = 0;
        while self.src.get(p) == Some(&b'=') {
            level += 1;
            p += 1;
        }
        if self.src.get(p) == Some(&b'[') {
            self.pos = p + 1;
            Some(level)
        } else {
            self.pos = save;
            None
        }
    }

    fn read_long_bracket(&mut self, level: usize) -> CompileResult<String> {
        let line = self.line;
        // A leading newline right after the opening bracket is stripped.
        if self.peek_byte() == Some(b'\r') {
            self.bump();
            if self.peek_byte() == Some(b'\n') {
                self.bump();
            }
        } else if self.peek_byte() == Some(b'\n') {
            self.bump();
        }
        let mut out = Vec::new();
        loop {
            match self.peek_byte() {
                None => return Err(self.err(line, "unterminated long bracket")),
                Some(b']') => {
                    let save = self.pos;
                    self.pos += 1;
                    let mut eq = 0;
                    while self.peek_byte() == Some(b'=') {
                        eq += 1;
                        self.pos += 1;
                    }
                    if eq == level && self.peek_byte() == Some(b']') {
                        self.pos += 1;
                        break;
                    }
                    self.pos = save;
                    out.push(b']');
                    self.pos += 1;
                }
                Some(b'\r') => {
                    self.bump();
                    if self.peek_byte() == Some(b'\n') {
                        self.bump();
                    }
                    out.push(b'\n');
                }
                Some(b) => {
                    out.push(b);
                    self.bump();
                }
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn scan_token(&mut self) -> CompileResult<Token> {
        self.skip_trivia()?;
        let line = self.line;
        let b = match self.peek_byte() {
            None => return Ok(Token { kind: TokenKind::Eof, line }),
            Some(b) => b,
        };

        if b.is_ascii_digit() || (b == b'.' && self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false)) {
            return self.scan_number(line);
        }
        if b == b'_' || b.is_ascii_alphabetic() {
            return self.scan_name(line);
        }
        if b == b'"' || b == b'\'' {
            return self.scan_short_string(line);
        }
        if b == b'[' && matches!(self.peek_at(1), Some(b'[') | Some(b'=')) {
            let save = self.pos;
            if let Some(level) = self.long_bracket_level() {
                let s = self.read_long_bracket(level)?;
                return Ok(Token { kind: TokenKind::Str(s), line });
            }
            self.pos = save;
        }
        self.scan_operator(line)
    }

    fn scan_name(&mut self, line: u32) -> CompileResult<Token> {
        let start = self.pos;
        while let Some(b) = self.peek_byte() {
            if b == b'_' || b.is_ascii_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let s = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let kind = TokenKind::keyword(s).unwrap_or_else(|| TokenKind::Name(s.to_string()));
        Ok(Token { kind, line })
    }

    fn scan_number(&mut self, line: u32) -> CompileResult<Token> {
        let start = self.pos;
        let is_hex = self.peek_byte() == Some(b'0') && matches!(self.peek_at(1), Some(b'x') | Some(b'X'));
        if is_hex {
            self.pos += 2;
            let mut is_float = false;
            while let Some(b) = self.peek_byte() {
                if b.is_ascii_hexdigit() {
                    self.pos += 1;
                } else if b == b'.' {
                    is_float = true;
                    self.pos += 1;
                } else if b == b'p' || b == b'P' {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek_byte(), Some(b'+') | Some(b'-')) {
                        self.pos += 1;
                    }
                } else {
                    break;
                }
            }
            let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
            let hex = &text[2..];
            if is_float {
                let f = parse_hex_float(hex).ok_or_else(|| self.err(line, format!("malformed number near '{text}'")))?;
                return Ok(Token { kind: TokenKind::Float(f), line });
            }
            let i = i64::from_str_radix(hex, 16).unwrap_or_else(|_| {
                // Overflowing hex integers wrap, matching lexer.c's strtoul-then-cast.
                u64::from_str_radix(hex, 16).map(|u| u as i64).unwrap_or(0)
            });
            return Ok(Token { kind: TokenKind::Int(i), line });
        }

        let mut is_float = false;
        while let Some(b) = self.peek_byte() {
            if b.is_ascii_digit() {
                self.pos += 1;
            } else if b == b'.' {
                is_float = true;
                self.pos += 1;
            } else if b == b'e' || b == b'E' {
                is_float = true;
                self.pos += 1;
                if matches!(self.peek_byte(), Some(b'+') | Some(b'-')) {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        if is_float {
            let f: f64 = text.parse().map_err(|_| self.err(line, format!("malformed number near '{text}'")))?;
            Ok(Token { kind: TokenKind::Float(f), line })
        } else {
            match text.parse::<i64>() {
                Ok(i) => Ok(Token { kind: TokenKind::Int(i), line }),
                // Decimal literal too big for an integer becomes a float, per 5.3 semantics.
                Err(_) => {
                    let f: f64 = text.parse().map_err(|_| self.err(line, format!("malformed number near '{text}'")))?;
                    Ok(Token { kind: TokenKind::Float(f), line })
                }
            }
        }
    }

    fn scan_short_string(&mut self, line: u32) -> CompileResult<Token> {
        let quote = self.bump().unwrap();
        let mut out = String::new();
        loop {
            match self.peek_byte() {
                None => return Err(self.err(line, "unterminated string")),
                Some(b) if b == quote => {
                    self.pos += 1;
                    break;
                }
                Some(b'\n') => return Err(self.err(line, "unterminated string")),
                Some(b'\\') => {
                    self.pos += 1;
                    self.scan_escape(line, &mut out)?;
                }
                Some(_) => {
                    let start = self.pos;
                    while !matches!(self.peek_byte(), None | Some(b'\\') | Some(b'\n')) && self.peek_byte() != Some(quote) {
                        self.pos += 1;
                    }
                    out.push_str(std::str::from_utf8(&self.src[start..self.pos]).unwrap_or(""));
                }
            }
        }
        Ok(Token { kind: TokenKind::Str(out), line })
    }

    fn scan_escape(&mut self, line: u32, out: &mut String) -> CompileResult<()> {
        let b = self.peek_byte().ok_or_else(|| self.err(line, "unterminated string"))?;
        match b {
            b'a' => { out.push('\u{7}'); self.pos += 1; }
            b'b' => { out.push('\u{8}'); self.pos += 1; }
            b'f' => { out.push('\u{c}'); self.pos += 1; }
            b'n' => { out.push('\n'); self.pos += 1; }
            b'r' => { out.push('\r'); self.pos += 1; }
            b't' => { out.push('\t'); self.pos += 1; }
            b'v' => { out.push('\u{b}'); self.pos += 1; }
            b'\\' => { out.push('\\'); self.pos += 1; }
            b'"' => { out.push('"'); self.pos += 1; }
            b'\'' => { out.push('\''); self.pos += 1; }
            b'\n' => { out.push('\n'); self.bump(); }
            b'\r' => { self.bump(); if self.peek_byte() == Some(b'\n') { self.bump(); } out.push('\n'); }
            b'x' => {
                self.pos += 1;
                let mut v: u32 = 0;
                for _ in 0..2 {
                    let h = self.peek_byte().ok_or_else(|| self.err(line, "hexadecimal digit expected"))?;
                    v = v * 16 + (h as char).to_digit(16).ok_or_else(|| self.err(line, "hexadecimal digit expected"))?;
                    self.pos += 1;
                }
                out.push(v as u8 as char);
            }
            b'z' => {
                self.pos += 1;
                while matches!(self.peek_byte(), Some(b' ') | Some(b'\t') | Some(b'\r') | Some(b'\n')) {
                    self.bump();
                }
            }
            b'u' => {
                self.pos += 1;
                if self.peek_byte() != Some(b'{') {
                    return Err(self.err(line, "missing '{' in \\u{xxxx}"));
                }
                self.pos += 1;
                let mut v: u32 = 0;
                while let Some(h) = self.peek_byte().and_then(|b| (b as char).to_digit(16)) {
                    v = v * 16 + h;
                    self.pos += 1;
                }
                if self.peek_byte() != Some(b'}') {
                    return Err(self.err(line, "missing '}' in \\u{xxxx}"));
                }
                self.pos += 1;
                out.push(char::from_u32(v).ok_or_else(|| self.err(line, "UTF-8 value too large"))?);
            }
            b if b.is_ascii_digit() => {
                let mut v: u32 = 0;
                for _ in 0..3 {
                    match self.peek_byte() {
                        Some(d) if d.is_ascii_digit() => {
                            v = v * 10 + (d - b'0') as u32;
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                out.push(v as u8 as char);
            }
            _ => return Err(self.err(line, "invalid escape sequence")),
        }
        Ok(())
    }

    fn scan_operator(&mut self, line: u32) -> CompileResult<Token> {
        let b = self.bump().unwrap();
        use TokenKind::*;
        let kind = match b {
            b'+' => Plus,
            b'-' => Minus,
            b'*' => Star,
            b'/' => if self.matches(b'/') { DSlash } else { Slash },
            b'%' => Percent,
            b'^' => Caret,
            b'#' => Hash,
            b'=' => if self.matches(b'=') { Eq } else { Assign },
            b'~' => if self.matches(b'=') { Ne } else { return Err(self.err(line, "unexpected symbol near '~'")) },
            b'<' => if self.matches(b'=') { Le } else { Lt },
            b'>' => if self.matches(b'=') { Ge } else { Gt },
            b'(' => LParen,
            b')' => RParen,
            b'{' => LBrace,
            b'}' => RBrace,
            b'[' => LBracket,
            b']' => RBracket,
            b';' => Semi,
            b':' => if self.matches(b':') { DColon } else { Colon },
            b',' => Comma,
            b'.' => {
                if self.matches(b'.') {
                    if self.matches(b'.') { Ellipsis } else { Concat }
                } else {
                    Dot
                }
            }
            other => {
                return Err(self.err(line, format!("unexpected symbol near '{}'", other as char)));
            }
        };
        Ok(Token { kind, line })
    }
}

/// Parse a Lua hex float body (after the `0x` prefix), e.g. `1.8p3`,
/// `.4p-2`, `A.`. Shared with [`crate::lua_value::LuaValue::to_number`]'s
/// numeral coercion.
pub fn parse_hex_float(hex: &str) -> Option<f64> {
    let (mantissa, exp) = match hex.find(['p', 'P']) {
        Some(i) => (&hex[..i], hex[i + 1..].parse::<i32>().ok()?),
        None => (hex, 0),
    };
    let (int_part, frac_part) = match mantissa.find('.') {
        Some(i) => (&mantissa[..i], &mantissa[i + 1..]),
        None => (mantissa, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let mut value: f64 = 0.0;
    for c in int_part.chars() {
        value = value * 16.0 + c.to_digit(16)? as f64;
    }
    let mut scale = 1.0 / 16.0;
    for c in frac_part.chars() {
        value += c.to_digit(16)? as f64 * scale;
        scale /= 16.0;
    }
    Some(value * 2f64.powi(exp))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<TokenKind> {
        let mut lx = Lexer::new(src, "test");
        let mut out = Vec::new();
        loop {
            let t = lx.next_token().unwrap();
            if t.kind == TokenKind::Eof {
                break;
            }
            out.push(t.kind);
        }
        out
    }

    #[test]
    fn lexes_keywords_and_names() {
        assert_eq!(tokens("local x = 1"), vec![TokenKind::Local, TokenKind::Name("x".into()), TokenKind::Assign, TokenKind::Int(1)]);
    }

    #[test]
    fn lexes_long_bracket_strings_stripping_leading_newline() {
        assert_eq!(tokens("[[\nhello]]"), vec![TokenKind::Str("hello".to_string())]);
    }

    #[test]
    fn lexes_hex_float() {
        assert_eq!(parse_hex_float("1.8p3"), Some(12.0));
    }

    #[test]
    fn skips_line_comments_and_long_comments() {
        assert_eq!(tokens("-- comment\nlocal --[[ long\ncomment ]] x"), vec![TokenKind::Local, TokenKind::Name("x".into())]);
    }
}
