//! UTF-8-aware lexer with string-interpolation re-entry (§4.1).

use crate::error::{CompileError, CompileResult};
use crate::token::{keyword, Token, TokenKind};
use ember_core::object::{Heap, HeapObj, ObjString};
use ember_core::Value;

/// One level of "currently inside a string, having just opened `%(`"
/// bookkeeping. Only one level is supported (nested interpolation is a
/// compile error); `paren_depth` tracks parens opened *inside* the
/// interpolated expression so the lexer can tell an expression-local `)`
/// from the one that closes the interpolation and returns to string mode.
struct InterpFrame {
    paren_depth: u32,
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: u32,
    file: String,
    interp_stack: Vec<InterpFrame>,
}

impl Lexer {
    pub fn new(file: impl Into<String>, source: &str) -> Self {
        let mut chars: Vec<char> = source.chars().collect();
        // Shebang: `#!` at file start is skipped to end of line.
        if chars.starts_with(&['#', '!']) {
            let mut i = 0;
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            chars.drain(0..i);
        }
        Lexer { source: chars, pos: 0, line: 1, file: file.into(), interp_stack: Vec::new() }
    }

    fn err(&self, line: u32, msg: impl Into<String>) -> CompileError {
        CompileError::new(self.file.clone(), line, msg)
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance_char(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn matches_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance_char();
            true
        } else {
            false
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> CompileResult<()> {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') | Some('\n') => {
                    self.advance_char();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while self.peek().is_some() && self.peek() != Some('\n') {
                        self.advance_char();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let start_line = self.line;
                    self.advance_char();
                    self.advance_char();
                    loop {
                        match self.peek() {
                            None => {
                                return Err(self.err(start_line, "unterminated block comment"))
                            }
                            Some('*') if self.peek_at(1) == Some('/') => {
                                self.advance_char();
                                self.advance_char();
                                break;
                            }
                            _ => {
                                self.advance_char();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Move to the next token, consuming it from the source. Mirrors the
    /// base spec's `advance` operation: the caller (the parser/compiler)
    /// holds `prev`/`cur` and calls this to shift them. `heap` is where
    /// string-literal tokens allocate their backing `ObjString`, so they
    /// land in the same VM-global object list as everything else instead
    /// of a throwaway one.
    pub fn next_token(&mut self, heap: &mut Heap) -> CompileResult<Token> {
        self.skip_whitespace_and_comments()?;
        let line = self.line;
        let c = match self.advance_char() {
            None => return Ok(Token::eof(line)),
            Some(c) => c,
        };

        if c.is_ascii_digit() {
            return self.number(c, line);
        }
        if c == '_' || c.is_alphabetic() {
            return self.identifier(c, line);
        }
        if c == '"' {
            return self.string(line, heap);
        }

        use TokenKind::*;
        let kind = match c {
            ',' => Comma,
            ':' => Colon,
            '(' => {
                if let Some(frame) = self.interp_stack.last_mut() {
                    frame.paren_depth += 1;
                }
                LeftParen
            }
            ')' => {
                if let Some(frame) = self.interp_stack.last_mut() {
    if frame.paren_depth == 0 {
                        self.interp_stack.pop();
                        return self.string(line, heap);
                    }
                    frame.paren_depth -= 1;
                }
                RightParen
            }
            '[' => LeftBracket,
            ']' => RightBracket,
            '{' => LeftBrace,
            '}' => RightBrace,
            '.' => {
                if self.matches_char('.') {
                    DotDot
                } else {
                    Dot
                }
            }
            '?' => Question,
            '+' => Plus,
            '-' => Minus,
            '*' => Star,
            '/' => Slash,
            '%' => Percent,
            '~' => Tilde,
            '&' => {
                if self.matches_char('&') {
                    AmpAmp
                } else {
                    Amp
                }
            }
            '|' => {
                if self.matches_char('|') {
                    PipePipe
                } else {
                    Pipe
                }
            }
            '!' => {
                if self.matches_char('=') {
                    BangEq
                } else {
                    Bang
                }
            }
            '=' => {
                if self.matches_char('=') {
                    EqEq
                } else {
                    Eq
                }
            }
            '>' => {
                if self.matches_char('=') {
                    GreaterEq
                } else if self.matches_char('>') {
                    ShiftRight
                } else {
                    Greater
                }
            }
            '<' => {
                if self.matches_char('=') {
                    LessEq
                } else if self.matches_char('<') {
                    ShiftLeft
                } else {
                    Less
                }
            }
            other => return Err(self.err(line, format!("unknown character '{other}'"))),
        };
        Ok(Token { kind, lexeme: c.to_string(), line, value: Value::Undefined })
    }

    fn identifier(&mut self, first: char, line: u32) -> CompileResult<Token> {
        let mut text = String::new();
        text.push(first);
        while let Some(c) = self.peek() {
            if c == '_' || c.is_alphanumeric() {
                text.push(c);
                self.advance_char();
            } else {
                break;
            }
        }
        let kind = keyword(&text).unwrap_or(TokenKind::Identifier);
        Ok(Token { kind, lexeme: text, line, value: Value::Undefined })
    }

    fn number(&mut self, first: char, line: u32) -> CompileResult<Token> {
        let mut text = String::new();
        text.push(first);

        if first == '0' && (self.peek() == Some('x') || self.peek() == Some('X')) {
            text.push(self.advance_char().unwrap());
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    digits.push(c);
                    self.advance_char();
                } else {
                    break;
                }
            }
            if digits.is_empty() {
                return Err(self.err(line, "invalid hex literal"));
            }
            let n = u64::from_str_radix(&digits, 16)
                .map_err(|_| self.err(line, "hex literal out of range"))?;
            text.push_str(&digits);
            return Ok(Token { kind: TokenKind::Number, lexeme: text, line, value: Value::Number(n as f64) });
        }

        if first == '0' && self.peek().is_some_and(|c| ('0'..='7').contains(&c)) {
            let mut digits = String::new();
            while let Some(c) = self.peek() {
                if ('0'..='7').contains(&c) {
                    digits.push(c);
                    self.advance_char();
                } else {
                    break;
                }
            }
            let n = u64::from_str_radix(&digits, 8)
                .map_err(|_| self.err(line, "octal literal out of range"))?;
            text.push_str(&digits);
            return Ok(Token { kind: TokenKind::Number, lexeme: text, line, value: Value::Number(n as f64) });
        }

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance_char();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.advance_char();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance_char();
                } else {
                    break;
                }
            }
        }
        let n: f64 = text.parse().map_err(|_| self.err(line, "invalid number literal"))?;
        Ok(Token { kind: TokenKind::Number, lexeme: text, line, value: Value::Number(n) })
    }

    /// Scan a string literal, or (when re-entered right after an
    /// interpolation's closing `)`) the tail fragment that follows it.
    /// Returns either a `String` token (no interpolation encountered) or
    /// an `Interpolation` token (hit `%(`, caller should now lex the
    /// embedded expression normally).
    fn string(&mut self, start_line: u32, heap: &mut Heap) -> CompileResult<Token> {
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.err(start_line, "unterminated string")),
                Some('"') => {
                    self.advance_char();
                    return Ok(Token {
                        kind: TokenKind::String,
                        lexeme: text.clone(),
                        line: start_line,
                        value: Value::Object(heap.alloc(HeapObj::Str(ObjString::new(&text)))),
                    });
                }
                Some('%') if self.peek_at(1) == Some('(') => {
                    if !self.interp_stack.is_empty() {
                        return Err(self.err(self.line, "nested string interpolation is not supported"));
                    }
                    self.advance_char(); // %
                    self.advance_char(); // (
                    self.interp_stack.push(InterpFrame { paren_depth: 0 });
                    return Ok(Token {
                        kind: TokenKind::Interpolation,
                        lexeme: text.clone(),
                        line: start_line,
                        value: Value::Object(heap.alloc(HeapObj::Str(ObjString::new(&text)))),
                    });
                }
                Some('\\') => {
                    self.advance_char();
                    self.escape(&mut text, start_line)?;
                }
                Some(c) => {
                    text.push(c);
                    self.advance_char();
                }
            }
        }
    }

    fn escape(&mut self, text: &mut String, start_line: u32) -> CompileResult<()> {
        let c = self
            .advance_char()
            .ok_or_else(|| self.err(start_line, "unterminated string"))?;
        match c {
            '0' => text.push('\0'),
            'a' => text.push('\u{7}'),
            'b' => text.push('\u{8}'),
            'f' => text.push('\u{c}'),
            'n' => text.push('\n'),
            'r' => text.push('\r'),
            't' => text.push('\t'),
            '"' => text.push('"'),
            '\\' => text.push('\\'),
            'u' => {
                let mut hex = String::new();
                for _ in 0..4 {
                    let h = self
                        .advance_char()
                        .ok_or_else(|| self.err(self.line, "unterminated \\u escape"))?;
                    hex.push(h);
                }
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| self.err(self.line, "invalid \\u escape"))?;
                let ch = char::from_u32(code)
                    .ok_or_else(|| self.err(self.line, "invalid UTF-8 code point in \\u escape"))?;
                text.push(ch);
            }
            other => return Err(self.err(self.line, format!("unsupported escape '\\{other}'"))),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut heap = Heap::new();
        let mut lx = Lexer::new("<test>", src);
        let mut out = Vec::new();
        loop {
            let t = lx.next_token(&mut heap).unwrap();
            let done = t.kind == TokenKind::Eof;
            out.push(t.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn lexes_number_literals() {
        let mut heap = Heap::new();
        let mut lx = Lexer::new("<test>", "0x1F 017 3.5");
        let a = lx.next_token(&mut heap).unwrap();
        assert_eq!(a.value.as_number(), Some(31.0));
        let b = lx.next_token(&mut heap).unwrap();
        assert_eq!(b.value.as_number(), Some(15.0));
        let c = lx.next_token(&mut heap).unwrap();
        assert_eq!(c.value.as_number(), Some(3.5));
    }

    #[test]
    fn lexes_keywords_and_identifiers() {
        use TokenKind::*;
        assert_eq!(kinds("var x"), vec![Var, Identifier, Eof]);
    }

    #[test]
    fn in_is_not_reserved() {
        use TokenKind::*;
        assert_eq!(kinds("in"), vec![Identifier, Eof]);
    }

    #[test]
    fn string_without_interpolation_is_one_token() {
        use TokenKind::*;
        assert_eq!(kinds("\"hi\""), vec![String, Eof]);
    }

    #[test]
    fn interpolation_splits_into_interpolation_then_expr_then_string() {
        use TokenKind::*;
        // "x=%(1+2) y" -> Interpolation("x="), Number, Plus, Number, String(" y")
        let ks = kinds("\"x=%(1+2) y\"");
        assert_eq!(ks, vec![Interpolation, Number, Plus, Number, TokenKind::String, Eof]);
    }

    #[test]
    fn nested_interpolation_is_rejected() {
        let mut heap = Heap::new();
        let mut lx = Lexer::new("<test>", "\"a%(\"b%(1)c\")d\"");
        let mut saw_err = false;
        for _ in 0..10 {
            match lx.next_token(&mut heap) {
                Ok(t) if t.kind == TokenKind::Eof => break,
                Ok(_) => {}
                Err(_) => {
                    saw_err = true;
                    break;
                }
            }
        }
        assert!(saw_err);
    }

    #[test]
    fn shebang_is_skipped() {
        use TokenKind::*;
        assert_eq!(kinds("#!/usr/bin/env ember\nvar x"), vec![Var, Identifier, Eof]);
    }

    #[test]
    fn line_comment_and_block_comment_are_skipped() {
        use TokenKind::*;
        assert_eq!(kinds("// hi\nvar x /* c */ = 1"), vec![Var, Identifier, Eq, Number, Eof]);
    }
}
