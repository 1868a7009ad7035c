//! Tokenizer with indentation tracking.

use crate::restricted::error::{ErrorKind, ScriptError, ScriptResult};

const MAX_INDENT_LEVELS: usize = 100;

#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Body of an f-string; escapes processed, braces untouched
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

const OPS3: &[&str] = &["**=", "//=", ">>=", "<<=", "..."];
const OPS2: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "->",
    ":=", "<<", ">>",
];
const OPS1: &[&str] = &[
    "+", "-", "*", "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "@",
    "&", "|", "^", "~",
];

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

pub fn tokenize(source: &str) -> ScriptResult<Vec<Token>> {
    let normalized = source.replace("\r\n", "\n").replace('\r', "\n");
    let mut lexer = Lexer {
        chars: normalized.chars().collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![0],
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl Lexer {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn last_is_newline(&self) -> bool {
        matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent)
        )
    }

    fn run(&mut self) -> ScriptResult<()> {
        let mut at_line_start = true;
        loop {
            if at_line_start && self.depth == 0 {
                if !self.read_indentation()? {
                    break;
                }
                at_line_start = false;
                continue;
            }

            let Some(c) = self.peek(0) else { break };
            match c {
                ' ' | '\t' | '\x0c' => self.pos += 1,
                '\n' => {
                    if self.depth == 0 {
                        if !self.last_is_newline() {
                            self.push(Tok::Newline);
                        }
                        at_line_start = true;
                    }
                    self.pos += 1;
                    self.line += 1;
                }
                '#' => self.skip_comment(),
                '\\' if self.peek(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '"' | '\'' => {
                    let tok = self.read_string(false, false)?;
                    self.push(tok);
                }
                c if c.is_ascii_digit() => self.read_number()?,
                '.' if self.peek(1).is_some_and(|d| d.is_ascii_digit()) => self.read_number()?,
                c if c == '_' || c.is_alphabetic() => self.read_name_or_prefixed_string()?,
                _ => self.read_operator()?,
            }
        }

        if self.depth > 0 {
            return Err(ScriptError::syntax(
                "unexpected EOF while parsing",
                self.line,
            ));
        }
        if !self.last_is_newline() {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    /// Measure leading whitespace of a logical line and emit INDENT/DEDENT.
    /// Returns false at end of input.
    fn read_indentation(&mut self) -> ScriptResult<bool> {
        loop {
            let mut col = 0usize;
            while let Some(c) = self.peek(0) {
                match c {
                    ' ' => col += 1,
                    '\t' => col = (col / 8 + 1) * 8,
                    '\x0c' => col = 0,
                    _ => break,
                }
                self.pos += 1;
            }
            match self.peek(0) {
                None => return Ok(false),
                Some('\n') => {
                    self.pos += 1;
                    self.line += 1;
                }
                Some('#') => self.skip_comment(),
                Some(_) => {
                    let current = self.indents.last().copied().unwrap_or(0);
                    if col > current {
                        if self.indents.len() >= MAX_INDENT_LEVELS {
                            return Err(ScriptError::indentation(
                                "too many levels of indentation",
                                self.line,
                            ));
                        }
                        if self.last_is_newline() && self.tokens.is_empty() {
                            return Err(ScriptError::indentation(
                                "unexpected indent",
                                self.line,
                            ));
                        }
                        self.indents.push(col);
                        self.push(Tok::Indent);
                    } else {
                        while col < self.indents.last().copied().unwrap_or(0) {
                            self.indents.pop();
                            self.push(Tok::Dedent);
                        }
                        if col != self.indents.last().copied().unwrap_or(0) {
                            return Err(ScriptError::indentation(
                                "unindent does not match any outer indentation level",
                                self.line,
                            ));
                        }
                    }
                    return Ok(true);
                }
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn read_name_or_prefixed_string(&mut self) -> ScriptResult<()> {
        let start = self.pos;
        while let Some(c) = self.peek(0) {
            if c == '_' || c.is_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(0), Some('"') | Some('\'')) && name.len() <= 2 {
            let lower = name.to_ascii_lowercase();
            match lower.as_str() {
                "r" | "u" | "f" | "rf" | "fr" => {
                    let raw = lower.contains('r');
                    let fstring = lower.contains('f');
                    let tok = self.read_string(raw, fstring)?;
                    self.push(tok);
                    return Ok(());
                }
                "b" | "br" | "rb" => {
                    return Err(ScriptError::syntax(
                        "bytes literals are not supported",
                        self.line,
                    ));
                }
                _ => {}
            }
        }

        self.push(Tok::Name(name));
        Ok(())
    }

    fn read_string(&mut self, raw: bool, fstring: bool) -> ScriptResult<Tok> {
        let start_line = self.line;
        let quote = self.peek(0).unwrap_or('"');
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut value = String::new();
        loop {
            let Some(c) = self.peek(0) else {
                return Err(ScriptError::syntax(
                    "unterminated string literal",
                    start_line,
                ));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }
            if c == '\n' {
                if !triple {
                    return Err(ScriptError::syntax(
                        "unterminated string literal",
                        start_line,
                    ));
                }
                self.line += 1;
            }
            if c == '\\' {
                let Some(next) = self.peek(1) else {
                    return Err(ScriptError::syntax(
                        "unterminated string literal",
                        start_line,
                    ));
                };
                if raw {
                    value.push('\\');
                    value.push(next);
                    if next == '\n' {
                        self.line += 1;
                    }
                    self.pos += 2;
                    continue;
                }
                self.pos += 2;
                self.read_escape(next, &mut value)?;
                continue;
            }
            value.push(c);
            self.pos += 1;
        }

        Ok(if fstring {
            Tok::FStr(value)
        } else {
            Tok::Str(value)
        })
    }

    fn read_escape(&mut self, escape: char, out: &mut String) -> ScriptResult<()> {
        match escape {
            '\n' => self.line += 1,
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'x' => out.push(self.read_hex_escape(2)?),
            'u' => out.push(self.read_hex_escape(4)?),
            'U' => out.push(self.read_hex_escape(8)?),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn read_hex_escape(&mut self, digits: usize) -> ScriptResult<char> {
        let end = self.pos + digits;
        if end > self.chars.len() {
            return Err(ScriptError::syntax("truncated escape sequence", self.line));
        }
        let text: String = self.chars[self.pos..end].iter().collect();
        let code = u32::from_str_radix(&text, 16)
            .map_err(|_| ScriptError::syntax("invalid escape sequence", self.line))?;
        self.pos = end;
        char::from_u32(code).ok_or_else(|| ScriptError::syntax("invalid code point", self.line))
    }

    fn read_number(&mut self) -> ScriptResult<()> {
        let start = self.pos;
        if self.peek(0) == Some('0') {
            let radix = match self.peek(1) {
                Some('x') | Some('X') => Some(16),
                Some('o') | Some('O') => Some(8),
                Some('b') | Some('B') => Some(2),
                _ => None,
            };
            if let Some(radix) = radix {
                self.pos += 2;
                let digits_start = self.pos;
                while let Some(c) = self.peek(0) {
                    if c == '_' || c.is_digit(radix) {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                let digits: String = self.chars[digits_start..self.pos]
                    .iter()
                    .filter(|c| **c != '_')
                    .collect();
                let value = i64::from_str_radix(&digits, radix).map_err(|_| {
                    if digits.is_empty() {
                        ScriptError::syntax("invalid number literal", self.line)
                    } else {
                        ScriptError::new(ErrorKind::OverflowError, "integer literal too large")
                    }
                })?;
                self.push(Tok::Int(value));
                return Ok(());
            }
        }

        let mut is_float = false;
        self.consume_digits();
        if self.peek(0) == Some('.') && self.peek(1) != Some('.') {
            is_float = true;
            self.pos += 1;
            self.consume_digits();
        }
        if matches!(self.peek(0), Some('e') | Some('E')) {
            let sign_offset = usize::from(matches!(self.peek(1), Some('+') | Some('-')));
            if self.peek(1 + sign_offset).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += 1 + sign_offset;
                self.consume_digits();
            }
        }
        if matches!(self.peek(0), Some('j') | Some('J')) {
            return Err(ScriptError::syntax(
                "complex literals are not supported",
                self.line,
            ));
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| ScriptError::syntax("invalid float literal", self.line))?;
            self.push(Tok::Float(value));
        } else {
            let value: i64 = text.parse().map_err(|_| {
                ScriptError::new(ErrorKind::OverflowError, "integer literal too large")
            })?;
            self.push(Tok::Int(value));
        }
        Ok(())
    }

    fn consume_digits(&mut self) {
        while let Some(c) = self.peek(0) {
            if c.is_ascii_digit() || (c == '_' && self.peek(1).is_some_and(|d| d.is_ascii_digit()))
            {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn read_operator(&mut self) -> ScriptResult<()> {
        for table in [OPS3, OPS2, OPS1] {
            for op in table {
                let len = op.chars().count();
                if self.pos + len > self.chars.len() {
                    continue;
                }
                if op.chars().zip(&self.chars[self.pos..]).all(|(a, b)| a == *b) {
                    match *op {
                        "(" | "[" | "{" => self.depth += 1,
                        ")" | "]" | "}" => {
                            if self.depth == 0 {
                                return Err(ScriptError::syntax(
                                    format!("unmatched '{op}'"),
                                    self.line,
                                ));
                            }
                            self.depth -= 1;
                        }
                        _ => {}
                    }
                    self.pos += len;
                    self.push(Tok::Op(op));
                    return Ok(());
                }
            }
        }
        let c = self.peek(0).unwrap_or(' ');
        Err(ScriptError::syntax(
            format!("invalid character '{c}'"),
            self.line,
        ))
    }
}
