//! Recursive-descent parser producing [`Module`].

use crate::restricted::ast::*;
use crate::restricted::error::{ScriptError, ScriptResult};
use crate::restricted::lexer::{tokenize, Tok, Token};
use std::collections::HashSet;
use std::rc::Rc;

/// Expression nesting ceiling; keeps parser and evaluator recursion bounded.
const MAX_NESTING: usize = 200;

static EOF: Tok = Tok::Eof;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const AUG_OPS: &[(&str, BinOp)] = &[
    ("+=", BinOp::Add),
    ("-=", BinOp::Sub),
    ("*=", BinOp::Mul),
    ("/=", BinOp::Div),
    ("//=", BinOp::FloorDiv),
    ("%=", BinOp::Mod),
    ("**=", BinOp::Pow),
    ("<<=", BinOp::LShift),
    (">>=", BinOp::RShift),
    ("&=", BinOp::BitAnd),
    ("|=", BinOp::BitOr),
    ("^=", BinOp::BitXor),
];

fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

/// Parse a whole snippet.
pub fn parse(source: &str) -> ScriptResult<Module> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    let body = parser.parse_file()?;
    Ok(Module { body })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
    loop_depth: usize,
    function_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            nesting: 0,
            loop_depth: 0,
            function_depth: 0,
        }
    }

    // ---- token helpers ----

    fn peek(&self) -> &Tok {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .or_else(|| self.tokens.last())
            .map(|t| &t.tok)
            .unwrap_or(&EOF)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(message, self.line())
    }

    fn invalid(&self) -> ScriptError {
        self.error("invalid syntax")
    }

    fn is_op(&self, op: &str) -> bool {
        matches!(self.peek(), Tok::Op(o) if *o == op)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.is_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> ScriptResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            Err(match op {
                ")" | "]" | "}" => self.error(format!("expected '{op}'")),
                ":" => self.error("expected ':'"),
                _ => self.invalid(),
            })
        }
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> ScriptResult<()> {
        if self.eat_kw(kw) {
            Ok(())
        } else {
            Err(self.invalid())
        }
    }

    fn expect_name(&mut self) -> ScriptResult<Ident> {
        match self.peek() {
            Tok::Name(name) if !is_keyword(name) => {
                let ident: Ident = Rc::from(name.as_str());
                self.pos += 1;
                Ok(ident)
            }
            _ => Err(self.invalid()),
        }
    }

    fn expect_newline(&mut self) -> ScriptResult<()> {
        match self.peek() {
            Tok::Newline => {
                self.pos += 1;
                Ok(())
            }
            Tok::Eof => Ok(()),
            _ => Err(self.invalid()),
        }
    }

    fn enter(&mut self) -> ScriptResult<()> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(self.error("too many nested parentheses"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.nesting = self.nesting.saturating_sub(1);
    }

    fn starts_expression(&self) -> bool {
        match self.peek() {
            Tok::Name(name) => {
                !is_keyword(name)
                    || matches!(name.as_str(), "lambda" | "not" | "None" | "True" | "False")
            }
            Tok::Int(_) | Tok::Float(_) | Tok::Str(_) | Tok::FStr(_) => true,
            Tok::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+" | "~" | "*"),
            _ => false,
        }
    }

    // ---- statements ----

    fn parse_file(&mut self) -> ScriptResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Eof => break,
                Tok::Newline => {
                    self.pos += 1;
                }
                Tok::Indent => {
                    return Err(ScriptError::indentation("unexpected indent", self.line()))
                }
                _ => body.extend(self.parse_statement()?),
            }
        }
        Ok(body)
    }

    fn parse_statement(&mut self) -> ScriptResult<Vec<Stmt>> {
        let keyword = match self.peek() {
            Tok::Name(name) => name.clone(),
            Tok::Op("@") => return Err(self.error("decorators are not supported")),
            _ => return self.parse_simple_line(),
        };
        match keyword.as_str() {
            "if" => Ok(vec![self.parse_if()?]),
            "while" => Ok(vec![self.parse_while()?]),
            "for" => Ok(vec![self.parse_for()?]),
            "def" => Ok(vec![self.parse_def()?]),
            "try" => Ok(vec![self.parse_try()?]),
            "class" | "with" | "async" => {
                Err(self.error(format!("'{keyword}' statements are not supported")))
            }
            "elif" | "else" | "except" | "finally" => Err(self.invalid()),
            _ => self.parse_simple_line(),
        }
    }

    fn parse_block(&mut self) -> ScriptResult<Vec<Stmt>> {
        self.expect_op(":")?;
        if !matches!(self.peek(), Tok::Newline) {
            return self.parse_simple_line();
        }
        self.pos += 1;
        if !matches!(self.peek(), Tok::Indent) {
            return Err(ScriptError::indentation(
                "expected an indented block",
                self.line(),
            ));
        }
        self.pos += 1;
        let mut body = Vec::new();
        loop {
            match self.peek() {
                Tok::Dedent => {
                    self.pos += 1;
                    break;
                }
                Tok::Eof => break,
                Tok::Newline => {
                    self.pos += 1;
                }
                Tok::Indent => {
                    return Err(ScriptError::indentation("unexpected indent", self.line()))
                }
                _ => body.extend(self.parse_statement()?),
            }
        }
        Ok(body)
    }

    fn parse_if(&mut self) -> ScriptResult<Stmt> {
        let line = self.line();
        self.advance();
        let test = self.parse_test()?;
        let body = self.parse_block()?;
        let orelse = if self.is_kw("elif") {
            vec![self.parse_if()?]
        } else if self.eat_kw("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            line,
        })
    }

    fn parse_try(&mut self) -> ScriptResult<Stmt> {
        let line = self.line();
        self.advance();
        let body = self.parse_block()?;
        let mut handlers: Vec<ExceptHandler> = Vec::new();
        while self.is_kw("except") {
            if handlers.last().is_some_and(|h| h.classes.is_empty()) {
                return Err(self.error("default 'except:' must be last"));
            }
            let handler_line = self.line();
            self.advance();
            let mut classes = Vec::new();
            let mut name = None;
            if !self.is_op(":") {
                if self.eat_op("(") {
                    loop {
                        classes.push(self.expect_name()?);
                        if !self.eat_op(",") || self.is_op(")") {
                            break;
                        }
                    }
                    self.expect_op(")")?;
                } else {
                    classes.push(self.expect_name()?);
                }
                if self.eat_kw("as") {
                    name = Some(self.expect_name()?);
                }
            }
            let body = self.parse_block()?;
            handlers.push(ExceptHandler {
                classes,
                name,
                body,
                line: handler_line,
            });
        }
        let orelse = if !handlers.is_empty() && self.eat_kw("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        let finalbody = if self.eat_kw("finally") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error("expected 'except' or 'finally' block"));
        }
        Ok(Stmt {
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
            line,
        })
    }

    fn parse_loop_body(&mut self) -> ScriptResult<Vec<Stmt>> {
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        body
    }

    fn parse_while(&mut self) -> ScriptResult<Stmt> {
        let line = self.line();
        self.advance();
        let test = self.parse_test()?;
        let body = self.parse_loop_body()?;
        let orelse = if self.eat_kw("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::While { test, body, orelse },
            line,
        })
    }

    fn parse_for(&mut self) -> ScriptResult<Stmt> {
        let line = self.line();
        self.advance();
        let target = self.parse_target_list()?;
        self.expect_kw("in")?;
        let iter = self.parse_exprlist(false)?;
        let body = self.parse_loop_body()?;
        let orelse = if self.eat_kw("else") {
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::For {
                target,
                iter,
                body,
                orelse,
            },
            line,
        })
    }

    fn parse_def(&mut self) -> ScriptResult<Stmt> {
        let line = self.line();
        self.advance();
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let signature = self.parse_params(")", true)?;
        self.expect_op(")")?;
        if self.eat_op("->") {
            self.parse_test()?;
        }

        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.function_depth += 1;
        let body = self.parse_block();
        self.function_depth -= 1;
        self.loop_depth = saved_loops;
        let body = body?;

        let def = build_function(name, signature, body, line)?;
        Ok(Stmt {
            kind: StmtKind::FunctionDef(Rc::new(def)),
            line,
        })
    }

    fn parse_params(&mut self, closing: &str, annotations: bool) -> ScriptResult<Signature> {
        let mut sig = Signature::default();
        let mut seen: HashSet<Ident> = HashSet::new();
        let mut star_seen = false;
        let mut default_seen = false;

        while !self.is_op(closing) {
            if self.eat_op("**") {
                let name = self.expect_name()?;
                self.skip_annotation(annotations)?;
                check_duplicate(&mut seen, &name, self.line())?;
                sig.kwarg = Some(name);
            } else if self.eat_op("*") {
                if star_seen {
                    return Err(self.error("* argument may appear only once"));
                }
                star_seen = true;
                if !self.is_op(",") && !self.is_op(closing) {
                    let name = self.expect_name()?;
                    self.skip_annotation(annotations)?;
                    check_duplicate(&mut seen, &name, self.line())?;
                    sig.vararg = Some(name);
                }
            } else if self.eat_op("/") {
                // positional-only marker; every parameter here is positional anyway
            } else {
                if sig.kwarg.is_some() {
                    return Err(self.error("arguments cannot follow var-keyword argument"));
                }
                let name = self.expect_name()?;
                self.skip_annotation(annotations)?;
                check_duplicate(&mut seen, &name, self.line())?;
                let default = if self.eat_op("=") {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                let param = Param { name, default };
                if star_seen {
                    sig.kwonly.push(param);
                } else {
                    if param.default.is_some() {
                        default_seen = true;
                    } else if default_seen {
                        return Err(
                            self.error("non-default argument follows default argument")
                        );
                    }
                    sig.params.push(param);
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(sig)
    }

    fn skip_annotation(&mut self, annotations: bool) -> ScriptResult<()> {
        if annotations && self.eat_op(":") {
            self.parse_test()?;
        }
        Ok(())
    }

    fn parse_simple_line(&mut self) -> ScriptResult<Vec<Stmt>> {
        let mut stmts = vec![self.parse_small()?];
        while self.eat_op(";") {
            if matches!(self.peek(), Tok::Newline | Tok::Eof) {
                break;
            }
            stmts.push(self.parse_small()?);
        }
        self.expect_newline()?;
        Ok(stmts)
    }

    fn at_statement_end(&self) -> bool {
        matches!(self.peek(), Tok::Newline | Tok::Eof | Tok::Op(";"))
    }

    fn parse_small(&mut self) -> ScriptResult<Stmt> {
        let line = self.line();
        let keyword = match self.peek() {
            Tok::Name(name) if is_keyword(name) => Some(name.clone()),
            _ => None,
        };
        let kind = match keyword.as_deref() {
            Some("pass") => {
                self.advance();
                StmtKind::Pass
            }
            Some("break") => {
                self.advance();
                if self.loop_depth == 0 {
                    return Err(ScriptError::syntax("'break' outside loop", line));
                }
                StmtKind::Break
            }
            Some("continue") => {
                self.advance();
                if self.loop_depth == 0 {
                    return Err(ScriptError::syntax(
                        "'continue' not properly in loop",
                        line,
                    ));
                }
                StmtKind::Continue
            }
            Some("return") => {
                self.advance();
                if self.function_depth == 0 {
                    return Err(ScriptError::syntax("'return' outside function", line));
                }
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_exprlist(true)?)
                };
                StmtKind::Return(value)
            }
            Some("global") => {
                self.advance();
                StmtKind::Global(self.parse_name_list()?)
            }
            Some("nonlocal") => {
                self.advance();
                if self.function_depth == 0 {
                    return Err(ScriptError::syntax(
                        "nonlocal declaration not allowed at module level",
                        line,
                    ));
                }
                StmtKind::Nonlocal(self.parse_name_list()?)
            }
            Some("del") => {
                self.advance();
                let expr = self.parse_exprlist(false)?;
                let targets = match expr.kind {
                    ExprKind::Tuple(items) => items
                        .into_iter()
                        .map(|e| self.to_target(e))
                        .collect::<ScriptResult<Vec<_>>>()?,
                    _ => vec![self.to_target(expr)?],
                };
                StmtKind::Del(targets)
            }
            Some("assert") => {
                self.advance();
                let test = self.parse_test()?;
                let msg = if self.eat_op(",") {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            Some("import") | Some("from") => {
                return Err(self.error("import statements are not supported"))
            }
            Some(kw @ ("raise" | "yield" | "await")) => {
                return Err(self.error(format!("'{kw}' is not supported")))
            }
            _ => self.parse_expression_statement()?,
        };
        Ok(Stmt { kind, line })
    }

    fn parse_name_list(&mut self) -> ScriptResult<Vec<Ident>> {
        let mut names = vec![self.expect_name()?];
        while self.eat_op(",") {
            names.push(self.expect_name()?);
        }
        Ok(names)
    }

    fn parse_expression_statement(&mut self) -> ScriptResult<StmtKind> {
        let first = self.parse_exprlist(true)?;

        if let Tok::Op(op) = self.peek() {
            if let Some((_, bin)) = AUG_OPS.iter().find(|(sym, _)| sym == op) {
                let bin = *bin;
                self.advance();
                if matches!(first.kind, ExprKind::Tuple(_) | ExprKind::List(_)) {
                    return Err(self.error(
                        "'tuple' is an illegal expression for augmented assignment",
                    ));
                }
                let target = self.to_target(first)?;
                let value = self.parse_exprlist(false)?;
                return Ok(StmtKind::AugAssign {
                    target,
                    op: bin,
                    value,
                });
            }
        }

        if self.eat_op(":") {
            if matches!(first.kind, ExprKind::Tuple(_) | ExprKind::List(_)) {
                return Err(self.error("only single target can be annotated"));
            }
            let target = self.to_target(first)?;
            self.parse_test()?;
            let value = if self.eat_op("=") {
                Some(self.parse_exprlist(true)?)
            } else {
                None
            };
            return Ok(StmtKind::AnnAssign { target, value });
        }

        if self.is_op("=") {
            let mut exprs = vec![first];
            while self.eat_op("=") {
                exprs.push(self.parse_exprlist(true)?);
            }
            let value = exprs.pop().ok_or_else(|| self.invalid())?;
            let targets = exprs
                .into_iter()
                .map(|e| self.to_assign_target(e))
                .collect::<ScriptResult<Vec<_>>>()?;
            return Ok(StmtKind::Assign { targets, value });
        }

        if self.is_op(":=") {
            return Err(self.error("assignment expressions are not supported"));
        }
        if matches!(first.kind, ExprKind::Starred(_)) {
            return Err(self.error("can't use starred expression here"));
        }
        Ok(StmtKind::Expr(first))
    }

    fn to_assign_target(&self, expr: Expr) -> ScriptResult<Target> {
        if matches!(expr.kind, ExprKind::Starred(_)) {
            return Err(ScriptError::syntax(
                "starred assignment target must be in a list or tuple",
                expr.line,
            ));
        }
        self.to_target(expr)
    }

    fn to_target(&self, expr: Expr) -> ScriptResult<Target> {
        let line = expr.line;
        match expr.kind {
            ExprKind::Name(name) => Ok(Target::Name(name)),
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                let starred = items
                    .iter()
                    .filter(|e| matches!(e.kind, ExprKind::Starred(_)))
                    .count();
                if starred > 1 {
                    return Err(ScriptError::syntax(
                        "multiple starred expressions in assignment",
                        line,
                    ));
                }
                items
                    .into_iter()
                    .map(|e| self.to_target(e))
                    .collect::<ScriptResult<Vec<_>>>()
                    .map(Target::Unpack)
            }
            ExprKind::Starred(inner) => Ok(Target::Starred(Box::new(self.to_target(*inner)?))),
            ExprKind::Subscript(value, index) => Ok(Target::Subscript(*value, index)),
            ExprKind::Attribute(value, attr) => Ok(Target::Attribute(*value, attr)),
            other => {
                let what = match other {
                    ExprKind::None
                    | ExprKind::Bool(_)
                    | ExprKind::Int(_)
                    | ExprKind::Float(_)
                    | ExprKind::Str(_)
                    | ExprKind::FString(_)
                    | ExprKind::Dict(_) => "literal",
                    ExprKind::Call { .. } => "function call",
                    ExprKind::Lambda(_) => "lambda",
                    ExprKind::Compare(..) => "comparison",
                    ExprKind::ListComp { .. }
                    | ExprKind::DictComp { .. }
                    | ExprKind::GenExp { .. } => "comprehension",
                    _ => "expression",
                };
                Err(ScriptError::syntax(format!("cannot assign to {what}"), line))
            }
        }
    }

    /// Comma-separated targets of a `for` clause.
    fn parse_target_list(&mut self) -> ScriptResult<Target> {
        let line = self.line();
        let mut items = Vec::new();
        let mut trailing_comma = false;
        loop {
            let item = if self.eat_op("*") {
                let inner = self.parse_or_expr()?;
                Expr {
                    kind: ExprKind::Starred(Box::new(inner)),
                    line,
                }
            } else {
                self.parse_or_expr()?
            };
            items.push(item);
            if !self.eat_op(",") {
                break;
            }
            trailing_comma = true;
            if self.is_kw("in") {
                break;
            }
        }
        if items.len() == 1 && !trailing_comma {
            let single = items.remove(0);
            return self.to_assign_target(single);
        }
        self.to_target(Expr {
            kind: ExprKind::Tuple(items),
            line,
        })
    }

    // ---- expressions ----

    /// `test (',' test)* [',']`, producing a tuple when a comma is present.
    fn parse_exprlist(&mut self, allow_star: bool) -> ScriptResult<Expr> {
        let line = self.line();
        let first = self.parse_star_or_test(allow_star)?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if !self.starts_expression() {
                break;
            }
            items.push(self.parse_star_or_test(allow_star)?);
        }
        Ok(Expr {
            kind: ExprKind::Tuple(items),
            line,
        })
    }

    fn parse_star_or_test(&mut self, allow_star: bool) -> ScriptResult<Expr> {
        let line = self.line();
        if self.is_op("*") {
            if !allow_star {
                return Err(self.error("can't use starred expression here"));
            }
            self.advance();
            let inner = self.parse_or_expr()?;
            return Ok(Expr {
                kind: ExprKind::Starred(Box::new(inner)),
                line,
            });
        }
        self.parse_test()
    }

    fn parse_test(&mut self) -> ScriptResult<Expr> {
        self.enter()?;
        let result = self.parse_test_inner();
        self.leave();
        result
    }

    fn parse_test_inner(&mut self) -> ScriptResult<Expr> {
        if self.is_kw("lambda") {
            return self.parse_lambda();
        }
        let line = self.line();
        let body = self.parse_or_test()?;
        if self.is_op(":=") {
            return Err(self.error("assignment expressions are not supported"));
        }
        if self.eat_kw("if") {
            let test = self.parse_or_test()?;
            self.expect_kw("else")?;
            let orelse = self.parse_test()?;
            return Ok(Expr {
                kind: ExprKind::IfExp {
                    test: Box::new(test),
                    body: Box::new(body),
                    orelse: Box::new(orelse),
                },
                line,
            });
        }
        Ok(body)
    }

    fn parse_lambda(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        self.advance();
        let signature = self.parse_params(":", false)?;
        self.expect_op(":")?;
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.function_depth += 1;
        let body = self.parse_test();
        self.function_depth -= 1;
        self.loop_depth = saved_loops;
        let body = body?;
        let ret = Stmt {
            kind: StmtKind::Return(Some(body)),
            line,
        };
        let def = build_function(Rc::from("<lambda>"), signature, vec![ret], line)?;
        Ok(Expr {
            kind: ExprKind::Lambda(Rc::new(def)),
            line,
        })
    }

    fn parse_or_test(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        let first = self.parse_and_test()?;
        if !self.is_kw("or") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw("or") {
            values.push(self.parse_and_test()?);
        }
        Ok(Expr {
            kind: ExprKind::BoolOp(BoolOp::Or, values),
            line,
        })
    }

    fn parse_and_test(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        let first = self.parse_not_test()?;
        if !self.is_kw("and") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_kw("and") {
            values.push(self.parse_not_test()?);
        }
        Ok(Expr {
            kind: ExprKind::BoolOp(BoolOp::And, values),
            line,
        })
    }

    fn parse_not_test(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        if self.eat_kw("not") {
            self.enter()?;
            let operand = self.parse_not_test();
            self.leave();
            return Ok(Expr {
                kind: ExprKind::Unary(UnaryOp::Not, Box::new(operand?)),
                line,
            });
        }
        self.parse_comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek() {
            Tok::Op("==") => CmpOp::Eq,
            Tok::Op("!=") => CmpOp::NotEq,
            Tok::Op("<") => CmpOp::Lt,
            Tok::Op("<=") => CmpOp::LtE,
            Tok::Op(">") => CmpOp::Gt,
            Tok::Op(">=") => CmpOp::GtE,
            Tok::Name(n) if n == "in" => CmpOp::In,
            Tok::Name(n) if n == "not" => {
                if matches!(self.peek_at(1), Tok::Name(m) if m == "in") {
                    self.pos += 1;
                    CmpOp::NotIn
                } else {
                    return None;
                }
            }
            Tok::Name(n) if n == "is" => {
                if matches!(self.peek_at(1), Tok::Name(m) if m == "not") {
                    self.pos += 1;
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn parse_comparison(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        let left = self.parse_or_expr()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            rest.push((op, self.parse_or_expr()?));
        }
        if rest.is_empty() {
            return Ok(left);
        }
        Ok(Expr {
            kind: ExprKind::Compare(Box::new(left), rest),
            line,
        })
    }

    fn parse_binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> ScriptResult<Expr>,
    ) -> ScriptResult<Expr> {
        let mut left = next(self)?;
        loop {
            let found = match self.peek() {
                Tok::Op(op) => ops.iter().find(|(sym, _)| sym == op).map(|(_, b)| *b),
                _ => None,
            };
            let Some(op) = found else { break };
            let line = self.line();
            self.advance();
            let right = next(self)?;
            left = Expr {
                kind: ExprKind::BinOp(Box::new(left), op, Box::new(right)),
                line,
            };
        }
        Ok(left)
    }

    fn parse_or_expr(&mut self) -> ScriptResult<Expr> {
        self.parse_binary_level(&[("|", BinOp::BitOr)], Self::parse_xor_expr)
    }

    fn parse_xor_expr(&mut self) -> ScriptResult<Expr> {
        self.parse_binary_level(&[("^", BinOp::BitXor)], Self::parse_and_expr)
    }

    fn parse_and_expr(&mut self) -> ScriptResult<Expr> {
        self.parse_binary_level(&[("&", BinOp::BitAnd)], Self::parse_shift_expr)
    }

    fn parse_shift_expr(&mut self) -> ScriptResult<Expr> {
        self.parse_binary_level(
            &[("<<", BinOp::LShift), (">>", BinOp::RShift)],
            Self::parse_arith_expr,
        )
    }

    fn parse_arith_expr(&mut self) -> ScriptResult<Expr> {
        self.parse_binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::parse_term)
    }

    fn parse_term(&mut self) -> ScriptResult<Expr> {
        if self.is_op("@") {
            return Err(self.invalid());
        }
        self.parse_binary_level(
            &[
                ("*", BinOp::Mul),
                ("/", BinOp::Div),
                ("//", BinOp::FloorDiv),
                ("%", BinOp::Mod),
            ],
            Self::parse_factor,
        )
    }

    fn parse_factor(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        let op = match self.peek() {
            Tok::Op("-") => Some(UnaryOp::Neg),
            Tok::Op("+") => Some(UnaryOp::Pos),
            Tok::Op("~") => Some(UnaryOp::Invert),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            self.enter()?;
            let operand = self.parse_factor();
            self.leave();
            let operand = operand?;
            // Fold negative literals so i64::MIN stays expressible.
            if op == UnaryOp::Neg {
                if let ExprKind::Int(v) = operand.kind {
                    return Ok(Expr {
                        kind: ExprKind::Int(-v),
                        line,
                    });
                }
            }
            return Ok(Expr {
                kind: ExprKind::Unary(op, Box::new(operand)),
                line,
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        let base = self.parse_atom_expr()?;
        if self.eat_op("**") {
            self.enter()?;
            let exponent = self.parse_factor();
            self.leave();
            return Ok(Expr {
                kind: ExprKind::BinOp(Box::new(base), BinOp::Pow, Box::new(exponent?)),
                line,
            });
        }
        Ok(base)
    }

    fn parse_atom_expr(&mut self) -> ScriptResult<Expr> {
        let mut expr = self.parse_atom()?;
        loop {
            let line = self.line();
            if self.eat_op("(") {
                self.enter()?;
                let args = self.parse_call_args();
                self.leave();
                let args = args?;
                self.expect_op(")")?;
                expr = Expr {
                    kind: ExprKind::Call {
                        func: Box::new(expr),
                        args,
                    },
                    line,
                };
            } else if self.eat_op("[") {
                self.enter()?;
                let index = self.parse_subscript();
                self.leave();
                let index = index?;
                self.expect_op("]")?;
                expr = Expr {
                    kind: ExprKind::Subscript(Box::new(expr), Box::new(index)),
                    line,
                };
            } else if self.eat_op(".") {
                let attr = match self.advance() {
                    Tok::Name(name) => Rc::from(name.as_str()),
                    _ => return Err(self.invalid()),
                };
                expr = Expr {
                    kind: ExprKind::Attribute(Box::new(expr), attr),
                    line,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> ScriptResult<Vec<Arg>> {
        let mut args = Vec::new();
        let mut keyword_seen = false;
        while !self.is_op(")") {
            let line = self.line();
            if self.eat_op("**") {
                keyword_seen = true;
                args.push(Arg::DoubleStar(self.parse_test()?));
            } else if self.eat_op("*") {
                args.push(Arg::Star(self.parse_test()?));
            } else if matches!(self.peek(), Tok::Name(n) if !is_keyword(n))
                && matches!(self.peek_at(1), Tok::Op("="))
            {
                let name = self.expect_name()?;
                self.advance();
                keyword_seen = true;
                args.push(Arg::Keyword(name, self.parse_test()?));
            } else {
                if keyword_seen {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                let value = self.parse_test()?;
                if self.is_kw("for") {
                    let generators = self.parse_comprehension()?;
                    let more_args =
                        self.is_op(",") && !matches!(self.peek_at(1), Tok::Op(")"));
                    if !args.is_empty() || more_args {
                        return Err(ScriptError::syntax(
                            "Generator expression must be parenthesized",
                            line,
                        ));
                    }
                    args.push(Arg::Positional(Expr {
                        kind: ExprKind::GenExp {
                            elt: Box::new(value),
                            generators,
                        },
                        line,
                    }));
                } else {
                    args.push(Arg::Positional(value));
                }
            }
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(args)
    }

    fn parse_subscript(&mut self) -> ScriptResult<Index> {
        let line = self.line();
        let first = self.parse_slice_item()?;
        if !self.is_op(",") {
            return Ok(first);
        }
        let Index::Single(first) = first else {
            return Err(self.error("multi-dimensional slices are not supported"));
        };
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_op("]") {
                break;
            }
            match self.parse_slice_item()? {
                Index::Single(e) => items.push(e),
                Index::Slice(..) => {
                    return Err(self.error("multi-dimensional slices are not supported"))
                }
            }
        }
        Ok(Index::Single(Expr {
            kind: ExprKind::Tuple(items),
            line,
        }))
    }

    fn parse_slice_item(&mut self) -> ScriptResult<Index> {
        let lower = if self.is_op(":") {
            None
        } else {
            Some(self.parse_test()?)
        };
        if !self.eat_op(":") {
            return lower.map(Index::Single).ok_or_else(|| self.invalid());
        }
        let upper = if self.is_op(":") || self.is_op("]") || self.is_op(",") {
            None
        } else {
            Some(self.parse_test()?)
        };
        let step = if self.eat_op(":") {
            if self.is_op("]") || self.is_op(",") {
                None
            } else {
                Some(self.parse_test()?)
            }
        } else {
            None
        };
        Ok(Index::Slice(lower, upper, step))
    }

    fn parse_comprehension(&mut self) -> ScriptResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.eat_kw("for") {
            let target = self.parse_target_list()?;
            self.expect_kw("in")?;
            let iter = self.parse_or_test()?;
            let mut ifs = Vec::new();
            while self.eat_kw("if") {
                ifs.push(self.parse_or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    fn parse_atom(&mut self) -> ScriptResult<Expr> {
        let line = self.line();
        let tok = self.peek().clone();
        let kind = match tok {
            Tok::Int(v) => {
                self.advance();
                ExprKind::Int(v)
            }
            Tok::Float(v) => {
                self.advance();
                ExprKind::Float(v)
            }
            Tok::Str(_) | Tok::FStr(_) => self.parse_strings()?,
            Tok::Name(name) => {
                self.advance();
                match name.as_str() {
                    "True" => ExprKind::Bool(true),
                    "False" => ExprKind::Bool(false),
                    "None" => ExprKind::None,
                    n if is_keyword(n) => {
                        self.pos -= 1;
                        return Err(self.invalid());
                    }
                    n => ExprKind::Name(Rc::from(n)),
                }
            }
            Tok::Op("(") => {
                self.advance();
                self.enter()?;
                let inner = self.parse_paren_body(line);
                self.leave();
                let inner = inner?;
                self.expect_op(")")?;
                return Ok(inner);
            }
            Tok::Op("[") => {
                self.advance();
                self.enter()?;
                let inner = self.parse_list_body();
                self.leave();
                let kind = inner?;
                self.expect_op("]")?;
                kind
            }
            Tok::Op("{") => {
                self.advance();
                self.enter()?;
                let inner = self.parse_dict_body();
                self.leave();
                let kind = inner?;
                self.expect_op("}")?;
                kind
            }
            Tok::Op("...") => return Err(self.error("Ellipsis is not supported")),
            Tok::Indent => {
                return Err(ScriptError::indentation("unexpected indent", line));
            }
            _ => return Err(self.invalid()),
        };
        Ok(Expr { kind, line })
    }

    fn parse_paren_body(&mut self, line: usize) -> ScriptResult<Expr> {
        if self.is_op(")") {
            return Ok(Expr {
                kind: ExprKind::Tuple(Vec::new()),
                line,
            });
        }
        let first = self.parse_star_or_test(true)?;
        if self.is_kw("for") {
            let generators = self.parse_comprehension()?;
            return Ok(Expr {
                kind: ExprKind::GenExp {
                    elt: Box::new(first),
                    generators,
                },
                line,
            });
        }
        if !self.is_op(",") {
            if matches!(first.kind, ExprKind::Starred(_)) {
                return Err(self.error("can't use starred expression here"));
            }
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_op(")") {
                break;
            }
            items.push(self.parse_star_or_test(true)?);
        }
        Ok(Expr {
            kind: ExprKind::Tuple(items),
            line,
        })
    }

    fn parse_list_body(&mut self) -> ScriptResult<ExprKind> {
        if self.is_op("]") {
            return Ok(ExprKind::List(Vec::new()));
        }
        let first = self.parse_star_or_test(true)?;
        if self.is_kw("for") {
            let generators = self.parse_comprehension()?;
            return Ok(ExprKind::ListComp {
                elt: Box::new(first),
                generators,
            });
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.is_op("]") {
                break;
            }
            items.push(self.parse_star_or_test(true)?);
        }
        Ok(ExprKind::List(items))
    }

    fn parse_dict_body(&mut self) -> ScriptResult<ExprKind> {
        if self.is_op("}") {
            return Ok(ExprKind::Dict(Vec::new()));
        }
        let mut items = Vec::new();
        loop {
            if self.eat_op("**") {
                items.push(DictItem::Unpack(self.parse_or_expr()?));
            } else {
                let key = self.parse_test()?;
                if !self.eat_op(":") {
                    return Err(self.error("set displays are not supported"));
                }
                let value = self.parse_test()?;
                if items.is_empty() && self.is_kw("for") {
                    let generators = self.parse_comprehension()?;
                    return Ok(ExprKind::DictComp {
                        key: Box::new(key),
                        value: Box::new(value),
                        generators,
                    });
                }
                items.push(DictItem::Pair(key, value));
            }
            if !self.eat_op(",") || self.is_op("}") {
                break;
            }
        }
        Ok(ExprKind::Dict(items))
    }

    /// Adjacent string literals concatenate; any f-string part makes the
    /// whole run an f-string.
    fn parse_strings(&mut self) -> ScriptResult<ExprKind> {
        let mut parts: Vec<FPart> = Vec::new();
        let mut formatted = false;
        loop {
            let line = self.line();
            match self.peek().clone() {
                Tok::Str(text) => {
                    self.advance();
                    push_literal(&mut parts, &text);
                }
                Tok::FStr(body) => {
                    self.advance();
                    formatted = true;
                    for part in self.parse_fstring(&body, line)? {
                        match part {
                            FPart::Literal(text) => push_literal(&mut parts, &text),
                            field => parts.push(field),
                        }
                    }
                }
                _ => break,
            }
        }
        if formatted {
            return Ok(ExprKind::FString(parts));
        }
        let text = match parts.pop() {
            Some(FPart::Literal(text)) => text,
            _ => String::new(),
        };
        Ok(ExprKind::Str(Rc::from(text.as_str())))
    }

    fn parse_fstring(&mut self, body: &str, line: usize) -> ScriptResult<Vec<FPart>> {
        let chars: Vec<char> = body.chars().collect();
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c == '}' {
                if chars.get(i + 1) == Some(&'}') {
                    literal.push('}');
                    i += 2;
                    continue;
                }
                return Err(ScriptError::syntax(
                    "f-string: single '}' is not allowed",
                    line,
                ));
            }
            if c != '{' {
                literal.push(c);
                i += 1;
                continue;
            }
            if chars.get(i + 1) == Some(&'{') {
                literal.push('{');
                i += 2;
                continue;
            }

            let start = i + 1;
            let mut j = start;
            let mut depth = 0usize;
            let mut quote: Option<char> = None;
            let mut debug = false;
            while j < chars.len() {
                let ch = chars[j];
                if let Some(q) = quote {
                    if ch == q {
                        quote = None;
                    }
                    j += 1;
                    continue;
                }
                match ch {
                    '\'' | '"' => quote = Some(ch),
                    '(' | '[' | '{' => depth += 1,
                    ')' | ']' | '}' if depth > 0 => depth -= 1,
                    '}' | ':' if depth == 0 => break,
                    '!' if depth == 0 && chars.get(j + 1) != Some(&'=') => break,
                    '!' | '<' | '>' | '=' if depth == 0 && chars.get(j + 1) == Some(&'=') => {
                        j += 2;
                        continue;
                    }
                    '=' if depth == 0
                        && matches!(chars.get(j + 1), Some('}') | Some('!') | Some(':')) =>
                    {
                        debug = true;
                        break;
                    }
                    _ => {}
                }
                j += 1;
            }
            if j >= chars.len() {
                return Err(ScriptError::syntax("f-string: expecting '}'", line));
            }

            let expr_text: String = chars[start..j].iter().collect();
            if expr_text.trim().is_empty() {
                return Err(ScriptError::syntax(
                    "f-string: empty expression not allowed",
                    line,
                ));
            }
            if debug {
                literal.push_str(&expr_text);
                literal.push('=');
                j += 1;
            }

            let mut conversion = None;
            if chars.get(j) == Some(&'!') {
                match chars.get(j + 1) {
                    Some(&conv) if matches!(conv, 'r' | 's' | 'a') => conversion = Some(conv),
                    _ => {
                        return Err(ScriptError::syntax(
                            "f-string: invalid conversion character",
                            line,
                        ))
                    }
                }
                j += 2;
            }

            let mut spec = Vec::new();
            if chars.get(j) == Some(&':') {
                j += 1;
                let spec_start = j;
                let mut spec_depth = 0usize;
                while j < chars.len() {
                    match chars[j] {
                        '{' => spec_depth += 1,
                        '}' if spec_depth == 0 => break,
                        '}' => spec_depth -= 1,
                        _ => {}
                    }
                    j += 1;
                }
                let spec_text: String = chars[spec_start..j].iter().collect();
                spec = self.parse_fstring(&spec_text, line)?;
            }

            if chars.get(j) != Some(&'}') {
                return Err(ScriptError::syntax("f-string: expecting '}'", line));
            }
            i = j + 1;

            if !literal.is_empty() {
                parts.push(FPart::Literal(std::mem::take(&mut literal)));
            }
            if debug && conversion.is_none() && spec.is_empty() {
                conversion = Some('r');
            }
            let expr = self.parse_embedded(&expr_text, line)?;
            parts.push(FPart::Field {
                expr: Box::new(expr),
                conversion,
                spec,
            });
        }
        if !literal.is_empty() {
            parts.push(FPart::Literal(literal));
        }
        Ok(parts)
    }

    /// Parse an expression embedded in an f-string replacement field.
    fn parse_embedded(&mut self, text: &str, line: usize) -> ScriptResult<Expr> {
        let relocate = |err: ScriptError| ScriptError {
            line: Some(line + err.line.unwrap_or(1) - 1),
            ..err
        };
        let mut tokens = tokenize(&format!("({text})")).map_err(relocate)?;
        for token in &mut tokens {
            token.line = line + token.line - 1;
        }
        let mut sub = Parser::new(tokens);
        sub.nesting = self.nesting;
        sub.function_depth = self.function_depth;
        let expr = sub.parse_test()?;
        if !matches!(sub.peek(), Tok::Newline | Tok::Eof) {
            return Err(ScriptError::syntax("f-string: invalid syntax", line));
        }
        Ok(expr)
    }
}

fn push_literal(parts: &mut Vec<FPart>, text: &str) {
    if let Some(FPart::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(FPart::Literal(text.to_string()));
    }
}

fn check_duplicate(seen: &mut HashSet<Ident>, name: &Ident, line: usize) -> ScriptResult<()> {
    if !seen.insert(name.clone()) {
        return Err(ScriptError::syntax(
            format!("duplicate argument '{name}' in function definition"),
            line,
        ));
    }
    Ok(())
}

#[derive(Default)]
struct Signature {
    params: Vec<Param>,
    vararg: Option<Ident>,
    kwonly: Vec<Param>,
    kwarg: Option<Ident>,
}

fn build_function(
    name: Ident,
    sig: Signature,
    body: Vec<Stmt>,
    line: usize,
) -> ScriptResult<FunctionDef> {
    let mut scope = ScopeInfo::default();
    let mut assigned = Vec::new();
    collect_bindings(&body, &mut assigned, &mut scope);

    let params = sig
        .params
        .iter()
        .chain(sig.kwonly.iter())
        .map(|p| p.name.clone())
        .chain(sig.vararg.iter().cloned())
        .chain(sig.kwarg.iter().cloned());
    for param in params {
        if scope.globals.contains(&param) {
            return Err(ScriptError::syntax(
                format!("name '{param}' is parameter and global"),
                line,
            ));
        }
        if scope.nonlocals.contains(&param) {
            return Err(ScriptError::syntax(
                format!("name '{param}' is parameter and nonlocal"),
                line,
            ));
        }
        scope.locals.insert(param);
    }
    for name in assigned {
        if !scope.globals.contains(&name) && !scope.nonlocals.contains(&name) {
            scope.locals.insert(name);
        }
    }

    Ok(FunctionDef {
        name,
        params: sig.params,
        vararg: sig.vararg,
        kwonly: sig.kwonly,
        kwarg: sig.kwarg,
        body,
        scope,
        line,
    })
}

/// Names bound directly in a function body. Nested function bodies and
/// comprehension targets have their own scopes and are skipped.
fn collect_bindings(body: &[Stmt], assigned: &mut Vec<Ident>, scope: &mut ScopeInfo) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => {
                targets.iter().for_each(|t| t.collect_names(assigned))
            }
            StmtKind::AugAssign { target, .. } | StmtKind::AnnAssign { target, .. } => {
                target.collect_names(assigned)
            }
            StmtKind::For {
                target,
                body,
                orelse,
                ..
            } => {
                target.collect_names(assigned);
                collect_bindings(body, assigned, scope);
                collect_bindings(orelse, assigned, scope);
            }
            StmtKind::If { body, orelse, .. } | StmtKind::While { body, orelse, .. } => {
                collect_bindings(body, assigned, scope);
                collect_bindings(orelse, assigned, scope);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                collect_bindings(body, assigned, scope);
                for handler in handlers {
                    assigned.extend(handler.name.iter().cloned());
                    collect_bindings(&handler.body, assigned, scope);
                }
                collect_bindings(orelse, assigned, scope);
                collect_bindings(finalbody, assigned, scope);
            }
            StmtKind::Del(targets) => targets.iter().for_each(|t| t.collect_names(assigned)),
            StmtKind::FunctionDef(def) => assigned.push(def.name.clone()),
            StmtKind::Global(names) => scope.globals.extend(names.iter().cloned()),
            StmtKind::Nonlocal(names) => scope.nonlocals.extend(names.iter().cloned()),
            StmtKind::Expr(_)
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Pass
            | StmtKind::Return(_)
            | StmtKind::Assert { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restricted::error::ErrorKind;

    fn parse_ok(src: &str) -> Vec<Stmt> {
        parse(src).unwrap().body
    }

    fn parse_err(src: &str) -> ScriptError {
        parse(src).unwrap_err()
    }

    #[test]
    fn precedence_of_arithmetic() {
        let body = parse_ok("x = 1 + 2 * 3 ** 2\n");
        let StmtKind::Assign { value, .. } = &body[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::BinOp(_, BinOp::Add, right) = &value.kind else {
            panic!("expected addition at the root");
        };
        assert!(matches!(right.kind, ExprKind::BinOp(_, BinOp::Mul, _)));
    }

    #[test]
    fn tuple_assignment_and_unpacking() {
        let body = parse_ok("a, b = 0, 1\n");
        let StmtKind::Assign { targets, value } = &body[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(&targets[0], Target::Unpack(items) if items.len() == 2));
        assert!(matches!(&value.kind, ExprKind::Tuple(items) if items.len() == 2));
    }

    #[test]
    fn function_scope_is_classified() {
        let body = parse_ok(
            "total = 0\ndef f(a, b=2):\n    global total\n    c = a + b\n    total += c\n    return c\n",
        );
        let StmtKind::FunctionDef(def) = &body[1].kind else {
            panic!("expected def");
        };
        assert!(def.scope.locals.contains("a"));
        assert!(def.scope.locals.contains("c"));
        assert!(!def.scope.locals.contains("total"));
        assert!(def.scope.globals.contains("total"));
    }

    #[test]
    fn one_line_loop_body() {
        let body = parse_ok("while True: pass\n");
        assert!(matches!(body[0].kind, StmtKind::While { .. }));
    }

    #[test]
    fn fstring_fields_and_specs() {
        let body = parse_ok("s = f'{x:>{w}} and {y!r} {{lit}}'\n");
        let StmtKind::Assign { value, .. } = &body[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::FString(parts) = &value.kind else {
            panic!("expected f-string");
        };
        let fields = parts
            .iter()
            .filter(|p| matches!(p, FPart::Field { .. }))
            .count();
        assert_eq!(fields, 2);
        assert!(matches!(parts.last(), Some(FPart::Literal(t)) if t == " {lit}"));
    }

    #[test]
    fn comprehensions_and_generator_arguments() {
        parse_ok("squares = [x * x for x in range(10) if x % 2]\n");
        parse_ok("d = {k: v for k, v in pairs}\n");
        parse_ok("total = sum(x for x in range(5))\n");
    }

    #[test]
    fn misplaced_control_flow_is_rejected() {
        assert_eq!(parse_err("break\n").message, "'break' outside loop");
        assert_eq!(parse_err("return 1\n").message, "'return' outside function");
        let err = parse_err("for i in range(3):\n    def f():\n        break\n");
        assert_eq!(err.line, Some(3));
    }

    #[test]
    fn unsupported_constructs_are_syntax_errors() {
        for src in ["class A:\n    pass\n", "with a as b:\n    pass\n", "x = {1, 2}\n"] {
            assert_eq!(parse_err(src).kind, ErrorKind::SyntaxError, "{src:?}");
        }
    }

    #[test]
    fn invalid_targets_are_rejected() {
        assert_eq!(parse_err("f() = 1\n").message, "cannot assign to function call");
        assert_eq!(parse_err("1 = x\n").message, "cannot assign to literal");
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let src = format!("x = {}1{}\n", "(".repeat(500), ")".repeat(500));
        assert_eq!(parse_err(&src).message, "too many nested parentheses");
    }

    #[test]
    fn missing_block_is_an_indentation_error() {
        assert_eq!(
            parse_err("if True:\nx = 1\n").kind,
            ErrorKind::IndentationError
        );
    }

    #[test]
    fn annotations_are_accepted_and_ignored() {
        let body = parse_ok("def f(n: int = 3) -> int:\n    r: int = n\n    return r\n");
        let StmtKind::FunctionDef(def) = &body[0].kind else {
            panic!("expected def");
        };
        assert!(def.params[0].default.is_some());
        assert!(def.scope.locals.contains("r"));
    }

    #[test]
    fn try_statements_collect_their_clauses() {
        let src = "def f():\n    try:\n        x = 1\n    except (KeyError, IndexError) as err:\n        pass\n    except:\n        pass\n    else:\n        y = 2\n    finally:\n        z = 3\n";
        let body = parse_ok(src);
        let StmtKind::FunctionDef(def) = &body[0].kind else {
            panic!("expected def");
        };
        let StmtKind::Try {
            handlers,
            orelse,
            finalbody,
            ..
        } = &def.body[0].kind
        else {
            panic!("expected try");
        };
        assert_eq!(handlers.len(), 2);
        assert_eq!(handlers[0].classes.len(), 2);
        assert_eq!(handlers[0].name.as_deref(), Some("err"));
        assert_eq!(handlers[0].line, 4);
        assert!(handlers[1].classes.is_empty());
        assert_eq!(orelse.len(), 1);
        assert_eq!(finalbody.len(), 1);
        for name in ["x", "err", "y", "z"] {
            assert!(def.scope.locals.contains(name), "{name}");
        }
    }

    #[test]
    fn malformed_try_statements_are_rejected() {
        assert_eq!(
            parse_err("try:\n    pass\nx = 1\n").message,
            "expected 'except' or 'finally' block"
        );
        assert_eq!(
            parse_err("try:\n    pass\nexcept:\n    pass\nexcept KeyError:\n    pass\n").message,
            "default 'except:' must be last"
        );
        assert_eq!(
            parse_err("try:\n    pass\nelse:\n    pass\n").kind,
            ErrorKind::SyntaxError
        );
        parse_ok("try:\n    pass\nfinally:\n    pass\n");
    }
}
