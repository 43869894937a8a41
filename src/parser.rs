//! Recursive-descent parser for both BetLang surface syntaxes.
//!
//! A fully parenthesized S-expression form and a keyword/`end`-terminated
//! form coexist in one file; every expression position dispatches on its
//! leading token. Infix operators in the keyword form are parsed by
//! precedence climbing (application binds tightest, then unary minus,
//! `* /`, `+ -`, comparisons, `and`/`or`). The grammar is deliberately not
//! LR-generated: the let-in/do-let and grouping ambiguities disappear once
//! the dispatch is written by hand.
//!
//! Parse errors are accumulated: after an error the parser skips to the next
//! line and keeps going so one run reports every problem in the file.

use crate::{
    ast::{
        BinaryOp, Binding, DoStmt, Expr, ExprKind, Literal, MatchArm, Pattern, Program, UnaryOp,
    },
    diagnostics::{Diagnostic, DiagnosticKind},
    lexer::{Keyword, Lexer, Token, TokenKind},
    span::SourceSpan,
};

type PResult<T> = std::result::Result<T, Diagnostic>;

const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_COMPARE: u8 = 3;
const PREC_TERM: u8 = 4;
const PREC_FACTOR: u8 = 5;

/// Parse a whole source file, accumulating diagnostics.
pub fn parse(source: &str) -> Result<Program, Vec<Diagnostic>> {
    let tokens = match Lexer::new(source).tokenize() {
        Ok(tokens) => tokens,
        Err(diag) => return Err(vec![diag]),
    };
    let mut parser = Parser::new(tokens);
    let program = parser.parse_program();
    if parser.diagnostics.is_empty() {
        Ok(program)
    } else {
        Err(parser.diagnostics)
    }
}

/// Parse a single expression (REPL input).
pub fn parse_expr(source: &str) -> Result<Expr, Vec<Diagnostic>> {
    let tokens = Lexer::new(source).tokenize().map_err(|d| vec![d])?;
    let mut parser = Parser::new(tokens);
    match parser.expression() {
        Ok(expr) if parser.check(TokenKind::Eof) => Ok(expr),
        Ok(_) => Err(vec![parser.unexpected("expected end of input")]),
        Err(diag) => Err(vec![diag]),
    }
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
    diagnostics: Vec<Diagnostic>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            diagnostics: Vec::new(),
        }
    }

    fn parse_program(&mut self) -> Program {
        let mut forms = Vec::new();
        while !self.check(TokenKind::Eof) {
            match self.expression() {
                Ok(expr) => forms.push(expr),
                Err(diag) => {
                    self.diagnostics.push(diag);
                    self.synchronize();
                }
            }
        }
        Program { forms }
    }

    /// Skip to the next statement boundary (next line or EOF).
    fn synchronize(&mut self) {
        if !self.check(TokenKind::Eof) {
            self.advance();
        }
        while !self.check(TokenKind::Eof) {
            if self.peek().map(|t| t.line_break).unwrap_or(true) {
                return;
            }
            self.advance();
        }
    }

    // --- expressions -----------------------------------------------------

    fn expression(&mut self) -> PResult<Expr> {
        self.binary(PREC_OR, true)
    }

    /// Expression with juxtaposition application disabled, used where bare
    /// operands stand side by side (`bet x y z end`).
    fn operand(&mut self) -> PResult<Expr> {
        self.binary(PREC_OR, false)
    }

    fn binary(&mut self, min_prec: u8, app: bool) -> PResult<Expr> {
        let left = self.unary(app)?;
        self.binary_continue(left, min_prec, app)
    }

    fn binary_continue(&mut self, mut left: Expr, min_prec: u8, app: bool) -> PResult<Expr> {
        loop {
            let (op, prec) = match self.peek().map(|t| &t.kind) {
                Some(TokenKind::Keyword(Keyword::Or)) => (BinaryOp::Or, PREC_OR),
                Some(TokenKind::Keyword(Keyword::And)) => (BinaryOp::And, PREC_AND),
                Some(TokenKind::Equal) => (BinaryOp::Equal, PREC_COMPARE),
                Some(TokenKind::Less) => (BinaryOp::Less, PREC_COMPARE),
                Some(TokenKind::LessEqual) => (BinaryOp::LessEqual, PREC_COMPARE),
                Some(TokenKind::Greater) => (BinaryOp::Greater, PREC_COMPARE),
                Some(TokenKind::GreaterEqual) => (BinaryOp::GreaterEqual, PREC_COMPARE),
                Some(TokenKind::Plus) => (BinaryOp::Add, PREC_TERM),
                Some(TokenKind::Minus) => (BinaryOp::Sub, PREC_TERM),
                Some(TokenKind::Star) => (BinaryOp::Mul, PREC_FACTOR),
                Some(TokenKind::Slash) => (BinaryOp::Div, PREC_FACTOR),
                _ => break,
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            let right = self.binary(prec + 1, app)?;
            let span = left.span.merge(right.span);
            left = Expr {
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            };
        }
        Ok(left)
    }

    fn unary(&mut self, app: bool) -> PResult<Expr> {
        if let Some(token) = self.peek() {
            match &token.kind {
                TokenKind::Minus => {
                    let start = self.advance().span;
                    let expr = self.unary(app)?;
                    return negate_literal(expr, start);
                }
                TokenKind::Keyword(Keyword::Not) => {
                    let start = self.advance().span;
                    let expr = self.unary(app)?;
                    let span = start.merge(expr.span);
                    return Ok(Expr {
                        kind: ExprKind::Unary {
                            op: UnaryOp::Not,
                            expr: Box::new(expr),
                        },
                        span,
                    });
                }
                TokenKind::Keyword(Keyword::Sample) => {
                    let start = self.advance().span;
                    let expr = self.unary(app)?;
                    let span = start.merge(expr.span);
                    return Ok(Expr {
                        kind: ExprKind::Sample(Box::new(expr)),
                        span,
                    });
                }
                _ => {}
            }
        }
        if app {
            self.application()
        } else {
            self.primary()
        }
    }

    fn application(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        let mut args = Vec::new();
        while self.starts_operand_here() {
            args.push(self.primary()?);
        }
        if !args.is_empty() {
            let span = expr.span.merge(args.last().unwrap().span);
            expr = Expr {
                kind: ExprKind::Apply {
                    callee: Box::new(expr),
                    args,
                },
                span,
            };
        }
        Ok(expr)
    }

    /// An operand may begin juxtaposed application only on the same line.
    fn starts_operand_here(&self) -> bool {
        match self.peek() {
            Some(token) if !token.line_break => matches!(
                token.kind,
                TokenKind::Identifier
                    | TokenKind::Symbol
                    | TokenKind::Int(_)
                    | TokenKind::Rational(_, _)
                    | TokenKind::Float(_)
                    | TokenKind::String
                    | TokenKind::Bool(_)
                    | TokenKind::Unknown
                    | TokenKind::LParen
                    | TokenKind::LBracket
                    | TokenKind::Quote
            ),
            _ => false,
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.eof_error("unexpected end of input")),
        };
        match token.kind {
            TokenKind::Int(n) => {
                self.advance();
                Ok(lit(Literal::Int(n), token.span))
            }
            TokenKind::Rational(p, q) => {
                self.advance();
                Ok(lit(Literal::Rational(p, q), token.span))
            }
            TokenKind::Float(x) => {
                self.advance();
                Ok(lit(Literal::Float(x), token.span))
            }
            TokenKind::Bool(b) => {
                self.advance();
                Ok(lit(Literal::Bool(b), token.span))
            }
            TokenKind::Unknown => {
                self.advance();
                Ok(lit(Literal::Unknown, token.span))
            }
            TokenKind::String => {
                self.advance();
                Ok(lit(Literal::String(token.lexeme), token.span))
            }
            TokenKind::Symbol => {
                self.advance();
                Ok(lit(Literal::Symbol(token.lexeme), token.span))
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::Var(token.lexeme),
                    span: token.span,
                })
            }
            TokenKind::LBracket => self.list_literal(),
            TokenKind::Quote => self.quoted_datum(),
            TokenKind::LParen => self.sexpr_form(),
            TokenKind::Keyword(Keyword::Bet) => self.kw_bet(),
            TokenKind::Keyword(Keyword::Let) => self.kw_let(),
            TokenKind::Keyword(Keyword::If) => self.kw_if(),
            TokenKind::Keyword(Keyword::Match) => self.kw_match(),
            TokenKind::Keyword(Keyword::Do) => self.kw_do(),
            TokenKind::Keyword(Keyword::Parallel) => self.kw_parallel(),
            TokenKind::Keyword(Keyword::Lambda) => self.kw_lambda(),
            TokenKind::Keyword(Keyword::Define) => self.kw_define(),
            _ => Err(self.error(&token, "unexpected token in expression")),
        }
    }

    fn list_literal(&mut self) -> PResult<Expr> {
        let open = self.expect(TokenKind::LBracket, "expected `[`")?;
        let mut items = Vec::new();
        if !self.check(TokenKind::RBracket) {
            loop {
                items.push(self.expression()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        let close = self.expect(TokenKind::RBracket, "expected `]` to close list")?;
        Ok(Expr {
            kind: ExprKind::List(items),
            span: open.span.merge(close.span),
        })
    }

    // --- quoted data -----------------------------------------------------

    /// `'( ... )` — the quote token is only produced before `(`.
    fn quoted_datum(&mut self) -> PResult<Expr> {
        let quote = self.expect(TokenKind::Quote, "expected `'`")?;
        let list = self.datum_list()?;
        Ok(Expr {
            span: quote.span.merge(list.span),
            ..list
        })
    }

    fn datum_list(&mut self) -> PResult<Expr> {
        let open = self.expect(TokenKind::LParen, "expected `(` after `'`")?;
        let mut items = Vec::new();
        while !self.check(TokenKind::RParen) {
            items.push(self.datum()?);
        }
        let close = self.expect(TokenKind::RParen, "expected `)` to close quoted list")?;
        Ok(Expr {
            kind: ExprKind::List(items),
            span: open.span.merge(close.span),
        })
    }

    /// Inside quoted data, bare identifiers are symbols.
    fn datum(&mut self) -> PResult<Expr> {
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.eof_error("unexpected end of quoted data")),
        };
        match token.kind {
            TokenKind::Identifier | TokenKind::Symbol => {
                self.advance();
                Ok(lit(Literal::Symbol(token.lexeme), token.span))
            }
            TokenKind::Int(n) => {
                self.advance();
                Ok(lit(Literal::Int(n), token.span))
            }
            TokenKind::Rational(p, q) => {
                self.advance();
                Ok(lit(Literal::Rational(p, q), token.span))
            }
            TokenKind::Float(x) => {
                self.advance();
                Ok(lit(Literal::Float(x), token.span))
            }
            TokenKind::Minus => {
                let start = self.advance().span;
                let next = self.datum()?;
                negate_literal(next, start)
            }
            TokenKind::Bool(b) => {
                self.advance();
                Ok(lit(Literal::Bool(b), token.span))
            }
            TokenKind::String => {
                self.advance();
                Ok(lit(Literal::String(token.lexeme), token.span))
            }
            TokenKind::LParen => self.datum_list(),
            _ => Err(self.error(&token, "unexpected token in quoted data")),
        }
    }

    // --- S-expression forms ----------------------------------------------

    fn sexpr_form(&mut self) -> PResult<Expr> {
        let open = self.expect(TokenKind::LParen, "expected `(`")?;
        if self.check(TokenKind::RParen) {
            let close = self.advance();
            return Ok(Expr {
                kind: ExprKind::List(Vec::new()),
                span: open.span.merge(close.span),
            });
        }

        let head = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.eof_error("unexpected end of input after `(`")),
        };

        let expr = match &head.kind {
            TokenKind::Keyword(Keyword::Bet) => {
                self.advance();
                let args = self.sexpr_operands()?;
                Expr {
                    kind: ExprKind::Bet(args),
                    span: open.span,
                }
            }
            TokenKind::Keyword(Keyword::If) => {
                self.advance();
                let cond = self.sexpr_operand()?;
                let then_branch = self.sexpr_operand()?;
                let else_branch = self.sexpr_operand()?;
                Expr {
                    kind: ExprKind::If {
                        cond: Box::new(cond),
                        then_branch: Box::new(then_branch),
                        else_branch: Box::new(else_branch),
                    },
                    span: open.span,
                }
            }
            TokenKind::Keyword(Keyword::Let) => {
                self.advance();
                self.sexpr_let(open.span)?
            }
            TokenKind::Keyword(Keyword::Lambda) => {
                self.advance();
                self.sexpr_lambda(open.span)?
            }
            TokenKind::Keyword(Keyword::Match) => {
                self.advance();
                self.sexpr_match(open.span)?
            }
            TokenKind::Keyword(Keyword::Do) => {
                self.advance();
                self.sexpr_do(open.span)?
            }
            TokenKind::Keyword(Keyword::Define) => {
                self.advance();
                let name = self.expect_identifier("expected a name after `define`")?;
                let value = self.sexpr_operand()?;
                Expr {
                    kind: ExprKind::Define {
                        name: name.lexeme,
                        value: Box::new(value),
                    },
                    span: open.span,
                }
            }
            TokenKind::Keyword(Keyword::Sample) => {
                self.advance();
                let arg = self.sexpr_operand()?;
                Expr {
                    kind: ExprKind::Sample(Box::new(arg)),
                    span: open.span,
                }
            }
            TokenKind::Keyword(Keyword::Parallel) => {
                self.advance();
                let count = self.sexpr_operand()?;
                let body = self.sexpr_operand()?;
                Expr {
                    kind: ExprKind::Parallel {
                        count: Box::new(count),
                        body: Box::new(body),
                    },
                    span: open.span,
                }
            }
            TokenKind::Keyword(Keyword::Not) => {
                self.advance();
                let arg = self.sexpr_operand()?;
                Expr {
                    kind: ExprKind::Unary {
                        op: UnaryOp::Not,
                        expr: Box::new(arg),
                    },
                    span: open.span,
                }
            }
            TokenKind::Keyword(Keyword::And) => {
                self.advance();
                self.sexpr_binary(BinaryOp::And, open.span)?
            }
            TokenKind::Keyword(Keyword::Or) => {
                self.advance();
                self.sexpr_binary(BinaryOp::Or, open.span)?
            }
            TokenKind::Identifier => match canonical(&head.lexeme) {
                "bet_weighted" => {
                    self.advance();
                    self.sexpr_weighted(open.span)?
                }
                "bet_conditional" => {
                    self.advance();
                    let args = self.sexpr_operands()?;
                    Expr {
                        kind: ExprKind::BetConditional(args),
                        span: open.span,
                    }
                }
                "bet_lazy" => {
                    self.advance();
                    let args = self.sexpr_operands()?;
                    Expr {
                        kind: ExprKind::BetLazy(args),
                        span: open.span,
                    }
                }
                "with_seed" => {
                    self.advance();
                    let seed = self.sexpr_operand()?;
                    let body = self.sexpr_operand()?;
                    Expr {
                        kind: ExprKind::WithSeed {
                            seed: Box::new(seed),
                            body: Box::new(body),
                        },
                        span: open.span,
                    }
                }
                _ => self.sexpr_application()?,
            },
            TokenKind::Plus => {
                self.advance();
                self.sexpr_binary(BinaryOp::Add, open.span)?
            }
            TokenKind::Minus => {
                self.advance();
                self.sexpr_minus(open.span)?
            }
            TokenKind::Star => {
                self.advance();
                self.sexpr_binary(BinaryOp::Mul, open.span)?
            }
            TokenKind::Slash => {
                self.advance();
                self.sexpr_binary(BinaryOp::Div, open.span)?
            }
            TokenKind::Equal => {
                self.advance();
                self.sexpr_binary(BinaryOp::Equal, open.span)?
            }
            TokenKind::Less => {
                self.advance();
                self.sexpr_binary(BinaryOp::Less, open.span)?
            }
            TokenKind::LessEqual => {
                self.advance();
                self.sexpr_binary(BinaryOp::LessEqual, open.span)?
            }
            TokenKind::Greater => {
                self.advance();
                self.sexpr_binary(BinaryOp::Greater, open.span)?
            }
            TokenKind::GreaterEqual => {
                self.advance();
                self.sexpr_binary(BinaryOp::GreaterEqual, open.span)?
            }
            _ => self.sexpr_application()?,
        };

        let close = self.expect(TokenKind::RParen, "expected `)` to close form")?;
        Ok(Expr {
            span: open.span.merge(close.span),
            ..expr
        })
    }

    /// `(f a b)` application, `(x + y)` grouped infix, or `(x)` grouping.
    fn sexpr_application(&mut self) -> PResult<Expr> {
        let first = self.sexpr_operand()?;
        if self.peeks_binary_operator() {
            return self.binary_continue(first, PREC_OR, false);
        }
        let args = self.sexpr_operands()?;
        if args.is_empty() {
            return Ok(first);
        }
        let span = first.span;
        Ok(Expr {
            kind: ExprKind::Apply {
                callee: Box::new(first),
                args,
            },
            span,
        })
    }

    fn peeks_binary_operator(&self) -> bool {
        matches!(
            self.peek().map(|t| &t.kind),
            Some(
                TokenKind::Plus
                    | TokenKind::Minus
                    | TokenKind::Star
                    | TokenKind::Slash
                    | TokenKind::Equal
                    | TokenKind::Less
                    | TokenKind::LessEqual
                    | TokenKind::Greater
                    | TokenKind::GreaterEqual
                    | TokenKind::Keyword(Keyword::And)
                    | TokenKind::Keyword(Keyword::Or)
            )
        )
    }

    /// A single operand inside an S-expression: no infix, no juxtaposition.
    fn sexpr_operand(&mut self) -> PResult<Expr> {
        if self.check(TokenKind::Minus) {
            let start = self.advance().span;
            let next = self.sexpr_operand()?;
            return negate_literal(next, start);
        }
        self.primary()
    }

    fn sexpr_operands(&mut self) -> PResult<Vec<Expr>> {
        let mut operands = Vec::new();
        while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
            operands.push(self.sexpr_operand()?);
        }
        Ok(operands)
    }

    fn sexpr_binary(&mut self, op: BinaryOp, span: SourceSpan) -> PResult<Expr> {
        let operands = self.sexpr_operands()?;
        if operands.len() < 2 {
            return Err(Diagnostic::new(
                DiagnosticKind::Parse,
                "operator form needs at least two operands",
            )
            .with_span(span));
        }
        let mut iter = operands.into_iter();
        let mut acc = iter.next().unwrap();
        for next in iter {
            let merged = acc.span.merge(next.span);
            acc = Expr {
                kind: ExprKind::Binary {
                    op,
                    left: Box::new(acc),
                    right: Box::new(next),
                },
                span: merged,
            };
        }
        Ok(acc)
    }

    fn sexpr_minus(&mut self, span: SourceSpan) -> PResult<Expr> {
        let operands = self.sexpr_operands()?;
        match operands.len() {
            0 => Err(Diagnostic::new(DiagnosticKind::Parse, "`-` needs an operand").with_span(span)),
            1 => {
                let expr = operands.into_iter().next().unwrap();
                negate_literal(expr, span)
            }
            _ => {
                let mut iter = operands.into_iter();
                let mut acc = iter.next().unwrap();
                for next in iter {
                    let merged = acc.span.merge(next.span);
                    acc = Expr {
                        kind: ExprKind::Binary {
                            op: BinaryOp::Sub,
                            left: Box::new(acc),
                            right: Box::new(next),
                        },
                        span: merged,
                    };
                }
                Ok(acc)
            }
        }
    }

    fn sexpr_let(&mut self, span: SourceSpan) -> PResult<Expr> {
        self.expect(TokenKind::LParen, "expected `(` to open let bindings")?;
        let mut bindings = Vec::new();
        loop {
            let open = if self.check(TokenKind::LBracket) {
                TokenKind::RBracket
            } else if self.check(TokenKind::LParen) {
                TokenKind::RParen
            } else {
                break;
            };
            let start = self.advance().span;
            let name = self.expect_identifier("expected a binding name")?;
            let value = self.sexpr_operand()?;
            let close = self.expect(open, "expected binding to close")?;
            bindings.push(Binding {
                name: name.lexeme,
                value,
                span: start.merge(close.span),
            });
        }
        self.expect(TokenKind::RParen, "expected `)` to close let bindings")?;
        if bindings.is_empty() {
            return Err(
                Diagnostic::new(DiagnosticKind::Parse, "`let` needs at least one binding")
                    .with_span(span),
            );
        }
        let body = self.sexpr_operand()?;
        Ok(Expr {
            kind: ExprKind::Let {
                bindings,
                body: Box::new(body),
            },
            span,
        })
    }

    fn sexpr_lambda(&mut self, span: SourceSpan) -> PResult<Expr> {
        self.expect(TokenKind::LParen, "expected `(` to open parameter list")?;
        let mut params = Vec::new();
        while self.check(TokenKind::Identifier) {
            params.push(self.advance().lexeme);
        }
        self.expect(TokenKind::RParen, "expected `)` to close parameter list")?;
        let body = self.sexpr_operand()?;
        Ok(Expr {
            kind: ExprKind::Lambda {
                params,
                body: Box::new(body),
            },
            span,
        })
    }

    fn sexpr_match(&mut self, span: SourceSpan) -> PResult<Expr> {
        let scrutinee = self.sexpr_operand()?;
        let mut arms = Vec::new();
        while self.check(TokenKind::LParen) {
            let start = self.advance().span;
            let pattern = self.pattern()?;
            self.eat(TokenKind::RArrow);
            let body = self.sexpr_operand()?;
            let close = self.expect(TokenKind::RParen, "expected `)` to close match arm")?;
            arms.push(MatchArm {
                pattern,
                body,
                span: start.merge(close.span),
            });
        }
        Ok(Expr {
            kind: ExprKind::Match {
                scrutinee: Box::new(scrutinee),
                arms,
            },
            span,
        })
    }

    fn sexpr_do(&mut self, span: SourceSpan) -> PResult<Expr> {
        let mut stmts = Vec::new();
        let mut result = None;
        while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
            if self.check(TokenKind::LParen) {
                if let Some(kind) = self.peek_nth_kind(1) {
                    if kind == TokenKind::Keyword(Keyword::Return) {
                        let open = self.advance().span;
                        self.advance();
                        let expr = self.sexpr_operand()?;
                        self.expect(TokenKind::RParen, "expected `)` after `return`")?;
                        if result.is_some() {
                            return Err(Diagnostic::new(
                                DiagnosticKind::Parse,
                                "`do` block has more than one `return`",
                            )
                            .with_span(open));
                        }
                        result = Some(expr);
                        continue;
                    }
                    if kind == TokenKind::Identifier
                        && self.peek_nth_kind(2) == Some(TokenKind::LArrow)
                    {
                        let open = self.advance().span;
                        let name = self.advance();
                        self.advance();
                        let value = self.sexpr_operand()?;
                        let close =
                            self.expect(TokenKind::RParen, "expected `)` after binding")?;
                        stmts.push(DoStmt::Bind {
                            name: name.lexeme,
                            value,
                            span: open.merge(close.span),
                        });
                        continue;
                    }
                }
            }
            stmts.push(DoStmt::Expr(self.sexpr_operand()?));
        }
        let result = result.ok_or_else(|| {
            Diagnostic::new(DiagnosticKind::Parse, "`do` block needs a `return`").with_span(span)
        })?;
        Ok(Expr {
            kind: ExprKind::Do {
                stmts,
                result: Box::new(result),
            },
            span,
        })
    }

    /// `(bet-weighted (v w) ...)` with an optional leading quote, in which
    /// case the alternatives are data and bare names mean symbols.
    fn sexpr_weighted(&mut self, span: SourceSpan) -> PResult<Expr> {
        let quoted = self.eat(TokenKind::Quote);
        if quoted {
            self.expect(TokenKind::LParen, "expected `(` after `'`")?;
        }
        let mut pairs = Vec::new();
        while self.check(TokenKind::LParen) {
            self.advance();
            let value = if quoted {
                self.datum()?
            } else {
                self.sexpr_operand()?
            };
            let weight = if quoted {
                self.datum()?
            } else {
                self.sexpr_operand()?
            };
            self.expect(TokenKind::RParen, "expected `)` to close weighted pair")?;
            pairs.push((value, weight));
        }
        if quoted {
            self.expect(TokenKind::RParen, "expected `)` to close quoted list")?;
        }
        Ok(Expr {
            kind: ExprKind::BetWeighted(pairs),
            span,
        })
    }

    // --- keyword forms ---------------------------------------------------

    /// `bet a b c end` or `bet a @ 0.4, b @ 0.6 end`.
    fn kw_bet(&mut self) -> PResult<Expr> {
        let start = self.expect_keyword(Keyword::Bet)?.span;
        let first = self.operand()?;
        if self.eat(TokenKind::At) {
            let weight = self.operand()?;
            let mut pairs = vec![(first, weight)];
            while self.eat(TokenKind::Comma) {
                let value = self.operand()?;
                self.expect(TokenKind::At, "expected `@` before weight")?;
                let weight = self.operand()?;
                pairs.push((value, weight));
            }
            let end = self.expect_keyword(Keyword::End)?.span;
            return Ok(Expr {
                kind: ExprKind::BetWeighted(pairs),
                span: start.merge(end),
            });
        }
        let mut args = vec![first];
        loop {
            if self.eat(TokenKind::Comma) {
                args.push(self.operand()?);
                continue;
            }
            if self.check(TokenKind::Keyword(Keyword::End)) || self.check(TokenKind::Eof) {
                break;
            }
            args.push(self.operand()?);
        }
        let end = self.expect_keyword(Keyword::End)?.span;
        Ok(Expr {
            kind: ExprKind::Bet(args),
            span: start.merge(end),
        })
    }

    /// `let n = v in body end`.
    fn kw_let(&mut self) -> PResult<Expr> {
        let start = self.expect_keyword(Keyword::Let)?.span;
        let name = self.expect_identifier("expected a name after `let`")?;
        self.expect(TokenKind::Equal, "expected `=` in `let` binding")?;
        let value = self.expression()?;
        self.expect_keyword(Keyword::In)?;
        let body = self.expression()?;
        let end = self.expect_keyword(Keyword::End)?.span;
        let binding_span = name.span.merge(value.span);
        Ok(Expr {
            kind: ExprKind::Let {
                bindings: vec![Binding {
                    name: name.lexeme,
                    value,
                    span: binding_span,
                }],
                body: Box::new(body),
            },
            span: start.merge(end),
        })
    }

    fn kw_if(&mut self) -> PResult<Expr> {
        let start = self.expect_keyword(Keyword::If)?.span;
        let cond = self.expression()?;
        self.expect_keyword(Keyword::Then)?;
        let then_branch = self.expression()?;
        self.expect_keyword(Keyword::Else)?;
        let else_branch = self.expression()?;
        let end = self.expect_keyword(Keyword::End)?.span;
        Ok(Expr {
            kind: ExprKind::If {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
            span: start.merge(end),
        })
    }

    /// `match e with p -> e | p -> e end`.
    fn kw_match(&mut self) -> PResult<Expr> {
        let start = self.expect_keyword(Keyword::Match)?.span;
        let scrutinee = self.expression()?;
        self.expect_keyword(Keyword::With)?;
        let mut arms = Vec::new();
        loop {
            let arm_start = match self.peek() {
                Some(token) => token.span,
                None => return Err(self.eof_error("unexpected end of `match`")),
            };
            let pattern = self.pattern()?;
            self.expect(TokenKind::RArrow, "expected `->` in match arm")?;
            let body = self.expression()?;
            let arm_span = arm_start.merge(body.span);
            arms.push(MatchArm {
                pattern,
                body,
                span: arm_span,
            });
            if self.eat(TokenKind::Bar) || self.eat(TokenKind::Semicolon) {
                continue;
            }
            break;
        }
        let end = self.expect_keyword(Keyword::End)?.span;
        Ok(Expr {
            kind: ExprKind::Match {
                scrutinee: Box::new(scrutinee),
                arms,
            },
            span: start.merge(end),
        })
    }

    /// `do x <- e; e2; return r end` — newlines also separate statements.
    fn kw_do(&mut self) -> PResult<Expr> {
        let start = self.expect_keyword(Keyword::Do)?.span;
        let mut stmts = Vec::new();
        loop {
            self.eat(TokenKind::Semicolon);
            if self.check(TokenKind::Keyword(Keyword::Return)) {
                break;
            }
            if self.check(TokenKind::Keyword(Keyword::End)) || self.check(TokenKind::Eof) {
                return Err(Diagnostic::new(
                    DiagnosticKind::Parse,
                    "`do` block needs a `return` before `end`",
                )
                .with_span(start));
            }
            if self.check(TokenKind::Identifier)
                && self.peek_nth_kind(1) == Some(TokenKind::LArrow)
            {
                let name = self.advance();
                self.advance();
                let value = self.expression()?;
                let span = name.span.merge(value.span);
                stmts.push(DoStmt::Bind {
                    name: name.lexeme,
                    value,
                    span,
                });
            } else {
                stmts.push(DoStmt::Expr(self.expression()?));
            }
        }
        self.expect_keyword(Keyword::Return)?;
        let result = self.expression()?;
        self.eat(TokenKind::Semicolon);
        let end = self.expect_keyword(Keyword::End)?.span;
        Ok(Expr {
            kind: ExprKind::Do {
                stmts,
                result: Box::new(result),
            },
            span: start.merge(end),
        })
    }

    /// `parallel N do body end`.
    fn kw_parallel(&mut self) -> PResult<Expr> {
        let start = self.expect_keyword(Keyword::Parallel)?.span;
        let count = self.operand()?;
        self.expect_keyword(Keyword::Do)?;
        let body = self.expression()?;
        let end = self.expect_keyword(Keyword::End)?.span;
        Ok(Expr {
            kind: ExprKind::Parallel {
                count: Box::new(count),
                body: Box::new(body),
            },
            span: start.merge(end),
        })
    }

    /// `lambda x y -> body end`.
    fn kw_lambda(&mut self) -> PResult<Expr> {
        let start = self.expect_keyword(Keyword::Lambda)?.span;
        let mut params = Vec::new();
        while self.check(TokenKind::Identifier) {
            params.push(self.advance().lexeme);
        }
        self.expect(TokenKind::RArrow, "expected `->` after lambda parameters")?;
        let body = self.expression()?;
        let end = self.expect_keyword(Keyword::End)?.span;
        Ok(Expr {
            kind: ExprKind::Lambda {
                params,
                body: Box::new(body),
            },
            span: start.merge(end),
        })
    }

    /// `define name = expr`.
    fn kw_define(&mut self) -> PResult<Expr> {
        let start = self.expect_keyword(Keyword::Define)?.span;
        let name = self.expect_identifier("expected a name after `define`")?;
        self.expect(TokenKind::Equal, "expected `=` in `define`")?;
        let value = self.expression()?;
        let span = start.merge(value.span);
        Ok(Expr {
            kind: ExprKind::Define {
                name: name.lexeme,
                value: Box::new(value),
            },
            span,
        })
    }

    // --- patterns --------------------------------------------------------

    fn pattern(&mut self) -> PResult<Pattern> {
        let token = match self.peek() {
            Some(token) => token.clone(),
            None => return Err(self.eof_error("unexpected end of input in pattern")),
        };
        match token.kind {
            TokenKind::Identifier if token.lexeme == "_" => {
                self.advance();
                Ok(Pattern::Wildcard)
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Pattern::Var(token.lexeme))
            }
            TokenKind::Symbol => {
                self.advance();
                Ok(Pattern::Tag(token.lexeme))
            }
            TokenKind::Int(n) => {
                self.advance();
                Ok(Pattern::Literal(Literal::Int(n)))
            }
            TokenKind::Rational(p, q) => {
                self.advance();
                Ok(Pattern::Literal(Literal::Rational(p, q)))
            }
            TokenKind::Float(x) => {
                self.advance();
                Ok(Pattern::Literal(Literal::Float(x)))
            }
            TokenKind::Minus => {
                self.advance();
                match self.pattern()? {
                    Pattern::Literal(Literal::Int(n)) => Ok(Pattern::Literal(Literal::Int(-n))),
                    Pattern::Literal(Literal::Float(x)) => {
                        Ok(Pattern::Literal(Literal::Float(-x)))
                    }
                    Pattern::Literal(Literal::Rational(p, q)) => {
                        Ok(Pattern::Literal(Literal::Rational(-p, q)))
                    }
                    _ => Err(self.error(&token, "`-` in a pattern needs a numeric literal")),
                }
            }
            TokenKind::Bool(b) => {
                self.advance();
                Ok(Pattern::Literal(Literal::Bool(b)))
            }
            TokenKind::Unknown => {
                self.advance();
                Ok(Pattern::Literal(Literal::Unknown))
            }
            TokenKind::String => {
                self.advance();
                Ok(Pattern::Literal(Literal::String(token.lexeme)))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.check(TokenKind::RBracket) {
                    loop {
                        items.push(self.pattern()?);
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBracket, "expected `]` to close list pattern")?;
                Ok(Pattern::List(items))
            }
            TokenKind::LParen => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(TokenKind::RParen) && !self.check(TokenKind::Eof) {
                    items.push(self.pattern()?);
                    self.eat(TokenKind::Comma);
                }
                self.expect(TokenKind::RParen, "expected `)` to close list pattern")?;
                Ok(Pattern::List(items))
            }
            _ => Err(self.error(&token, "unexpected token in pattern")),
        }
    }

    // --- cursor helpers --------------------------------------------------

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().map(|t| t.kind == kind).unwrap_or(false)
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(message))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> PResult<Token> {
        if self.check(TokenKind::Keyword(keyword)) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&format!("expected keyword `{}`", keyword_name(keyword))))
        }
    }

    fn expect_identifier(&mut self, message: &str) -> PResult<Token> {
        if self.check(TokenKind::Identifier) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(message))
        }
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.current.min(self.tokens.len() - 1)].clone();
        if self.current < self.tokens.len() - 1 {
            self.current += 1;
        }
        token
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn peek_nth_kind(&self, n: usize) -> Option<TokenKind> {
        self.tokens.get(self.current + n).map(|t| t.kind.clone())
    }

    fn error(&self, token: &Token, message: &str) -> Diagnostic {
        let found = if token.lexeme.is_empty() {
            "end of input".to_string()
        } else {
            format!("`{}`", token.lexeme)
        };
        Diagnostic::new(DiagnosticKind::Parse, format!("{message}, found {found}"))
            .with_span(token.span)
    }

    fn unexpected(&self, message: &str) -> Diagnostic {
        match self.peek() {
            Some(token) => self.error(&token.clone(), message),
            None => self.eof_error(message),
        }
    }

    fn eof_error(&self, message: &str) -> Diagnostic {
        let at = self.tokens.last().map(|t| t.span).unwrap_or(SourceSpan::point(0));
        Diagnostic::new(DiagnosticKind::Parse, message.to_string()).with_span(at)
    }
}

fn lit(literal: Literal, span: SourceSpan) -> Expr {
    Expr {
        kind: ExprKind::Literal(literal),
        span,
    }
}

/// Fold a leading minus into a numeric literal; anything else stays a
/// negation node.
fn negate_literal(expr: Expr, minus: SourceSpan) -> PResult<Expr> {
    let span = minus.merge(expr.span);
    let kind = match expr.kind {
        ExprKind::Literal(Literal::Int(n)) => ExprKind::Literal(Literal::Int(-n)),
        ExprKind::Literal(Literal::Float(x)) => ExprKind::Literal(Literal::Float(-x)),
        ExprKind::Literal(Literal::Rational(p, q)) => ExprKind::Literal(Literal::Rational(-p, q)),
        other => ExprKind::Unary {
            op: UnaryOp::Negate,
            expr: Box::new(Expr { kind: other, span: expr.span }),
        },
    };
    Ok(Expr { kind, span })
}

/// Hyphenated identifiers normalize to underscores; the elaborator applies
/// the same mapping to every name.
fn canonical(name: &str) -> &str {
    // Only used for comparisons against known heads here; allocation-free
    // for the common unhyphenated case.
    if name.contains('-') {
        match name {
            "bet-weighted" => "bet_weighted",
            "bet-conditional" => "bet_conditional",
            "bet-lazy" => "bet_lazy",
            "with-seed" => "with_seed",
            _ => name,
        }
    } else {
        name
    }
}

fn keyword_name(keyword: Keyword) -> &'static str {
    match keyword {
        Keyword::Bet => "bet",
        Keyword::Let => "let",
        Keyword::In => "in",
        Keyword::If => "if",
        Keyword::Then => "then",
        Keyword::Else => "else",
        Keyword::Match => "match",
        Keyword::With => "with",
        Keyword::Do => "do",
        Keyword::Return => "return",
        Keyword::Sample => "sample",
        Keyword::Parallel => "parallel",
        Keyword::Define => "define",
        Keyword::Lambda => "lambda",
        Keyword::End => "end",
        Keyword::And => "and",
        Keyword::Or => "or",
        Keyword::Not => "not",
    }
}
