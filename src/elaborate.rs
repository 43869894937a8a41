//! Semantic elaboration: surface AST in, typed IR out.
//!
//! Passes (run together in one walk, diagnostics accumulated):
//! 1. desugar keyword sugar, `do` blocks (into nested lets), multi-binding
//!    lets, `with-seed` applications, and hyphenated identifiers;
//! 2. scope resolution against the native prelude plus lexical frames;
//! 3. arity checks for the bet family;
//! 4. compile-time Dutch-book validation of literal weights;
//! 5. advisory pattern-exhaustiveness on `match`.

use crate::{
    ast::{DoStmt, Expr, ExprKind, Literal, Pattern, Program},
    diagnostics::{Diagnostic, DiagnosticKind},
    ir::{IrArm, IrExpr, IrKind, IrProgram},
    span::SourceSpan,
    stdlib,
};

/// Default Dutch-book tolerance, overridable via `BETLANG_TOLERANCE`.
pub const DEFAULT_TOLERANCE: f64 = 1e-10;

/// Elaboration result: the IR plus any advisory diagnostics.
#[derive(Debug)]
pub struct Elaborated {
    pub program: IrProgram,
    pub warnings: Vec<Diagnostic>,
}

pub fn elaborate(program: &Program, tolerance: f64) -> Result<Elaborated, Vec<Diagnostic>> {
    elaborate_with_globals(program, tolerance, &[])
}

/// Variant for embedders that carry definitions across runs (the REPL).
pub fn elaborate_with_globals(
    program: &Program,
    tolerance: f64,
    extra_globals: &[String],
) -> Result<Elaborated, Vec<Diagnostic>> {
    let mut cx = Elaborator::new(tolerance);
    cx.globals.extend(extra_globals.iter().cloned());
    let mut forms = Vec::with_capacity(program.forms.len());
    for form in &program.forms {
        let ir = cx.expr(form);
        // A top-level define is visible to every later form.
        if let IrKind::Define { name, .. } = &ir.kind {
            cx.globals.push(name.clone());
        }
        forms.push(ir);
    }
    if cx.errors.is_empty() {
        Ok(Elaborated {
            program: IrProgram { forms },
            warnings: cx.warnings,
        })
    } else {
        let mut all = cx.errors;
        all.extend(cx.warnings);
        Err(all)
    }
}

/// Hyphenated identifiers normalize to a single canonical spelling.
pub fn canonical_name(name: &str) -> String {
    name.replace('-', "_")
}

struct Elaborator {
    tolerance: f64,
    globals: Vec<String>,
    scopes: Vec<Vec<String>>,
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
}

impl Elaborator {
    fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            globals: stdlib::prelude_names()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            scopes: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        self.scopes
            .iter()
            .rev()
            .any(|frame| frame.iter().any(|n| n == name))
            || self.globals.iter().any(|n| n == name)
    }

    fn with_frame<T>(&mut self, names: Vec<String>, f: impl FnOnce(&mut Self) -> T) -> T {
        self.scopes.push(names);
        let out = f(self);
        self.scopes.pop();
        out
    }

    fn error(&mut self, kind: DiagnosticKind, message: String, span: SourceSpan) {
        self.errors.push(Diagnostic::new(kind, message).with_span(span));
    }

    fn expr(&mut self, expr: &Expr) -> IrExpr {
        let span = expr.span;
        let kind = match &expr.kind {
            ExprKind::Literal(lit) => IrKind::Literal(lit.clone()),
            ExprKind::Var(name) => {
                let name = canonical_name(name);
                if !self.is_bound(&name) {
                    self.error(
                        DiagnosticKind::NameUnbound,
                        format!("unbound name `{name}`"),
                        span,
                    );
                }
                IrKind::Var(name)
            }
            ExprKind::List(items) => IrKind::List(items.iter().map(|e| self.expr(e)).collect()),
            ExprKind::Apply { callee, args } => return self.apply(callee, args, span),
            ExprKind::Define { name, value } => IrKind::Define {
                name: canonical_name(name),
                value: Box::new(self.expr(value)),
            },
            ExprKind::Let { bindings, body } => return self.let_chain(bindings, body, span),
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => IrKind::If {
                cond: Box::new(self.expr(cond)),
                then_branch: Box::new(self.expr(then_branch)),
                else_branch: Box::new(self.expr(else_branch)),
            },
            ExprKind::Match { scrutinee, arms } => return self.match_expr(scrutinee, arms, span),
            ExprKind::Lambda { params, body } => {
                let params: Vec<String> = params.iter().map(|p| canonical_name(p)).collect();
                let body = self.with_frame(params.clone(), |cx| cx.expr(body));
                IrKind::Lambda {
                    params,
                    body: Box::new(body),
                }
            }
            ExprKind::Bet(args) => {
                if args.len() != 3 {
                    self.error(
                        DiagnosticKind::ArityMismatch,
                        format!("`bet` takes exactly 3 alternatives, found {}", args.len()),
                        span,
                    );
                }
                IrKind::Bet {
                    arms: args.iter().map(|e| self.expr(e)).collect(),
                }
            }
            ExprKind::BetWeighted(pairs) => return self.weighted(pairs, span),
            ExprKind::BetConditional(args) => {
                if args.len() != 4 {
                    self.error(
                        DiagnosticKind::ArityMismatch,
                        format!(
                            "`bet-conditional` takes a predicate and 3 alternatives, found {} arguments",
                            args.len()
                        ),
                        span,
                    );
                    return IrExpr {
                        kind: IrKind::List(args.iter().map(|e| self.expr(e)).collect()),
                        span,
                    };
                }
                let mut elaborated: Vec<IrExpr> = args.iter().map(|e| self.expr(e)).collect();
                let on_unknown = elaborated.pop().unwrap();
                let on_false = elaborated.pop().unwrap();
                let on_true = elaborated.pop().unwrap();
                let pred = elaborated.pop().unwrap();
                IrKind::BetConditional {
                    pred: Box::new(pred),
                    on_true: Box::new(on_true),
                    on_false: Box::new(on_false),
                    on_unknown: Box::new(on_unknown),
                }
            }
            ExprKind::BetLazy(args) => {
                if args.len() != 3 {
                    self.error(
                        DiagnosticKind::ArityMismatch,
                        format!("`bet-lazy` takes exactly 3 thunks, found {}", args.len()),
                        span,
                    );
                }
                IrKind::BetLazy {
                    thunks: args.iter().map(|e| self.expr(e)).collect(),
                }
            }
            ExprKind::WithSeed { seed, body } => IrKind::WithSeed {
                seed: Box::new(self.expr(seed)),
                body: Box::new(self.expr(body)),
            },
            ExprKind::Sample(inner) => IrKind::Sample(Box::new(self.expr(inner))),
            ExprKind::Parallel { count, body } => IrKind::Parallel {
                count: Box::new(self.expr(count)),
                body: Box::new(self.expr(body)),
            },
            ExprKind::Do { stmts, result } => return self.do_block(stmts, result, span),
            ExprKind::Unary { op, expr: inner } => IrKind::Unary {
                op: *op,
                expr: Box::new(self.expr(inner)),
            },
            ExprKind::Binary { op, left, right } => IrKind::Binary {
                op: *op,
                left: Box::new(self.expr(left)),
                right: Box::new(self.expr(right)),
            },
        };
        IrExpr { kind, span }
    }

    /// `with-seed` written as a juxtaposed application desugars to the
    /// scoped node so its body stays unevaluated until the seed is installed.
    fn apply(&mut self, callee: &Expr, args: &[Expr], span: SourceSpan) -> IrExpr {
        if let ExprKind::Var(name) = &callee.kind {
            if canonical_name(name) == "with_seed" {
                if args.len() != 2 {
                    self.error(
                        DiagnosticKind::ArityMismatch,
                        format!("`with-seed` takes a seed and a body, found {}", args.len()),
                        span,
                    );
                } else {
                    return IrExpr {
                        kind: IrKind::WithSeed {
                            seed: Box::new(self.expr(&args[0])),
                            body: Box::new(self.expr(&args[1])),
                        },
                        span,
                    };
                }
            }
        }
        IrExpr {
            kind: IrKind::Apply {
                callee: Box::new(self.expr(callee)),
                args: args.iter().map(|e| self.expr(e)).collect(),
            },
            span,
        }
    }

    /// Multi-binding lets nest left to right: each binding sees the previous.
    fn let_chain(
        &mut self,
        bindings: &[crate::ast::Binding],
        body: &Expr,
        span: SourceSpan,
    ) -> IrExpr {
        match bindings.split_first() {
            None => self.expr(body),
            Some((first, rest)) => {
                let name = canonical_name(&first.name);
                let value = self.expr(&first.value);
                let body = self.with_frame(vec![name.clone()], |cx| {
                    cx.let_chain(rest, body, span)
                });
                IrExpr {
                    kind: IrKind::Let {
                        name,
                        value: Box::new(value),
                        body: Box::new(body),
                    },
                    span,
                }
            }
        }
    }

    /// `do` blocks desugar into nested binds, i.e. single-binding lets in
    /// this strict interpreter; bare statements bind `_`.
    fn do_block(&mut self, stmts: &[DoStmt], result: &Expr, span: SourceSpan) -> IrExpr {
        match stmts.split_first() {
            None => self.expr(result),
            Some((first, rest)) => {
                let (name, value, stmt_span) = match first {
                    DoStmt::Bind { name, value, span } => {
                        (canonical_name(name), self.expr(value), *span)
                    }
                    DoStmt::Expr(e) => ("_".to_string(), self.expr(e), e.span),
                };
                let body =
                    self.with_frame(vec![name.clone()], |cx| cx.do_block(rest, result, span));
                IrExpr {
                    kind: IrKind::Let {
                        name,
                        value: Box::new(value),
                        body: Box::new(body),
                    },
                    span: stmt_span.merge(span),
                }
            }
        }
    }

    fn match_expr(&mut self, scrutinee: &Expr, arms: &[crate::ast::MatchArm], span: SourceSpan) -> IrExpr {
        let scrutinee = self.expr(scrutinee);
        let mut ir_arms = Vec::with_capacity(arms.len());
        for arm in arms {
            let pattern = canonical_pattern(&arm.pattern);
            let bound = pattern_names(&pattern);
            let body = self.with_frame(bound, |cx| cx.expr(&arm.body));
            ir_arms.push(IrArm {
                pattern,
                body,
                span: arm.span,
            });
        }
        self.check_exhaustiveness(&ir_arms, span);
        IrExpr {
            kind: IrKind::Match {
                scrutinee: Box::new(scrutinee),
                arms: ir_arms,
            },
            span,
        }
    }

    fn check_exhaustiveness(&mut self, arms: &[IrArm], span: SourceSpan) {
        let irrefutable = arms
            .iter()
            .any(|arm| matches!(arm.pattern, Pattern::Wildcard | Pattern::Var(_)));
        if irrefutable {
            return;
        }
        let mut saw_true = false;
        let mut saw_false = false;
        for arm in arms {
            match arm.pattern {
                Pattern::Literal(Literal::Bool(true)) => saw_true = true,
                Pattern::Literal(Literal::Bool(false)) => saw_false = true,
                _ => {}
            }
        }
        // Both booleans count as covering the known tag set.
        if saw_true && saw_false {
            return;
        }
        self.warnings.push(
            Diagnostic::new(
                DiagnosticKind::PatternNonExhaustive,
                "match has no catch-all arm and may not cover every value",
            )
            .with_span(span)
            .with_hint("add a `_ -> ...` arm"),
        );
    }

    fn weighted(&mut self, pairs: &[(Expr, Expr)], span: SourceSpan) -> IrExpr {
        if pairs.is_empty() {
            self.error(
                DiagnosticKind::ArityMismatch,
                "`bet-weighted` needs at least one weighted alternative".to_string(),
                span,
            );
        }
        let arms: Vec<(IrExpr, IrExpr)> = pairs
            .iter()
            .map(|(value, weight)| (self.expr(value), self.expr(weight)))
            .collect();

        // Compile-time Dutch book: only when every weight is a literal.
        let literal_weights: Option<Vec<f64>> = arms
            .iter()
            .map(|(_, weight)| literal_number(&weight.kind))
            .collect();
        let probs = match literal_weights {
            Some(weights) if !weights.is_empty() => {
                let mut failed = false;
                for ((_, weight_expr), w) in arms.iter().zip(&weights) {
                    if *w < 0.0 {
                        self.error(
                            DiagnosticKind::ProbabilityNegativeWeight,
                            format!("negative weight {w}"),
                            weight_expr.span,
                        );
                        failed = true;
                    }
                }
                let sum: f64 = weights.iter().sum();
                if !failed && sum == 0.0 {
                    self.error(
                        DiagnosticKind::ProbabilityZeroTotal,
                        "weights sum to zero".to_string(),
                        span,
                    );
                    failed = true;
                }
                if !failed && (sum - 1.0).abs() > self.tolerance {
                    self.error(
                        DiagnosticKind::DutchBookViolation { sum },
                        format!("weights sum to {sum}, expected 1"),
                        span,
                    );
                    failed = true;
                }
                if failed {
                    None
                } else {
                    Some(weights.iter().map(|w| w / sum).collect())
                }
            }
            _ => None,
        };

        IrExpr {
            kind: IrKind::BetWeighted { arms, probs },
            span,
        }
    }
}

fn literal_number(kind: &IrKind) -> Option<f64> {
    match kind {
        IrKind::Literal(Literal::Int(n)) => Some(*n as f64),
        IrKind::Literal(Literal::Float(x)) => Some(*x),
        IrKind::Literal(Literal::Rational(p, q)) => Some(*p as f64 / *q as f64),
        _ => None,
    }
}

fn canonical_pattern(pattern: &Pattern) -> Pattern {
    match pattern {
        Pattern::Wildcard => Pattern::Wildcard,
        Pattern::Literal(lit) => Pattern::Literal(lit.clone()),
        Pattern::Var(name) => Pattern::Var(canonical_name(name)),
        Pattern::Tag(name) => Pattern::Tag(name.clone()),
        Pattern::List(items) => Pattern::List(items.iter().map(canonical_pattern).collect()),
    }
}

fn pattern_names(pattern: &Pattern) -> Vec<String> {
    let mut names = Vec::new();
    collect_pattern_names(pattern, &mut names);
    names
}

fn collect_pattern_names(pattern: &Pattern, names: &mut Vec<String>) {
    match pattern {
        Pattern::Var(name) => names.push(name.clone()),
        Pattern::List(items) => {
            for item in items {
                collect_pattern_names(item, names);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn elab(source: &str) -> Result<Elaborated, Vec<Diagnostic>> {
        elaborate(&parse(source).expect("parse"), DEFAULT_TOLERANCE)
    }

    #[test]
    fn resolves_prelude_names() {
        assert!(elab("kelly 0.55 2.0").is_ok());
    }

    #[test]
    fn reports_unbound_names() {
        let errors = elab("nonexistent-thing 1").unwrap_err();
        assert_eq!(errors[0].kind, DiagnosticKind::NameUnbound);
    }

    #[test]
    fn hyphenated_names_normalize() {
        let out = elab("risk-of-ruin 0.5 1.0 0.1 100 200").unwrap();
        match &out.program.forms[0].kind {
            IrKind::Apply { callee, .. } => match &callee.kind {
                IrKind::Var(name) => assert_eq!(name, "risk_of_ruin"),
                other => panic!("expected var, got {other:?}"),
            },
            other => panic!("expected apply, got {other:?}"),
        }
    }

    #[test]
    fn bet_arity_is_checked() {
        let errors = elab("(bet 1 2)").unwrap_err();
        assert_eq!(errors[0].kind, DiagnosticKind::ArityMismatch);
    }

    #[test]
    fn dutch_book_rejects_bad_literal_weights() {
        let errors = elab("(bet-weighted '((a 0.4) (b 0.4) (c 0.3)))").unwrap_err();
        match &errors[0].kind {
            DiagnosticKind::DutchBookViolation { sum } => {
                assert!((sum - 1.1).abs() < 1e-9, "sum was {sum}");
            }
            other => panic!("expected DutchBook.Violation, got {other:?}"),
        }
    }

    #[test]
    fn dutch_book_accepts_exact_weights() {
        let out = elab("(bet-weighted '((a 0.5) (b 0.25) (c 0.25)))").unwrap();
        match &out.program.forms[0].kind {
            IrKind::BetWeighted { probs, .. } => {
                let probs = probs.as_ref().expect("compile-time validated");
                assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            }
            other => panic!("expected weighted bet, got {other:?}"),
        }
    }

    #[test]
    fn negative_weight_is_its_own_error() {
        let errors = elab("(bet-weighted '((a -0.5) (b 1.5)))").unwrap_err();
        assert_eq!(errors[0].kind, DiagnosticKind::ProbabilityNegativeWeight);
    }

    #[test]
    fn dynamic_weights_skip_the_compile_time_check() {
        let out = elab("let w = 0.4 in (bet-weighted (1 w) (2 w)) end").unwrap();
        match &out.program.forms[0].kind {
            IrKind::Let { body, .. } => match &body.kind {
                IrKind::BetWeighted { probs, .. } => assert!(probs.is_none()),
                other => panic!("expected weighted bet, got {other:?}"),
            },
            other => panic!("expected let, got {other:?}"),
        }
    }

    #[test]
    fn non_exhaustive_match_warns() {
        let out = elab("match bet 1 2 3 end with 1 -> 'one | 2 -> 'two end").unwrap();
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].kind, DiagnosticKind::PatternNonExhaustive);
    }

    #[test]
    fn wildcard_match_does_not_warn() {
        let out = elab("match bet 1 2 3 end with 1 -> 'one | _ -> 'other end").unwrap();
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn do_block_desugars_to_nested_lets() {
        let out = elab("do x <- 1; y <- 2; return x + y end").unwrap();
        match &out.program.forms[0].kind {
            IrKind::Let { name, body, .. } => {
                assert_eq!(name, "x");
                assert!(matches!(body.kind, IrKind::Let { .. }));
            }
            other => panic!("expected let, got {other:?}"),
        }
    }

    #[test]
    fn define_binds_later_forms() {
        assert!(elab("define twice = lambda x -> x * 2 end\ntwice 21").is_ok());
    }

    #[test]
    fn with_seed_application_becomes_scoped_node() {
        let out = elab("with-seed 42 (bet 1 2 3)").unwrap();
        assert!(matches!(
            out.program.forms[0].kind,
            IrKind::WithSeed { .. }
        ));
    }
}
