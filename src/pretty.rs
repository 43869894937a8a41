//! Pretty-printer for `betlang fmt`. Top-level and statement positions are
//! rendered in the keyword form; operand positions (where the grammar only
//! admits a single token or a parenthesized form) fall back to the
//! S-expression rendering so the output reparses to the same tree modulo
//! spans and `do`/multi-binding sugar.

use crate::ast::{
    BinaryOp, DoStmt, Expr, ExprKind, Literal, MatchArm, Pattern, Program, UnaryOp,
};

pub fn format_program(program: &Program) -> String {
    let mut out = String::new();
    for (idx, form) in program.forms.iter().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        out.push_str(&expr(form));
        out.push('\n');
    }
    out
}

pub fn format_expr(e: &Expr) -> String {
    expr(e)
}

/// Keyword-form rendering, legal in expression position.
fn expr(e: &Expr) -> String {
    match &e.kind {
        ExprKind::Literal(l) => literal(l),
        ExprKind::Var(name) => name.clone(),
        ExprKind::List(items) => {
            let inner: Vec<String> = items.iter().map(expr).collect();
            format!("[{}]", inner.join(", "))
        }
        ExprKind::Apply { callee, args } => {
            let mut parts = vec![atom(callee)];
            parts.extend(args.iter().map(atom));
            parts.join(" ")
        }
        ExprKind::Define { name, value } => format!("define {name} = {}", expr(value)),
        ExprKind::Let { bindings, body } => {
            let mut out = String::new();
            for binding in bindings {
                out.push_str(&format!(
                    "let {} = {} in ",
                    binding.name,
                    expr(&binding.value)
                ));
            }
            out.push_str(&expr(body));
            for _ in bindings {
                out.push_str(" end");
            }
            out
        }
        ExprKind::If {
            cond,
            then_branch,
            else_branch,
        } => format!(
            "if {} then {} else {} end",
            expr(cond),
            expr(then_branch),
            expr(else_branch)
        ),
        ExprKind::Match { scrutinee, arms } => {
            let rendered: Vec<String> = arms
                .iter()
                .map(|a| format!("{} -> {}", pattern(&a.pattern), expr(&a.body)))
                .collect();
            format!("match {} with {} end", expr(scrutinee), rendered.join(" | "))
        }
        ExprKind::Lambda { params, body } => {
            if params.is_empty() {
                format!("lambda -> {} end", expr(body))
            } else {
                format!("lambda {} -> {} end", params.join(" "), expr(body))
            }
        }
        ExprKind::Bet(args) => {
            let inner: Vec<String> = args.iter().map(expr).collect();
            format!("bet {} end", inner.join(", "))
        }
        ExprKind::BetWeighted(pairs) => {
            let inner: Vec<String> = pairs
                .iter()
                .map(|(value, weight)| format!("{} @ {}", atom(value), expr(weight)))
                .collect();
            format!("bet {} end", inner.join(", "))
        }
        ExprKind::Sample(inner) => format!("sample {}", atom(inner)),
        ExprKind::Parallel { count, body } => {
            format!("parallel {} do {} end", atom(count), expr(body))
        }
        ExprKind::Do { stmts, result } => {
            let mut parts: Vec<String> = stmts
                .iter()
                .map(|stmt| match stmt {
                    DoStmt::Bind { name, value, .. } => format!("{name} <- {}", expr(value)),
                    DoStmt::Expr(e) => expr(e),
                })
                .collect();
            parts.push(format!("return {}", expr(result)));
            format!("do {} end", parts.join("; "))
        }
        ExprKind::Unary { op, expr: inner } => match op {
            UnaryOp::Negate => format!("(- {})", atom(inner)),
            UnaryOp::Not => format!("not {}", atom(inner)),
        },
        ExprKind::Binary { op, left, right } => format!(
            "{} {} {}",
            child(left, *op, false),
            binary_op(*op),
            child(right, *op, true)
        ),
        ExprKind::BetConditional(_)
        | ExprKind::BetLazy(_)
        | ExprKind::WithSeed { .. } => sexpr(e),
    }
}

/// Operand position: a single token or a parenthesized S-expression form.
/// Negative literals wrap so a leading minus cannot read as subtraction.
fn atom(e: &Expr) -> String {
    match &e.kind {
        ExprKind::Literal(l) if is_negative(l) => format!("({})", literal(l)),
        ExprKind::Literal(_) | ExprKind::Var(_) | ExprKind::List(_) => expr(e),
        _ => sexpr(e),
    }
}

fn is_negative(l: &Literal) -> bool {
    match l {
        Literal::Int(n) => *n < 0,
        Literal::Rational(p, _) => *p < 0,
        Literal::Float(x) => x.is_sign_negative(),
        _ => false,
    }
}

/// S-expression rendering, legal anywhere an operand is.
fn sexpr(e: &Expr) -> String {
    match &e.kind {
        ExprKind::Literal(_) | ExprKind::Var(_) | ExprKind::List(_) => expr(e),
        ExprKind::Apply { callee, args } => {
            let mut parts = vec![atom(callee)];
            parts.extend(args.iter().map(atom));
            format!("({})", parts.join(" "))
        }
        ExprKind::Define { name, value } => format!("(define {name} {})", atom(value)),
        ExprKind::Let { bindings, body } => {
            let rendered: Vec<String> = bindings
                .iter()
                .map(|b| format!("[{} {}]", b.name, atom(&b.value)))
                .collect();
            format!("(let ({}) {})", rendered.join(" "), atom(body))
        }
        ExprKind::If {
            cond,
            then_branch,
            else_branch,
        } => format!(
            "(if {} {} {})",
            atom(cond),
            atom(then_branch),
            atom(else_branch)
        ),
        ExprKind::Match { scrutinee, arms } => {
            let rendered: Vec<String> = arms.iter().map(sexpr_arm).collect();
            format!("(match {} {})", atom(scrutinee), rendered.join(" "))
        }
        ExprKind::Lambda { params, body } => {
            format!("(lambda ({}) {})", params.join(" "), atom(body))
        }
        ExprKind::Bet(args) => {
            let inner: Vec<String> = args.iter().map(atom).collect();
            format!("(bet {})", inner.join(" "))
        }
        ExprKind::BetWeighted(pairs) => {
            let inner: Vec<String> = pairs
                .iter()
                .map(|(value, weight)| format!("({} {})", atom(value), atom(weight)))
                .collect();
            format!("(bet-weighted {})", inner.join(" "))
        }
        ExprKind::BetConditional(args) => {
            let inner: Vec<String> = args.iter().map(atom).collect();
            format!("(bet-conditional {})", inner.join(" "))
        }
        ExprKind::BetLazy(args) => {
            let inner: Vec<String> = args.iter().map(atom).collect();
            format!("(bet-lazy {})", inner.join(" "))
        }
        ExprKind::WithSeed { seed, body } => {
            format!("(with-seed {} {})", atom(seed), atom(body))
        }
        ExprKind::Sample(inner) => format!("(sample {})", atom(inner)),
        ExprKind::Parallel { count, body } => {
            format!("(parallel {} {})", atom(count), atom(body))
        }
        ExprKind::Do { stmts, result } => {
            let mut parts: Vec<String> = stmts
                .iter()
                .map(|stmt| match stmt {
                    DoStmt::Bind { name, value, .. } => {
                        format!("({name} <- {})", atom(value))
                    }
                    DoStmt::Expr(e) => atom(e),
                })
                .collect();
            parts.push(format!("(return {})", atom(result)));
            format!("(do {})", parts.join(" "))
        }
        ExprKind::Unary { op, expr: inner } => match op {
            UnaryOp::Negate => format!("(- {})", atom(inner)),
            UnaryOp::Not => format!("(not {})", atom(inner)),
        },
        ExprKind::Binary { op, left, right } => {
            format!("({} {} {})", binary_op(*op), atom(left), atom(right))
        }
    }
}

fn sexpr_arm(a: &MatchArm) -> String {
    format!("({} {})", pattern(&a.pattern), atom(&a.body))
}

fn child(e: &Expr, parent: BinaryOp, right: bool) -> String {
    match &e.kind {
        ExprKind::Binary { op, .. } => {
            let (parent_prec, child_prec) = (precedence(parent), precedence(*op));
            if child_prec < parent_prec || (child_prec == parent_prec && right) {
                format!("({})", expr(e))
            } else {
                expr(e)
            }
        }
        _ => expr(e),
    }
}

fn precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Or => 1,
        BinaryOp::And => 2,
        BinaryOp::Equal
        | BinaryOp::Less
        | BinaryOp::LessEqual
        | BinaryOp::Greater
        | BinaryOp::GreaterEqual => 3,
        BinaryOp::Add | BinaryOp::Sub => 4,
        BinaryOp::Mul | BinaryOp::Div => 5,
    }
}

fn binary_op(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Equal => "=",
        BinaryOp::Less => "<",
        BinaryOp::LessEqual => "<=",
        BinaryOp::Greater => ">",
        BinaryOp::GreaterEqual => ">=",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
    }
}

fn pattern(p: &Pattern) -> String {
    match p {
        Pattern::Wildcard => "_".to_string(),
        Pattern::Literal(l) => literal(l),
        Pattern::Var(name) => name.clone(),
        Pattern::Tag(name) => format!("'{name}"),
        Pattern::List(items) => {
            let inner: Vec<String> = items.iter().map(pattern).collect();
            format!("[{}]", inner.join(", "))
        }
    }
}

fn literal(l: &Literal) -> String {
    match l {
        Literal::Int(n) => n.to_string(),
        Literal::Rational(p, q) => format!("{p}/{q}"),
        Literal::Float(x) => {
            // Keep a decimal point so the output re-lexes as a float.
            let text = format!("{x}");
            if text.contains('.') || text.contains('e') || text.contains("inf") {
                text
            } else {
                format!("{text}.0")
            }
        }
        Literal::Bool(b) => b.to_string(),
        Literal::Unknown => "unknown".to_string(),
        Literal::String(s) => format!("\"{}\"", escape(s)),
        Literal::Symbol(s) => format!("'{s}"),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn roundtrip(source: &str) -> String {
        let program = parse(source).expect("source should parse");
        format_program(&program)
    }

    #[test]
    fn prints_bet_in_keyword_form() {
        assert_eq!(roundtrip("(bet 'a 'b 'c)"), "bet 'a, 'b, 'c end\n");
    }

    #[test]
    fn prints_weighted_bet() {
        assert_eq!(
            roundtrip("(bet-weighted (x 0.5) (y 0.5))"),
            "bet x @ 0.5, y @ 0.5 end\n"
        );
    }

    #[test]
    fn printing_is_stable() {
        let sources = [
            "(let ([x 1] [y 2]) (+ x y))",
            "if a < b then 'lo else 'hi end",
            "do n <- bet 1 2 3 end; return n + 1 end",
            "match v with 'heads -> 1 | _ -> 0 end",
            "define f = lambda x -> x * 2 end",
            "parallel 3 do sample (normal 0 1) end",
            "(with-seed 42 (bet 'a 'b 'c))",
            "(bet-lazy (lambda () 1) (lambda () 2) (lambda () 3))",
            "kelly 0.55 2.0",
            "1 + 2 * 3 < 10 and true",
        ];
        for source in sources {
            let once = roundtrip(source);
            let twice = roundtrip(&once);
            assert_eq!(once, twice, "printing `{source}` is not a fixed point");
        }
    }

    #[test]
    fn negative_literals_survive() {
        let once = roundtrip("(bet -1 -2 -3)");
        assert_eq!(roundtrip(&once), once);
    }
}
