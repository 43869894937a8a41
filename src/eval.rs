//! Tree-walking evaluator over the elaborated IR.
//!
//! Evaluation is strict and left-to-right; the PRNG is threaded through the
//! runtime context and advances only at the probabilistic primitives. The
//! cool-off record is mutated at exactly one call site (the validated-bet
//! native); everything else is pure in the environment and the PRNG state.

use std::rc::Rc;

use crate::{
    ast::{BinaryOp, Literal, Pattern, UnaryOp},
    diagnostics::{Diagnostic, DiagnosticKind, Severity},
    environment::{Environment, EnvironmentRef},
    ir::{IrExpr, IrKind, IrProgram},
    prng::Prng,
    safety::{Clock, CoolOff, SafetyConfig, SystemClock},
    span::SourceSpan,
    stdlib,
    value::{Closure, Number, Value, ValueKind},
};

/// Evaluation settings assembled by the driver from flags and environment
/// variables.
#[derive(Clone)]
pub struct EvalConfig {
    pub seed: u64,
    pub step_limit: Option<u64>,
    pub safety_enabled: bool,
    pub tolerance: f64,
    pub safety: SafetyConfig,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            step_limit: None,
            safety_enabled: true,
            tolerance: crate::elaborate::DEFAULT_TOLERANCE,
            safety: SafetyConfig::default(),
        }
    }
}

/// Mutable runtime state reachable from native functions: the PRNG, the
/// cool-off gate, the clock, and the safety knobs.
pub struct RuntimeCtx {
    pub prng: Prng,
    pub cooloff: CoolOff,
    pub clock: Box<dyn Clock>,
    pub config: EvalConfig,
    steps: u64,
}

impl RuntimeCtx {
    pub fn now(&self) -> f64 {
        self.clock.now()
    }
}

pub struct Interpreter {
    globals: EnvironmentRef,
    pub ctx: RuntimeCtx,
}

impl Interpreter {
    pub fn new(config: EvalConfig) -> Self {
        Self::with_clock(config, Box::new(SystemClock))
    }

    pub fn with_clock(config: EvalConfig, clock: Box<dyn Clock>) -> Self {
        let globals = Environment::new();
        stdlib::install(&globals);
        let mut cooloff = CoolOff::new(0.0);
        cooloff.enabled = config.safety_enabled;
        Self {
            globals,
            ctx: RuntimeCtx {
                prng: Prng::seed(config.seed),
                cooloff,
                clock,
                config,
                steps: 0,
            },
        }
    }

    pub fn reseed(&mut self, seed: u64) {
        self.ctx.prng = Prng::seed(seed);
    }

    /// Swap in caller-owned cool-off state; pairs with [`take_cooloff`].
    pub fn install_cooloff(&mut self, state: CoolOff) {
        self.ctx.cooloff = state;
    }

    pub fn take_cooloff(&mut self) -> CoolOff {
        std::mem::replace(&mut self.ctx.cooloff, CoolOff::disabled())
    }

    /// Evaluate every form; the value of the last one is the result.
    pub fn eval_program(&mut self, program: &IrProgram) -> Result<Value, Diagnostic> {
        let mut last = Value::unit();
        for form in &program.forms {
            let env = Rc::clone(&self.globals);
            last = self.eval(form, &env)?;
        }
        Ok(last)
    }

    pub fn eval_in_globals(&mut self, expr: &IrExpr) -> Result<Value, Diagnostic> {
        let env = Rc::clone(&self.globals);
        self.eval(expr, &env)
    }

    fn step(&mut self, span: SourceSpan) -> Result<(), Diagnostic> {
        self.ctx.steps += 1;
        if let Some(limit) = self.ctx.config.step_limit {
            if self.ctx.steps > limit {
                return Err(Diagnostic::new(
                    DiagnosticKind::EvalAborted {
                        reason: format!("step budget of {limit} exhausted"),
                    },
                    "evaluation aborted",
                )
                .with_span(span));
            }
        }
        Ok(())
    }

    fn eval(&mut self, expr: &IrExpr, env: &EnvironmentRef) -> Result<Value, Diagnostic> {
        self.step(expr.span)?;
        match &expr.kind {
            IrKind::Literal(lit) => Ok(literal_value(lit)),
            IrKind::Var(name) => Environment::get(env, name, expr.span),
            IrKind::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, env)?);
                }
                Ok(Value::list(values))
            }
            IrKind::Apply { callee, args } => {
                let callee_value = self.eval(callee, env)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg, env)?);
                }
                self.call(callee_value, arg_values, expr.span)
            }
            IrKind::Define { name, value } => {
                let value = self.eval(value, env)?;
                env.borrow_mut().define(name.clone(), value.clone());
                Ok(value)
            }
            IrKind::Let { name, value, body } => {
                let value = self.eval(value, env)?;
                let child = Environment::with_parent(Rc::clone(env));
                child.borrow_mut().define(name.clone(), value);
                self.eval(body, &child)
            }
            IrKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval(cond, env)?.is_truthy() {
                    self.eval(then_branch, env)
                } else {
                    self.eval(else_branch, env)
                }
            }
            IrKind::Match { scrutinee, arms } => {
                let value = self.eval(scrutinee, env)?;
                for arm in arms {
                    let child = Environment::with_parent(Rc::clone(env));
                    if bind_pattern(&child, &arm.pattern, &value) {
                        return self.eval(&arm.body, &child);
                    }
                }
                let mut diag = Diagnostic::new(
                    DiagnosticKind::PatternNonExhaustive,
                    format!("no pattern matched value {value}"),
                )
                .with_span(expr.span);
                diag.severity = Severity::Error;
                Err(diag)
            }
            IrKind::Lambda { params, body } => Ok(Value::new(ValueKind::Closure(Closure {
                name: None,
                params: params.clone(),
                body: Rc::new((**body).clone()),
                env: Rc::clone(env),
            }))),
            IrKind::Bet { arms } => {
                let mut values = Vec::with_capacity(arms.len());
                for arm in arms {
                    values.push(self.eval(arm, env)?);
                }
                let idx = self.ctx.prng.next_below(3) as usize;
                Ok(values.swap_remove(idx))
            }
            IrKind::BetWeighted { arms, probs } => self.weighted_bet(arms, probs, env, expr.span),
            IrKind::BetConditional {
                pred,
                on_true,
                on_false,
                on_unknown,
            } => {
                if self.eval(pred, env)?.is_truthy() {
                    self.eval(on_true, env)
                } else {
                    // The false branch re-enters the uniform ternary draw
                    // over {t, f, u}: the "true" value keeps a second chance.
                    let mut values = vec![
                        self.eval(on_true, env)?,
                        self.eval(on_false, env)?,
                        self.eval(on_unknown, env)?,
                    ];
                    let idx = self.ctx.prng.next_below(3) as usize;
                    Ok(values.swap_remove(idx))
                }
            }
            IrKind::BetLazy { thunks } => {
                let mut values = Vec::with_capacity(thunks.len());
                for thunk in thunks {
                    values.push(self.eval(thunk, env)?);
                }
                let idx = self.ctx.prng.next_below(3) as usize;
                let selected = values.swap_remove(idx);
                // Only the drawn thunk is forced.
                self.call(selected, Vec::new(), expr.span)
            }
            IrKind::WithSeed { seed, body } => {
                let seed_value = self.eval(seed, env)?;
                let seed = expect_seed(&seed_value, seed.span)?;
                let saved = self.ctx.prng;
                self.ctx.prng = Prng::seed(seed);
                let result = self.eval(body, env);
                // The outer stream resumes untouched, error or not.
                self.ctx.prng = saved;
                result
            }
            IrKind::Sample(inner) => {
                let value = self.eval(inner, env)?;
                match &*value.0 {
                    ValueKind::Uncertain(u) => u
                        .sample(&mut self.ctx.prng)
                        .map(Value::float)
                        .map_err(|e| numeric_diag(e, inner.span)),
                    _ => Err(Diagnostic::new(
                        DiagnosticKind::TypeMismatch,
                        format!("`sample` needs an uncertainty value, found {}", value.type_name()),
                    )
                    .with_span(inner.span)),
                }
            }
            IrKind::Parallel { count, body } => {
                let count_value = self.eval(count, env)?;
                let n = match &*count_value.0 {
                    ValueKind::Int(n) if *n >= 0 => *n as usize,
                    _ => {
                        return Err(Diagnostic::new(
                            DiagnosticKind::TypeMismatch,
                            format!(
                                "`parallel` count must be a non-negative integer, found {count_value}"
                            ),
                        )
                        .with_span(count.span));
                    }
                };
                // Logical parallelism: n sequential evaluations threading
                // the PRNG, so results are reproducible under the seed.
                let mut results = Vec::with_capacity(n);
                for _ in 0..n {
                    results.push(self.eval(body, env)?);
                }
                Ok(Value::list(results))
            }
            IrKind::Unary { op, expr: inner } => {
                let value = self.eval(inner, env)?;
                self.unary(*op, value, inner.span)
            }
            IrKind::Binary { op, left, right } => {
                let left_value = self.eval(left, env)?;
                let right_value = self.eval(right, env)?;
                self.binary(*op, left_value, right_value, expr.span)
            }
        }
    }

    fn weighted_bet(
        &mut self,
        arms: &[(IrExpr, IrExpr)],
        probs: &Option<Vec<f64>>,
        env: &EnvironmentRef,
        span: SourceSpan,
    ) -> Result<Value, Diagnostic> {
        let mut values = Vec::with_capacity(arms.len());
        let mut weights = Vec::with_capacity(arms.len());
        for (value_expr, weight_expr) in arms {
            values.push(self.eval(value_expr, env)?);
            let weight = self.eval(weight_expr, env)?;
            weights.push(weight.as_number(weight_expr.span)?.to_f64());
        }
        let weights = match probs {
            // Compile-time validated and pre-normalized.
            Some(probs) => probs.clone(),
            None => {
                for ((_, weight_expr), w) in arms.iter().zip(&weights) {
                    if *w < 0.0 {
                        return Err(Diagnostic::new(
                            DiagnosticKind::ProbabilityNegativeWeight,
                            format!("negative weight {w}"),
                        )
                        .with_span(weight_expr.span));
                    }
                }
                if weights.iter().sum::<f64>() <= 0.0 {
                    return Err(Diagnostic::new(
                        DiagnosticKind::ProbabilityZeroTotal,
                        "weights sum to zero",
                    )
                    .with_span(span));
                }
                weights
            }
        };
        let idx = self.ctx.prng.pick_weighted(&weights);
        Ok(values.swap_remove(idx))
    }

    pub(crate) fn call(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        span: SourceSpan,
    ) -> Result<Value, Diagnostic> {
        match &*callee.0 {
            ValueKind::Native(native) => (native.callback)(&mut self.ctx, &args, span),
            ValueKind::Closure(closure) => {
                if args.len() != closure.params.len() {
                    return Err(Diagnostic::new(
                        DiagnosticKind::ArityMismatch,
                        format!(
                            "function expected {} arguments but received {}",
                            closure.params.len(),
                            args.len()
                        ),
                    )
                    .with_span(span));
                }
                let frame = Environment::with_parent(Rc::clone(&closure.env));
                for (param, arg) in closure.params.iter().zip(args) {
                    frame.borrow_mut().define(param.clone(), arg);
                }
                let body = Rc::clone(&closure.body);
                self.eval(&body, &frame)
            }
            _ => Err(Diagnostic::new(
                DiagnosticKind::TypeMismatch,
                format!("value of type {} is not callable", callee.type_name()),
            )
            .with_span(span)),
        }
    }

    fn unary(&mut self, op: UnaryOp, value: Value, span: SourceSpan) -> Result<Value, Diagnostic> {
        match op {
            UnaryOp::Negate => {
                let number = value.as_number(span)?;
                Number::Int(0)
                    .sub(number)
                    .map(Number::into_value)
                    .map_err(|message| {
                        Diagnostic::new(DiagnosticKind::NumericDomainError, message).with_span(span)
                    })
            }
            UnaryOp::Not => Ok(kleene_not(&value)),
        }
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        left: Value,
        right: Value,
        span: SourceSpan,
    ) -> Result<Value, Diagnostic> {
        // `+` and `*` on two uncertainty values dispatch into the kernel.
        if let (ValueKind::Uncertain(a), ValueKind::Uncertain(b)) = (&*left.0, &*right.0) {
            match op {
                BinaryOp::Add => {
                    return a
                        .add(b)
                        .map(Value::uncertain)
                        .map_err(|e| numeric_diag(e, span));
                }
                BinaryOp::Mul => {
                    return a
                        .mul(b)
                        .map(Value::uncertain)
                        .map_err(|e| numeric_diag(e, span));
                }
                _ => {}
            }
        }
        match op {
            BinaryOp::Add => self.arith(left, right, span, Number::add),
            BinaryOp::Sub => self.arith(left, right, span, Number::sub),
            BinaryOp::Mul => self.arith(left, right, span, Number::mul),
            BinaryOp::Div => self.arith(left, right, span, Number::div),
            BinaryOp::Equal => Ok(Value::bool(left.equals(&right))),
            BinaryOp::Less => self.compare(left, right, span, |a, b| a < b),
            BinaryOp::LessEqual => self.compare(left, right, span, |a, b| a <= b),
            BinaryOp::Greater => self.compare(left, right, span, |a, b| a > b),
            BinaryOp::GreaterEqual => self.compare(left, right, span, |a, b| a >= b),
            BinaryOp::And => Ok(kleene_and(&left, &right)),
            BinaryOp::Or => Ok(kleene_or(&left, &right)),
        }
    }

    fn arith(
        &self,
        left: Value,
        right: Value,
        span: SourceSpan,
        op: fn(Number, Number) -> Result<Number, String>,
    ) -> Result<Value, Diagnostic> {
        let a = left.as_number(span)?;
        let b = right.as_number(span)?;
        op(a, b).map(Number::into_value).map_err(|message| {
            Diagnostic::new(DiagnosticKind::NumericDomainError, message).with_span(span)
        })
    }

    fn compare(
        &self,
        left: Value,
        right: Value,
        span: SourceSpan,
        cmp: fn(f64, f64) -> bool,
    ) -> Result<Value, Diagnostic> {
        let a = left.as_number(span)?.to_f64();
        let b = right.as_number(span)?.to_f64();
        Ok(Value::bool(cmp(a, b)))
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Int(n) => Value::int(*n),
        Literal::Rational(p, q) => match crate::value::Rational::new(*p, *q) {
            Some(r) if r.is_integer() => Value::int(r.num()),
            Some(r) => Value::new(ValueKind::Rational(r)),
            None => Value::int(0),
        },
        Literal::Float(x) => Value::float(*x),
        Literal::Bool(b) => Value::bool(*b),
        Literal::Unknown => Value::new(ValueKind::Unknown),
        Literal::String(s) => Value::string(s.clone()),
        Literal::Symbol(s) => Value::symbol(s.clone()),
    }
}

fn expect_seed(value: &Value, span: SourceSpan) -> Result<u64, Diagnostic> {
    match &*value.0 {
        ValueKind::Int(n) => Ok(*n as u64),
        _ => Err(Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            format!("`with-seed` needs an integer seed, found {}", value.type_name()),
        )
        .with_span(span)),
    }
}

pub(crate) fn numeric_diag(error: crate::numeric::NumericError, span: SourceSpan) -> Diagnostic {
    let kind = match &error {
        crate::numeric::NumericError::Domain(_) => DiagnosticKind::NumericDomainError,
        crate::numeric::NumericError::TotalConflict => DiagnosticKind::NumericTotalConflict,
    };
    Diagnostic::new(kind, error.to_string()).with_span(span)
}

fn bind_pattern(env: &EnvironmentRef, pattern: &Pattern, value: &Value) -> bool {
    match pattern {
        Pattern::Wildcard => true,
        Pattern::Var(name) => {
            env.borrow_mut().define(name.clone(), value.clone());
            true
        }
        Pattern::Literal(lit) => literal_value(lit).equals(value),
        Pattern::Tag(name) => matches!(&*value.0, ValueKind::Symbol(s) if s == name),
        Pattern::List(patterns) => match &*value.0 {
            ValueKind::List(items) if items.len() == patterns.len() => patterns
                .iter()
                .zip(items)
                .all(|(p, v)| bind_pattern(env, p, v)),
            _ => false,
        },
    }
}

// Kleene three-valued connectives; plain booleans stay classical.
fn kleene_not(value: &Value) -> Value {
    match &*value.0 {
        ValueKind::Unknown => Value::new(ValueKind::Unknown),
        _ => Value::bool(!value.is_truthy()),
    }
}

fn kleene_and(left: &Value, right: &Value) -> Value {
    let l_unknown = matches!(&*left.0, ValueKind::Unknown);
    let r_unknown = matches!(&*right.0, ValueKind::Unknown);
    if (!l_unknown && !left.is_truthy()) || (!r_unknown && !right.is_truthy()) {
        return Value::bool(false);
    }
    if l_unknown || r_unknown {
        return Value::new(ValueKind::Unknown);
    }
    Value::bool(left.is_truthy() && right.is_truthy())
}

fn kleene_or(left: &Value, right: &Value) -> Value {
    let l_unknown = matches!(&*left.0, ValueKind::Unknown);
    let r_unknown = matches!(&*right.0, ValueKind::Unknown);
    if (!l_unknown && left.is_truthy()) || (!r_unknown && right.is_truthy()) {
        return Value::bool(true);
    }
    if l_unknown || r_unknown {
        return Value::new(ValueKind::Unknown);
    }
    Value::bool(left.is_truthy() || right.is_truthy())
}
