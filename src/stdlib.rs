//! Native prelude: the bindings that expose the numeric and safety kernels
//! (plus a handful of list and math helpers) to BetLang programs.
//!
//! Names are stored canonically; source may spell any of them with hyphens
//! (`risk-of-ruin`), which the elaborator normalizes to `risk_of_ruin`.

use std::collections::BTreeSet;

use crate::{
    diagnostics::{Diagnostic, DiagnosticKind},
    environment::EnvironmentRef,
    eval::{numeric_diag, RuntimeCtx},
    numeric::{Surreal, Uncertain, SURREAL_DEPTH},
    safety::{self, RuinParams, SafetyViolation},
    span::SourceSpan,
    value::{NativeFunction, Value, ValueKind},
};

type NativeResult = Result<Value, Diagnostic>;
type Native = fn(&mut RuntimeCtx, &[Value], SourceSpan) -> NativeResult;

/// One row per native; `install` and the elaborator's scope table both read
/// from here.
const NATIVES: &[(&str, Native)] = &[
    // io / strings
    ("print", io_print),
    ("println", io_println),
    ("str", string_concat),
    // math
    ("abs", math_abs),
    ("floor", math_floor),
    ("ceil", math_ceil),
    ("round", math_round),
    ("sqrt", math_sqrt),
    ("pow", math_pow),
    ("min", math_min),
    ("max", math_max),
    // lists and statistics
    ("length", list_length),
    ("head", list_head),
    ("tail", list_tail),
    ("nth", list_nth),
    ("reverse", list_reverse),
    ("sort", list_sort),
    ("range", list_range),
    ("sum", stats_sum),
    ("mean", stats_mean),
    ("variance", stats_variance),
    ("std_dev", stats_std_dev),
    // ternary logic
    ("majority", ternary_majority),
    // safety kernel
    ("kelly", safety_kelly),
    ("optimal_stake", safety_optimal_stake),
    ("stake_safe?", safety_stake_safe),
    ("validate_probs", safety_validate_probs),
    ("normalize_weights", safety_normalize_weights),
    ("dutch_book_from_odds", safety_dutch_book_from_odds),
    ("risk_of_ruin", safety_risk_of_ruin),
    ("validated_bet", safety_validated_bet),
    ("self_exclude", safety_self_exclude),
    // uncertainty constructors
    ("normal", ctor_normal),
    ("beta", ctor_beta),
    ("affine", ctor_affine),
    ("fuzzy", ctor_fuzzy),
    ("surreal_fuzzy", ctor_surreal_fuzzy),
    ("bayesian", ctor_bayesian),
    ("risk", ctor_risk),
    ("padic", ctor_padic),
    ("lottery", ctor_lottery),
    ("hyperreal", ctor_hyperreal),
    ("surreal", ctor_surreal),
    ("padic_adv", ctor_padic_adv),
    ("imprecise", ctor_imprecise),
    ("dempster", ctor_dempster),
    // uncertainty operations
    ("uncertain_add", op_uncertain_add),
    ("uncertain_mul", op_uncertain_mul),
    ("membership", op_membership),
    ("contains?", op_contains),
    ("value_at_risk", op_value_at_risk),
    ("cvar", op_cvar),
    ("expected_value", op_expected_value),
    ("standard_part", op_standard_part),
    ("to_real", op_to_real),
    ("refine", op_refine),
    ("posterior", op_posterior),
    ("belief", op_belief),
    ("plausibility", op_plausibility),
    ("ds_combine", op_ds_combine),
    ("surreal_leq", op_surreal_leq),
    ("fuzzy_and", op_fuzzy_and),
    ("fuzzy_or", op_fuzzy_or),
    ("fuzzy_not", op_fuzzy_not),
    ("complement", op_complement),
    ("imprecise_and", op_imprecise_and),
    ("imprecise_or", op_imprecise_or),
    ("imprecise_update", op_imprecise_update),
];

pub fn install(env: &EnvironmentRef) {
    let mut scope = env.borrow_mut();
    for (name, callback) in NATIVES {
        scope.define(
            (*name).to_string(),
            Value::new(ValueKind::Native(NativeFunction {
                name: *name,
                callback: *callback,
            })),
        );
    }
}

pub fn prelude_names() -> Vec<&'static str> {
    NATIVES.iter().map(|(name, _)| *name).collect()
}

// --- argument helpers ------------------------------------------------------

fn ensure_exact(args: &[Value], expected: usize, name: &str, span: SourceSpan) -> Result<(), Diagnostic> {
    if args.len() != expected {
        return Err(Diagnostic::new(
            DiagnosticKind::ArityMismatch,
            format!("`{name}` expected {expected} arguments but received {}", args.len()),
        )
        .with_span(span));
    }
    Ok(())
}

fn ensure_range(
    args: &[Value],
    min: usize,
    max: usize,
    name: &str,
    span: SourceSpan,
) -> Result<(), Diagnostic> {
    if args.len() < min || args.len() > max {
        return Err(Diagnostic::new(
            DiagnosticKind::ArityMismatch,
            format!(
                "`{name}` expected between {min} and {max} arguments but received {}",
                args.len()
            ),
        )
        .with_span(span));
    }
    Ok(())
}

fn ensure_min(args: &[Value], min: usize, name: &str, span: SourceSpan) -> Result<(), Diagnostic> {
    if args.len() < min {
        return Err(Diagnostic::new(
            DiagnosticKind::ArityMismatch,
            format!("`{name}` expected at least {min} arguments but received {}", args.len()),
        )
        .with_span(span));
    }
    Ok(())
}

fn expect_f64(value: &Value, name: &str, span: SourceSpan) -> Result<f64, Diagnostic> {
    value.as_number(span).map(|n| n.to_f64()).map_err(|_| {
        Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            format!("`{name}` expected a number but found {}", value.type_name()),
        )
        .with_span(span)
    })
}

fn expect_int(value: &Value, name: &str, span: SourceSpan) -> Result<i64, Diagnostic> {
    match &*value.0 {
        ValueKind::Int(n) => Ok(*n),
        _ => Err(Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            format!("`{name}` expected an integer but found {}", value.type_name()),
        )
        .with_span(span)),
    }
}

fn expect_list<'a>(value: &'a Value, name: &str, span: SourceSpan) -> Result<&'a [Value], Diagnostic> {
    match &*value.0 {
        ValueKind::List(items) => Ok(items),
        _ => Err(Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            format!("`{name}` expected a list but found {}", value.type_name()),
        )
        .with_span(span)),
    }
}

fn expect_f64_list(value: &Value, name: &str, span: SourceSpan) -> Result<Vec<f64>, Diagnostic> {
    expect_list(value, name, span)?
        .iter()
        .map(|v| expect_f64(v, name, span))
        .collect()
}

fn expect_u32_list(value: &Value, name: &str, span: SourceSpan) -> Result<Vec<u32>, Diagnostic> {
    expect_list(value, name, span)?
        .iter()
        .map(|v| {
            let n = expect_int(v, name, span)?;
            u32::try_from(n).map_err(|_| {
                Diagnostic::new(
                    DiagnosticKind::NumericDomainError,
                    format!("`{name}` expected a non-negative digit, got {n}"),
                )
                .with_span(span)
            })
        })
        .collect()
}

fn expect_uncertain<'a>(
    value: &'a Value,
    name: &str,
    span: SourceSpan,
) -> Result<&'a Uncertain, Diagnostic> {
    match &*value.0 {
        ValueKind::Uncertain(u) => Ok(u),
        _ => Err(Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            format!("`{name}` expected an uncertainty value but found {}", value.type_name()),
        )
        .with_span(span)),
    }
}

fn expect_probability(value: &Value, name: &str, span: SourceSpan) -> Result<f64, Diagnostic> {
    let p = expect_f64(value, name, span)?;
    if !(0.0..=1.0).contains(&p) {
        return Err(Diagnostic::new(
            DiagnosticKind::ProbabilityOutOfRange,
            format!("`{name}` expected a probability in [0, 1], got {p}"),
        )
        .with_span(span));
    }
    Ok(p)
}

/// A hypothesis is a symbol or a list of symbols.
fn expect_symbol_set(value: &Value, name: &str, span: SourceSpan) -> Result<BTreeSet<String>, Diagnostic> {
    match &*value.0 {
        ValueKind::Symbol(s) => Ok(std::iter::once(s.clone()).collect()),
        ValueKind::List(items) => items
            .iter()
            .map(|item| match &*item.0 {
                ValueKind::Symbol(s) => Ok(s.clone()),
                _ => Err(Diagnostic::new(
                    DiagnosticKind::TypeMismatch,
                    format!("`{name}` expected symbols, found {}", item.type_name()),
                )
                .with_span(span)),
            })
            .collect(),
        _ => Err(Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            format!("`{name}` expected a symbol or list of symbols, found {}", value.type_name()),
        )
        .with_span(span)),
    }
}

fn expect_surreal(value: &Value, name: &str, span: SourceSpan) -> Result<Surreal, Diagnostic> {
    match &*value.0 {
        ValueKind::Uncertain(Uncertain::SurrealAdv(s)) => Ok(s.clone()),
        ValueKind::Int(n) => Ok(Surreal::from_int(*n)),
        _ => Err(Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            format!("`{name}` expected a surreal or integer, found {}", value.type_name()),
        )
        .with_span(span)),
    }
}

fn safety_diag(violation: SafetyViolation, span: SourceSpan) -> Diagnostic {
    match violation {
        SafetyViolation::NegativeWeight { weight } => Diagnostic::new(
            DiagnosticKind::ProbabilityNegativeWeight,
            format!("negative weight {weight}"),
        ),
        SafetyViolation::ZeroTotal => {
            Diagnostic::new(DiagnosticKind::ProbabilityZeroTotal, "weights sum to zero")
        }
        SafetyViolation::DutchBook { sum, margin } => Diagnostic::new(
            DiagnosticKind::DutchBookViolation { sum },
            format!("probabilities sum to {sum} (margin {margin}), admitting a Dutch book"),
        ),
        SafetyViolation::StakeUnsafe { fraction, limit } => Diagnostic::new(
            DiagnosticKind::RiskStakeUnsafe,
            format!("stake is {:.1}% of bankroll, above the {:.1}% risk cap", fraction * 100.0, limit * 100.0),
        ),
        SafetyViolation::KellyExceeded { fraction, limit } => Diagnostic::new(
            DiagnosticKind::RiskKellyExceeded,
            format!(
                "stake is {:.1}% of bankroll, above the fractional-Kelly cap of {:.1}%",
                fraction * 100.0,
                limit * 100.0
            ),
        ),
        SafetyViolation::CoolOff { remaining_seconds } => Diagnostic::new(
            DiagnosticKind::CoolOffActive { remaining_seconds },
            format!("cool-off in effect for another {remaining_seconds:.1} seconds"),
        )
        .with_hint(format!("wait {remaining_seconds:.0} more seconds before betting")),
    }
    .with_span(span)
}

// --- io / strings ----------------------------------------------------------

fn io_print(_: &mut RuntimeCtx, args: &[Value], _: SourceSpan) -> NativeResult {
    for (idx, arg) in args.iter().enumerate() {
        if idx > 0 {
            print!(" ");
        }
        print!("{arg}");
    }
    Ok(Value::unit())
}

fn io_println(ctx: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    io_print(ctx, args, span)?;
    println!();
    Ok(Value::unit())
}

fn string_concat(_: &mut RuntimeCtx, args: &[Value], _: SourceSpan) -> NativeResult {
    let mut out = String::new();
    for arg in args {
        out.push_str(&arg.to_string());
    }
    Ok(Value::string(out))
}

// --- math ------------------------------------------------------------------

fn math_abs(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "abs", span)?;
    match &*args[0].0 {
        ValueKind::Int(n) => Ok(Value::int(n.abs())),
        _ => Ok(Value::float(expect_f64(&args[0], "abs", span)?.abs())),
    }
}

fn math_floor(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "floor", span)?;
    Ok(Value::float(expect_f64(&args[0], "floor", span)?.floor()))
}

fn math_ceil(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "ceil", span)?;
    Ok(Value::float(expect_f64(&args[0], "ceil", span)?.ceil()))
}

fn math_round(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "round", span)?;
    Ok(Value::float(expect_f64(&args[0], "round", span)?.round()))
}

fn math_sqrt(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "sqrt", span)?;
    let x = expect_f64(&args[0], "sqrt", span)?;
    if x < 0.0 {
        return Err(Diagnostic::new(
            DiagnosticKind::NumericDomainError,
            "sqrt of a negative number",
        )
        .with_span(span));
    }
    Ok(Value::float(x.sqrt()))
}

fn math_pow(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "pow", span)?;
    let base = expect_f64(&args[0], "pow", span)?;
    let exponent = expect_f64(&args[1], "pow", span)?;
    Ok(Value::float(base.powf(exponent)))
}

fn math_min(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_min(args, 1, "min", span)?;
    let mut best = expect_f64(&args[0], "min", span)?;
    for arg in &args[1..] {
        best = best.min(expect_f64(arg, "min", span)?);
    }
    Ok(Value::float(best))
}

fn math_max(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_min(args, 1, "max", span)?;
    let mut best = expect_f64(&args[0], "max", span)?;
    for arg in &args[1..] {
        best = best.max(expect_f64(arg, "max", span)?);
    }
    Ok(Value::float(best))
}

// --- lists and statistics --------------------------------------------------

fn list_length(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "length", span)?;
    match &*args[0].0 {
        ValueKind::List(items) => Ok(Value::int(items.len() as i64)),
        ValueKind::String(s) => Ok(Value::int(s.chars().count() as i64)),
        _ => Err(Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            format!("`length` expected a list or string, found {}", args[0].type_name()),
        )
        .with_span(span)),
    }
}

fn list_head(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "head", span)?;
    let items = expect_list(&args[0], "head", span)?;
    items.first().cloned().ok_or_else(|| {
        Diagnostic::new(DiagnosticKind::TypeMismatch, "`head` of an empty list").with_span(span)
    })
}

fn list_tail(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "tail", span)?;
    let items = expect_list(&args[0], "tail", span)?;
    if items.is_empty() {
        return Ok(Value::list(Vec::new()));
    }
    Ok(Value::list(items[1..].to_vec()))
}

fn list_nth(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "nth", span)?;
    let items = expect_list(&args[0], "nth", span)?;
    let idx = expect_int(&args[1], "nth", span)?;
    if idx < 0 || idx as usize >= items.len() {
        return Err(Diagnostic::new(
            DiagnosticKind::TypeMismatch,
            format!("index {idx} out of bounds for a list of {}", items.len()),
        )
        .with_span(span));
    }
    Ok(items[idx as usize].clone())
}

fn list_reverse(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "reverse", span)?;
    let mut items = expect_list(&args[0], "reverse", span)?.to_vec();
    items.reverse();
    Ok(Value::list(items))
}

fn list_sort(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "sort", span)?;
    let mut numbers: Vec<f64> = expect_f64_list(&args[0], "sort", span)?;
    let items = expect_list(&args[0], "sort", span)?.to_vec();
    let mut paired: Vec<(f64, Value)> = numbers.drain(..).zip(items).collect();
    paired.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    Ok(Value::list(paired.into_iter().map(|(_, v)| v).collect()))
}

fn list_range(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "range", span)?;
    let start = expect_int(&args[0], "range", span)?;
    let end = expect_int(&args[1], "range", span)?;
    Ok(Value::list((start..end).map(Value::int).collect()))
}

fn stats_sum(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "sum", span)?;
    let numbers = expect_f64_list(&args[0], "sum", span)?;
    Ok(Value::float(numbers.iter().sum()))
}

fn stats_mean(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "mean", span)?;
    let numbers = expect_f64_list(&args[0], "mean", span)?;
    if numbers.is_empty() {
        return Err(Diagnostic::new(
            DiagnosticKind::NumericDomainError,
            "`mean` of an empty list",
        )
        .with_span(span));
    }
    Ok(Value::float(numbers.iter().sum::<f64>() / numbers.len() as f64))
}

fn variance_of(numbers: &[f64]) -> f64 {
    let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
    numbers.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / numbers.len() as f64
}

fn stats_variance(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "variance", span)?;
    let numbers = expect_f64_list(&args[0], "variance", span)?;
    if numbers.is_empty() {
        return Err(Diagnostic::new(
            DiagnosticKind::NumericDomainError,
            "`variance` of an empty list",
        )
        .with_span(span));
    }
    Ok(Value::float(variance_of(&numbers)))
}

fn stats_std_dev(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "std-dev", span)?;
    let numbers = expect_f64_list(&args[0], "std-dev", span)?;
    if numbers.is_empty() {
        return Err(Diagnostic::new(
            DiagnosticKind::NumericDomainError,
            "`std-dev` of an empty list",
        )
        .with_span(span));
    }
    Ok(Value::float(variance_of(&numbers).sqrt()))
}

// --- ternary logic ---------------------------------------------------------

/// Majority of three truth values under the Kleene numeric reading
/// false = 0, unknown = ½, true = 1.
fn ternary_majority(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 3, "majority", span)?;
    let mut total = 0.0;
    for arg in args {
        total += match &*arg.0 {
            ValueKind::Bool(true) => 1.0,
            ValueKind::Bool(false) => 0.0,
            ValueKind::Unknown => 0.5,
            _ => {
                return Err(Diagnostic::new(
                    DiagnosticKind::TypeMismatch,
                    format!("`majority` expected truth values, found {}", arg.type_name()),
                )
                .with_span(span));
            }
        };
    }
    if total >= 2.0 {
        Ok(Value::bool(true))
    } else if total <= 1.0 {
        Ok(Value::bool(false))
    } else {
        Ok(Value::new(ValueKind::Unknown))
    }
}

// --- safety kernel ---------------------------------------------------------

fn safety_kelly(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "kelly", span)?;
    let p = expect_probability(&args[0], "kelly", span)?;
    let b = expect_f64(&args[1], "kelly", span)?;
    Ok(Value::float(safety::kelly(p, b)))
}

fn safety_optimal_stake(ctx: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_range(args, 3, 4, "optimal-stake", span)?;
    let bankroll = expect_f64(&args[0], "optimal-stake", span)?;
    let p = expect_probability(&args[1], "optimal-stake", span)?;
    let b = expect_f64(&args[2], "optimal-stake", span)?;
    let fraction = match args.get(3) {
        Some(arg) => expect_f64(arg, "optimal-stake", span)?,
        None => ctx.config.safety.kelly_fraction,
    };
    Ok(Value::float(safety::optimal_stake(bankroll, p, b, fraction)))
}

fn safety_stake_safe(ctx: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 4, "stake-safe?", span)?;
    let stake = expect_f64(&args[0], "stake-safe?", span)?;
    let bankroll = expect_f64(&args[1], "stake-safe?", span)?;
    let p = expect_probability(&args[2], "stake-safe?", span)?;
    let b = expect_f64(&args[3], "stake-safe?", span)?;
    Ok(Value::bool(
        safety::check_stake(stake, bankroll, p, b, &ctx.config.safety).is_ok(),
    ))
}

fn safety_validate_probs(ctx: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "validate-probs", span)?;
    let probs = expect_f64_list(&args[0], "validate-probs", span)?;
    safety::validate(&probs, ctx.config.tolerance).map_err(|v| safety_diag(v, span))?;
    Ok(Value::bool(true))
}

fn safety_normalize_weights(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "normalize-weights", span)?;
    let weights = expect_f64_list(&args[0], "normalize-weights", span)?;
    let probs = safety::normalize(&weights).map_err(|v| safety_diag(v, span))?;
    Ok(Value::list(probs.into_iter().map(Value::float).collect()))
}

fn safety_dutch_book_from_odds(ctx: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "dutch-book-from-odds", span)?;
    let odds = expect_f64_list(&args[0], "dutch-book-from-odds", span)?;
    safety::dutch_book_from_odds(&odds, ctx.config.tolerance)
        .map_err(|v| safety_diag(v, span))?;
    Ok(Value::bool(true))
}

/// `risk-of-ruin p b stake-fraction initial target [ruin-threshold]`.
/// Monte-Carlo trajectories consume PRNG entropy.
fn safety_risk_of_ruin(ctx: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_range(args, 5, 6, "risk-of-ruin", span)?;
    let params = RuinParams {
        win_prob: expect_probability(&args[0], "risk-of-ruin", span)?,
        net_odds: expect_f64(&args[1], "risk-of-ruin", span)?,
        stake_fraction: expect_f64(&args[2], "risk-of-ruin", span)?,
        initial_wealth: expect_f64(&args[3], "risk-of-ruin", span)?,
        target_wealth: expect_f64(&args[4], "risk-of-ruin", span)?,
        ruin_threshold: match args.get(5) {
            Some(arg) => expect_f64(arg, "risk-of-ruin", span)?,
            None => 0.0,
        },
    };
    let config = ctx.config.safety;
    Ok(Value::float(safety::risk_of_ruin(&params, &config, &mut ctx.prng)))
}

/// The composite: Dutch book, then stake safety, then the cool-off gate,
/// then the draw. This is the single call site that mutates cool-off state.
fn safety_validated_bet(ctx: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 4, "validated-bet", span)?;
    let pairs = expect_list(&args[0], "validated-bet", span)?;
    let stake = expect_f64(&args[1], "validated-bet", span)?;
    let bankroll = expect_f64(&args[2], "validated-bet", span)?;
    let odds = expect_f64(&args[3], "validated-bet", span)?;

    let mut values = Vec::with_capacity(pairs.len());
    let mut weights = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let entry = expect_list(pair, "validated-bet", span)?;
        if entry.len() != 2 {
            return Err(Diagnostic::new(
                DiagnosticKind::TypeMismatch,
                "`validated-bet` expected (value weight) pairs",
            )
            .with_span(span));
        }
        values.push(entry[0].clone());
        weights.push(expect_f64(&entry[1], "validated-bet", span)?);
    }
    if values.is_empty() {
        return Err(Diagnostic::new(
            DiagnosticKind::ArityMismatch,
            "`validated-bet` needs at least one alternative",
        )
        .with_span(span));
    }

    safety::validate(&weights, ctx.config.tolerance).map_err(|v| safety_diag(v, span))?;

    if ctx.config.safety_enabled {
        // Back the favorite for the Kelly bound.
        let p = weights.iter().cloned().fold(0.0, f64::max);
        safety::check_stake(stake, bankroll, p, odds, &ctx.config.safety)
            .map_err(|v| safety_diag(v, span))?;
        let now = ctx.now();
        ctx.cooloff.try_bet(now).map_err(|v| safety_diag(v, span))?;
    }

    let idx = ctx.prng.pick_weighted(&weights);
    Ok(values.swap_remove(idx))
}

fn safety_self_exclude(ctx: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "self-exclude", span)?;
    let seconds = expect_f64(&args[0], "self-exclude", span)?;
    if seconds < 0.0 {
        return Err(Diagnostic::new(
            DiagnosticKind::NumericDomainError,
            "`self-exclude` needs a non-negative duration",
        )
        .with_span(span));
    }
    let now = ctx.now();
    ctx.cooloff.self_exclude(now, seconds);
    Ok(Value::unit())
}

// --- uncertainty constructors ----------------------------------------------

fn ctor_normal(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "normal", span)?;
    Uncertain::normal(
        expect_f64(&args[0], "normal", span)?,
        expect_f64(&args[1], "normal", span)?,
    )
    .map(Value::uncertain)
    .map_err(|e| numeric_diag(e, span))
}

fn ctor_beta(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "beta", span)?;
    Uncertain::beta(
        expect_f64(&args[0], "beta", span)?,
        expect_f64(&args[1], "beta", span)?,
    )
    .map(Value::uncertain)
    .map_err(|e| numeric_diag(e, span))
}

fn ctor_affine(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "affine", span)?;
    Uncertain::affine(
        expect_f64(&args[0], "affine", span)?,
        expect_f64(&args[1], "affine", span)?,
    )
    .map(Value::uncertain)
    .map_err(|e| numeric_diag(e, span))
}

fn ctor_fuzzy(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 3, "fuzzy", span)?;
    Uncertain::fuzzy(
        expect_f64(&args[0], "fuzzy", span)?,
        expect_f64(&args[1], "fuzzy", span)?,
        expect_f64(&args[2], "fuzzy", span)?,
    )
    .map(Value::uncertain)
    .map_err(|e| numeric_diag(e, span))
}

fn ctor_surreal_fuzzy(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 4, "surreal-fuzzy", span)?;
    Uncertain::surreal_fuzzy(
        expect_f64(&args[0], "surreal-fuzzy", span)?,
        expect_f64(&args[1], "surreal-fuzzy", span)?,
        expect_f64(&args[2], "surreal-fuzzy", span)?,
        expect_f64(&args[3], "surreal-fuzzy", span)?,
    )
    .map(Value::uncertain)
    .map_err(|e| numeric_diag(e, span))
}

fn ctor_bayesian(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 3, "bayesian", span)?;
    Uncertain::bayesian(
        expect_f64(&args[0], "bayesian", span)?,
        expect_f64(&args[1], "bayesian", span)?,
        expect_f64(&args[2], "bayesian", span)?,
    )
    .map(Value::uncertain)
    .map_err(|e| numeric_diag(e, span))
}

fn ctor_risk(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "risk", span)?;
    Uncertain::risk(
        expect_f64_list(&args[0], "risk", span)?,
        expect_f64(&args[1], "risk", span)?,
    )
    .map(Value::uncertain)
    .map_err(|e| numeric_diag(e, span))
}

fn ctor_padic(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "padic", span)?;
    let base = expect_int(&args[0], "padic", span)?;
    let base = u32::try_from(base).map_err(|_| {
        Diagnostic::new(DiagnosticKind::NumericDomainError, format!("invalid base {base}"))
            .with_span(span)
    })?;
    Uncertain::padic(base, expect_u32_list(&args[1], "padic", span)?)
        .map(Value::uncertain)
        .map_err(|e| numeric_diag(e, span))
}

fn ctor_lottery(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "lottery", span)?;
    Uncertain::lottery(
        expect_f64_list(&args[0], "lottery", span)?,
        expect_f64_list(&args[1], "lottery", span)?,
    )
    .map(Value::uncertain)
    .map_err(|e| numeric_diag(e, span))
}

fn ctor_hyperreal(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "hyperreal", span)?;
    Ok(Value::uncertain(Uncertain::hyperreal(
        expect_f64(&args[0], "hyperreal", span)?,
        expect_f64(&args[1], "hyperreal", span)?,
    )))
}

fn ctor_surreal(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "surreal", span)?;
    let left = expect_list(&args[0], "surreal", span)?
        .iter()
        .map(|v| expect_surreal(v, "surreal", span))
        .collect::<Result<Vec<_>, _>>()?;
    let right = expect_list(&args[1], "surreal", span)?
        .iter()
        .map(|v| expect_surreal(v, "surreal", span))
        .collect::<Result<Vec<_>, _>>()?;
    Uncertain::surreal(left, right)
        .map(Value::uncertain)
        .map_err(|e| numeric_diag(e, span))
}

fn ctor_padic_adv(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 3, "padic-adv", span)?;
    let prime = expect_int(&args[0], "padic-adv", span)?;
    let prime = u32::try_from(prime).map_err(|_| {
        Diagnostic::new(DiagnosticKind::NumericDomainError, format!("invalid prime {prime}"))
            .with_span(span)
    })?;
    let digits = expect_u32_list(&args[1], "padic-adv", span)?;
    let valuation = expect_int(&args[2], "padic-adv", span)? as i32;
    Uncertain::padic_adv(prime, digits, valuation)
        .map(Value::uncertain)
        .map_err(|e| numeric_diag(e, span))
}

fn ctor_imprecise(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "imprecise", span)?;
    Uncertain::imprecise(
        expect_f64(&args[0], "imprecise", span)?,
        expect_f64(&args[1], "imprecise", span)?,
    )
    .map(Value::uncertain)
    .map_err(|e| numeric_diag(e, span))
}

fn ctor_dempster(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "dempster", span)?;
    let focals = expect_list(&args[0], "dempster", span)?
        .iter()
        .map(|v| expect_symbol_set(v, "dempster", span))
        .collect::<Result<Vec<_>, _>>()?;
    let masses = expect_f64_list(&args[1], "dempster", span)?;
    Uncertain::dempster_shafer(focals, masses)
        .map(Value::uncertain)
        .map_err(|e| numeric_diag(e, span))
}

// --- uncertainty operations ------------------------------------------------

fn op_uncertain_add(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "uncertain-add", span)?;
    let a = expect_uncertain(&args[0], "uncertain-add", span)?;
    let b = expect_uncertain(&args[1], "uncertain-add", span)?;
    a.add(b).map(Value::uncertain).map_err(|e| numeric_diag(e, span))
}

fn op_uncertain_mul(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "uncertain-mul", span)?;
    let a = expect_uncertain(&args[0], "uncertain-mul", span)?;
    let b = expect_uncertain(&args[1], "uncertain-mul", span)?;
    a.mul(b).map(Value::uncertain).map_err(|e| numeric_diag(e, span))
}

fn op_membership(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "membership", span)?;
    let u = expect_uncertain(&args[0], "membership", span)?;
    let x = expect_f64(&args[1], "membership", span)?;
    u.membership(x).map(Value::float).map_err(|e| numeric_diag(e, span))
}

fn op_contains(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "contains?", span)?;
    let u = expect_uncertain(&args[0], "contains?", span)?;
    let x = expect_f64(&args[1], "contains?", span)?;
    u.contains(x).map(Value::bool).map_err(|e| numeric_diag(e, span))
}

/// `(value-at-risk r)` or `(value-at-risk samples alpha)`.
fn op_value_at_risk(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_range(args, 1, 2, "value-at-risk", span)?;
    let risk = value_at_risk_operand(args, "value-at-risk", span)?;
    risk.value_at_risk().map(Value::float).map_err(|e| numeric_diag(e, span))
}

fn op_cvar(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_range(args, 1, 2, "cvar", span)?;
    let risk = value_at_risk_operand(args, "cvar", span)?;
    risk.conditional_value_at_risk()
        .map(Value::float)
        .map_err(|e| numeric_diag(e, span))
}

fn value_at_risk_operand(args: &[Value], name: &str, span: SourceSpan) -> Result<Uncertain, Diagnostic> {
    if args.len() == 2 {
        let samples = expect_f64_list(&args[0], name, span)?;
        let alpha = expect_f64(&args[1], name, span)?;
        Uncertain::risk(samples, alpha).map_err(|e| numeric_diag(e, span))
    } else {
        Ok(expect_uncertain(&args[0], name, span)?.clone())
    }
}

fn op_expected_value(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "expected-value", span)?;
    expect_uncertain(&args[0], "expected-value", span)?
        .expected_value()
        .map(Value::float)
        .map_err(|e| numeric_diag(e, span))
}

fn op_standard_part(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "standard-part", span)?;
    expect_uncertain(&args[0], "standard-part", span)?
        .standard_part()
        .map(Value::float)
        .map_err(|e| numeric_diag(e, span))
}

/// `(to-real x)` or `(to-real x depth)` for the surreal approximation.
fn op_to_real(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_range(args, 1, 2, "to-real", span)?;
    let depth = match args.get(1) {
        Some(arg) => expect_int(arg, "to-real", span)?.max(0) as u32,
        None => SURREAL_DEPTH,
    };
    expect_uncertain(&args[0], "to-real", span)?
        .to_real(depth)
        .map(Value::float)
        .map_err(|e| numeric_diag(e, span))
}

fn op_refine(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "refine", span)?;
    let u = expect_uncertain(&args[0], "refine", span)?;
    let digit = expect_int(&args[1], "refine", span)?;
    let digit = u32::try_from(digit).map_err(|_| {
        Diagnostic::new(DiagnosticKind::NumericDomainError, format!("invalid digit {digit}"))
            .with_span(span)
    })?;
    u.refine(digit).map(Value::uncertain).map_err(|e| numeric_diag(e, span))
}

fn op_posterior(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "posterior", span)?;
    expect_uncertain(&args[0], "posterior", span)?
        .posterior()
        .map(Value::float)
        .map_err(|e| numeric_diag(e, span))
}

fn op_belief(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "belief", span)?;
    let u = expect_uncertain(&args[0], "belief", span)?;
    let hypothesis = expect_symbol_set(&args[1], "belief", span)?;
    u.belief(&hypothesis).map(Value::float).map_err(|e| numeric_diag(e, span))
}

fn op_plausibility(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "plausibility", span)?;
    let u = expect_uncertain(&args[0], "plausibility", span)?;
    let hypothesis = expect_symbol_set(&args[1], "plausibility", span)?;
    u.plausibility(&hypothesis)
        .map(Value::float)
        .map_err(|e| numeric_diag(e, span))
}

fn op_ds_combine(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "ds-combine", span)?;
    let a = expect_uncertain(&args[0], "ds-combine", span)?;
    let b = expect_uncertain(&args[1], "ds-combine", span)?;
    a.ds_combine(b).map(Value::uncertain).map_err(|e| numeric_diag(e, span))
}

fn op_surreal_leq(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "surreal-leq", span)?;
    let a = expect_surreal(&args[0], "surreal-leq", span)?;
    let b = expect_surreal(&args[1], "surreal-leq", span)?;
    Ok(Value::bool(Surreal::leq(&a, &b, SURREAL_DEPTH)))
}

fn membership_degree(value: &Value, name: &str, span: SourceSpan) -> Result<f64, Diagnostic> {
    let x = expect_f64(value, name, span)?;
    if !(0.0..=1.0).contains(&x) {
        return Err(Diagnostic::new(
            DiagnosticKind::ProbabilityOutOfRange,
            format!("`{name}` expected a membership degree in [0, 1], got {x}"),
        )
        .with_span(span));
    }
    Ok(x)
}

fn op_fuzzy_and(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "fuzzy-and", span)?;
    let a = membership_degree(&args[0], "fuzzy-and", span)?;
    let b = membership_degree(&args[1], "fuzzy-and", span)?;
    Ok(Value::float(a.min(b)))
}

fn op_fuzzy_or(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "fuzzy-or", span)?;
    let a = membership_degree(&args[0], "fuzzy-or", span)?;
    let b = membership_degree(&args[1], "fuzzy-or", span)?;
    Ok(Value::float(a.max(b)))
}

fn op_fuzzy_not(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "fuzzy-not", span)?;
    let a = membership_degree(&args[0], "fuzzy-not", span)?;
    Ok(Value::float(1.0 - a))
}

fn op_complement(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 1, "complement", span)?;
    expect_uncertain(&args[0], "complement", span)?
        .complement()
        .map(Value::uncertain)
        .map_err(|e| numeric_diag(e, span))
}

fn op_imprecise_and(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "imprecise-and", span)?;
    let a = expect_uncertain(&args[0], "imprecise-and", span)?;
    let b = expect_uncertain(&args[1], "imprecise-and", span)?;
    a.imprecise_and(b).map(Value::uncertain).map_err(|e| numeric_diag(e, span))
}

fn op_imprecise_or(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 2, "imprecise-or", span)?;
    let a = expect_uncertain(&args[0], "imprecise-or", span)?;
    let b = expect_uncertain(&args[1], "imprecise-or", span)?;
    a.imprecise_or(b).map(Value::uncertain).map_err(|e| numeric_diag(e, span))
}

fn op_imprecise_update(_: &mut RuntimeCtx, args: &[Value], span: SourceSpan) -> NativeResult {
    ensure_exact(args, 3, "imprecise-update", span)?;
    let u = expect_uncertain(&args[0], "imprecise-update", span)?;
    let likelihood = expect_f64(&args[1], "imprecise-update", span)?;
    let evidence = expect_f64(&args[2], "imprecise-update", span)?;
    u.imprecise_update(likelihood, evidence)
        .map(Value::uncertain)
        .map_err(|e| numeric_diag(e, span))
}
