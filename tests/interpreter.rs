use std::rc::Rc;

use betlang::{
    diagnostics::{Diagnostic, DiagnosticKind},
    driver::{self, Config, PipelineError},
    eval::Interpreter,
    safety::{CoolOff, ManualClock},
    value::{Value, ValueKind},
    Session,
};

fn eval(source: &str) -> Value {
    eval_seeded(source, 0)
}

fn eval_seeded(source: &str, seed: u64) -> Value {
    let config = Config {
        seed,
        ..Config::default()
    };
    let mut cooloff = config.new_cooloff();
    driver::run_source(source, &config, &mut cooloff)
        .unwrap_or_else(|err| panic!("evaluation of `{source}` failed: {err:?}"))
        .value
}

fn eval_error(source: &str) -> PipelineError {
    let config = Config::default();
    let mut cooloff = config.new_cooloff();
    match driver::run_source(source, &config, &mut cooloff) {
        Ok(outcome) => panic!("expected error, received value {}", outcome.value),
        Err(err) => err,
    }
}

fn frontend_error(source: &str) -> Vec<Diagnostic> {
    match eval_error(source) {
        PipelineError::Frontend(diags) => diags,
        PipelineError::Runtime(diag) => panic!("expected frontend error, got runtime {diag}"),
    }
}

fn runtime_error(source: &str) -> Diagnostic {
    match eval_error(source) {
        PipelineError::Runtime(diag) => diag,
        PipelineError::Frontend(diags) => panic!("expected runtime error, got {diags:?}"),
    }
}

fn expect_int(value: &Value) -> i64 {
    match value.0.as_ref() {
        ValueKind::Int(n) => *n,
        _ => panic!("expected Int, found {}", value.type_name()),
    }
}

fn expect_f64(value: &Value) -> f64 {
    match value.0.as_ref() {
        ValueKind::Int(n) => *n as f64,
        ValueKind::Rational(r) => r.to_f64(),
        ValueKind::Float(x) => *x,
        _ => panic!("expected a number, found {}", value.type_name()),
    }
}

fn expect_list(value: &Value) -> Vec<Value> {
    match value.0.as_ref() {
        ValueKind::List(items) => items.clone(),
        _ => panic!("expected List, found {}", value.type_name()),
    }
}

fn expect_symbol(value: &Value) -> String {
    match value.0.as_ref() {
        ValueKind::Symbol(s) => s.clone(),
        _ => panic!("expected Symbol, found {}", value.type_name()),
    }
}

// --- arithmetic and core forms ----------------------------------------------

#[test]
fn evaluates_basic_arithmetic() {
    assert_eq!(expect_int(&eval("2 + 2")), 4);
    assert_eq!(expect_int(&eval("(+ 1 2 3)")), 6);
    assert_eq!(expect_int(&eval("10 - 2 * 3")), 4);
}

#[test]
fn rational_arithmetic_is_exact() {
    let value = eval("1/3 + 1/6");
    assert_eq!(value.to_string(), "1/2");
    assert_eq!(expect_int(&eval("1/2 * 4")), 2);
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let diag = runtime_error("(/ 1 0)");
    assert_eq!(diag.kind.code(), "Numeric.DomainError");
}

#[test]
fn let_and_lambda_close_over_bindings() {
    let value = eval(
        "(let ([base 10])
           (let ([add-base (lambda (x) (+ x base))])
             (add-base 32)))",
    );
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn define_persists_across_forms() {
    let value = eval("define twice = lambda x -> x * 2 end\ntwice 21");
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn match_selects_by_tag_and_binds_variables() {
    let value = eval(
        "match 'tails with 'heads -> 0 | 'tails -> 1 | _ -> 2 end",
    );
    assert_eq!(expect_int(&value), 1);

    let value = eval("match [1, 2] with [a, b] -> a + b | _ -> 0 end");
    assert_eq!(expect_int(&value), 3);
}

#[test]
fn do_block_threads_bindings() {
    let value = eval("do x <- 20; y <- x + 1; return x + y + 1 end");
    assert_eq!(expect_int(&value), 42);
}

#[test]
fn ternary_logic_goes_through_unknown() {
    assert_eq!(eval("not unknown").to_string(), "unknown");
    assert_eq!(eval("false and unknown").to_string(), "false");
    assert_eq!(eval("true and unknown").to_string(), "unknown");
    assert_eq!(eval("true or unknown").to_string(), "true");
    assert_eq!(eval("majority true unknown false").to_string(), "unknown");
    assert_eq!(eval("majority true true unknown").to_string(), "true");
}

// --- bet primitives ----------------------------------------------------------

#[test]
fn seeded_ternary_bet_is_reproducible() {
    let first = eval("(with-seed 42 (bet 'a 'b 'c))");
    let second = eval("(with-seed 42 (bet 'a 'b 'c))");
    assert!(first.equals(&second));
    assert!(["a", "b", "c"].contains(&expect_symbol(&first).as_str()));
}

#[test]
fn bet_is_idempotent_on_equal_alternatives() {
    for seed in 0..20 {
        assert_eq!(expect_int(&eval_seeded("bet 7 7 7 end", seed)), 7);
    }
}

#[test]
fn bet_uniformity_within_three_sigma() {
    let values = expect_list(&eval("(with-seed 9 (parallel 1000000 (bet 0 1 2)))"));
    let mut counts = [0usize; 3];
    for value in &values {
        counts[expect_int(value) as usize] += 1;
    }
    // σ = sqrt(p(1-p)/N) with p = 1/3 and N = 10⁶; 3σ ≈ 0.0014.
    let n = values.len() as f64;
    for count in counts {
        let freq = count as f64 / n;
        assert!(
            (freq - 1.0 / 3.0).abs() < 0.0015,
            "frequency {freq} outside 3σ of 1/3"
        );
    }
}

#[test]
fn weighted_bet_tracks_its_weights() {
    let values = expect_list(&eval(
        "(with-seed 11 (parallel 1000000 (bet-weighted (0 0.5) (1 0.3) (2 0.2))))",
    ));
    let mut counts = [0usize; 3];
    for value in &values {
        counts[expect_int(value) as usize] += 1;
    }
    let n = values.len() as f64;
    for (idx, expected) in [0.5, 0.3, 0.2].into_iter().enumerate() {
        let freq = counts[idx] as f64 / n;
        let sigma = (expected * (1.0 - expected) / n).sqrt();
        assert!(
            (freq - expected).abs() < 3.0 * sigma + 1e-4,
            "frequency {freq} outside 3σ of {expected}"
        );
    }
}

#[test]
fn dutch_book_violation_is_caught_at_elaboration() {
    let diags = frontend_error("(bet-weighted '((a 0.4) (b 0.4) (c 0.3)))");
    match &diags[0].kind {
        DiagnosticKind::DutchBookViolation { sum } => {
            assert!((sum - 1.1).abs() < 1e-9, "sum was {sum}");
        }
        other => panic!("expected DutchBook.Violation, got {other:?}"),
    }
    assert!(diags[0].span.is_some());
}

#[test]
fn dynamic_weights_are_normalized_at_runtime() {
    // 3:1:1 odds do not sum to one, but dynamic weights only need a
    // positive total.
    let value = eval(
        "let w = 3.0 in (with-seed 2 (bet-weighted ('x w) ('y 1.0) ('z 1.0))) end",
    );
    assert!(["x", "y", "z"].contains(&expect_symbol(&value).as_str()));
}

#[test]
fn runtime_weights_must_not_be_negative() {
    let diag = runtime_error("let w = -1.0 in (bet-weighted (1 w) (2 2.0)) end");
    assert_eq!(diag.kind.code(), "Probability.NegativeWeight");
}

#[test]
fn bet_conditional_true_branch_short_circuits() {
    for seed in 0..10 {
        let value = eval_seeded("(bet-conditional (1 < 2) 'yes 'no 'maybe)", seed);
        assert_eq!(expect_symbol(&value), "yes");
    }
}

#[test]
fn bet_conditional_false_branch_draws_over_all_three() {
    let mut seen = std::collections::BTreeSet::new();
    for seed in 0..60 {
        let value = eval_seeded("(bet-conditional (1 > 2) 'yes 'no 'maybe)", seed);
        seen.insert(expect_symbol(&value));
    }
    // The "true" value keeps its second chance in the false branch.
    assert!(seen.contains("yes"));
    assert!(seen.contains("no"));
    assert!(seen.contains("maybe"));
}

#[test]
fn bet_lazy_invokes_the_selected_thunk() {
    for seed in 0..20 {
        let value = eval_seeded(
            "(bet-lazy (lambda () 1) (lambda () 2) (lambda () 3))",
            seed,
        );
        let n = expect_int(&value);
        assert!((1..=3).contains(&n));
    }
}

#[test]
fn parallel_produces_a_deterministic_list() {
    let first = eval("(with-seed 5 (parallel 10 (bet 1 2 3)))");
    let second = eval("(with-seed 5 (parallel 10 (bet 1 2 3)))");
    assert!(first.equals(&second));
    assert_eq!(expect_list(&first).len(), 10);
}

#[test]
fn with_seed_leaves_the_outer_stream_untouched() {
    // The draw after the scoped block must equal the first draw of a
    // program without the block.
    let with_scope = eval_seeded(
        "do ignored <- (with-seed 1 (parallel 100 (bet 1 2 3))); return bet 1 2 3 end end",
        7,
    );
    let without_scope = eval_seeded("bet 1 2 3 end", 7);
    assert!(with_scope.equals(&without_scope));
}

#[test]
fn nested_with_seed_restores_each_level() {
    let nested = eval_seeded(
        "do a <- (with-seed 1 do b <- (with-seed 2 (bet 1 2 3)); return bet 1 2 3 end end); return bet 1 2 3 end end",
        13,
    );
    let plain = eval_seeded("bet 1 2 3 end", 13);
    assert!(nested.equals(&plain));
}

#[test]
fn sample_draws_from_distributions() {
    let value = eval("(with-seed 4 (sample (normal 10 0)))");
    assert!((expect_f64(&value) - 10.0).abs() < 1e-12);

    let value = eval("(with-seed 4 (sample (affine 2 3)))");
    let x = expect_f64(&value);
    assert!((2.0..3.0).contains(&x));

    let diag = runtime_error("sample 42");
    assert_eq!(diag.kind.code(), "Type.Mismatch");
}

// --- safety kernel -----------------------------------------------------------

#[test]
fn kelly_matches_the_worked_example() {
    assert!((expect_f64(&eval("kelly 0.55 2.0")) - 0.325).abs() < 1e-12);
    let stake = expect_f64(&eval("optimal-stake 10000 0.55 2.0 0.25"));
    assert!((stake - 812.5).abs() < 1e-9);
}

#[test]
fn kelly_probability_is_range_checked() {
    let diag = runtime_error("kelly 1.5 2.0");
    assert_eq!(diag.kind.code(), "Probability.OutOfRange");
}

#[test]
fn var_and_cvar_match_the_reference() {
    let source = "value-at-risk [-10, -5, -2, 0, 1, 2, 3, 5, 8, 10] 0.95";
    assert_eq!(expect_f64(&eval(source)), -10.0);
    let cvar = expect_f64(&eval("cvar [-10, -5, -2, 0, 1, 2, 3, 5, 8, 10] 0.95"));
    assert!(cvar <= -10.0);
}

#[test]
fn padic_to_real_matches_the_expansion() {
    let value = expect_f64(&eval("to-real (padic 5 [2, 0, 1])"));
    assert!((value - 0.408).abs() < 1e-12);
}

#[test]
fn risk_of_ruin_fair_game_is_analytic() {
    let value = expect_f64(&eval("risk-of-ruin 0.5 1.0 0.01 300 1000"));
    assert!((value - 0.7).abs() < 1e-12);
}

#[test]
fn validated_bet_enforces_dutch_book_first() {
    let diag = runtime_error("validated-bet [['a, 0.6], ['b, 0.6]] 100 10000 2.0");
    assert_eq!(diag.kind.code(), "DutchBook.Violation");
}

#[test]
fn validated_bet_enforces_the_kelly_bound() {
    // Quarter-Kelly cap for (0.55, 2.0) is 8.125% of bankroll.
    let diag = runtime_error("validated-bet [['a, 0.55], ['b, 0.45]] 900 10000 2.0");
    assert_eq!(diag.kind.code(), "Risk.KellyExceeded");
}

#[test]
fn validated_bet_draws_when_all_checks_pass() {
    let value = eval("(with-seed 6 (validated-bet [['a, 0.55], ['b, 0.45]] 400 10000 2.0))");
    assert!(["a", "b"].contains(&expect_symbol(&value).as_str()));
}

#[test]
fn safety_off_skips_the_stake_and_cool_off_checks() {
    let config = Config {
        safety_enabled: false,
        ..Config::default()
    };
    let mut cooloff = config.new_cooloff();
    let outcome = driver::run_source(
        "validated-bet [['a, 0.55], ['b, 0.45]] 9000 10000 2.0",
        &config,
        &mut cooloff,
    )
    .expect("safety off lets an oversized stake through");
    assert!(["a", "b"].contains(&expect_symbol(&outcome.value).as_str()));
}

#[test]
fn cool_off_blocks_the_second_validated_bet() {
    let source = r#"
        do first <- validated-bet [['a, 0.55], ['b, 0.45]] 100 10000 2.0
           second <- validated-bet [['a, 0.55], ['b, 0.45]] 100 10000 2.0
           return second
        end
    "#;
    let program = driver::parse(source).expect("parse");
    let config = Config::default();
    let elaborated = driver::elaborate(&program, &config).expect("elaborate");

    let clock = Rc::new(ManualClock::new(1_000.0));
    let mut interpreter = Interpreter::with_clock(
        betlang::EvalConfig::default(),
        Box::new(Rc::clone(&clock)),
    );
    interpreter.install_cooloff(CoolOff::new(5.0));

    let diag = interpreter
        .eval_program(&elaborated.program)
        .expect_err("second bet must be blocked");
    match &diag.kind {
        DiagnosticKind::CoolOffActive { remaining_seconds } => {
            assert!((remaining_seconds - 5.0).abs() < 1e-9);
        }
        other => panic!("expected CoolOff.Active, got {other:?}"),
    }
    assert_eq!(interpreter.take_cooloff().violations, 1);
}

#[test]
fn cool_off_reopens_after_the_window() {
    let source = "validated-bet [['a, 0.55], ['b, 0.45]] 100 10000 2.0";
    let program = driver::parse(source).expect("parse");
    let config = Config::default();
    let elaborated = driver::elaborate(&program, &config).expect("elaborate");

    let clock = Rc::new(ManualClock::new(0.0));
    let mut interpreter = Interpreter::with_clock(
        betlang::EvalConfig::default(),
        Box::new(Rc::clone(&clock)),
    );
    interpreter.install_cooloff(CoolOff::new(5.0));

    interpreter.eval_program(&elaborated.program).expect("first bet");
    clock.advance(6.0);
    interpreter.eval_program(&elaborated.program).expect("after the window");
    assert_eq!(interpreter.take_cooloff().violations, 0);
}

// --- uncertainty values in the language ---------------------------------------

#[test]
fn uncertain_addition_dispatches_on_plus() {
    let value = eval("expected-value ((normal 1 1) + (normal 2 2))");
    assert!((expect_f64(&value) - 3.0).abs() < 1e-12);
}

#[test]
fn mismatched_uncertain_addition_is_a_domain_error() {
    let diag = runtime_error("(normal 0 1) + (affine 0 1)");
    assert_eq!(diag.kind.code(), "Numeric.DomainError");
}

#[test]
fn dempster_combination_runs_end_to_end() {
    let value = eval(
        "belief (ds-combine (dempster [['a], ['a, 'b]] [0.6, 0.4]) \
                            (dempster [['a], ['b]] [0.7, 0.3])) 'a",
    );
    let belief = expect_f64(&value);
    assert!(belief > 0.5 && belief <= 1.0);
}

#[test]
fn total_conflict_surfaces_as_its_own_kind() {
    let diag = runtime_error(
        "ds-combine (dempster [['a]] [1.0]) (dempster [['b]] [1.0])",
    );
    assert_eq!(diag.kind.code(), "Numeric.TotalConflict");
}

#[test]
fn surreal_values_compare_and_approximate() {
    assert_eq!(eval("surreal-leq 1 2").to_string(), "true");
    assert_eq!(eval("surreal-leq 2 1").to_string(), "false");
    let half = expect_f64(&eval("to-real (surreal [0] [1])"));
    assert!((half - 0.5).abs() < 1e-12);
}

#[test]
fn hyperreal_standard_part_drops_the_infinitesimal() {
    let value = expect_f64(&eval(
        "standard-part (uncertain-mul (hyperreal 2 1) (hyperreal 3 2))",
    ));
    assert!((value - 6.0).abs() < 1e-12);
}

#[test]
fn non_exhaustive_match_is_advisory_only() {
    let config = Config::default();
    let mut cooloff = config.new_cooloff();
    let outcome = driver::run_source(
        "match 1 with 1 -> 'one | 2 -> 'two end",
        &config,
        &mut cooloff,
    )
    .expect("advisory warning must not block evaluation");
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].kind.code(), "Pattern.NonExhaustive");
}

#[test]
fn failed_match_is_a_runtime_error() {
    let diag = runtime_error("match 3 with 1 -> 'one | 2 -> 'two end");
    assert_eq!(diag.kind.code(), "Pattern.NonExhaustive");
}

#[test]
fn session_threads_prng_and_definitions() {
    let mut session = Session::new(Config::default());
    session
        .eval_line("define draw = lambda n -> bet n, n + 1, n + 2 end end")
        .unwrap();
    session.reseed(42);
    let (a, _) = session.eval_line("draw 1").unwrap();
    session.reseed(42);
    let (b, _) = session.eval_line("draw 1").unwrap();
    assert!(a.equals(&b));
}
