//! End-to-end pipeline: source text → tokens → AST → IR → value.
//!
//! This is the embedded-use boundary. Collaborators (LSP, backend
//! generators, bindings) call [`parse`], [`elaborate`] and [`evaluate`]
//! separately; the CLI and REPL drive the whole chain through
//! [`run_source`] and [`Session`].

use std::env;

use crate::{
    ast::Program,
    diagnostics::Diagnostic,
    elaborate::{self, Elaborated, DEFAULT_TOLERANCE},
    eval::{EvalConfig, Interpreter},
    ir::{IrKind, IrProgram},
    parser,
    safety::CoolOff,
    value::Value,
};

/// Driver configuration, assembled from CLI flags with environment-variable
/// fallbacks: `BETLANG_SEED`, `BETLANG_COOLOFF_SECONDS`, `BETLANG_TOLERANCE`.
#[derive(Debug, Clone)]
pub struct Config {
    pub seed: u64,
    pub step_limit: Option<u64>,
    pub safety_enabled: bool,
    pub tolerance: f64,
    pub cooloff_seconds: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: 0,
            step_limit: None,
            safety_enabled: true,
            tolerance: DEFAULT_TOLERANCE,
            cooloff_seconds: 0.0,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(seed) = parse_env::<u64>("BETLANG_SEED") {
            config.seed = seed;
        }
        if let Some(seconds) = parse_env::<f64>("BETLANG_COOLOFF_SECONDS") {
            config.cooloff_seconds = seconds;
        }
        if let Some(tolerance) = parse_env::<f64>("BETLANG_TOLERANCE") {
            config.tolerance = tolerance;
        }
        config
    }

    fn eval_config(&self) -> EvalConfig {
        EvalConfig {
            seed: self.seed,
            step_limit: self.step_limit,
            safety_enabled: self.safety_enabled,
            tolerance: self.tolerance,
            ..EvalConfig::default()
        }
    }

    pub fn new_cooloff(&self) -> CoolOff {
        if self.safety_enabled {
            CoolOff::new(self.cooloff_seconds)
        } else {
            CoolOff::disabled()
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|raw| raw.parse().ok())
}

/// Entry point 1: text to AST, every syntax problem reported at once.
pub fn parse(source: &str) -> Result<Program, Vec<Diagnostic>> {
    parser::parse(source)
}

/// Entry point 2: AST to IR plus advisory warnings.
pub fn elaborate(program: &Program, config: &Config) -> Result<Elaborated, Vec<Diagnostic>> {
    elaborate::elaborate(program, config.tolerance)
}

/// Entry point 3: run the IR against a fresh interpreter seeded from the
/// config; cool-off state is owned by the caller and handed back after the
/// run.
pub fn evaluate(
    program: &IrProgram,
    config: &Config,
    cooloff: &mut CoolOff,
) -> Result<Value, Diagnostic> {
    let mut interpreter = Interpreter::new(config.eval_config());
    interpreter.install_cooloff(std::mem::replace(cooloff, CoolOff::disabled()));
    let result = interpreter.eval_program(program);
    *cooloff = interpreter.take_cooloff();
    result
}

/// Front-end failures carry many diagnostics (exit code 2); runtime
/// failures exactly one (exit code 1).
#[derive(Debug)]
pub enum PipelineError {
    Frontend(Vec<Diagnostic>),
    Runtime(Diagnostic),
}

pub struct RunOutcome {
    pub value: Value,
    pub warnings: Vec<Diagnostic>,
}

pub fn run_source(
    source: &str,
    config: &Config,
    cooloff: &mut CoolOff,
) -> Result<RunOutcome, PipelineError> {
    let program = parse(source).map_err(PipelineError::Frontend)?;
    let elaborated = elaborate(&program, config).map_err(PipelineError::Frontend)?;
    let value =
        evaluate(&elaborated.program, config, cooloff).map_err(PipelineError::Runtime)?;
    Ok(RunOutcome {
        value,
        warnings: elaborated.warnings,
    })
}

/// Parse and elaborate only; returns advisory warnings on success.
pub fn check_source(source: &str, config: &Config) -> Result<Vec<Diagnostic>, Vec<Diagnostic>> {
    let program = parse(source)?;
    let elaborated = elaborate(&program, config)?;
    Ok(elaborated.warnings)
}

/// A persistent interpreter for the REPL: definitions, the PRNG stream and
/// cool-off state all survive across lines.
pub struct Session {
    interpreter: Interpreter,
    defined: Vec<String>,
    config: Config,
}

impl Session {
    pub fn new(config: Config) -> Self {
        let mut interpreter = Interpreter::new(config.eval_config());
        interpreter.install_cooloff(config.new_cooloff());
        Self {
            interpreter,
            defined: Vec::new(),
            config,
        }
    }

    pub fn eval_line(&mut self, source: &str) -> Result<(Value, Vec<Diagnostic>), Vec<Diagnostic>> {
        let program = parse(source)?;
        let elaborated =
            elaborate::elaborate_with_globals(&program, self.config.tolerance, &self.defined)?;
        for form in &elaborated.program.forms {
            if let IrKind::Define { name, .. } = &form.kind {
                self.defined.push(name.clone());
            }
        }
        match self.interpreter.eval_program(&elaborated.program) {
            Ok(value) => Ok((value, elaborated.warnings)),
            Err(diag) => Err(vec![diag]),
        }
    }

    pub fn reseed(&mut self, seed: u64) {
        self.interpreter.reseed(seed);
    }

    pub fn reset(&mut self) {
        let mut interpreter = Interpreter::new(self.config.eval_config());
        interpreter.install_cooloff(self.config.new_cooloff());
        self.interpreter = interpreter;
        self.defined.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str, config: &Config) -> Result<RunOutcome, PipelineError> {
        let mut cooloff = config.new_cooloff();
        run_source(source, config, &mut cooloff)
    }

    #[test]
    fn pipeline_runs_a_seeded_bet() {
        let config = Config::default();
        let a = run("(with-seed 42 (bet 'a 'b 'c))", &config).unwrap();
        let b = run("(with-seed 42 (bet 'a 'b 'c))", &config).unwrap();
        assert!(a.value.equals(&b.value));
    }

    #[test]
    fn frontend_errors_are_collected() {
        let config = Config::default();
        match run("(bet 1 2)", &config) {
            Err(PipelineError::Frontend(diags)) => assert!(!diags.is_empty()),
            other => panic!("expected frontend failure, got {other:?}"),
        }
    }

    #[test]
    fn runtime_errors_are_single() {
        let config = Config::default();
        match run("1 / 0", &config) {
            Err(PipelineError::Runtime(_)) => {}
            other => panic!("expected runtime failure, got {other:?}"),
        }
    }

    #[test]
    fn session_keeps_definitions() {
        let mut session = Session::new(Config::default());
        session.eval_line("define x = 21").unwrap();
        let (value, _) = session.eval_line("x * 2").unwrap();
        assert!(value.equals(&Value::int(42)));
    }

    #[test]
    fn session_reset_forgets() {
        let mut session = Session::new(Config::default());
        session.eval_line("define x = 1").unwrap();
        session.reset();
        assert!(session.eval_line("x").is_err());
    }

    #[test]
    fn step_limit_aborts() {
        let config = Config {
            step_limit: Some(10),
            ..Config::default()
        };
        match run("parallel 1000 do bet 1 2 3 end end", &config) {
            Err(PipelineError::Runtime(diag)) => {
                assert_eq!(diag.kind.code(), "Eval.Aborted");
            }
            other => panic!("expected abort, got {other:?}"),
        }
    }
}

impl std::fmt::Debug for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOutcome")
            .field("value", &self.value.to_string())
            .field("warnings", &self.warnings.len())
            .finish()
    }
}
