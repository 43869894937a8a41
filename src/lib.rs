//! Core library for the BetLang probabilistic language: lexing, parsing,
//! elaboration, the seeded tree-walking evaluator, and the numeric and
//! safety kernels behind the ternary-bet primitives.

pub mod ast;
pub mod diagnostics;
pub mod driver;
pub mod elaborate;
pub mod environment;
pub mod eval;
pub mod ir;
pub mod lexer;
pub mod numeric;
pub mod parser;
pub mod pretty;
pub mod prng;
pub mod repl;
pub mod safety;
pub mod span;
pub mod stdlib;
pub mod value;

pub use diagnostics::{BetlangError, Diagnostic, DiagnosticKind, Severity};
pub use driver::{Config, Session};
pub use eval::{EvalConfig, Interpreter};
pub use repl::Repl;
pub use span::{SourceMap, SourceSpan};
pub use value::Value;
