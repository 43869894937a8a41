use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::span::{SourceMap, SourceSpan};

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// The closed set of diagnostic kinds, namespaced by pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum DiagnosticKind {
    LexUnterminatedString,
    LexBadEscape,
    LexInvalidChar,
    Parse,
    NameUnbound,
    ArityMismatch,
    TypeMismatch,
    PatternNonExhaustive,
    DutchBookViolation { sum: f64 },
    ProbabilityOutOfRange,
    ProbabilityNegativeWeight,
    ProbabilityZeroTotal,
    RiskStakeUnsafe,
    RiskKellyExceeded,
    CoolOffActive { remaining_seconds: f64 },
    NumericDomainError,
    NumericTotalConflict,
    EvalAborted { reason: String },
}

impl DiagnosticKind {
    /// Stable dotted tag, e.g. `DutchBook.Violation`.
    pub fn code(&self) -> &'static str {
        match self {
            DiagnosticKind::LexUnterminatedString => "Lex.UnterminatedString",
            DiagnosticKind::LexBadEscape => "Lex.BadEscape",
            DiagnosticKind::LexInvalidChar => "Lex.InvalidChar",
            DiagnosticKind::Parse => "Parse.Unexpected",
            DiagnosticKind::NameUnbound => "Name.Unbound",
            DiagnosticKind::ArityMismatch => "Arity.Mismatch",
            DiagnosticKind::TypeMismatch => "Type.Mismatch",
            DiagnosticKind::PatternNonExhaustive => "Pattern.NonExhaustive",
            DiagnosticKind::DutchBookViolation { .. } => "DutchBook.Violation",
            DiagnosticKind::ProbabilityOutOfRange => "Probability.OutOfRange",
            DiagnosticKind::ProbabilityNegativeWeight => "Probability.NegativeWeight",
            DiagnosticKind::ProbabilityZeroTotal => "Probability.ZeroTotal",
            DiagnosticKind::RiskStakeUnsafe => "Risk.StakeUnsafe",
            DiagnosticKind::RiskKellyExceeded => "Risk.KellyExceeded",
            DiagnosticKind::CoolOffActive { .. } => "CoolOff.Active",
            DiagnosticKind::NumericDomainError => "Numeric.DomainError",
            DiagnosticKind::NumericTotalConflict => "Numeric.TotalConflict",
            DiagnosticKind::EvalAborted { .. } => "Eval.Aborted",
        }
    }

    /// Default severity for this kind. Exhaustiveness is advisory.
    pub fn severity(&self) -> Severity {
        match self {
            DiagnosticKind::PatternNonExhaustive => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// Structured, span-carrying diagnostic surfaced to users and embedders.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: DiagnosticKind,
    pub message: String,
    pub span: Option<SourceSpan>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub secondary: Vec<SourceSpan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            severity: kind.severity(),
            kind,
            message: message.into(),
            span: None,
            secondary: Vec::new(),
            hint: None,
        }
    }

    pub fn with_span(mut self, span: SourceSpan) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_secondary(mut self, span: SourceSpan) -> Self {
        self.secondary.push(span);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Render against a source map: `error[DutchBook.Violation]: ... (2:5-2:9)`.
    pub fn render(&self, map: &SourceMap) -> String {
        let mut out = format!("{}[{}]: {}", self.severity, self.kind.code(), self.message);
        if let Some(span) = self.span {
            out.push_str(&format!(" ({})", map.span_display(span)));
        }
        if let Some(hint) = &self.hint {
            out.push_str(&format!("\n  hint: {hint}"));
        }
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity, self.kind.code(), self.message)?;
        if let Some(span) = self.span {
            write!(f, " ({}..{})", span.start, span.end)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}

/// Append-only sink for front-end diagnostics; stages share one bus so an
/// editor sees every problem in a single pass.
#[derive(Debug, Default)]
pub struct DiagnosticBus {
    entries: Vec<Diagnostic>,
}

impl DiagnosticBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.entries.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.entries.extend(diagnostics);
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }
}

/// Unified error type for the BetLang toolchain.
#[derive(Debug, Error)]
pub enum BetlangError {
    #[error("{0}")]
    Diagnostic(#[from] Diagnostic),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BetlangError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_carry_stable_codes() {
        let kind = DiagnosticKind::DutchBookViolation { sum: 1.1 };
        assert_eq!(kind.code(), "DutchBook.Violation");
        assert_eq!(kind.severity(), Severity::Error);
        assert_eq!(
            DiagnosticKind::PatternNonExhaustive.severity(),
            Severity::Warning
        );
    }

    #[test]
    fn renders_with_positions() {
        let map = SourceMap::new("bet a b\n");
        let diag = Diagnostic::new(DiagnosticKind::Parse, "expected expression")
            .with_span(SourceSpan::new(4, 5));
        assert_eq!(
            diag.render(&map),
            "error[Parse.Unexpected]: expected expression (1:5-1:6)"
        );
    }

    #[test]
    fn serializes_to_json_object() {
        let diag = Diagnostic::new(
            DiagnosticKind::CoolOffActive {
                remaining_seconds: 4.5,
            },
            "cool-off in effect",
        );
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["severity"], "error");
        assert_eq!(json["kind"], "CoolOffActive");
    }
}
