//! Elaborated intermediate representation. Produced only by
//! [`crate::elaborate`], consumed only by [`crate::eval`].
//!
//! Differences from the surface AST: names are canonical (hyphens
//! normalized) and proven bound, `do` blocks and multi-binding `let`s are
//! desugared into nested single-binding lets, `with-seed` applications have
//! become a dedicated scoped node, and weighted bets whose weights were all
//! literals carry their pre-normalized probabilities.

pub use crate::ast::{BinaryOp, Literal, Pattern, UnaryOp};
use crate::span::SourceSpan;

#[derive(Debug, Clone)]
pub struct IrExpr {
    pub kind: IrKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct IrArm {
    pub pattern: Pattern,
    pub body: IrExpr,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum IrKind {
    Literal(Literal),
    Var(String),
    List(Vec<IrExpr>),
    Apply {
        callee: Box<IrExpr>,
        args: Vec<IrExpr>,
    },
    Define {
        name: String,
        value: Box<IrExpr>,
    },
    Let {
        name: String,
        value: Box<IrExpr>,
        body: Box<IrExpr>,
    },
    If {
        cond: Box<IrExpr>,
        then_branch: Box<IrExpr>,
        else_branch: Box<IrExpr>,
    },
    Match {
        scrutinee: Box<IrExpr>,
        arms: Vec<IrArm>,
    },
    Lambda {
        params: Vec<String>,
        body: Box<IrExpr>,
    },
    /// Exactly three alternatives.
    Bet {
        arms: Vec<IrExpr>,
    },
    /// `probs` is `Some` iff every weight was a literal and the compile-time
    /// Dutch-book check passed; the values are normalized probabilities.
    BetWeighted {
        arms: Vec<(IrExpr, IrExpr)>,
        probs: Option<Vec<f64>>,
    },
    BetConditional {
        pred: Box<IrExpr>,
        on_true: Box<IrExpr>,
        on_false: Box<IrExpr>,
        on_unknown: Box<IrExpr>,
    },
    /// Exactly three thunk expressions; only the drawn one is forced.
    BetLazy {
        thunks: Vec<IrExpr>,
    },
    WithSeed {
        seed: Box<IrExpr>,
        body: Box<IrExpr>,
    },
    Sample(Box<IrExpr>),
    Parallel {
        count: Box<IrExpr>,
        body: Box<IrExpr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<IrExpr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<IrExpr>,
        right: Box<IrExpr>,
    },
}

#[derive(Debug, Clone)]
pub struct IrProgram {
    pub forms: Vec<IrExpr>,
}
