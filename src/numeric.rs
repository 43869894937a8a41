//! The uncertainty number systems: fourteen tagged variants, each with a
//! validating constructor and the operations defined for it. The variant set
//! is closed, so everything dispatches on the tag; there is no trait object
//! in sight.
//!
//! Sampling draws exclusively from the threaded [`Prng`]; normal sampling is
//! Box-Muller, beta sampling is Jöhnk's rejection method.

use std::collections::BTreeSet;
use std::f64::consts::PI;
use std::fmt;

use crate::prng::Prng;

/// Default recursion bound for surreal comparison and approximation.
pub const SURREAL_DEPTH: u32 = 10;

/// Mass assignments may miss 1 by at most this much.
pub const MASS_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub enum NumericError {
    Domain(String),
    /// Dempster combination of totally conflicting evidence.
    TotalConflict,
}

impl fmt::Display for NumericError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericError::Domain(message) => write!(f, "{message}"),
            NumericError::TotalConflict => {
                write!(f, "evidence is in total conflict, nothing survives combination")
            }
        }
    }
}

type NumericResult<T> = Result<T, NumericError>;

fn domain(message: impl Into<String>) -> NumericError {
    NumericError::Domain(message.into())
}

/// A Conway surreal number `{ L | R }`.
#[derive(Debug, Clone, PartialEq)]
pub struct Surreal {
    pub left: Vec<Surreal>,
    pub right: Vec<Surreal>,
}

impl Surreal {
    pub fn zero() -> Self {
        Self {
            left: Vec::new(),
            right: Vec::new(),
        }
    }

    pub fn from_int(n: i64) -> Self {
        let mut current = Self::zero();
        if n >= 0 {
            for _ in 0..n {
                current = Surreal {
                    left: vec![current],
                    right: Vec::new(),
                };
            }
        } else {
            for _ in 0..(-n) {
                current = Surreal {
                    left: Vec::new(),
                    right: vec![current],
                };
            }
        }
        current
    }

    /// Validates the construction invariant: every left option is strictly
    /// below every right option.
    pub fn new(left: Vec<Surreal>, right: Vec<Surreal>) -> NumericResult<Self> {
        for l in &left {
            for r in &right {
                if Surreal::leq(r, l, SURREAL_DEPTH) {
                    return Err(domain(
                        "surreal construction needs every left option below every right option",
                    ));
                }
            }
        }
        Ok(Self { left, right })
    }

    /// `x <= y` iff no left option of `x` dominates `y` and no right option
    /// of `y` is dominated by `x`. Recursion is bounded; at depth zero the
    /// comparison is decided optimistically, making this an approximation of
    /// the true surreal order.
    pub fn leq(x: &Surreal, y: &Surreal, depth: u32) -> bool {
        if depth == 0 {
            return true;
        }
        !x.left.iter().any(|xl| Surreal::leq(y, xl, depth - 1))
            && !y.right.iter().any(|yr| Surreal::leq(yr, x, depth - 1))
    }

    /// Conway addition: `x + y = { xL+y, x+yL | xR+y, x+yR }`.
    pub fn add(x: &Surreal, y: &Surreal, depth: u32) -> Surreal {
        if depth == 0 {
            return Surreal::zero();
        }
        let mut left = Vec::new();
        for xl in &x.left {
            left.push(Surreal::add(xl, y, depth - 1));
        }
        for yl in &y.left {
            left.push(Surreal::add(x, yl, depth - 1));
        }
        let mut right = Vec::new();
        for xr in &x.right {
            right.push(Surreal::add(xr, y, depth - 1));
        }
        for yr in &y.right {
            right.push(Surreal::add(x, yr, depth - 1));
        }
        Surreal { left, right }
    }

    /// Depth-limited approximation converging on dyadic rationals.
    pub fn to_real(&self, depth: u32) -> f64 {
        if self.left.is_empty() && self.right.is_empty() {
            return 0.0;
        }
        let inner = depth.saturating_sub(1);
        let lo = self
            .left
            .iter()
            .map(|l| l.to_real(inner))
            .fold(f64::NEG_INFINITY, f64::max);
        let hi = self
            .right
            .iter()
            .map(|r| r.to_real(inner))
            .fold(f64::INFINITY, f64::min);
        if self.left.is_empty() {
            return hi - 1.0;
        }
        if self.right.is_empty() {
            return lo + 1.0;
        }
        simplest_between(lo, hi, depth)
    }
}

/// The simplest dyadic rational strictly between `lo` and `hi`.
fn simplest_between(lo: f64, hi: f64, depth: u32) -> f64 {
    if !(lo < hi) {
        return (lo + hi) / 2.0;
    }
    if lo < 0.0 && hi > 0.0 {
        return 0.0;
    }
    let candidate = lo.floor() + 1.0;
    if candidate > lo && candidate < hi {
        return candidate;
    }
    let mut step = 1.0;
    for _ in 0..depth {
        step /= 2.0;
        let m = (lo / step).floor() * step + step;
        if m > lo && m < hi {
            return m;
        }
    }
    (lo + hi) / 2.0
}

#[derive(Debug, Clone, PartialEq)]
pub enum Uncertain {
    DistNormal {
        mean: f64,
        std_dev: f64,
    },
    DistBeta {
        alpha: f64,
        beta: f64,
    },
    Affine {
        lo: f64,
        hi: f64,
    },
    FuzzyTriangular {
        a: f64,
        b: f64,
        c: f64,
    },
    SurrealFuzzy {
        a: f64,
        b: f64,
        c: f64,
        epsilon: f64,
    },
    Bayesian {
        prior: f64,
        likelihood: f64,
        evidence: f64,
        posterior: f64,
    },
    Risk {
        samples: Vec<f64>,
        alpha: f64,
    },
    PadicProb {
        base: u32,
        digits: Vec<u32>,
    },
    Lottery {
        outcomes: Vec<f64>,
        weights: Vec<f64>,
    },
    Hyperreal {
        finite: f64,
        infinitesimal: f64,
    },
    SurrealAdv(Surreal),
    PadicAdv {
        prime: u32,
        digits: Vec<u32>,
        valuation: i32,
    },
    Imprecise {
        lo: f64,
        hi: f64,
    },
    DempsterShafer {
        focals: Vec<BTreeSet<String>>,
        masses: Vec<f64>,
    },
}

impl Uncertain {
    pub fn tag(&self) -> &'static str {
        match self {
            Uncertain::DistNormal { .. } => "normal",
            Uncertain::DistBeta { .. } => "beta",
            Uncertain::Affine { .. } => "affine",
            Uncertain::FuzzyTriangular { .. } => "fuzzy",
            Uncertain::SurrealFuzzy { .. } => "surreal-fuzzy",
            Uncertain::Bayesian { .. } => "bayesian",
            Uncertain::Risk { .. } => "risk",
            Uncertain::PadicProb { .. } => "padic",
            Uncertain::Lottery { .. } => "lottery",
            Uncertain::Hyperreal { .. } => "hyperreal",
            Uncertain::SurrealAdv(_) => "surreal",
            Uncertain::PadicAdv { .. } => "padic-adv",
            Uncertain::Imprecise { .. } => "imprecise",
            Uncertain::DempsterShafer { .. } => "dempster-shafer",
        }
    }

    // --- constructors ----------------------------------------------------

    pub fn normal(mean: f64, std_dev: f64) -> NumericResult<Self> {
        if !std_dev.is_finite() || std_dev < 0.0 {
            return Err(domain(format!("normal needs σ ≥ 0, got {std_dev}")));
        }
        Ok(Uncertain::DistNormal { mean, std_dev })
    }

    pub fn beta(alpha: f64, beta: f64) -> NumericResult<Self> {
        if alpha <= 0.0 || beta <= 0.0 {
            return Err(domain(format!("beta needs α > 0 and β > 0, got ({alpha}, {beta})")));
        }
        Ok(Uncertain::DistBeta { alpha, beta })
    }

    pub fn affine(lo: f64, hi: f64) -> NumericResult<Self> {
        if lo > hi {
            return Err(domain(format!("affine interval needs lo ≤ hi, got [{lo}, {hi}]")));
        }
        Ok(Uncertain::Affine { lo, hi })
    }

    pub fn fuzzy(a: f64, b: f64, c: f64) -> NumericResult<Self> {
        if !(a <= b && b <= c) {
            return Err(domain(format!("fuzzy triangle needs a ≤ b ≤ c, got ({a}, {b}, {c})")));
        }
        Ok(Uncertain::FuzzyTriangular { a, b, c })
    }

    pub fn surreal_fuzzy(a: f64, b: f64, c: f64, epsilon: f64) -> NumericResult<Self> {
        if !(a <= b && b <= c) {
            return Err(domain(format!("fuzzy triangle needs a ≤ b ≤ c, got ({a}, {b}, {c})")));
        }
        if epsilon < 0.0 {
            return Err(domain(format!("surreal-fuzzy needs ε ≥ 0, got {epsilon}")));
        }
        Ok(Uncertain::SurrealFuzzy { a, b, c, epsilon })
    }

    pub fn bayesian(prior: f64, likelihood: f64, evidence: f64) -> NumericResult<Self> {
        for (name, v) in [("prior", prior), ("likelihood", likelihood), ("evidence", evidence)] {
            if !(0.0..=1.0).contains(&v) {
                return Err(domain(format!("bayesian {name} must lie in [0, 1], got {v}")));
            }
        }
        let posterior = if evidence <= 0.0 {
            0.0
        } else {
            (likelihood * prior / evidence).clamp(0.0, 1.0)
        };
        Ok(Uncertain::Bayesian {
            prior,
            likelihood,
            evidence,
            posterior,
        })
    }

    pub fn risk(samples: Vec<f64>, alpha: f64) -> NumericResult<Self> {
        if samples.is_empty() {
            return Err(domain("risk needs at least one sample"));
        }
        if !(0.0 < alpha && alpha < 1.0) {
            return Err(domain(format!("risk confidence must lie in (0, 1), got {alpha}")));
        }
        Ok(Uncertain::Risk { samples, alpha })
    }

    pub fn padic(base: u32, digits: Vec<u32>) -> NumericResult<Self> {
        if base < 2 {
            return Err(domain(format!("p-adic base must be at least 2, got {base}")));
        }
        if let Some(bad) = digits.iter().find(|d| **d >= base) {
            return Err(domain(format!("digit {bad} is out of range for base {base}")));
        }
        Ok(Uncertain::PadicProb { base, digits })
    }

    pub fn lottery(outcomes: Vec<f64>, weights: Vec<f64>) -> NumericResult<Self> {
        if outcomes.len() != weights.len() {
            return Err(domain(format!(
                "lottery needs matching lengths, got {} outcomes and {} weights",
                outcomes.len(),
                weights.len()
            )));
        }
        if weights.iter().any(|w| *w < 0.0) {
            return Err(domain("lottery weights must be non-negative"));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(domain("lottery weights must have a positive total"));
        }
        Ok(Uncertain::Lottery { outcomes, weights })
    }

    pub fn hyperreal(finite: f64, infinitesimal: f64) -> Self {
        Uncertain::Hyperreal {
            finite,
            infinitesimal,
        }
    }

    pub fn surreal(left: Vec<Surreal>, right: Vec<Surreal>) -> NumericResult<Self> {
        Ok(Uncertain::SurrealAdv(Surreal::new(left, right)?))
    }

    pub fn padic_adv(prime: u32, digits: Vec<u32>, valuation: i32) -> NumericResult<Self> {
        if !is_prime(prime) {
            return Err(domain(format!("{prime} is not prime")));
        }
        if let Some(bad) = digits.iter().find(|d| **d >= prime) {
            return Err(domain(format!("digit {bad} is out of range for prime {prime}")));
        }
        Ok(Uncertain::PadicAdv {
            prime,
            digits,
            valuation,
        })
    }

    pub fn imprecise(lo: f64, hi: f64) -> NumericResult<Self> {
        if !(0.0 <= lo && lo <= hi && hi <= 1.0) {
            return Err(domain(format!(
                "imprecise probability needs 0 ≤ lo ≤ hi ≤ 1, got [{lo}, {hi}]"
            )));
        }
        Ok(Uncertain::Imprecise { lo, hi })
    }

    pub fn dempster_shafer(
        focals: Vec<BTreeSet<String>>,
        masses: Vec<f64>,
    ) -> NumericResult<Self> {
        if focals.len() != masses.len() {
            return Err(domain(format!(
                "dempster-shafer needs matching lengths, got {} focal elements and {} masses",
                focals.len(),
                masses.len()
            )));
        }
        if focals.is_empty() {
            return Err(domain("dempster-shafer needs at least one focal element"));
        }
        if masses.iter().any(|m| *m < 0.0) {
            return Err(domain("dempster-shafer masses must be non-negative"));
        }
        let total: f64 = masses.iter().sum();
        if (total - 1.0).abs() > MASS_TOLERANCE {
            return Err(domain(format!("dempster-shafer masses must sum to 1, got {total}")));
        }
        Ok(Uncertain::DempsterShafer { focals, masses })
    }

    // --- arithmetic ------------------------------------------------------

    pub fn add(&self, other: &Uncertain) -> NumericResult<Uncertain> {
        match (self, other) {
            (
                Uncertain::DistNormal { mean: m1, std_dev: s1 },
                Uncertain::DistNormal { mean: m2, std_dev: s2 },
            ) => Ok(Uncertain::DistNormal {
                mean: m1 + m2,
                std_dev: (s1 * s1 + s2 * s2).sqrt(),
            }),
            (Uncertain::Affine { lo: a1, hi: b1 }, Uncertain::Affine { lo: a2, hi: b2 }) => {
                Ok(Uncertain::Affine {
                    lo: a1 + a2,
                    hi: b1 + b2,
                })
            }
            (
                Uncertain::Hyperreal { finite: f1, infinitesimal: e1 },
                Uncertain::Hyperreal { finite: f2, infinitesimal: e2 },
            ) => Ok(Uncertain::Hyperreal {
                finite: f1 + f2,
                infinitesimal: e1 + e2,
            }),
            (Uncertain::SurrealAdv(x), Uncertain::SurrealAdv(y)) => {
                Ok(Uncertain::SurrealAdv(Surreal::add(x, y, SURREAL_DEPTH)))
            }
            (
                Uncertain::PadicAdv { prime: p1, .. },
                Uncertain::PadicAdv { prime: p2, .. },
            ) if p1 == p2 => Ok(self.padic_adv_add(other)),
            _ => Err(domain(format!(
                "addition is not defined between {} and {}",
                self.tag(),
                other.tag()
            ))),
        }
    }

    pub fn mul(&self, other: &Uncertain) -> NumericResult<Uncertain> {
        match (self, other) {
            (
                Uncertain::DistNormal { mean: m1, std_dev: s1 },
                Uncertain::DistNormal { mean: m2, std_dev: s2 },
            ) => {
                // Independence assumed: E[XY] = μ₁μ₂ and the first-order
                // variance expansion plus the cross term.
                let variance = m1 * m1 * s2 * s2 + m2 * m2 * s1 * s1 + s1 * s1 * s2 * s2;
                Ok(Uncertain::DistNormal {
                    mean: m1 * m2,
                    std_dev: variance.sqrt(),
                })
            }
            (Uncertain::Affine { lo: a1, hi: b1 }, Uncertain::Affine { lo: a2, hi: b2 }) => {
                let corners = [a1 * a2, a1 * b2, b1 * a2, b1 * b2];
                Ok(Uncertain::Affine {
                    lo: corners.iter().cloned().fold(f64::INFINITY, f64::min),
                    hi: corners.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                })
            }
            (
                Uncertain::Hyperreal { finite: f1, infinitesimal: e1 },
                Uncertain::Hyperreal { finite: f2, infinitesimal: e2 },
            ) => Ok(Uncertain::Hyperreal {
                // ε² terms vanish.
                finite: f1 * f2,
                infinitesimal: f1 * e2 + f2 * e1,
            }),
            _ => Err(domain(format!(
                "multiplication is not defined between {} and {}",
                self.tag(),
                other.tag()
            ))),
        }
    }

    /// Valuation-aligned addition with carries mod the prime; leading zero
    /// digits are normalized away by bumping the valuation.
    fn padic_adv_add(&self, other: &Uncertain) -> Uncertain {
        let (Uncertain::PadicAdv { prime, digits: d1, valuation: v1 },
             Uncertain::PadicAdv { digits: d2, valuation: v2, .. }) = (self, other)
        else {
            unreachable!("caller matched the tags");
        };
        let prime = *prime;
        let start = (*v1).min(*v2);
        let end = (*v1 + d1.len() as i32).max(*v2 + d2.len() as i32);
        let mut digits = Vec::with_capacity((end - start) as usize + 1);
        let mut carry = 0u32;
        for position in start..end {
            let a = digit_at(d1, *v1, position);
            let b = digit_at(d2, *v2, position);
            let total = a + b + carry;
            digits.push(total % prime);
            carry = total / prime;
        }
        if carry > 0 {
            digits.push(carry);
        }
        let mut valuation = start;
        while digits.first() == Some(&0) && digits.len() > 1 {
            digits.remove(0);
            valuation += 1;
        }
        Uncertain::PadicAdv {
            prime,
            digits,
            valuation,
        }
    }

    // --- sampling --------------------------------------------------------

    /// Draw one value; defined for the distribution-like variants.
    pub fn sample(&self, prng: &mut Prng) -> NumericResult<f64> {
        match self {
            Uncertain::DistNormal { mean, std_dev } => {
                Ok(mean + std_dev * standard_normal(prng))
            }
            Uncertain::DistBeta { alpha, beta } => Ok(johnk_beta(prng, *alpha, *beta)),
            Uncertain::Affine { lo, hi } => Ok(lo + prng.next_f64() * (hi - lo)),
            Uncertain::FuzzyTriangular { a, b, c } => Ok(triangular(prng, *a, *b, *c)),
            Uncertain::SurrealFuzzy { a, b, c, epsilon } => {
                Ok(triangular(prng, a - epsilon, *b, c + epsilon))
            }
            Uncertain::Lottery { outcomes, weights } => {
                Ok(outcomes[prng.pick_weighted(weights)])
            }
            Uncertain::Imprecise { lo, hi } => Ok(lo + prng.next_f64() * (hi - lo)),
            Uncertain::Risk { samples, .. } => {
                Ok(samples[prng.next_below(samples.len() as u64) as usize])
            }
            _ => Err(domain(format!("{} values cannot be sampled", self.tag()))),
        }
    }

    // --- queries ---------------------------------------------------------

    pub fn membership(&self, x: f64) -> NumericResult<f64> {
        match self {
            Uncertain::FuzzyTriangular { a, b, c } => Ok(triangle_membership(*a, *b, *c, x)),
            Uncertain::SurrealFuzzy { a, b, c, epsilon } => {
                Ok(triangle_membership(a - epsilon, *b, c + epsilon, x))
            }
            _ => Err(domain(format!("membership is not defined for {}", self.tag()))),
        }
    }

    pub fn contains(&self, x: f64) -> NumericResult<bool> {
        match self {
            Uncertain::Affine { lo, hi } => Ok(*lo <= x && x <= *hi),
            Uncertain::Imprecise { lo, hi } => Ok(*lo <= x && x <= *hi),
            _ => Err(domain(format!("containment is not defined for {}", self.tag()))),
        }
    }

    /// VaR at the stored confidence: the ⌊(1−α)·n⌋-th ascending order
    /// statistic, clamped into range.
    pub fn value_at_risk(&self) -> NumericResult<f64> {
        match self {
            Uncertain::Risk { samples, alpha } => {
                let mut sorted = samples.clone();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let index = ((1.0 - alpha) * sorted.len() as f64).floor() as usize;
                Ok(sorted[index.min(sorted.len() - 1)])
            }
            _ => Err(domain(format!("value-at-risk needs a risk value, got {}", self.tag()))),
        }
    }

    /// Mean of the tail at or below VaR.
    pub fn conditional_value_at_risk(&self) -> NumericResult<f64> {
        match self {
            Uncertain::Risk { samples, .. } => {
                let var = self.value_at_risk()?;
                let tail: Vec<f64> = samples.iter().copied().filter(|x| *x <= var).collect();
                if tail.is_empty() {
                    Ok(var)
                } else {
                    Ok(tail.iter().sum::<f64>() / tail.len() as f64)
                }
            }
            _ => Err(domain(format!("cvar needs a risk value, got {}", self.tag()))),
        }
    }

    pub fn expected_value(&self) -> NumericResult<f64> {
        match self {
            Uncertain::DistNormal { mean, .. } => Ok(*mean),
            Uncertain::DistBeta { alpha, beta } => Ok(alpha / (alpha + beta)),
            Uncertain::Lottery { outcomes, weights } => {
                let total: f64 = weights.iter().sum();
                Ok(outcomes
                    .iter()
                    .zip(weights)
                    .map(|(o, w)| o * w)
                    .sum::<f64>()
                    / total)
            }
            _ => Err(domain(format!(
                "expected value is not defined for {}",
                self.tag()
            ))),
        }
    }

    pub fn standard_part(&self) -> NumericResult<f64> {
        match self {
            Uncertain::Hyperreal { finite, .. } => Ok(*finite),
            _ => Err(domain(format!("standard part needs a hyperreal, got {}", self.tag()))),
        }
    }

    /// Real value of the digit-expansion variants; `depth` bounds the
    /// surreal approximation.
    pub fn to_real(&self, depth: u32) -> NumericResult<f64> {
        match self {
            Uncertain::PadicProb { base, digits } => {
                let base = *base as f64;
                let mut denom = base;
                let mut sum = 0.0;
                for d in digits {
                    sum += *d as f64 / denom;
                    denom *= base;
                }
                Ok(sum)
            }
            Uncertain::PadicAdv {
                prime,
                digits,
                valuation,
            } => {
                let prime = *prime as f64;
                Ok(digits
                    .iter()
                    .enumerate()
                    .map(|(i, d)| *d as f64 * prime.powi(valuation + i as i32))
                    .sum())
            }
            Uncertain::SurrealAdv(s) => Ok(s.to_real(depth)),
            _ => Err(domain(format!("to-real is not defined for {}", self.tag()))),
        }
    }

    /// Refinement appends one digit to a p-adic probability.
    pub fn refine(&self, digit: u32) -> NumericResult<Uncertain> {
        match self {
            Uncertain::PadicProb { base, digits } => {
                if digit >= *base {
                    return Err(domain(format!("digit {digit} is out of range for base {base}")));
                }
                let mut digits = digits.clone();
                digits.push(digit);
                Ok(Uncertain::PadicProb {
                    base: *base,
                    digits,
                })
            }
            _ => Err(domain(format!("refine needs a p-adic probability, got {}", self.tag()))),
        }
    }

    pub fn posterior(&self) -> NumericResult<f64> {
        match self {
            Uncertain::Bayesian { posterior, .. } => Ok(*posterior),
            _ => Err(domain(format!("posterior needs a bayesian value, got {}", self.tag()))),
        }
    }

    // --- imprecise probability connectives -------------------------------

    pub fn complement(&self) -> NumericResult<Uncertain> {
        match self {
            Uncertain::Imprecise { lo, hi } => Ok(Uncertain::Imprecise {
                lo: 1.0 - hi,
                hi: 1.0 - lo,
            }),
            _ => Err(domain(format!("complement needs an imprecise value, got {}", self.tag()))),
        }
    }

    pub fn imprecise_and(&self, other: &Uncertain) -> NumericResult<Uncertain> {
        match (self, other) {
            (Uncertain::Imprecise { lo: a, hi: b }, Uncertain::Imprecise { lo: c, hi: d }) => {
                Ok(Uncertain::Imprecise {
                    lo: a * c,
                    hi: b * d,
                })
            }
            _ => Err(domain("imprecise conjunction needs two imprecise values")),
        }
    }

    pub fn imprecise_or(&self, other: &Uncertain) -> NumericResult<Uncertain> {
        match (self, other) {
            (Uncertain::Imprecise { lo: a, hi: b }, Uncertain::Imprecise { lo: c, hi: d }) => {
                Ok(Uncertain::Imprecise {
                    lo: a + c - a * c,
                    hi: b + d - b * d,
                })
            }
            _ => Err(domain("imprecise disjunction needs two imprecise values")),
        }
    }

    /// Bayes' rule applied endpoint-wise.
    pub fn imprecise_update(&self, likelihood: f64, evidence: f64) -> NumericResult<Uncertain> {
        match self {
            Uncertain::Imprecise { lo, hi } => {
                if evidence <= 0.0 {
                    return Err(domain("imprecise update needs positive evidence"));
                }
                Ok(Uncertain::Imprecise {
                    lo: (likelihood * lo / evidence).clamp(0.0, 1.0),
                    hi: (likelihood * hi / evidence).clamp(0.0, 1.0),
                })
            }
            _ => Err(domain(format!("imprecise update needs an imprecise value, got {}", self.tag()))),
        }
    }

    // --- Dempster-Shafer -------------------------------------------------

    /// belief(H) = Σ m(F) over focal F ⊆ H.
    pub fn belief(&self, hypothesis: &BTreeSet<String>) -> NumericResult<f64> {
        match self {
            Uncertain::DempsterShafer { focals, masses } => Ok(focals
                .iter()
                .zip(masses)
                .filter(|(f, _)| f.is_subset(hypothesis))
                .map(|(_, m)| m)
                .sum()),
            _ => Err(domain(format!("belief needs a dempster-shafer value, got {}", self.tag()))),
        }
    }

    /// plausibility(H) = Σ m(F) over focal F with F ∩ H ≠ ∅.
    pub fn plausibility(&self, hypothesis: &BTreeSet<String>) -> NumericResult<f64> {
        match self {
            Uncertain::DempsterShafer { focals, masses } => Ok(focals
                .iter()
                .zip(masses)
                .filter(|(f, _)| !f.is_disjoint(hypothesis))
                .map(|(_, m)| m)
                .sum()),
            _ => Err(domain(format!(
                "plausibility needs a dempster-shafer value, got {}",
                self.tag()
            ))),
        }
    }

    /// Dempster's rule: pairwise intersections, mass products, renormalized
    /// over the non-empty intersections. Fails when the conflict is total.
    pub fn ds_combine(&self, other: &Uncertain) -> NumericResult<Uncertain> {
        let (Uncertain::DempsterShafer { focals: f1, masses: m1 },
             Uncertain::DempsterShafer { focals: f2, masses: m2 }) = (self, other)
        else {
            return Err(domain("combination needs two dempster-shafer values"));
        };
        let mut combined: Vec<(BTreeSet<String>, f64)> = Vec::new();
        let mut surviving_mass = 0.0;
        for (fa, ma) in f1.iter().zip(m1) {
            for (fb, mb) in f2.iter().zip(m2) {
                let intersection: BTreeSet<String> = fa.intersection(fb).cloned().collect();
                let product = ma * mb;
                if intersection.is_empty() {
                    continue;
                }
                surviving_mass += product;
                if let Some(entry) = combined.iter_mut().find(|(f, _)| *f == intersection) {
                    entry.1 += product;
                } else {
                    combined.push((intersection, product));
                }
            }
        }
        if surviving_mass <= 0.0 {
            return Err(NumericError::TotalConflict);
        }
        let (focals, masses) = combined
            .into_iter()
            .map(|(f, m)| (f, m / surviving_mass))
            .unzip();
        Ok(Uncertain::DempsterShafer { focals, masses })
    }
}

// --- shared samplers and helpers ------------------------------------------

/// Box-Muller transform; consumes exactly two draws.
fn standard_normal(prng: &mut Prng) -> f64 {
    let u1 = 1.0 - prng.next_f64();
    let u2 = prng.next_f64();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Jöhnk's rejection sampler; correct for all positive shape parameters.
fn johnk_beta(prng: &mut Prng, alpha: f64, beta: f64) -> f64 {
    loop {
        let u = prng.next_f64().powf(1.0 / alpha);
        let v = prng.next_f64().powf(1.0 / beta);
        if u + v <= 1.0 && u + v > 0.0 {
            return u / (u + v);
        }
    }
}

/// Inverse-CDF sampling of the triangular distribution on [a, c], mode b.
fn triangular(prng: &mut Prng, a: f64, b: f64, c: f64) -> f64 {
    if c <= a {
        return a;
    }
    let u = prng.next_f64();
    let cut = (b - a) / (c - a);
    if u < cut {
        a + (u * (c - a) * (b - a)).sqrt()
    } else {
        c - ((1.0 - u) * (c - a) * (c - b)).sqrt()
    }
}

/// Piecewise-linear membership, rising a→b, falling b→c, zero outside.
fn triangle_membership(a: f64, b: f64, c: f64, x: f64) -> f64 {
    if x <= a || x >= c {
        if x == b {
            // Degenerate triangle: the point itself has full membership.
            1.0
        } else {
            0.0
        }
    } else if x <= b {
        if b == a {
            1.0
        } else {
            (x - a) / (b - a)
        }
    } else if c == b {
        1.0
    } else {
        (c - x) / (c - b)
    }
}

fn digit_at(digits: &[u32], valuation: i32, position: i32) -> u32 {
    let offset = position - valuation;
    if offset < 0 {
        return 0;
    }
    digits.get(offset as usize).copied().unwrap_or(0)
}

fn is_prime(n: u32) -> bool {
    if n < 2 {
        return false;
    }
    let mut d = 2u32;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 1;
    }
    true
}

impl fmt::Display for Uncertain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uncertain::DistNormal { mean, std_dev } => write!(f, "normal({mean}, {std_dev})"),
            Uncertain::DistBeta { alpha, beta } => write!(f, "beta({alpha}, {beta})"),
            Uncertain::Affine { lo, hi } => write!(f, "affine[{lo}, {hi}]"),
            Uncertain::FuzzyTriangular { a, b, c } => write!(f, "fuzzy({a}, {b}, {c})"),
            Uncertain::SurrealFuzzy { a, b, c, epsilon } => {
                write!(f, "surreal-fuzzy({a}, {b}, {c}, ε={epsilon})")
            }
            Uncertain::Bayesian { posterior, .. } => write!(f, "bayesian(posterior={posterior})"),
            Uncertain::Risk { samples, alpha } => {
                write!(f, "risk({} samples, α={alpha})", samples.len())
            }
            Uncertain::PadicProb { base, digits } => {
                write!(f, "padic(base {base}:")?;
                for d in digits {
                    write!(f, " {d}")?;
                }
                write!(f, ")")
            }
            Uncertain::Lottery { outcomes, .. } => {
                write!(f, "lottery({} outcomes)", outcomes.len())
            }
            Uncertain::Hyperreal { finite, infinitesimal } => {
                write!(f, "{finite} + {infinitesimal}ε")
            }
            Uncertain::SurrealAdv(s) => write!(f, "surreal(≈{})", s.to_real(SURREAL_DEPTH)),
            Uncertain::PadicAdv { prime, digits, valuation } => {
                write!(f, "padic-adv(p={prime}, v={valuation}:")?;
                for d in digits {
                    write!(f, " {d}")?;
                }
                write!(f, ")")
            }
            Uncertain::Imprecise { lo, hi } => write!(f, "imprecise[{lo}, {hi}]"),
            Uncertain::DempsterShafer { focals, .. } => {
                write!(f, "dempster-shafer({} focal elements)", focals.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn constructors_enforce_invariants() {
        assert!(Uncertain::normal(0.0, -1.0).is_err());
        assert!(Uncertain::beta(0.0, 1.0).is_err());
        assert!(Uncertain::affine(2.0, 1.0).is_err());
        assert!(Uncertain::fuzzy(1.0, 0.0, 2.0).is_err());
        assert!(Uncertain::risk(vec![], 0.95).is_err());
        assert!(Uncertain::risk(vec![1.0], 1.5).is_err());
        assert!(Uncertain::padic(1, vec![0]).is_err());
        assert!(Uncertain::padic(5, vec![5]).is_err());
        assert!(Uncertain::padic_adv(4, vec![1], 0).is_err());
        assert!(Uncertain::imprecise(0.8, 0.2).is_err());
        assert!(Uncertain::lottery(vec![1.0], vec![-1.0]).is_err());
        assert!(Uncertain::dempster_shafer(vec![set(&["a"])], vec![0.5]).is_err());
    }

    #[test]
    fn normal_addition_sums_means_and_variances() {
        let a = Uncertain::normal(1.0, 3.0).unwrap();
        let b = Uncertain::normal(2.0, 4.0).unwrap();
        match a.add(&b).unwrap() {
            Uncertain::DistNormal { mean, std_dev } => {
                assert_eq!(mean, 3.0);
                assert!((std_dev - 5.0).abs() < 1e-12);
            }
            other => panic!("expected normal, got {other:?}"),
        }
    }

    #[test]
    fn normal_product_variance_has_cross_term() {
        let a = Uncertain::normal(2.0, 1.0).unwrap();
        let b = Uncertain::normal(3.0, 2.0).unwrap();
        match a.mul(&b).unwrap() {
            Uncertain::DistNormal { mean, std_dev } => {
                assert_eq!(mean, 6.0);
                // 4·4 + 9·1 + 1·4 = 29
                assert!((std_dev * std_dev - 29.0).abs() < 1e-9);
            }
            other => panic!("expected normal, got {other:?}"),
        }
    }

    #[test]
    fn affine_multiplication_takes_corner_extremes() {
        let a = Uncertain::affine(-1.0, 2.0).unwrap();
        let b = Uncertain::affine(3.0, 4.0).unwrap();
        match a.mul(&b).unwrap() {
            Uncertain::Affine { lo, hi } => {
                assert_eq!(lo, -4.0);
                assert_eq!(hi, 8.0);
            }
            other => panic!("expected affine, got {other:?}"),
        }
    }

    #[test]
    fn fuzzy_membership_is_piecewise_linear() {
        let tri = Uncertain::fuzzy(0.0, 1.0, 3.0).unwrap();
        assert_eq!(tri.membership(-1.0).unwrap(), 0.0);
        assert_eq!(tri.membership(0.5).unwrap(), 0.5);
        assert_eq!(tri.membership(1.0).unwrap(), 1.0);
        assert_eq!(tri.membership(2.0).unwrap(), 0.5);
        assert_eq!(tri.membership(4.0).unwrap(), 0.0);
    }

    #[test]
    fn surreal_fuzzy_relaxes_the_support() {
        let plain = Uncertain::fuzzy(1.0, 2.0, 3.0).unwrap();
        let relaxed = Uncertain::surreal_fuzzy(1.0, 2.0, 3.0, 0.5).unwrap();
        assert_eq!(plain.membership(0.8).unwrap(), 0.0);
        assert!(relaxed.membership(0.8).unwrap() > 0.0);
    }

    #[test]
    fn bayesian_posterior_is_clamped_bayes() {
        match Uncertain::bayesian(0.5, 0.8, 0.4).unwrap() {
            Uncertain::Bayesian { posterior, .. } => assert!((posterior - 1.0).abs() < 1e-12),
            other => panic!("expected bayesian, got {other:?}"),
        }
        match Uncertain::bayesian(0.3, 0.5, 0.6).unwrap() {
            Uncertain::Bayesian { posterior, .. } => assert!((posterior - 0.25).abs() < 1e-12),
            other => panic!("expected bayesian, got {other:?}"),
        }
    }

    #[test]
    fn var_matches_the_reference_order_statistic() {
        let samples = vec![-10.0, -5.0, -2.0, 0.0, 1.0, 2.0, 3.0, 5.0, 8.0, 10.0];
        let risk = Uncertain::risk(samples, 0.95).unwrap();
        assert_eq!(risk.value_at_risk().unwrap(), -10.0);
        assert!(risk.conditional_value_at_risk().unwrap() <= risk.value_at_risk().unwrap());
    }

    #[test]
    fn var_moves_with_confidence() {
        let samples: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let lo = Uncertain::risk(samples.clone(), 0.99).unwrap();
        let hi = Uncertain::risk(samples, 0.5).unwrap();
        assert!(lo.value_at_risk().unwrap() <= hi.value_at_risk().unwrap());
    }

    #[test]
    fn padic_to_real_matches_expansion() {
        let p = Uncertain::padic(5, vec![2, 0, 1]).unwrap();
        let expected = 2.0 / 5.0 + 0.0 / 25.0 + 1.0 / 125.0;
        assert!((p.to_real(SURREAL_DEPTH).unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn padic_refinement_appends_a_digit() {
        let p = Uncertain::padic(5, vec![2]).unwrap();
        let refined = p.refine(3).unwrap();
        match refined {
            Uncertain::PadicProb { digits, .. } => assert_eq!(digits, vec![2, 3]),
            other => panic!("expected padic, got {other:?}"),
        }
        assert!(p.refine(5).is_err());
    }

    #[test]
    fn padic_adv_addition_carries_mod_prime() {
        let a = Uncertain::padic_adv(5, vec![4, 4], 0).unwrap();
        let b = Uncertain::padic_adv(5, vec![1], 0).unwrap();
        match a.add(&b).unwrap() {
            Uncertain::PadicAdv { digits, valuation, .. } => {
                // 44₅ + 1₅ = (4+1, 4) with carry: 0, 0, 1 → valuation bumps.
                assert_eq!(valuation, 2);
                assert_eq!(digits, vec![1]);
            }
            other => panic!("expected padic-adv, got {other:?}"),
        }
    }

    #[test]
    fn lottery_expected_value_normalizes_weights() {
        let lottery = Uncertain::lottery(vec![10.0, 20.0], vec![1.0, 3.0]).unwrap();
        assert!((lottery.expected_value().unwrap() - 17.5).abs() < 1e-12);
    }

    #[test]
    fn hyperreal_mul_drops_epsilon_squared() {
        let a = Uncertain::hyperreal(2.0, 1.0);
        let b = Uncertain::hyperreal(3.0, 2.0);
        match a.mul(&b).unwrap() {
            Uncertain::Hyperreal { finite, infinitesimal } => {
                assert_eq!(finite, 6.0);
                assert_eq!(infinitesimal, 7.0);
            }
            other => panic!("expected hyperreal, got {other:?}"),
        }
        assert_eq!(a.standard_part().unwrap(), 2.0);
    }

    #[test]
    fn surreal_integers_order_and_approximate() {
        let zero = Surreal::from_int(0);
        let one = Surreal::from_int(1);
        let two = Surreal::from_int(2);
        assert!(Surreal::leq(&zero, &one, SURREAL_DEPTH));
        assert!(Surreal::leq(&one, &two, SURREAL_DEPTH));
        assert!(!Surreal::leq(&two, &one, SURREAL_DEPTH));
        assert_eq!(one.to_real(SURREAL_DEPTH), 1.0);
        assert_eq!(Surreal::from_int(-2).to_real(SURREAL_DEPTH), -2.0);
    }

    #[test]
    fn surreal_half_is_dyadic() {
        // { 0 | 1 } is one half.
        let half = Surreal::new(vec![Surreal::from_int(0)], vec![Surreal::from_int(1)]).unwrap();
        assert_eq!(half.to_real(SURREAL_DEPTH), 0.5);
    }

    #[test]
    fn surreal_addition_follows_conway() {
        let one = Surreal::from_int(1);
        let sum = Surreal::add(&one, &one, SURREAL_DEPTH);
        assert!((sum.to_real(SURREAL_DEPTH) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn surreal_rejects_inverted_options() {
        assert!(Surreal::new(vec![Surreal::from_int(1)], vec![Surreal::from_int(0)]).is_err());
    }

    #[test]
    fn imprecise_connectives_use_independence_bounds() {
        let a = Uncertain::imprecise(0.2, 0.4).unwrap();
        let b = Uncertain::imprecise(0.5, 0.5).unwrap();
        match a.imprecise_and(&b).unwrap() {
            Uncertain::Imprecise { lo, hi } => {
                assert!((lo - 0.1).abs() < 1e-12);
                assert!((hi - 0.2).abs() < 1e-12);
            }
            other => panic!("expected imprecise, got {other:?}"),
        }
        match a.complement().unwrap() {
            Uncertain::Imprecise { lo, hi } => {
                assert!((lo - 0.6).abs() < 1e-12);
                assert!((hi - 0.8).abs() < 1e-12);
            }
            other => panic!("expected imprecise, got {other:?}"),
        }
    }

    #[test]
    fn belief_and_plausibility_bracket_each_other() {
        let ds = Uncertain::dempster_shafer(
            vec![set(&["a"]), set(&["a", "b"]), set(&["b"])],
            vec![0.5, 0.3, 0.2],
        )
        .unwrap();
        let h = set(&["a"]);
        let belief = ds.belief(&h).unwrap();
        let plausibility = ds.plausibility(&h).unwrap();
        assert!((belief - 0.5).abs() < 1e-12);
        assert!((plausibility - 0.8).abs() < 1e-12);
        assert!(belief <= plausibility);
    }

    #[test]
    fn dempster_combination_renormalizes() {
        let d1 =
            Uncertain::dempster_shafer(vec![set(&["a"]), set(&["a", "b"])], vec![0.6, 0.4]).unwrap();
        let d2 =
            Uncertain::dempster_shafer(vec![set(&["a"]), set(&["b"])], vec![0.7, 0.3]).unwrap();
        match d1.ds_combine(&d2).unwrap() {
            Uncertain::DempsterShafer { masses, .. } => {
                let total: f64 = masses.iter().sum();
                assert!((total - 1.0).abs() < 1e-9);
            }
            other => panic!("expected dempster-shafer, got {other:?}"),
        }
    }

    #[test]
    fn total_conflict_fails_combination() {
        let d1 = Uncertain::dempster_shafer(vec![set(&["a"])], vec![1.0]).unwrap();
        let d2 = Uncertain::dempster_shafer(vec![set(&["b"])], vec![1.0]).unwrap();
        assert_eq!(d1.ds_combine(&d2).unwrap_err(), NumericError::TotalConflict);
    }

    #[test]
    fn samplers_hit_their_supports() {
        let mut prng = Prng::seed(1234);
        let normal = Uncertain::normal(5.0, 0.0).unwrap();
        assert_eq!(normal.sample(&mut prng).unwrap(), 5.0);

        let affine = Uncertain::affine(2.0, 3.0).unwrap();
        for _ in 0..100 {
            let x = affine.sample(&mut prng).unwrap();
            assert!((2.0..3.0).contains(&x));
        }

        let beta = Uncertain::beta(2.0, 5.0).unwrap();
        let mut total = 0.0;
        for _ in 0..2000 {
            let x = beta.sample(&mut prng).unwrap();
            assert!((0.0..=1.0).contains(&x));
            total += x;
        }
        // Mean of Beta(2, 5) is 2/7; a loose distributional check only.
        assert!((total / 2000.0 - 2.0 / 7.0).abs() < 0.05);

        let fuzzy = Uncertain::fuzzy(0.0, 1.0, 2.0).unwrap();
        for _ in 0..100 {
            let x = fuzzy.sample(&mut prng).unwrap();
            assert!((0.0..=2.0).contains(&x));
        }
    }

    #[test]
    fn sampling_is_deterministic_under_seed() {
        let normal = Uncertain::normal(0.0, 1.0).unwrap();
        let mut a = Prng::seed(9);
        let mut b = Prng::seed(9);
        for _ in 0..100 {
            assert_eq!(normal.sample(&mut a).unwrap(), normal.sample(&mut b).unwrap());
        }
    }
}
