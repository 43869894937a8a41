use std::{fmt, rc::Rc};

use indexmap::IndexMap;

use crate::{
    diagnostics::{Diagnostic, DiagnosticKind},
    environment::EnvironmentRef,
    ir::IrExpr,
    numeric::Uncertain,
    span::SourceSpan,
};

/// Exact rational `num/den`, normalized: `den > 0`, gcd 1, sign on the
/// numerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    num: i64,
    den: i64,
}

impl Rational {
    pub fn new(num: i64, den: i64) -> Option<Self> {
        if den == 0 {
            return None;
        }
        let sign = if den < 0 { -1 } else { 1 };
        let g = gcd(num.unsigned_abs(), den.unsigned_abs()) as i64;
        Some(Self {
            num: sign * num / g,
            den: den.abs() / g,
        })
    }

    pub fn from_int(n: i64) -> Self {
        Self { num: n, den: 1 }
    }

    pub fn num(&self) -> i64 {
        self.num
    }

    pub fn den(&self) -> i64 {
        self.den
    }

    pub fn is_integer(&self) -> bool {
        self.den == 1
    }

    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    fn combine(an: i128, ad: i128) -> Option<Rational> {
        if ad == 0 {
            return None;
        }
        let sign: i128 = if ad < 0 { -1 } else { 1 };
        let g = gcd128(an.unsigned_abs(), ad.unsigned_abs()) as i128;
        let num = i64::try_from(sign * an / g).ok()?;
        let den = i64::try_from(ad.abs() / g).ok()?;
        Some(Rational { num, den })
    }

    pub fn add(self, other: Self) -> Option<Self> {
        Self::combine(
            self.num as i128 * other.den as i128 + other.num as i128 * self.den as i128,
            self.den as i128 * other.den as i128,
        )
    }

    pub fn sub(self, other: Self) -> Option<Self> {
        Self::combine(
            self.num as i128 * other.den as i128 - other.num as i128 * self.den as i128,
            self.den as i128 * other.den as i128,
        )
    }

    pub fn mul(self, other: Self) -> Option<Self> {
        Self::combine(
            self.num as i128 * other.num as i128,
            self.den as i128 * other.den as i128,
        )
    }

    pub fn div(self, other: Self) -> Option<Self> {
        if other.num == 0 {
            return None;
        }
        Self::combine(
            self.num as i128 * other.den as i128,
            self.den as i128 * other.num as i128,
        )
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.max(1)
}

fn gcd128(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.max(1)
}

/// Numeric tower used by the arithmetic primitives: exact while it can be,
/// floating once a float enters.
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Rational(Rational),
    Float(f64),
}

impl Number {
    pub fn to_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Rational(r) => r.to_f64(),
            Number::Float(x) => x,
        }
    }

    fn as_rational(self) -> Option<Rational> {
        match self {
            Number::Int(n) => Some(Rational::from_int(n)),
            Number::Rational(r) => Some(r),
            Number::Float(_) => None,
        }
    }

    pub fn add(self, other: Self) -> Result<Self, String> {
        self.exact_or_float(other, Rational::add, |a, b| a + b)
    }

    pub fn sub(self, other: Self) -> Result<Self, String> {
        self.exact_or_float(other, Rational::sub, |a, b| a - b)
    }

    pub fn mul(self, other: Self) -> Result<Self, String> {
        self.exact_or_float(other, Rational::mul, |a, b| a * b)
    }

    pub fn div(self, other: Self) -> Result<Self, String> {
        if let (Some(_), Some(b)) = (self.as_rational(), other.as_rational()) {
            if b.num() == 0 {
                return Err("division by zero".to_string());
            }
        } else if other.to_f64() == 0.0 {
            return Err("division by zero".to_string());
        }
        self.exact_or_float(other, Rational::div, |a, b| a / b)
    }

    /// Exact path when both operands are exact and the result fits; float
    /// arithmetic otherwise.
    fn exact_or_float(
        self,
        other: Self,
        exact: fn(Rational, Rational) -> Option<Rational>,
        float: fn(f64, f64) -> f64,
    ) -> Result<Self, String> {
        if let (Some(a), Some(b)) = (self.as_rational(), other.as_rational()) {
            if let Some(result) = exact(a, b) {
                return Ok(Number::Rational(result).simplify());
            }
        }
        Ok(Number::Float(float(self.to_f64(), other.to_f64())))
    }

    fn simplify(self) -> Self {
        match self {
            Number::Rational(r) if r.is_integer() => Number::Int(r.num()),
            other => other,
        }
    }

    pub fn into_value(self) -> Value {
        match self.simplify() {
            Number::Int(n) => Value::int(n),
            Number::Rational(r) => Value::new(ValueKind::Rational(r)),
            Number::Float(x) => Value::float(x),
        }
    }
}

#[derive(Clone)]
pub struct Value(pub Rc<ValueKind>);

pub enum ValueKind {
    Unit,
    Bool(bool),
    /// The third ternary truth value; `true`/`false` stay booleans and the
    /// logic connectives promote to Kleene logic on contact.
    Unknown,
    Int(i64),
    Rational(Rational),
    Float(f64),
    String(String),
    Symbol(String),
    List(Vec<Value>),
    Record(IndexMap<String, Value>),
    Closure(Closure),
    Uncertain(Uncertain),
    Native(NativeFunction),
}

#[derive(Clone)]
pub struct Closure {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Rc<IrExpr>,
    pub env: EnvironmentRef,
}

/// Native functions receive the runtime context so the entropy-consuming
/// ones can draw from the threaded PRNG and the safety primitives can reach
/// the cool-off state.
#[derive(Clone, Copy)]
pub struct NativeFunction {
    pub name: &'static str,
    pub callback:
        fn(&mut crate::eval::RuntimeCtx, &[Value], SourceSpan) -> Result<Value, Diagnostic>,
}

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self(Rc::new(kind))
    }

    pub fn unit() -> Self {
        Self::new(ValueKind::Unit)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ValueKind::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        Self::new(ValueKind::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(ValueKind::Float(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ValueKind::String(value.into()))
    }

    pub fn symbol(value: impl Into<String>) -> Self {
        Self::new(ValueKind::Symbol(value.into()))
    }

    pub fn list(values: Vec<Value>) -> Self {
        Self::new(ValueKind::List(values))
    }

    pub fn record(entries: IndexMap<String, Value>) -> Self {
        Self::new(ValueKind::Record(entries))
    }

    pub fn uncertain(value: Uncertain) -> Self {
        Self::new(ValueKind::Uncertain(value))
    }

    pub fn is_truthy(&self) -> bool {
        match &*self.0 {
            ValueKind::Unit => false,
            ValueKind::Bool(b) => *b,
            ValueKind::Unknown => false,
            ValueKind::Int(n) => *n != 0,
            ValueKind::Rational(r) => r.num() != 0,
            ValueKind::Float(x) => *x != 0.0,
            ValueKind::String(s) => !s.is_empty(),
            ValueKind::List(items) => !items.is_empty(),
            ValueKind::Record(map) => !map.is_empty(),
            ValueKind::Symbol(_)
            | ValueKind::Closure(_)
            | ValueKind::Uncertain(_)
            | ValueKind::Native(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &*self.0 {
            ValueKind::Unit => "Unit",
            ValueKind::Bool(_) => "Bool",
            ValueKind::Unknown => "Ternary",
            ValueKind::Int(_) => "Int",
            ValueKind::Rational(_) => "Rational",
            ValueKind::Float(_) => "Float",
            ValueKind::String(_) => "String",
            ValueKind::Symbol(_) => "Symbol",
            ValueKind::List(_) => "List",
            ValueKind::Record(_) => "Record",
            ValueKind::Closure(_) => "Function",
            ValueKind::Uncertain(_) => "Uncertain",
            ValueKind::Native(_) => "Function",
        }
    }

    pub fn as_number(&self, span: SourceSpan) -> Result<Number, Diagnostic> {
        match &*self.0 {
            ValueKind::Int(n) => Ok(Number::Int(*n)),
            ValueKind::Rational(r) => Ok(Number::Rational(*r)),
            ValueKind::Float(x) => Ok(Number::Float(*x)),
            _ => Err(Diagnostic::new(
                DiagnosticKind::TypeMismatch,
                format!("expected a number, found {}", self.type_name()),
            )
            .with_span(span)),
        }
    }

    /// Structural equality for data; closures and natives by identity.
    pub fn equals(&self, other: &Value) -> bool {
        match (&*self.0, &*other.0) {
            (ValueKind::Unit, ValueKind::Unit) => true,
            (ValueKind::Bool(a), ValueKind::Bool(b)) => a == b,
            (ValueKind::Int(a), ValueKind::Int(b)) => a == b,
            (ValueKind::Rational(a), ValueKind::Rational(b)) => a == b,
            (ValueKind::Unknown, ValueKind::Unknown) => true,
            (ValueKind::String(a), ValueKind::String(b)) => a == b,
            (ValueKind::Symbol(a), ValueKind::Symbol(b)) => a == b,
            (ValueKind::List(a), ValueKind::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(l, r)| l.equals(r))
            }
            (ValueKind::Record(a), ValueKind::Record(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).map(|rhs| v.equals(rhs)).unwrap_or(false))
            }
            (ValueKind::Uncertain(a), ValueKind::Uncertain(b)) => a == b,
            (ValueKind::Closure(_), ValueKind::Closure(_)) => Rc::ptr_eq(&self.0, &other.0),
            (ValueKind::Native(a), ValueKind::Native(b)) => a.name == b.name,
            // Numbers compare across representations: 1 = 1/1 = 1.0.
            _ => match (self.as_number(SourceSpan::point(0)), other.as_number(SourceSpan::point(0))) {
                (Ok(a), Ok(b)) => a.to_f64() == b.to_f64(),
                _ => false,
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ValueKind::Unit => write!(f, "()"),
            ValueKind::Bool(b) => write!(f, "{b}"),
            ValueKind::Unknown => write!(f, "unknown"),
            ValueKind::Int(n) => write!(f, "{n}"),
            ValueKind::Rational(r) => write!(f, "{}/{}", r.num(), r.den()),
            ValueKind::Float(x) => write!(f, "{x}"),
            ValueKind::String(s) => write!(f, "{s}"),
            ValueKind::Symbol(s) => write!(f, "'{s}"),
            ValueKind::List(items) => {
                write!(f, "[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            ValueKind::Record(map) => {
                write!(f, "{{")?;
                for (idx, (key, value)) in map.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            ValueKind::Closure(c) => write!(
                f,
                "<fn {}>",
                c.name.clone().unwrap_or_else(|| "anonymous".into())
            ),
            ValueKind::Uncertain(u) => write!(f, "{u}"),
            ValueKind::Native(n) => write!(f, "<native fn {}>", n.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rationals_normalize() {
        let r = Rational::new(6, -4).unwrap();
        assert_eq!((r.num(), r.den()), (-3, 2));
    }

    #[test]
    fn rational_arithmetic_is_exact() {
        let a = Rational::new(1, 3).unwrap();
        let b = Rational::new(1, 6).unwrap();
        let sum = a.add(b).unwrap();
        assert_eq!((sum.num(), sum.den()), (1, 2));
    }

    #[test]
    fn integer_division_stays_exact() {
        let q = Number::Int(1).div(Number::Int(3)).unwrap();
        match q {
            Number::Rational(r) => assert_eq!((r.num(), r.den()), (1, 3)),
            other => panic!("expected rational, got {other:?}"),
        }
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(Number::Int(1).div(Number::Int(0)).is_err());
        assert!(Number::Float(1.0).div(Number::Float(0.0)).is_err());
    }

    #[test]
    fn rational_collapses_to_int() {
        let v = Number::Rational(Rational::new(4, 2).unwrap()).into_value();
        assert!(matches!(&*v.0, ValueKind::Int(2)));
    }

    #[test]
    fn numbers_compare_across_representations() {
        assert!(Value::int(1).equals(&Value::new(ValueKind::Rational(
            Rational::new(2, 2).unwrap()
        ))));
        assert!(Value::int(1).equals(&Value::float(1.0)));
    }

    #[test]
    fn float_contaminates_exactness() {
        let out = Number::Int(1).add(Number::Float(0.5)).unwrap();
        assert!(matches!(out, Number::Float(_)));
    }
}
