//! Expression trees with symbolic derivatives.
//!
//! # Atoms
//!
//! An [`Atom`] is one node of a scalar expression. Every node supports two
//! operations:
//!
//! - [`Atom::eval`] computes the value from whatever the variables currently
//!   hold. It never changes the tree.
//! - [`Atom::derivative`] builds a *new* tree for the derivative with respect
//!   to whichever variables are flagged "in respect to". The original is left
//!   untouched and the result can be evaluated on its own.
//!
//! ## Differentiation rules
//!
//! The rules are tree rewrites, not a general computer algebra system:
//!
//! - sums and differences distribute;
//! - products and quotients use a one-sided shortcut whenever one operand is
//!   a constant or a variable that is not being differentiated
//!   ([`Atom::is_constant_or_variable`]), and the full rule otherwise;
//! - `exp` and `log` apply the chain rule;
//! - `relu` differentiates into a lazy [`Conditional`], so the branch that is
//!   not taken is never evaluated.
//!
//! ## Numeric guards
//!
//! Denominators closer than `1e-8` to zero are pushed to `±1e-8` and `log`
//! arguments are floored at `1e-11`. Neither raises an error.
//!
//! ## Example
//!
//! ```rust
//! use atomgrad::atoms::ScalarVariable;
//!
//! let x = ScalarVariable::new("x");
//! x.set_in_respect_to(true);
//! let cube = x.atom() * x.atom() * x.atom();
//! let slope = cube.derivative().eval_with(&[(&x, 3.0)]).unwrap();
//! assert!((slope - 27.0).abs() < 1e-12);
//! ```

mod reduction;
mod variable;

pub use reduction::{SumOf, TermBuilder};
pub use variable::{CursorGuard, Index, IndexedRef, IndexedVariable, ScalarVariable};

use core::fmt;
use core::ops::{Add, Div, Mul, Neg, Sub};

use crate::error::Result;
use crate::functions::{clamp_denominator, floor_log_argument};

/// Test a [`Conditional`] applies to its subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// The subject evaluates to a strictly positive value.
    Positive,
    /// The subject is a variable read at the slot currently differentiated against.
    Seeded,
}

impl Predicate {
    fn holds(self, subject: &Atom) -> Result<bool> {
        match self {
            Self::Positive => Ok(subject.eval()? > 0.0),
            Self::Seeded => Ok(subject.is_seeded()),
        }
    }
}

/// Lazily picks one of two branches; only the chosen one is evaluated.
#[derive(Debug, Clone)]
pub struct Conditional {
    subject: Box<Atom>,
    predicate: Predicate,
    then: Box<Atom>,
    otherwise: Box<Atom>,
}

impl Conditional {
    pub fn new(subject: Atom, predicate: Predicate, then: Atom, otherwise: Atom) -> Self {
        Self {
            subject: Box::new(subject),
            predicate,
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    fn eval(&self) -> Result<f64> {
        if self.predicate.holds(&self.subject)? {
            self.then.eval()
        } else {
            self.otherwise.eval()
        }
    }

    fn derivative(&self) -> Atom {
        Atom::Conditional(Self {
            subject: self.subject.clone(),
            predicate: self.predicate,
            then: Box::new(self.then.derivative()),
            otherwise: Box::new(self.otherwise.derivative()),
        })
    }
}

/// A node of a scalar expression tree.
#[derive(Debug, Clone)]
pub enum Atom {
    Constant(f64),
    Variable(ScalarVariable),
    Indexed(IndexedRef),
    Sum(Vec<Atom>),
    Subtraction(Box<Atom>, Box<Atom>),
    Multiplication(Box<Atom>, Box<Atom>),
    Division(Box<Atom>, Box<Atom>),
    Exp(Box<Atom>),
    Log(Box<Atom>),
    Relu(Box<Atom>),
    Conditional(Conditional),
    SumOf(SumOf),
}

impl Atom {
    #[must_use]
    pub const fn constant(value: f64) -> Self {
        Self::Constant(value)
    }

    #[must_use]
    pub fn exp(inner: impl Into<Self>) -> Self {
        Self::Exp(Box::new(inner.into()))
    }

    /// Natural logarithm.
    #[must_use]
    pub fn log(inner: impl Into<Self>) -> Self {
        Self::Log(Box::new(inner.into()))
    }

    #[must_use]
    pub fn relu(inner: impl Into<Self>) -> Self {
        Self::Relu(Box::new(inner.into()))
    }

    /// Reduction over every slot of `over`.
    #[must_use]
    pub fn sum_of(over: &IndexedVariable, term: impl Fn(&Index) -> Self + 'static) -> Self {
        Self::SumOf(SumOf::new(over, term))
    }

    /// Evaluates with the currently bound variable state.
    ///
    /// # Errors
    ///
    /// [`NetError::UnboundVariable`](crate::NetError::UnboundVariable) when a
    /// scalar variable has no value, and
    /// [`NetError::IndexOutOfBounds`](crate::NetError::IndexOutOfBounds) when an
    /// indexed variable is read past its end.
    pub fn eval(&self) -> Result<f64> {
        match self {
            Self::Constant(value) => Ok(*value),
            Self::Variable(var) => var.eval(),
            Self::Indexed(slot) => slot.eval(),
            Self::Sum(terms) => terms.iter().try_fold(0.0, |acc, t| t.eval().map(|v| acc + v)),
            Self::Subtraction(a, b) => Ok(a.eval()? - b.eval()?),
            Self::Multiplication(a, b) => Ok(a.eval()? * b.eval()?),
            Self::Division(a, b) => {
                let denominator = clamp_denominator(b.eval()?);
                Ok(a.eval()? / denominator)
            }
            Self::Exp(p) => Ok(p.eval()?.exp()),
            Self::Log(p) => Ok(floor_log_argument(p.eval()?).ln()),
            Self::Relu(p) => {
                let value = p.eval()?;
                Ok(if value > 0.0 { value } else { 0.0 })
            }
            Self::Conditional(cond) => cond.eval(),
            Self::SumOf(sum) => sum.eval(),
        }
    }

    /// Binds every listed variable, then evaluates.
    ///
    /// # Errors
    ///
    /// Same as [`Atom::eval`].
    pub fn eval_with(&self, bindings: &[(&ScalarVariable, f64)]) -> Result<f64> {
        for (var, value) in bindings {
            var.bind(*value);
        }
        self.eval()
    }

    /// Symbolic derivative with respect to the currently flagged variables.
    #[must_use]
    pub fn derivative(&self) -> Self {
        match self {
            Self::Constant(_) => Self::Constant(0.0),
            Self::Variable(var) => Self::Constant(if var.is_in_respect_to() { 1.0 } else { 0.0 }),
            Self::Indexed(_) => Self::Conditional(Conditional::new(
                self.clone(),
                Predicate::Seeded,
                Self::Constant(1.0),
                Self::Constant(0.0),
            )),
            Self::Sum(terms) => Self::Sum(terms.iter().map(Self::derivative).collect()),
            Self::Subtraction(a, b) => a.derivative() - b.derivative(),
            Self::Multiplication(a, b) => {
                let (a, b) = (a.as_ref(), b.as_ref());
                if a.is_constant_or_variable() {
                    a.clone() * b.derivative()
                } else if b.is_constant_or_variable() {
                    b.clone() * a.derivative()
                } else {
                    a.clone() * b.derivative() + a.derivative() * b.clone()
                }
            }
            Self::Division(a, b) => {
                let (a, b) = (a.as_ref(), b.as_ref());
                match (a.is_constant_or_variable(), b.is_constant_or_variable()) {
                    (true, true) => Self::Constant(0.0),
                    (true, false) => -((a.clone() * b.derivative()) / (b.clone() * b.clone())),
                    (false, true) => a.derivative() / b.clone(),
                    (false, false) => {
                        (a.derivative() * b.clone() - a.clone() * b.derivative())
                            / (b.clone() * b.clone())
                    }
                }
            }
            Self::Exp(p) => Self::Exp(p.clone()) * p.derivative(),
            Self::Log(p) => {
                if p.is_constant_or_variable() {
                    Self::Constant(0.0)
                } else {
                    p.derivative() / p.as_ref().clone()
                }
            }
            Self::Relu(p) => Self::Conditional(Conditional::new(
                p.as_ref().clone(),
                Predicate::Positive,
                p.derivative(),
                Self::Constant(0.0),
            )),
            Self::Conditional(cond) => cond.derivative(),
            Self::SumOf(sum) => sum.derivative(),
        }
    }

    /// Constants, and plain variables not currently differentiated against.
    #[must_use]
    pub fn is_constant_or_variable(&self) -> bool {
        match self {
            Self::Constant(_) => true,
            Self::Variable(var) => !var.is_in_respect_to(),
            Self::Indexed(slot) => !slot.variable().is_in_respect_to(),
            _ => false,
        }
    }

    fn is_seeded(&self) -> bool {
        match self {
            Self::Variable(var) => var.is_in_respect_to(),
            Self::Indexed(slot) => slot.is_seeded(),
            _ => false,
        }
    }
}

impl From<f64> for Atom {
    fn from(value: f64) -> Self {
        Self::Constant(value)
    }
}

impl From<&ScalarVariable> for Atom {
    fn from(var: &ScalarVariable) -> Self {
        var.atom()
    }
}

impl Add for Atom {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        match self {
            Self::Sum(mut terms) => {
                terms.push(rhs);
                Self::Sum(terms)
            }
            lhs => Self::Sum(vec![lhs, rhs]),
        }
    }
}

impl Sub for Atom {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::Subtraction(Box::new(self), Box::new(rhs))
    }
}

impl Mul for Atom {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self::Multiplication(Box::new(self), Box::new(rhs))
    }
}

impl Div for Atom {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        Self::Division(Box::new(self), Box::new(rhs))
    }
}

impl Neg for Atom {
    type Output = Self;

    fn neg(self) -> Self {
        Self::Constant(0.0) - self
    }
}

macro_rules! __mixed_scalar_ops {
    ($($trait:ident $method:ident),+ $(,)?) => {
        $(
            impl $trait<f64> for Atom {
                type Output = Atom;

                fn $method(self, rhs: f64) -> Atom {
                    $trait::$method(self, Atom::Constant(rhs))
                }
            }

            impl $trait<Atom> for f64 {
                type Output = Atom;

                fn $method(self, rhs: Atom) -> Atom {
                    $trait::$method(Atom::Constant(self), rhs)
                }
            }
        )+
    };
}

__mixed_scalar_ops!(Add add, Sub sub, Mul mul, Div div);

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(value) => write!(f, "{value}"),
            Self::Variable(var) => f.write_str(var.name()),
            Self::Indexed(slot) => write!(f, "{slot}"),
            Self::Sum(terms) => {
                f.write_str("(")?;
                for (i, term) in terms.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" + ")?;
                    }
                    write!(f, "{term}")?;
                }
                f.write_str(")")
            }
            Self::Subtraction(a, b) => write!(f, "({a} - {b})"),
            Self::Multiplication(a, b) => write!(f, "({a} * {b})"),
            Self::Division(a, b) => write!(f, "({a} / {b})"),
            Self::Exp(p) => write!(f, "exp({p})"),
            Self::Log(p) => write!(f, "ln({p})"),
            Self::Relu(p) => write!(f, "relu({p})"),
            Self::Conditional(cond) => write!(
                f,
                "if {:?}({}) then {} else {}",
                cond.predicate, cond.subject, cond.then, cond.otherwise
            ),
            Self::SumOf(sum) => write!(f, "{sum}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_derivative_is_zero() {
        for c in [-3.5, 0.0, 1.0, 1e9] {
            assert_eq!(Atom::constant(c).derivative().eval().unwrap(), 0.0);
        }
    }

    #[test]
    fn one_sided_product_rule_keeps_the_constant_factor() {
        let x = ScalarVariable::new("x");
        x.set_in_respect_to(true);
        let f = 3.0 * x.atom();
        assert_eq!(f.derivative().eval_with(&[(&x, 10.0)]).unwrap(), 3.0);
    }

    #[test]
    fn product_of_two_unflagged_operands_differentiates_to_zero() {
        let x = ScalarVariable::new("x");
        let y = ScalarVariable::new("y");
        let f = x.atom() * y.atom();
        assert_eq!(f.derivative().eval_with(&[(&x, 2.0), (&y, 5.0)]).unwrap(), 0.0);
    }

    #[test]
    fn division_clamps_near_zero_denominators() {
        let tiny = Atom::constant(1.0) / Atom::constant(1e-12);
        assert!((tiny.eval().unwrap() - 1e8).abs() < 1e-3);
        let negative = Atom::constant(1.0) / Atom::constant(-1e-12);
        assert!((negative.eval().unwrap() + 1e8).abs() < 1e-3);
    }

    #[test]
    fn log_floors_non_positive_arguments() {
        let value = Atom::log(Atom::constant(-4.0)).eval().unwrap();
        assert!(value.is_finite());
        assert!((value - 1e-11_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn display_renders_infix() {
        let x = ScalarVariable::new("x");
        let f = Atom::exp(x.atom() * 2.0);
        assert_eq!(f.to_string(), "exp((x * 2))");
    }
}
