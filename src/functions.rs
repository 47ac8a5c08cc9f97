//! Activations, losses, and the numeric guards shared with [`crate::atoms`].
//!
//! Each activation has two call surfaces:
//!
//! - a direct numeric form (`&[f64] -> Vec<f64>`) used by the forward pass;
//! - an expression-tree form built over an [`IndexedVariable`], used by the
//!   generic backward path whenever no closed form exists.
//!
//! Losses only have the expression-tree form; the backward pass reads their
//! gradient one output slot at a time.

use core::fmt;
use std::rc::Rc;

use crate::atoms::{Atom, IndexedVariable};

/// Smallest argument handed to `ln`.
pub const LOG_FLOOR: f64 = 1e-11;

/// Magnitude below which denominators are pushed away from zero.
pub const DIVISION_EPSILON: f64 = 1e-8;

/// Pushes `value` to `±DIVISION_EPSILON` when it sits closer to zero.
#[must_use]
pub fn clamp_denominator(value: f64) -> f64 {
    if (0.0..DIVISION_EPSILON).contains(&value) {
        DIVISION_EPSILON
    } else if value < 0.0 && value > -DIVISION_EPSILON {
        -DIVISION_EPSILON
    } else {
        value
    }
}

/// Floors `value` at [`LOG_FLOOR`] so the logarithm stays finite.
#[must_use]
pub fn floor_log_argument(value: f64) -> f64 {
    if value < LOG_FLOOR { LOG_FLOOR } else { value }
}

/// `max(0, x)`.
#[must_use]
pub fn relu(x: f64) -> f64 {
    if x < 0.0 { 0.0 } else { x }
}

/// 1 for `x >= 0` (zero counts as active), else 0.
#[must_use]
pub fn relu_derivative(x: f64) -> f64 {
    if x >= 0.0 { 1.0 } else { 0.0 }
}

/// `softmax(x)_k = exp(x_k) / Σ_j exp(x_j)`.
///
/// The maximum is subtracted first so large inputs do not overflow.
#[must_use]
pub fn softmax(x: &[f64]) -> Vec<f64> {
    let max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = x.iter().map(|&v| (v - max).exp()).collect();
    let total = clamp_denominator(exps.iter().sum());
    exps.into_iter().map(|e| e / total).collect()
}

/// Jacobian entry `∂softmax(x)_o / ∂x_i`.
///
/// # Panics
///
/// Panics if `o` or `i` is out of bounds for `x`.
#[must_use]
pub fn softmax_derivative(x: &[f64], o: usize, i: usize) -> f64 {
    assert!(o < x.len(), "output index {o} out of bounds for length {}", x.len());
    assert!(i < x.len(), "input index {i} out of bounds for length {}", x.len());
    softmax_jacobian(&softmax(x), o, i)
}

/// Jacobian entry from an already computed softmax output `s`.
#[must_use]
pub fn softmax_jacobian(s: &[f64], o: usize, i: usize) -> f64 {
    if o == i {
        s[o] * (1.0 - s[o])
    } else {
        -s[o] * s[i]
    }
}

/// `relu(x[cursor])`.
#[must_use]
pub fn relu_expr(x: &IndexedVariable) -> Atom {
    Atom::relu(x.current())
}

/// `exp(x[cursor]) / Σ_i exp(x[i])`.
#[must_use]
pub fn softmax_expr(x: &IndexedVariable) -> Atom {
    let over = x.clone();
    Atom::exp(x.current()) / Atom::sum_of(x, move |i| Atom::exp(over.at(i)))
}

/// `1 / (1 + exp(-x[cursor]))`.
#[must_use]
pub fn sigmoid_expr(x: &IndexedVariable) -> Atom {
    1.0 / (1.0 + Atom::exp(-x.current()))
}

/// `-Σ_k y_k · ln(ŷ_k)`, iterating over the predicted variable's cursor.
#[must_use]
pub fn cross_entropy(expected: &IndexedVariable, predicted: &IndexedVariable) -> Atom {
    let (y, y_hat) = (expected.clone(), predicted.clone());
    -Atom::sum_of(predicted, move |i| y.at(i) * Atom::log(y_hat.at(i)))
}

/// `Σ_k (y_k - ŷ_k)² / n`.
#[must_use]
pub fn mean_squared_error(expected: &IndexedVariable, predicted: &IndexedVariable) -> Atom {
    let (y, y_hat) = (expected.clone(), predicted.clone());
    let n = predicted.len().max(1) as f64;
    Atom::sum_of(predicted, move |i| {
        let diff = y.at(i) - y_hat.at(i);
        diff.clone() * diff
    }) / n
}

/// Builds an activation expression for the slot under a variable's cursor.
#[derive(Clone)]
pub struct ActivationFn {
    name: &'static str,
    build: Rc<dyn Fn(&IndexedVariable) -> Atom>,
}

impl ActivationFn {
    pub fn new(name: &'static str, build: impl Fn(&IndexedVariable) -> Atom + 'static) -> Self {
        Self {
            name,
            build: Rc::new(build),
        }
    }

    #[must_use]
    pub fn relu() -> Self {
        Self::new("relu", relu_expr)
    }

    #[must_use]
    pub fn softmax() -> Self {
        Self::new("softmax", softmax_expr)
    }

    #[must_use]
    pub fn sigmoid() -> Self {
        Self::new("sigmoid", sigmoid_expr)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn build(&self, x: &IndexedVariable) -> Atom {
        (self.build)(x)
    }
}

impl fmt::Debug for ActivationFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActivationFn").field(&self.name).finish()
    }
}

/// Maps `(expected, predicted)` to a scalar loss expression.
#[derive(Clone)]
pub struct Loss {
    name: &'static str,
    build: Rc<dyn Fn(&IndexedVariable, &IndexedVariable) -> Atom>,
}

impl Loss {
    pub fn new(
        name: &'static str,
        build: impl Fn(&IndexedVariable, &IndexedVariable) -> Atom + 'static,
    ) -> Self {
        Self {
            name,
            build: Rc::new(build),
        }
    }

    #[must_use]
    pub fn cross_entropy() -> Self {
        Self::new("cross_entropy", cross_entropy)
    }

    #[must_use]
    pub fn mean_squared_error() -> Self {
        Self::new("mean_squared_error", mean_squared_error)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn build(&self, expected: &IndexedVariable, predicted: &IndexedVariable) -> Atom {
        (self.build)(expected, predicted)
    }
}

impl fmt::Debug for Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Loss").field(&self.name).finish()
    }
}
