//! Summation over the slots of an indexed variable.

use core::fmt;
use std::rc::Rc;

use crate::atoms::Atom;
use crate::atoms::variable::{Index, IndexedVariable};
use crate::error::Result;

/// Builds the addend for the slot an [`Index`] currently points at.
pub type TermBuilder = Rc<dyn Fn(&Index) -> Atom>;

/// `Σ_slot term(slot)` over every slot of `over`.
#[derive(Clone)]
pub struct SumOf {
    over: IndexedVariable,
    term: TermBuilder,
}

impl SumOf {
    pub fn new(over: &IndexedVariable, term: impl Fn(&Index) -> Atom + 'static) -> Self {
        Self {
            over: over.clone(),
            term: Rc::new(term),
        }
    }

    /// Variable whose cursor drives the loop.
    #[must_use]
    pub fn over(&self) -> &IndexedVariable {
        &self.over
    }

    /// Moves `over`'s cursor across every slot; the caller sees it unchanged
    /// afterwards, including on early error return.
    pub fn eval(&self) -> Result<f64> {
        let _guard = self.over.scope();
        let term = (self.term)(&self.over.index());

        let mut sum = 0.0;
        for slot in 0..self.over.len() {
            self.over.set_current_index(slot);
            sum += term.eval()?;
        }
        Ok(sum)
    }

    /// Derivative of the single addend that can depend on the slot being
    /// differentiated: the current one, or the target slot if one is set.
    ///
    /// Other addends are not summed in. Softmax and cross-entropy rely on
    /// exactly this single-term behaviour.
    #[must_use]
    pub fn derivative(&self) -> Atom {
        let index = self.over.index();
        let index = if index.target().is_some() {
            index.pinned()
        } else {
            index
        };
        (self.term)(&index).derivative()
    }
}

impl fmt::Debug for SumOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SumOf")
            .field("over", &self.over.name())
            .field("len", &self.over.len())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for SumOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sum_{}({})", self.over.name(), (self.term)(&self.over.index()))
    }
}
